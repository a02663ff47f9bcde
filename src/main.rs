use chordring::{
    chord::{lookup::render_path, DEFAULT_ID_BITS},
    run_local_ring_reporting, run_tcp_node_reporting, LookupReport, NodeId, ReportSink,
    RingConfig,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "chordring")]
#[command(about = "Static Chord ring with finger-table lookups")]
struct Cli {
    /// Log protocol activity at debug level (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every node of a ring in this process
    #[command(name = "simulate")]
    Simulate {
        /// JSON ring description
        #[arg(short = 'c', long = "config", conflicts_with = "inputs", required_unless_present = "inputs")]
        config: Option<PathBuf>,
        /// Directory of in<rank>.txt files
        #[arg(short = 'i', long = "inputs")]
        inputs: Option<PathBuf>,
        /// Identifier width when reading an input directory
        #[arg(short = 'm', long = "bits", default_value_t = DEFAULT_ID_BITS)]
        bits: u32,
    },
    /// Run one node of a ring over TCP
    #[command(name = "node")]
    Node {
        /// JSON ring description with an address for every node
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
        /// Identifier of the node this process plays
        #[arg(long = "id")]
        id: u64,
    },
    /// Generate a random ring and run it in this process
    #[command(name = "random")]
    Random {
        #[arg(short = 'n', long = "nodes", default_value_t = 8)]
        nodes: usize,
        #[arg(short = 'm', long = "bits", default_value_t = 6)]
        bits: u32,
        /// Lookups initiated by every node
        #[arg(short = 'k', long = "lookups", default_value_t = 2)]
        lookups: usize,
        #[arg(short = 's', long = "seed")]
        seed: Option<u64>,
    },
    /// Print successor, predecessor and finger table of every node
    #[command(name = "fingers")]
    Fingers {
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints one line per finished lookup as it arrives. The task ends once
/// every sender is gone.
fn spawn_report_printer() -> (ReportSink, JoinHandle<()>) {
    let (sink, mut reports) = mpsc::unbounded_channel::<LookupReport>();
    let printer = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            println!("{}", report);
        }
    });
    (sink, printer)
}

/// Waits for buffered reports to be printed before the exit status is known.
async fn finish_printing(printer: JoinHandle<()>) {
    if let Err(e) = printer.await {
        error!("Report printer failed: {}", e);
    }
}

fn print_fingers(config: &RingConfig) -> Result<(), String> {
    let ring = config.ring().map_err(|e| format!("Invalid ring: {}", e))?;
    for node in ring.nodes() {
        println!(
            "Node {}: successor {}, predecessor {}",
            node.id, node.successor, node.predecessor
        );
        for (i, finger) in node.finger_table.entries().iter().enumerate() {
            println!("  finger[{}] start {} -> {}", i, finger.start, finger.node);
        }
    }
    let ids: Vec<NodeId> = ring.membership().ids().to_vec();
    println!("Ring: {}", render_path(&ids));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Simulate {
            config,
            inputs,
            bits,
        } => {
            let ring_config = match (config, inputs) {
                (Some(path), _) => RingConfig::from_file(&path),
                (None, Some(dir)) => RingConfig::from_input_dir(&dir, bits),
                (None, None) => return Err("Either --config or --inputs is required".into()),
            }
            .map_err(|e| format!("Failed to load ring: {}", e))?;

            info!("Simulating ring of {} nodes", ring_config.nodes.len());
            let (sink, printer) = spawn_report_printer();
            let result = run_local_ring_reporting(&ring_config, sink).await;
            finish_printing(printer).await;
            result.map(|_| ()).map_err(|e| {
                error!("Simulation failed: {}", e);
                format!("Simulation failed: {}", e)
            })
        }
        Commands::Node { config, id } => {
            let ring_config = RingConfig::from_file(&config)
                .map_err(|e| format!("Failed to load ring: {}", e))?;

            let (sink, printer) = spawn_report_printer();
            let result = run_tcp_node_reporting(&ring_config, NodeId(id), sink).await;
            finish_printing(printer).await;
            result.map_err(|e| {
                error!("Node {} failed: {}", id, e);
                format!("Node {} failed: {}", id, e)
            })?;
            info!("Node {} shut down gracefully", id);
            Ok(())
        }
        Commands::Random {
            nodes,
            bits,
            lookups,
            seed,
        } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let ring_config = RingConfig::random(&mut rng, nodes, bits, lookups)
                .map_err(|e| format!("Failed to generate ring: {}", e))?;
            let ids: Vec<String> = ring_config.nodes.iter().map(|n| n.id.to_string()).collect();
            println!("Members: {}", ids.join(" "));

            // Stream reports while the ring runs
            let (sink, printer) = spawn_report_printer();
            let result = run_local_ring_reporting(&ring_config, sink).await;
            finish_printing(printer).await;
            result
                .map(|_| ())
                .map_err(|e| format!("Simulation failed: {}", e))
        }
        Commands::Fingers { config } => {
            let ring_config = RingConfig::from_file(&config)
                .map_err(|e| format!("Failed to load ring: {}", e))?;
            print_fingers(&ring_config)
        }
    }
}
