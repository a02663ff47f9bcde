//! Ring configuration: member identifiers, their addresses and the keys each
//! member looks up.

use crate::chord::ring::Ring;
use crate::chord::types::{IdSpace, Membership, NodeId};
use crate::chord::DEFAULT_ID_BITS;
use crate::error::{ChordError, ConfigError};
use crate::network::transport::AddressBook;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

fn default_bits() -> u32 {
    DEFAULT_ID_BITS
}

/// A lookup target: either a raw identifier or a name hashed onto the circle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupKey {
    Id(u64),
    Name(String),
}

impl LookupKey {
    pub fn resolve(&self, space: IdSpace) -> Result<NodeId, ChordError> {
        match self {
            LookupKey::Id(id) => space.check(*id),
            LookupKey::Name(name) => Ok(space.hash_key(name.as_bytes())),
        }
    }
}

/// One member of the ring. Members are listed in rank order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u64,
    /// `host:port` this member listens on. Only needed for TCP runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub lookups: Vec<LookupKey>,
}

impl NodeConfig {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            address: None,
            lookups: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_lookups<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        self.lookups.extend(keys.into_iter().map(LookupKey::Id));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Identifier width M; the circle holds `2^M` positions.
    #[serde(default = "default_bits")]
    pub bits: u32,
    pub nodes: Vec<NodeConfig>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            bits: DEFAULT_ID_BITS,
            nodes: Vec::new(),
        }
    }
}

impl RingConfig {
    pub fn new(bits: u32) -> Self {
        Self {
            bits,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Loads a JSON ring description and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: RingConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the per-rank input layout: `in0.txt`, `in1.txt`, ... each
    /// holding the node id, the lookup count, then that many keys.
    pub fn from_input_dir(dir: impl AsRef<Path>, bits: u32) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();

        // Collect the ranks present in the directory
        let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut ranks = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let name = entry.file_name();
            let rank = name
                .to_str()
                .and_then(|n| n.strip_prefix("in"))
                .and_then(|n| n.strip_suffix(".txt"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(rank) = rank {
                ranks.insert(rank);
            }
        }
        if ranks.is_empty() {
            return Err(ConfigError::NoInputs(dir.display().to_string()));
        }

        // Ranks must run 0..n without gaps; read them in order
        let mut config = RingConfig::new(bits);
        for expected in 0..ranks.len() {
            if !ranks.contains(&expected) {
                return Err(ConfigError::MissingRank(expected));
            }
            let path = dir.join(format!("in{}.txt", expected));
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            config.nodes.push(parse_rank_input(&raw).map_err(|reason| ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            })?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn id_space(&self) -> Result<IdSpace, ChordError> {
        IdSpace::new(self.bits)
    }

    pub fn membership(&self) -> Result<Membership, ChordError> {
        Membership::new(self.id_space()?, self.nodes.iter().map(|n| NodeId(n.id)))
    }

    pub fn ring(&self) -> Result<Ring, ChordError> {
        Ring::new(self.membership()?)
    }

    /// Checks everything a run needs before any message is sent.
    pub fn validate(&self) -> Result<(), ChordError> {
        let space = self.id_space()?;
        self.membership()?;
        for node in &self.nodes {
            for key in &node.lookups {
                key.resolve(space)?;
            }
        }
        Ok(())
    }

    /// Per-member resolved lookup keys, in rank order.
    pub fn lookups(&self) -> Result<Vec<(NodeId, Vec<NodeId>)>, ChordError> {
        let space = self.id_space()?;
        self.nodes
            .iter()
            .map(|node| {
                let keys = node
                    .lookups
                    .iter()
                    .map(|key| key.resolve(space))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((NodeId(node.id), keys))
            })
            .collect()
    }

    pub fn address_book(&self) -> Result<AddressBook<SocketAddr>, ConfigError> {
        self.nodes
            .iter()
            .map(|node| {
                let id = NodeId(node.id);
                let raw = node
                    .address
                    .as_deref()
                    .ok_or(ConfigError::MissingAddress(id))?;
                let addr = raw
                    .parse::<SocketAddr>()
                    .map_err(|e| ConfigError::InvalidAddress {
                        id,
                        reason: format!("{}: {}", raw, e),
                    })?;
                Ok((id, addr))
            })
            .collect()
    }

    /// A ring of `nodes` distinct random members, each looking up
    /// `lookups_per_node` random keys.
    pub fn random<R: Rng>(
        rng: &mut R,
        nodes: usize,
        bits: u32,
        lookups_per_node: usize,
    ) -> Result<Self, ConfigError> {
        let space = IdSpace::new(bits)?;
        if nodes == 0 {
            return Err(ChordError::EmptyMembership.into());
        }
        if (nodes as u128) > u128::from(space.ring_size()) {
            return Err(ConfigError::TooManyNodes {
                nodes,
                ring_size: space.ring_size(),
            });
        }
        // Draw distinct members first, then their keys
        let mut ids = BTreeSet::new();
        while ids.len() < nodes {
            ids.insert(rng.random_range(0..space.ring_size()));
        }
        let mut config = RingConfig::new(bits);
        for id in ids {
            let keys: Vec<u64> = (0..lookups_per_node)
                .map(|_| rng.random_range(0..space.ring_size()))
                .collect();
            config.nodes.push(NodeConfig::new(id).with_lookups(keys));
        }
        Ok(config)
    }
}

fn parse_rank_input(raw: &str) -> Result<NodeConfig, String> {
    let mut numbers = raw.split_whitespace().map(|token| {
        token
            .parse::<u64>()
            .map_err(|e| format!("bad number {:?}: {}", token, e))
    });
    let id = numbers.next().ok_or("missing node id")??;
    let count = numbers.next().ok_or("missing lookup count")??;
    let keys = (0..count)
        .map(|i| {
            numbers
                .next()
                .unwrap_or_else(|| Err(format!("expected {} keys, found {}", count, i)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NodeConfig::new(id).with_lookups(keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn json_config_parses_ids_and_names() {
        let config: RingConfig = serde_json::from_str(
            r#"{
                "bits": 4,
                "nodes": [
                    { "id": 1, "address": "127.0.0.1:7001", "lookups": [10, "alpha"] },
                    { "id": 9 }
                ]
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        let lookups = config.lookups().unwrap();
        assert_eq!(lookups[0].0, NodeId(1));
        assert_eq!(lookups[0].1[0], NodeId(10));
        assert_eq!(lookups[0].1[1], IdSpace::new(4).unwrap().hash_key(b"alpha"));
        assert!(lookups[1].1.is_empty());
        assert!(matches!(
            config.address_book(),
            Err(ConfigError::MissingAddress(NodeId(9)))
        ));
    }

    #[test]
    fn bits_default_to_four() {
        let config: RingConfig = serde_json::from_str(r#"{ "nodes": [{ "id": 3 }] }"#).unwrap();
        assert_eq!(config.bits, DEFAULT_ID_BITS);
    }

    #[test]
    fn out_of_range_lookup_fails_validation() {
        let config = RingConfig::new(4).with_node(NodeConfig::new(1).with_lookups([16]));
        assert_eq!(
            config.validate(),
            Err(ChordError::OutOfRange {
                id: 16,
                ring_size: 16
            })
        );
    }

    #[test]
    fn rank_input_files_are_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in0.txt"), "4\n2\n10 3\n").unwrap();
        fs::write(dir.path().join("in1.txt"), "9 0").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let config = RingConfig::from_input_dir(dir.path(), 4).unwrap();
        assert_eq!(
            config,
            RingConfig::new(4)
                .with_node(NodeConfig::new(4).with_lookups([10, 3]))
                .with_node(NodeConfig::new(9))
        );
    }

    #[test]
    fn gaps_in_ranks_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in0.txt"), "4 0").unwrap();
        fs::write(dir.path().join("in2.txt"), "9 0").unwrap();
        assert!(matches!(
            RingConfig::from_input_dir(dir.path(), 4),
            Err(ConfigError::MissingRank(1))
        ));
    }

    #[test]
    fn short_key_list_is_a_parse_error() {
        assert!(parse_rank_input("4 3 1 2").is_err());
        assert!(parse_rank_input("").is_err());
        assert!(parse_rank_input("4 x").is_err());
    }

    #[test]
    fn random_rings_are_valid_and_seeded() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = RingConfig::random(&mut rng, 5, 6, 3).unwrap();
        config.validate().unwrap();
        assert_eq!(config.nodes.len(), 5);
        assert!(config.nodes.iter().all(|n| n.lookups.len() == 3));

        let again = RingConfig::random(&mut StdRng::seed_from_u64(7), 5, 6, 3).unwrap();
        assert_eq!(config, again);
        assert!(matches!(
            RingConfig::random(&mut rng, 17, 4, 0),
            Err(ConfigError::TooManyNodes { .. })
        ));
    }
}
