pub mod messages;
pub mod node;
pub mod transport;
