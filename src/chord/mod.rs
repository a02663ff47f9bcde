pub mod actor;
pub mod lookup;
pub mod ring;
pub mod routing;
pub mod types;

// Chord configuration
pub const DEFAULT_ID_BITS: u32 = 4;
// Identifiers are u64 and finger starts add 2^i, so 2^63 is the widest circle.
pub const MAX_ID_BITS: u32 = 63;
