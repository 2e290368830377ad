//! Device-side protocols.

pub mod cli;
pub mod identity;

// Re-export common types
pub use cli::{CLI_LOG_TARGET, DEFAULT_QUIET_PERIOD, SerialCli};
pub use identity::{FieldValue, IdentityRecord};
