//! Error types for escprov.

use std::io;
use thiserror::Error;

/// Result type for escprov operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for escprov operations.
///
/// Variants are grouped by how far a failure reaches: interface, firmware and
/// configuration errors end the whole run, flash, parse and verification errors
/// end the current unit only.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An interface could not be opened or configured.
    #[error("Interface error: {0}")]
    Interface(String),

    /// Invalid station configuration (e.g. unsupported bitrate).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Firmware or API endpoint could not be reached.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Firmware image failed validation.
    #[error("Invalid firmware: {0}")]
    Validation(String),

    /// Flashing the device failed.
    #[error("Flash error: {0}")]
    Flash(String),

    /// The device response could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Base64 payload from the device or the licensing API is malformed.
    #[error("Decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The device or licensing API violated the expected protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The signature read back from the device does not match the issued one.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// The device refused `zubax_id <signature>`.
    ///
    /// Tolerated: a unit that was signed before rejects a second installation.
    #[error("Signature installation rejected: {0}")]
    SignatureInstallRejected(String),

    /// The disposable first command of a CLI session failed.
    ///
    /// Tolerated: the command only exists to absorb boot garbage.
    #[error("Warm-up command failed: {0}")]
    WarmUpFailed(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether this error ends the whole run rather than the current unit.
    #[must_use]
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::Interface(_) | Self::Config(_) | Self::Fetch(_) | Self::Validation(_)
        )
    }

    /// Whether this error is one of the named tolerances that callers log and
    /// skip instead of propagating.
    #[must_use]
    pub fn is_tolerated(&self) -> bool {
        matches!(
            self,
            Self::SignatureInstallRejected(_) | Self::WarmUpFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_fatal_classification() {
        assert!(Error::Interface("can0".into()).is_fatal_to_run());
        assert!(Error::Validation("too small".into()).is_fatal_to_run());
        assert!(!Error::Flash("gdb".into()).is_fatal_to_run());
        assert!(!Error::Verification("mismatch".into()).is_fatal_to_run());
    }

    #[test]
    fn test_tolerated_classification() {
        assert!(Error::SignatureInstallRejected("already signed".into()).is_tolerated());
        assert!(Error::WarmUpFailed("io".into()).is_tolerated());
        assert!(!Error::Verification("mismatch".into()).is_tolerated());
        assert!(!Error::Parse("no field".into()).is_tolerated());
    }
}
