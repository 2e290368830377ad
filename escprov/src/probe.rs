//! Debug probe endpoint discovery.
//!
//! The probe shows up under `/dev/serial/by-id/` with one node per USB
//! interface. Interface `if00` is the GDB server, `if02` the UART bridge wired
//! to the device CLI. Endpoints are located by glob so that any probe serial
//! number works, but exactly one probe must be connected.

use {
    crate::{
        error::{Error, Result},
        port::{NativePort, NativePortEnumerator, PROBE_BAUD, PortEnumerator, PortInfo, SerialConfig},
    },
    log::{debug, trace},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Default glob of the probe's GDB server endpoint.
pub const DEFAULT_GDB_PORT_GLOB: &str = "/dev/serial/by-id/*Black_Magic_Probe*-if00";

/// Default glob of the probe's UART endpoint connected to the device CLI.
pub const DEFAULT_CLI_PORT_GLOB: &str = "/dev/serial/by-id/*Black_Magic_Probe*-if02";

/// Timeout used when opening a channel just to prove it works.
pub const OPEN_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Location of the two probe endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEndpoints {
    /// Glob of the GDB server endpoint.
    pub gdb_glob: String,
    /// Glob of the device CLI endpoint.
    pub cli_glob: String,
}

impl Default for ProbeEndpoints {
    fn default() -> Self {
        Self {
            gdb_glob: DEFAULT_GDB_PORT_GLOB.to_string(),
            cli_glob: DEFAULT_CLI_PORT_GLOB.to_string(),
        }
    }
}

impl ProbeEndpoints {
    /// Resolve the GDB endpoint to a device path.
    pub fn gdb_port(&self) -> Result<PathBuf> {
        glob_one(&self.gdb_glob)
    }

    /// Resolve the CLI endpoint to a device path.
    pub fn cli_port(&self) -> Result<PathBuf> {
        glob_one(&self.cli_glob)
    }

    /// Open the device CLI endpoint with the given read timeout.
    pub fn open_cli(&self, timeout: Duration) -> Result<NativePort> {
        open_glob(&self.cli_glob, timeout)
    }
}

/// Resolve a glob pattern to exactly one existing path.
pub fn glob_one(pattern: &str) -> Result<PathBuf> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::Config(format!("invalid glob pattern {pattern:?}: {e}")))?;

    let mut matches: Vec<PathBuf> = paths
        .filter_map(std::result::Result::ok)
        .collect();
    trace!("Glob {pattern:?} matched {matches:?}");

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(Error::Interface(format!("no device matches {pattern}"))),
        n => Err(Error::Interface(format!(
            "{n} devices match {pattern}, expected exactly one"
        ))),
    }
}

/// Open the single serial device matching `pattern`.
pub fn open_glob(pattern: &str, timeout: Duration) -> Result<NativePort> {
    let path = glob_one(pattern)?;
    open_path(&path, timeout)
}

/// Open a serial device by path.
pub fn open_path(path: &Path, timeout: Duration) -> Result<NativePort> {
    debug!("Opening serial port {}", path.display());
    let config = SerialConfig::new(path.to_string_lossy(), PROBE_BAUD).with_timeout(timeout);
    NativePort::open(&config)
}

/// List all serial ports with USB metadata.
pub fn list_ports() -> Vec<PortInfo> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Format a port for human-readable listings.
pub fn describe_port(port: &PortInfo) -> String {
    let ids = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" [{vid:04X}:{pid:04X}]"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();
    format!("{}{ids}{product}", port.name)
}
