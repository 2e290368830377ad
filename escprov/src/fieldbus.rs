//! CAN interface bring-up.
//!
//! Two bindings are supported:
//!
//! - native SocketCAN interfaces (`can0`), configured with `ip link`;
//! - serial-line CAN adapters (`/dev/serial/by-id/...`), attached with
//!   `slcan_attach` and exposed by `slcand` as `slcan0`.
//!
//! Both end in an interface that is up at the requested bitrate. All commands
//! go through [`CommandRunner`] so the exact sequence can be checked without
//! touching the host network configuration.

use crate::error::{Error, Result};
use log::{debug, info, trace};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// Default bus bitrate.
pub const DEFAULT_BITRATE: u32 = 125_000;

/// Sample point for native interfaces.
pub const SAMPLE_POINT: &str = "0.875";

/// Interface created by `slcand`.
pub const SLCAN_INTERFACE: &str = "slcan0";

/// Transmit queue length of the serial-adapter interface.
pub const SLCAN_TX_QUEUE_LEN: u32 = 1000;

/// Pause after stopping and starting the adapter daemon.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Speed code understood by `slcan_attach -s<code>`.
pub fn slcan_speed_code(bitrate: u32) -> Result<u8> {
    match bitrate {
        1_000_000 => Ok(8),
        500_000 => Ok(6),
        250_000 => Ok(5),
        125_000 => Ok(4),
        100_000 => Ok(3),
        _ => Err(Error::Config(format!(
            "bitrate {bitrate} is not supported by serial CAN adapters"
        ))),
    }
}

/// Output of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status 0.
    pub success: bool,
    /// Exit code, if the command was not killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Executes host commands for interface bring-up and flashing.
pub trait CommandRunner {
    /// Run `program` with `args` and wait for it to finish.
    ///
    /// A command that runs and exits non-zero is reported through
    /// [`CommandOutput::success`], not as an error.
    fn run(&mut self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Block for `duration`.
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&mut self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        trace!("exec: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::Interface(format!("cannot run {program}: {e}")))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// How an interface identifier is brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// SocketCAN interface name.
    Native(String),
    /// Serial-line adapter device path.
    SerialAdapter(PathBuf),
}

impl Binding {
    /// Classify an identifier: anything containing a path separator is a
    /// serial adapter.
    pub fn from_identifier(identifier: &str) -> Self {
        if identifier.contains('/') {
            Self::SerialAdapter(PathBuf::from(identifier))
        } else {
            Self::Native(identifier.to_string())
        }
    }
}

/// Name of an interface that has been brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceHandle {
    name: String,
}

impl InterfaceHandle {
    /// Interface name as seen by the network stack.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Bring the interface `identifier` up at `bitrate`.
pub fn bring_up<R>(runner: &mut R, identifier: &str, bitrate: u32) -> Result<InterfaceHandle>
where
    R: CommandRunner + ?Sized,
{
    let handle = match Binding::from_identifier(identifier) {
        Binding::Native(name) => bring_up_native(runner, &name, bitrate)?,
        Binding::SerialAdapter(path) => bring_up_serial_adapter(runner, &path, bitrate)?,
    };
    info!("CAN interface {handle} is up at {bitrate} bit/s");
    Ok(handle)
}

fn bring_up_native<R>(runner: &mut R, name: &str, bitrate: u32) -> Result<InterfaceHandle>
where
    R: CommandRunner + ?Sized,
{
    let bitrate = bitrate.to_string();
    run_step(runner, "ip", &["link", "set", name, "down"])?;
    run_step(runner, "ip", &[
        "link",
        "set",
        name,
        "up",
        "type",
        "can",
        "bitrate",
        &bitrate,
        "sample-point",
        SAMPLE_POINT,
    ])?;
    Ok(InterfaceHandle {
        name: name.to_string(),
    })
}

fn bring_up_serial_adapter<R>(runner: &mut R, path: &Path, bitrate: u32) -> Result<InterfaceHandle>
where
    R: CommandRunner + ?Sized,
{
    let speed = format!("-s{}", slcan_speed_code(bitrate)?);
    let (device, tty) = resolve_tty(path)?;
    debug!("Serial CAN adapter {} resolves to {device}", path.display());

    // A daemon left over from a previous run holds the adapter
    match runner.run("killall", &["-INT", "slcand"]) {
        Ok(out) if !out.success => trace!("killall slcand: {}", out.stderr.trim()),
        Err(e) => trace!("killall slcand: {e}"),
        Ok(_) => {},
    }
    runner.sleep(SETTLE_DELAY);

    run_step(runner, "slcan_attach", &["-f", "-o", &speed, &device])?;
    run_step(runner, "slcand", &[&tty])?;
    runner.sleep(SETTLE_DELAY);

    let qlen = SLCAN_TX_QUEUE_LEN.to_string();
    run_step(runner, "ip", &["link", "set", SLCAN_INTERFACE, "up"])?;
    run_step(runner, "ip", &[
        "link",
        "set",
        SLCAN_INTERFACE,
        "txqueuelen",
        &qlen,
    ])?;
    Ok(InterfaceHandle {
        name: SLCAN_INTERFACE.to_string(),
    })
}

/// Resolve symlinks such as `/dev/serial/by-id/...` to the TTY device.
///
/// Returns the full device path and the name `slcand` expects.
fn resolve_tty(path: &Path) -> Result<(String, String)> {
    let real = path
        .canonicalize()
        .map_err(|e| Error::Interface(format!("cannot resolve {}: {e}", path.display())))?;
    let tty = real
        .strip_prefix("/dev")
        .ok()
        .or_else(|| real.file_name().map(Path::new))
        .ok_or_else(|| Error::Interface(format!("{} is not a TTY device", real.display())))?;
    Ok((
        real.to_string_lossy().into_owned(),
        tty.to_string_lossy().into_owned(),
    ))
}

fn run_step<R>(runner: &mut R, program: &str, args: &[&str]) -> Result<()>
where
    R: CommandRunner + ?Sized,
{
    let out = runner.run(program, args)?;
    if out.success {
        return Ok(());
    }
    let code = out
        .code
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    Err(Error::Interface(format!(
        "`{program} {}` failed ({code}): {}",
        args.join(" "),
        out.stderr.trim()
    )))
}


#[cfg(test)]
mod tests {
    use super::recording::RecordingRunner;
    use super::*;

    #[test]
    fn test_speed_codes() {
        assert_eq!(slcan_speed_code(1_000_000).unwrap(), 8);
        assert_eq!(slcan_speed_code(500_000).unwrap(), 6);
        assert_eq!(slcan_speed_code(250_000).unwrap(), 5);
        assert_eq!(slcan_speed_code(125_000).unwrap(), 4);
        assert_eq!(slcan_speed_code(100_000).unwrap(), 3);
        assert!(matches!(slcan_speed_code(50_000), Err(Error::Config(_))));
    }

    #[test]
    fn test_binding_classification() {
        assert_eq!(Binding::from_identifier("can0"), Binding::Native("can0".into()));
        assert_eq!(
            Binding::from_identifier("/dev/ttyACM1"),
            Binding::SerialAdapter(PathBuf::from("/dev/ttyACM1"))
        );
    }

    #[test]
    fn test_native_bring_up_sequence() {
        let mut runner = RecordingRunner::default();
        let handle = bring_up(&mut runner, "can0", 125_000).unwrap();

        assert_eq!(handle.name(), "can0");
        assert_eq!(runner.log, vec![
            "ip link set can0 down",
            "ip link set can0 up type can bitrate 125000 sample-point 0.875",
        ]);
    }

    #[test]
    fn test_native_failure_is_interface_error() {
        let mut runner = RecordingRunner::failing(&["ip"]);
        let err = bring_up(&mut runner, "can0", 125_000).unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
        assert!(err.to_string().contains("operation not permitted"));
        assert_eq!(runner.log.len(), 1);
    }

    #[test]
    fn test_serial_adapter_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let tty = dir.path().join("ttyACM1");
        std::fs::write(&tty, b"").unwrap();
        let real = tty.canonicalize().unwrap();
        let real = real.to_string_lossy();

        let mut runner = RecordingRunner::default();
        let handle = bring_up(&mut runner, tty.to_str().unwrap(), 1_000_000).unwrap();

        assert_eq!(handle.name(), "slcan0");
        assert_eq!(runner.log, vec![
            "killall -INT slcand".to_string(),
            "sleep 1000".to_string(),
            format!("slcan_attach -f -o -s8 {real}"),
            "slcand ttyACM1".to_string(),
            "sleep 1000".to_string(),
            "ip link set slcan0 up".to_string(),
            "ip link set slcan0 txqueuelen 1000".to_string(),
        ]);
    }

    #[test]
    fn test_killall_failure_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tty = dir.path().join("ttyACM1");
        std::fs::write(&tty, b"").unwrap();

        let mut runner = RecordingRunner::failing(&["killall"]);
        assert!(bring_up(&mut runner, tty.to_str().unwrap(), 125_000).is_ok());
    }

    #[test]
    fn test_unsupported_bitrate_runs_no_command() {
        let mut runner = RecordingRunner::default();
        let err = bring_up(&mut runner, "/dev/ttyACM1", 42_000).unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(runner.log.is_empty());
    }

    #[test]
    fn test_missing_adapter_is_interface_error() {
        let mut runner = RecordingRunner::default();
        let err = bring_up(&mut runner, "/dev/does-not-exist-escprov", 125_000).unwrap_err();

        assert!(matches!(err, Error::Interface(_)));
        assert!(runner.log.is_empty());
    }

    #[test]
    fn test_attach_failure_stops_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let tty = dir.path().join("ttyACM1");
        std::fs::write(&tty, b"").unwrap();

        let mut runner = RecordingRunner::failing(&["slcan_attach"]);
        let err = bring_up(&mut runner, tty.to_str().unwrap(), 125_000).unwrap_err();

        assert!(matches!(err, Error::Interface(_)));
        assert!(!runner.log.iter().any(|l| l.starts_with("slcand")));
    }
}
