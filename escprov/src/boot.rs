//! Boot detection under a hard watchdog.
//!
//! After flashing (or a reboot) the station listens on the device CLI channel
//! for the line that announces the firmware. Two deadlines apply:
//!
//! - the soft boot timeout: if the marker does not show up, a warning is logged
//!   and the workflow carries on, the following CLI exchange will tell whether
//!   the unit is usable;
//! - the hard timeout (a multiple of the boot timeout): serial reads through
//!   USB passthrough have been seen to block forever. If the read is still
//!   stuck when the hard timeout expires the process is aborted, because a
//!   blocked read cannot be cancelled from another thread.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::cli::{CLI_LOG_TARGET, SerialCli};
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Time the firmware gets to print its banner.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(9);

/// Hard watchdog deadline as a multiple of the boot timeout.
pub const HARD_TIMEOUT_FACTOR: u32 = 5;

const HUNG_MESSAGE: &str = "\
The serial port read has been blocked far longer than the boot timeout.
The serial stack is stuck, usually in the USB passthrough of a virtual machine.
Disconnect the debug probe from USB and reconnect it, or reboot the VM,
then restart the station.";

const TIMED_OUT_CAUSES: &str = "Possible causes: the firmware failed to boot; \
the debug connector is badly soldered; the serial port is used by another \
process; USB or VM passthrough is unreliable";

/// Result of waiting for the device to boot.
///
/// The third possible end, a hung read, never returns: the watchdog aborts
/// the process instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// The boot marker was seen.
    Detected,
    /// The soft deadline passed without the marker.
    TimedOut,
}

/// Hard-deadline guard running on its own thread.
///
/// Dropping the guard disarms it and joins the thread.
pub struct HardWatchdog {
    disarm: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HardWatchdog {
    /// Arm a watchdog that calls `on_fire` unless disarmed within `deadline`.
    pub fn arm<F>(deadline: Duration, on_fire: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("boot-watchdog".into())
            .spawn(move || {
                // A disarm message and a dropped sender both mean the guarded
                // operation finished
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(deadline) {
                    on_fire();
                }
            })?;
        debug!("Hard watchdog armed for {deadline:?}");
        Ok(Self {
            disarm: Some(tx),
            handle: Some(handle),
        })
    }

    /// Disarm explicitly; equivalent to dropping the guard.
    pub fn disarm(self) {
        drop(self);
    }
}

impl Drop for HardWatchdog {
    fn drop(&mut self) {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Report the hang and abort the process.
pub fn abort_on_hang() {
    error!("{HUNG_MESSAGE}");
    eprintln!("FATAL: {HUNG_MESSAGE}");
    std::process::abort();
}

/// Waits for the boot marker on the device CLI channel.
#[derive(Debug, Clone)]
pub struct BootDetector {
    marker: String,
    boot_timeout: Duration,
    hard_timeout: Duration,
}

impl BootDetector {
    /// Detector looking for `marker`, with the hard deadline at
    /// [`HARD_TIMEOUT_FACTOR`] times `boot_timeout`.
    pub fn new(marker: impl Into<String>, boot_timeout: Duration) -> Self {
        Self {
            marker: marker.into(),
            boot_timeout,
            hard_timeout: boot_timeout * HARD_TIMEOUT_FACTOR,
        }
    }

    /// Override the hard deadline.
    #[must_use]
    pub fn with_hard_timeout(mut self, hard_timeout: Duration) -> Self {
        self.hard_timeout = hard_timeout;
        self
    }

    /// Soft boot timeout.
    pub fn boot_timeout(&self) -> Duration {
        self.boot_timeout
    }

    /// Hard watchdog deadline.
    pub fn hard_timeout(&self) -> Duration {
        self.hard_timeout
    }

    /// Open the channel with `open` and wait for the marker, aborting the
    /// process through [`abort_on_hang`] if the channel hangs.
    pub fn wait_for_boot<P, O>(&self, open: O) -> Result<BootOutcome>
    where
        P: Port,
        O: FnOnce(Duration) -> Result<P>,
    {
        self.wait_for_boot_with(open, abort_on_hang)
    }

    /// Same as [`BootDetector::wait_for_boot`] with a custom hang handler.
    ///
    /// `open` receives the per-read timeout. An open failure is returned as an
    /// error; everything after the channel is open ends in a [`BootOutcome`].
    pub fn wait_for_boot_with<P, O, H>(&self, open: O, on_hang: H) -> Result<BootOutcome>
    where
        P: Port,
        O: FnOnce(Duration) -> Result<P>,
        H: FnOnce() + Send + 'static,
    {
        info!("Waiting for the device to boot...");
        let deadline = Instant::now() + self.boot_timeout;
        let watchdog = HardWatchdog::arm(self.hard_timeout, on_hang)?;

        let port = open(self.boot_timeout)
            .map_err(|e| Error::Interface(format!("cannot open the device CLI channel: {e}")))?;
        let mut cli = SerialCli::new(port, self.boot_timeout);
        let outcome = self.scan(&mut cli, deadline);

        // Release the channel while still guarded; draining can block too
        drop(cli);
        watchdog.disarm();

        if outcome == BootOutcome::TimedOut {
            warn!(
                "Boot confirmation not received within {:?}. {TIMED_OUT_CAUSES}",
                self.boot_timeout
            );
        }
        Ok(outcome)
    }

    fn scan<P: Port>(&self, cli: &mut SerialCli<P>, deadline: Instant) -> BootOutcome {
        loop {
            match cli.read_line(self.boot_timeout) {
                Ok(Some(line)) => {
                    if line.contains(&self.marker) {
                        info!("Boot confirmed: {line}");
                        return BootOutcome::Detected;
                    }
                    if is_failure_line(&line) {
                        error!("Boot error: {line}");
                    } else {
                        info!(target: CLI_LOG_TARGET, "{line}");
                    }
                    if Instant::now() >= deadline {
                        return BootOutcome::TimedOut;
                    }
                },
                Ok(None) => return BootOutcome::TimedOut,
                Err(e) => {
                    info!("Boot detection read failed: {e}");
                    return BootOutcome::TimedOut;
                },
            }
        }
    }
}

fn is_failure_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error") || lower.contains("fail")
}
