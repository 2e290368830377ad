//! Line-oriented driver for the device command interpreter.
//!
//! The device CLI has no end-of-response marker. A response is everything the
//! device prints after a command until the channel stays silent for the quiet
//! period:
//!
//! ```text
//!  host: "zubax_id\r\n"
//!  dev:  "product_id   : 'io.px4.sapog'\r\n"     <- gap < quiet period
//!  dev:  "hw_unique_id : 'AAECAwQFBgcICQoLDA0ODw=='\r\n"
//!        ...........silence >= quiet period.........  => end of response
//! ```
//!
//! A device that pauses longer than the quiet period mid-response gets its
//! response truncated at the pause; the remainder shows up in front of the next
//! response. That race is inherent to the device and is why a session starts
//! with [`SerialCli::flush_input`] and a disposable warm-up command.

use crate::error::{Error, Result};
use crate::port::{Port, is_timeout};
use log::{debug, trace};
use std::time::{Duration, Instant};

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Silence that ends a response.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Window drained at session start to drop the boot banner.
pub const SESSION_FLUSH_WINDOW: Duration = Duration::from_millis(500);

/// Disposable first command of a session.
pub const WARM_UP_COMMAND: &str = "systime";

/// Log target for raw device CLI traffic.
pub const CLI_LOG_TARGET: &str = "cli";

/// A CLI session bound to one open channel.
///
/// Dropping the session discards pending input and closes the channel, so the
/// channel is released on every exit path of a unit.
pub struct SerialCli<P: Port> {
    port: P,
    quiet_period: Duration,
    partial: Vec<u8>,
}

impl<P: Port> SerialCli<P> {
    /// Wrap an open channel.
    pub fn new(port: P, quiet_period: Duration) -> Self {
        Self {
            port,
            quiet_period,
            partial: Vec::new(),
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Silence that ends a response.
    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Prepare a freshly opened channel: drain the boot banner and issue the
    /// disposable warm-up command.
    pub fn start_session(&mut self) -> Result<()> {
        let dropped = self.flush_input(SESSION_FLUSH_WINDOW)?;
        trace!("Dropped {dropped} bytes of boot output");
        self.warm_up();
        Ok(())
    }

    /// Issue the warm-up command and discard its outcome.
    pub fn warm_up(&mut self) {
        match self.write_line_and_read_until_timeout(WARM_UP_COMMAND) {
            Ok(lines) => debug!("Warm-up output: {lines:?}"),
            Err(e) => {
                let tolerated = Error::WarmUpFailed(e.to_string());
                debug!("{tolerated} (ignored)");
            },
        }
    }

    /// Discard everything that arrives within `window`.
    ///
    /// Returns the number of bytes dropped.
    pub fn flush_input(&mut self, window: Duration) -> Result<usize> {
        let saved = self.port.timeout();
        let deadline = Instant::now() + window;
        let mut dropped = self.partial.len();
        self.partial.clear();

        let mut buf = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining)?;
            match self.port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => dropped += n,
                Err(e) if is_timeout(&e) => break,
                Err(e) => {
                    self.port.set_timeout(saved)?;
                    return Err(Error::Io(e));
                },
            }
        }

        self.port.set_timeout(saved)?;
        Ok(dropped)
    }

    /// Send one command line and collect the response lines.
    ///
    /// Empty lines and the echo of the command itself are dropped.
    pub fn write_line_and_read_until_timeout(&mut self, line: &str) -> Result<Vec<String>> {
        debug!(target: CLI_LOG_TARGET, "> {line}");
        self.port.set_timeout(self.quiet_period)?;
        self.port
            .write_all_bytes(format!("{line}{LINE_TERMINATOR}").as_bytes())?;

        let mut lines = Vec::new();
        while self.fill()? {
            lines.extend(self.take_complete_lines());
        }
        lines.extend(self.take_complete_lines());
        if let Some(rest) = self.take_partial() {
            lines.push(rest);
        }

        let echo = line.trim();
        let lines: Vec<String> = lines
            .into_iter()
            .filter(|l| !l.is_empty() && l != echo)
            .collect();
        for l in &lines {
            debug!(target: CLI_LOG_TARGET, "< {l}");
        }
        Ok(lines)
    }

    /// Read one line, waiting at most `timeout` for each chunk.
    ///
    /// Returns `None` when the channel stays silent for `timeout` with nothing
    /// buffered. Partial data buffered at the timeout is returned as a line.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.port.set_timeout(timeout)?;
        loop {
            if let Some(line) = self.next_complete_line() {
                return Ok(Some(line));
            }
            if !self.fill()? {
                return Ok(self.take_partial());
            }
        }
    }

    /// Read whatever is available; `false` means the quiet period elapsed.
    fn fill(&mut self) -> Result<bool> {
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(false),
            Ok(n) => {
                trace!("Received {n} bytes");
                self.partial.extend_from_slice(&buf[..n]);
                Ok(true)
            },
            Err(e) if is_timeout(&e) => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_complete_line() {
            lines.push(line);
        }
        lines
    }

    fn next_complete_line(&mut self) -> Option<String> {
        let pos = self.partial.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.partial.drain(..=pos).collect();
        Some(decode_line(&raw))
    }

    fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.partial);
        let line = decode_line(&raw);
        (!line.is_empty()).then_some(line)
    }
}

impl<P: Port> Drop for SerialCli<P> {
    fn drop(&mut self) {
        if let Err(e) = self.port.clear_input() {
            trace!("Failed to drain {} on release: {e}", self.port.name());
        }
        let _ = self.port.close();
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}
