//! Per-unit provisioning workflow.
//!
//! A [`Station`] owns everything a unit needs, and [`Station::process_unit`]
//! takes one unit from flashing to a verified signature. The firmware image is
//! loaded once by the caller and borrowed for the whole run.

use crate::boot::{BootDetector, BootOutcome, DEFAULT_BOOT_TIMEOUT, abort_on_hang};
use crate::error::Result;
use crate::firmware::FirmwareImage;
use crate::flash::FirmwareFlasher;
use crate::oracle::SigningOracle;
use crate::port::{NativePort, Port};
use crate::probe::ProbeEndpoints;
use crate::protocol::cli::{DEFAULT_QUIET_PERIOD, SerialCli};
use crate::signature::{SignatureProtocol, SignatureReport};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

/// Product whose firmware this station provisions by default.
pub const DEFAULT_PRODUCT: &str = "io.px4.sapog";

/// Device command that restarts the firmware.
pub const REBOOT_COMMAND: &str = "reboot";

/// Access to the two probe channels.
pub trait DeviceChannels {
    /// Port type of the device CLI channel.
    type Port: Port;

    /// Path of the GDB server endpoint.
    fn gdb_port(&self) -> Result<PathBuf>;

    /// Open the device CLI channel with the given read timeout.
    fn open_cli(&self, timeout: Duration) -> Result<Self::Port>;
}

impl DeviceChannels for ProbeEndpoints {
    type Port = NativePort;

    fn gdb_port(&self) -> Result<PathBuf> {
        ProbeEndpoints::gdb_port(self)
    }

    fn open_cli(&self, timeout: Duration) -> Result<NativePort> {
        ProbeEndpoints::open_cli(self, timeout)
    }
}

/// Workflow parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    /// Product name; also the boot marker and the signing scope.
    pub product: String,
    /// Soft boot timeout.
    pub boot_timeout: Duration,
    /// Silence that ends a CLI response.
    pub quiet_period: Duration,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            product: DEFAULT_PRODUCT.to_string(),
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

/// Result of one processed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    /// Whether the firmware was written in this pass.
    pub flashed: bool,
    /// How boot detection ended.
    pub boot: BootOutcome,
    /// Verified signature details.
    pub signature: SignatureReport,
}

/// The provisioning station for one run.
pub struct Station<'fw, C, F, O> {
    config: StationConfig,
    firmware: &'fw FirmwareImage,
    channels: C,
    flasher: F,
    oracle: O,
    detector: BootDetector,
    on_hang: fn(),
}

impl<'fw, C, F, O> Station<'fw, C, F, O>
where
    C: DeviceChannels,
    F: FirmwareFlasher,
    O: SigningOracle,
{
    /// Assemble a station.
    pub fn new(
        config: StationConfig,
        firmware: &'fw FirmwareImage,
        channels: C,
        flasher: F,
        oracle: O,
    ) -> Self {
        let detector = BootDetector::new(config.product.clone(), config.boot_timeout);
        Self {
            config,
            firmware,
            channels,
            flasher,
            oracle,
            detector,
            on_hang: abort_on_hang,
        }
    }

    /// Replace the boot detector, e.g. to shorten the hard deadline.
    #[must_use]
    pub fn with_boot_detector(mut self, detector: BootDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the action taken when a boot read hangs.
    #[must_use]
    pub fn with_hang_handler(mut self, on_hang: fn()) -> Self {
        self.on_hang = on_hang;
        self
    }

    /// Workflow parameters.
    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// Firmware image shared by all units.
    pub fn firmware(&self) -> &FirmwareImage {
        self.firmware
    }

    /// Flash (or reboot), wait for boot, then sign and verify one unit.
    pub fn process_unit(&mut self, skip_flash: bool) -> Result<UnitReport> {
        if skip_flash {
            info!("Firmware upload skipped, rebooting the device");
            self.reboot()?;
        } else {
            info!("Loading the firmware");
            let gdb = self.channels.gdb_port()?;
            self.flasher.flash(self.firmware, &gdb)?;
        }

        let channels = &self.channels;
        let boot = self
            .detector
            .wait_for_boot_with(|timeout| channels.open_cli(timeout), self.on_hang)?;

        info!("Identifying the connected device...");
        let port = self.channels.open_cli(self.config.quiet_period)?;
        let mut cli = SerialCli::new(port, self.config.quiet_period);
        cli.start_session()?;
        let signature = SignatureProtocol::new(&self.oracle, &self.config.product).run(&mut cli)?;

        Ok(UnitReport {
            flashed: !skip_flash,
            boot,
            signature,
        })
    }

    fn reboot(&self) -> Result<()> {
        let port = self.channels.open_cli(self.config.quiet_period)?;
        let mut cli = SerialCli::new(port, self.config.quiet_period);
        cli.write_line_and_read_until_timeout(REBOOT_COMMAND)?;
        Ok(())
    }
}
