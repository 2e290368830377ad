//! # escprov
//!
//! A library for provisioning ESC boards on the production line.
//!
//! One run of the station checks the bench, loads the firmware image once and
//! then takes units one at a time through:
//!
//! - flashing through a GDB debug probe (or a CLI `reboot` when skipped)
//! - boot detection on the device CLI, guarded by a hard watchdog
//! - reading the hardware identity over the device CLI
//! - obtaining a signature from the licensing service
//! - installing the signature and verifying it by read-back
//!
//! ## Example
//!
//! ```rust,no_run
//! use escprov::{
//!     FirmwareFetcher, GdbFlasher, MemoryOracle, ProbeEndpoints, ShellRunner, Station,
//!     StationConfig, firmware::default_firmware_glob,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StationConfig::default();
//!     let image = FirmwareFetcher::new(default_firmware_glob(&config.product))?.fetch(None)?;
//!
//!     let mut station = Station::new(
//!         config,
//!         &image,
//!         ProbeEndpoints::default(),
//!         GdbFlasher::new(ShellRunner),
//!         MemoryOracle::new(),
//!     );
//!     let report = station.process_unit(false)?;
//!     println!("Signed unit {}", report.signature.unique_id_hex());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boot;
pub mod error;
pub mod fieldbus;
pub mod firmware;
pub mod flash;
pub mod health;
pub mod oracle;
pub mod port;
pub mod probe;
pub mod protocol;
pub mod signature;
pub mod station;

// Re-exports for convenience
pub use {
    boot::{BootDetector, BootOutcome, HardWatchdog},
    error::{Error, Result},
    fieldbus::{CommandRunner, InterfaceHandle, ShellRunner, bring_up},
    firmware::{FirmwareFetcher, FirmwareImage},
    flash::{FirmwareFlasher, GdbFlasher},
    health::{HealthReport, check_all},
    oracle::{Credentials, LicensingClient, MemoryOracle, SignatureIssuance, SigningOracle},
    port::{NativePort, NativePortEnumerator, Port, PortEnumerator, PortInfo, SerialConfig},
    probe::ProbeEndpoints,
    protocol::{IdentityRecord, SerialCli},
    signature::{SignatureProtocol, SignatureReport, SignatureState, provision_signature},
    station::{DeviceChannels, Station, StationConfig, UnitReport},
};
