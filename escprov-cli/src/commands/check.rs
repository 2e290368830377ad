//! Interface health check.

use anyhow::Result;
use console::style;
use escprov::{ProbeEndpoints, ShellRunner, check_all};

use crate::config::Config;
use crate::{Cli, CliError, status};

/// Check command implementation.
pub(crate) fn cmd_check(cli: &Cli, config: &Config, iface: &str) -> Result<()> {
    let bitrate = cli
        .bitrate
        .unwrap_or_else(|| config.bitrate());
    ensure_interfaces(cli, &config.probe_endpoints(), iface, bitrate)?;
    status(cli, style("All interfaces are OK").green().bold());
    Ok(())
}

/// Run every interface check; any failure is fatal.
///
/// The CAN interface is left up on success.
pub(crate) fn ensure_interfaces(
    cli: &Cli,
    endpoints: &ProbeEndpoints,
    iface: &str,
    bitrate: u32,
) -> Result<()> {
    status(cli, format!("Checking interfaces ({iface} at {bitrate} bit/s)..."));
    let report = check_all(endpoints, iface, bitrate, &mut ShellRunner);
    if report.is_ok() {
        return Ok(());
    }

    let failed: Vec<&str> = report
        .failures()
        .map(|check| check.name)
        .collect();
    Err(CliError::Fatal(format!(
        "interface check failed: {}. Check the physical connections, and the USB device \
         passthrough if running in a VM",
        failed.join(", ")
    ))
    .into())
}
