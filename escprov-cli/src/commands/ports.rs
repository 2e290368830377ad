//! Serial port listing.

use console::style;
use escprov::{
    ProbeEndpoints,
    probe::{describe_port, glob_one, list_ports},
};

/// List serial ports, and where the probe channels resolve to.
pub(crate) fn cmd_list_ports(json: bool, endpoints: &ProbeEndpoints) {
    let ports = list_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("(none)").dim());
    } else {
        for port in &ports {
            eprintln!("  {} {}", style("•").green(), describe_port(port));
        }
    }

    eprintln!();
    for (label, pattern) in [
        ("Debug probe GDB channel", &endpoints.gdb_glob),
        ("Device CLI channel", &endpoints.cli_glob),
    ] {
        match glob_one(pattern) {
            Ok(path) => eprintln!(
                "{} {label}: {}",
                style("→").green().bold(),
                style(path.display()).cyan()
            ),
            Err(e) => eprintln!("{} {label}: {}", style("✗").red(), style(e).dim()),
        }
    }
}
