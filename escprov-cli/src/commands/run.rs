//! The provisioning loop.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use escprov::{
    BootOutcome, FirmwareFetcher, FirmwareFlasher, FirmwareImage, GdbFlasher, LicensingClient,
    MemoryOracle, ShellRunner, SigningOracle, Station, StationConfig, UnitReport,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::Path;
use std::time::Duration;

use crate::commands::check::ensure_interfaces;
use crate::config::Config;
use crate::prompt::{self, UnitAction};
use crate::{Cli, CliError, failure, status, use_fancy_output, was_interrupted, warning};

/// Arguments of the `run` command.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// CAN interface name (e.g. can0) or SLCAN adapter path.
    pub iface: String,

    /// Firmware image path or URL (newest published image if omitted).
    #[arg(short, long, value_name = "PATH_OR_URL")]
    pub firmware: Option<String>,

    /// Soft boot timeout in seconds.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub boot_timeout: Option<u64>,

    /// Licensing API endpoint.
    #[arg(long, env = "ESCPROV_LICENSING_URL")]
    pub licensing_url: Option<String>,

    /// Licensing API account.
    #[arg(long, env = "ESCPROV_LICENSING_USER")]
    pub licensing_user: Option<String>,

    /// Licensing API password.
    #[arg(long, env = "ESCPROV_LICENSING_PASSWORD", hide_env_values = true)]
    pub licensing_password: Option<String>,

    /// Issue signatures locally instead of asking the licensing service (bench testing only).
    #[arg(long)]
    pub offline: bool,

    /// Process a single unit and exit.
    #[arg(long)]
    pub once: bool,
}

/// Unit counts of one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    succeeded: usize,
    failed: usize,
}

impl Summary {
    fn total(self) -> usize {
        self.succeeded + self.failed
    }

    fn print(self) {
        eprintln!(
            "\n{} {} unit(s) processed: {} succeeded, {} failed",
            style("■").bold(),
            self.total(),
            style(self.succeeded).green().bold(),
            style(self.failed).red().bold()
        );
    }
}

/// Flasher decorator showing a wait cursor while the inner flasher runs.
struct WaitCursor<F> {
    inner: F,
    visible: bool,
}

impl<F: FirmwareFlasher> FirmwareFlasher for WaitCursor<F> {
    fn flash(&mut self, image: &FirmwareImage, port: &Path) -> escprov::Result<()> {
        let inner = &mut self.inner;
        with_spinner(self.visible, "Flashing", || inner.flash(image, port))
    }
}

/// Run `work` under an elapsed-time spinner on stderr.
fn with_spinner<T>(visible: bool, message: &str, work: impl FnOnce() -> T) -> T {
    let pb = if visible {
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap(),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    } else {
        ProgressBar::hidden()
    };
    let result = work();
    pb.finish_and_clear();
    result
}

/// Run command implementation.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, args: &RunArgs) -> Result<()> {
    let product = cli
        .product
        .clone()
        .unwrap_or_else(|| config.product());
    let bitrate = cli
        .bitrate
        .unwrap_or_else(|| config.bitrate());
    let endpoints = config.probe_endpoints();
    let interactive = !cli.non_interactive;
    let spinners = !cli.quiet && use_fancy_output();

    ensure_interfaces(cli, &endpoints, &args.iface, bitrate)?;

    status(cli, "Loading the firmware image...");
    let fetcher = FirmwareFetcher::new(config.firmware_glob_url(&product))?;
    let image = with_spinner(spinners, "Fetching firmware", || {
        fetcher.fetch(args.firmware.as_deref())
    })
    .context("Failed to load the firmware")?;
    status(
        cli,
        format!("Firmware: {} ({} KiB)", image.source(), image.len() / 1024),
    );

    let oracle = build_oracle(cli, config, args)?;

    let station_config = StationConfig {
        product,
        boot_timeout: args
            .boot_timeout
            .map_or_else(|| config.boot_timeout(), Duration::from_secs),
        ..StationConfig::default()
    };
    let flasher = WaitCursor {
        inner: GdbFlasher::new(ShellRunner),
        visible: spinners,
    };
    let mut station = Station::new(station_config, &image, endpoints, flasher, oracle.as_ref());

    let single = args.once || !interactive;
    let mut summary = Summary::default();
    loop {
        if was_interrupted() {
            break;
        }

        let action = if interactive {
            match prompt::next_unit(summary.total() + 1) {
                Ok(Some(action)) => action,
                Ok(None) => break,
                Err(e) if matches!(e.downcast_ref::<CliError>(), Some(CliError::Cancelled(_))) => {
                    break;
                },
                Err(e) => return Err(e),
            }
        } else {
            UnitAction::Flash
        };

        match station.process_unit(action == UnitAction::SkipFlash) {
            Ok(report) => {
                summary.succeeded += 1;
                print_unit_report(summary.total(), &report);
            },
            Err(e) if e.is_fatal_to_run() => {
                summary.failed += 1;
                summary.print();
                return Err(e).context("The station cannot continue");
            },
            Err(e) => {
                summary.failed += 1;
                failure(format!("Unit #{} failed: {e}", summary.total()));
                if single {
                    summary.print();
                    return Err(e.into());
                }
            },
        }

        if single {
            break;
        }
    }

    summary.print();
    Ok(())
}

fn build_oracle(cli: &Cli, config: &Config, args: &RunArgs) -> Result<Box<dyn SigningOracle>> {
    if args.offline {
        warning("Offline mode: signatures are issued locally and are not valid in production");
        if !cli.non_interactive && !prompt::confirm("Continue in offline mode?", false)? {
            return Err(CliError::Cancelled("offline mode declined".to_string()).into());
        }
        return Ok(Box::new(MemoryOracle::new()));
    }

    let url = args
        .licensing_url
        .clone()
        .unwrap_or_else(|| config.licensing_url());
    let user = args
        .licensing_user
        .clone()
        .or_else(|| config.licensing.user.clone());
    let credentials = prompt::credentials(user, args.licensing_password.clone(), cli.non_interactive)?;
    debug!("Licensing API at {url} as {}", credentials.user);

    let client = LicensingClient::new(url, credentials)?;
    Ok(Box::new(client))
}

fn print_unit_report(number: usize, report: &UnitReport) {
    let signature = &report.signature;
    eprintln!(
        "{} Unit #{number} provisioned",
        style("✓").green().bold()
    );
    if let Some(product_id) = &signature.product_id {
        eprintln!("    product ID: {product_id}");
    }
    eprintln!("    unique ID:  {}", style(signature.unique_id_hex()).cyan());
    eprintln!(
        "    signature:  {}",
        if signature.reused {
            style("reused (issued before)").yellow()
        } else {
            style("newly issued").green()
        }
    );
    eprintln!("    {}", style(signature.signature_base64()).dim());
    if !report.flashed {
        eprintln!("    firmware:   not reflashed");
    }
    if report.boot == BootOutcome::TimedOut {
        eprintln!("    boot:       {}", style("not confirmed").yellow());
    }
}
