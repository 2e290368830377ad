//! escprov CLI - production-line station for ESC boards.
//!
//! ## Features
//!
//! - Interface health check of the debug probe and the CAN bus
//! - Firmware download and flashing through the debug probe
//! - Boot detection with a hard watchdog
//! - Signature issuance, installation and read-back verification
//! - Serial port listing and shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod prompt;

use commands::{check::cmd_check, completions::cmd_completions, ports::cmd_list_ports, run::RunArgs};
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler of the unit loop.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the operator asked to stop.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// escprov - flash, sign and verify ESC boards on the production line.
///
/// Environment variables:
///   ESCPROV_PRODUCT             - Product name (default: io.px4.sapog)
///   ESCPROV_BITRATE             - CAN bitrate (default: 125000)
///   ESCPROV_LICENSING_URL       - Licensing API endpoint
///   ESCPROV_LICENSING_USER      - Licensing API account
///   ESCPROV_LICENSING_PASSWORD  - Licensing API password
///   ESCPROV_NON_INTERACTIVE     - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "escprov")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Product name; also the boot marker and the signing scope.
    #[arg(long, global = true, env = "ESCPROV_PRODUCT")]
    product: Option<String>,

    /// CAN bitrate.
    #[arg(short, long, global = true, env = "ESCPROV_BITRATE")]
    bitrate: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ESCPROV_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Provision units one after another.
    Run(RunArgs),

    /// Check the probe channels and the CAN interface, then exit.
    Check {
        /// CAN interface name (e.g. can0) or SLCAN adapter path.
        iface: String,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Failure classes with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing input.
    #[error("{0}")]
    Usage(String),
    /// The bench is not usable.
    #[error("{0}")]
    Fatal(String),
    /// The operator cancelled.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Fatal(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for an error that ended the command.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    match err.downcast_ref::<escprov::Error>() {
        Some(e) if e.is_fatal_to_run() => 3,
        _ => 1,
    }
}

/// Operator status line.
pub(crate) fn status(cli: &Cli, message: impl Display) {
    if !cli.quiet {
        eprintln!("{} {message}", style("→").green());
    }
}

/// Operator warning line.
pub(crate) fn warning(message: impl Display) {
    eprintln!("{} {message}", style("⚠").yellow());
}

/// Operator error line.
pub(crate) fn failure(message: impl Display) {
    eprintln!("{} {message}", style("✗").red());
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "escprov v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = dispatch(&cli) {
        let code = exit_code(&err);
        if code == 3 {
            eprintln!("{} {err:#}", style("Fatal:").red().bold());
        } else {
            eprintln!("{} {err:#}", style("Error:").red().bold());
        }
        std::process::exit(code);
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Run(args) => {
            install_interrupt_handler();
            commands::run::cmd_run(cli, &config, args)?;
        },
        Commands::Check { iface } => {
            cmd_check(cli, &config, iface)?;
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(*json, &config.probe_endpoints());
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        },
    }

    Ok(())
}

/// First Ctrl-C stops the unit loop before the next unit, the second exits.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            eprintln!();
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Stopping after the current unit (press Ctrl-C again to exit now)",
            style("⚠").yellow()
        );
    });
    if let Err(e) = result {
        debug!("Could not install the Ctrl-C handler: {e}");
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from([
            "escprov",
            "--product",
            "com.zubax.orel",
            "run",
            "/dev/ttyACM1",
            "--firmware",
            "fw.compound.bin",
            "--offline",
        ])
        .unwrap();
        assert_eq!(cli.product.as_deref(), Some("com.zubax.orel"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.iface, "/dev/ttyACM1");
                assert_eq!(args.firmware.as_deref(), Some("fw.compound.bin"));
                assert!(args.offline);
            },
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_global_after_subcommand() {
        let cli = Cli::try_parse_from(["escprov", "check", "can0", "-b", "500000", "-vv"]).unwrap();
        assert_eq!(cli.bitrate, Some(500_000));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Check { ref iface } if iface == "can0"));
    }

    #[test]
    fn test_cli_run_requires_interface() {
        assert!(Cli::try_parse_from(["escprov", "run"]).is_err());
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["escprov", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["escprov", "completions", "zsh"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { shell: Shell::Zsh }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Fatal("x".into()).into()), 3);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(
            exit_code(&escprov::Error::Interface("slcan0".into()).into()),
            3
        );
        assert_eq!(exit_code(&escprov::Error::Flash("gdb".into()).into()), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_exit_code_survives_context() {
        use anyhow::Context as _;
        let err = Err::<(), _>(escprov::Error::Validation("too small".into()))
            .context("Failed to load the firmware")
            .unwrap_err();
        assert_eq!(exit_code(&err), 3);
    }
}
