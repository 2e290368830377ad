//! Pre-run interface health check.

use crate::error::Result;
use crate::fieldbus::{CommandRunner, bring_up};
use crate::port::Port;
use crate::probe::{OPEN_CHECK_TIMEOUT, ProbeEndpoints, open_glob};
use log::{error, info};
use std::fmt;

/// Outcome of one sub-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// What was checked.
    pub name: &'static str,
    /// Resolved resource on success, failure reason otherwise.
    pub detail: String,
    /// Whether the check passed.
    pub ok: bool,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.ok { "OK" } else { "FAILED" };
        write!(f, "{}: {status} ({})", self.name, self.detail)
    }
}

/// Outcome of all sub-checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Sub-check results in execution order.
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// Whether every sub-check passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    /// Failed sub-checks.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.ok)
    }

    fn record(&mut self, name: &'static str, result: Result<String>) {
        let check = match result {
            Ok(detail) => CheckResult {
                name,
                detail,
                ok: true,
            },
            Err(e) => CheckResult {
                name,
                detail: e.to_string(),
                ok: false,
            },
        };
        if check.ok {
            info!("{check}");
        } else {
            error!("{check}");
        }
        self.checks.push(check);
    }
}

/// Verify that the probe channels open and the CAN interface comes up.
///
/// Every check runs even if an earlier one failed.
pub fn check_all<R>(
    endpoints: &ProbeEndpoints,
    iface: &str,
    bitrate: u32,
    runner: &mut R,
) -> HealthReport
where
    R: CommandRunner + ?Sized,
{
    let mut report = HealthReport::default();
    report.record("Debug probe GDB channel", open_check(&endpoints.gdb_glob));
    report.record("Device CLI channel", open_check(&endpoints.cli_glob));
    report.record(
        "CAN interface",
        bring_up(runner, iface, bitrate).map(|handle| handle.to_string()),
    );
    report
}

fn open_check(pattern: &str) -> Result<String> {
    let mut port = open_glob(pattern, OPEN_CHECK_TIMEOUT)?;
    let name = port.name().to_string();
    port.close()?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldbus::recording::RecordingRunner;

    fn missing_endpoints(dir: &std::path::Path) -> ProbeEndpoints {
        ProbeEndpoints {
            gdb_glob: format!("{}/*Black_Magic_Probe*-if00", dir.display()),
            cli_glob: format!("{}/*Black_Magic_Probe*-if02", dir.display()),
        }
    }

    #[test]
    fn test_all_checks_run_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = RecordingRunner::default();

        let report = check_all(&missing_endpoints(dir.path()), "can0", 125_000, &mut runner);

        assert!(!report.is_ok());
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.failures().count(), 2);
        // The CAN check still ran
        assert!(report.checks[2].ok);
        assert_eq!(report.checks[2].detail, "can0");
        assert_eq!(runner.log.len(), 2);
    }

    #[test]
    fn test_can_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = RecordingRunner::failing(&["ip"]);

        let report = check_all(&missing_endpoints(dir.path()), "can0", 125_000, &mut runner);
        assert_eq!(report.failures().count(), 3);
        assert!(report.checks[2].detail.contains("Interface error"));
    }

    #[test]
    fn test_report_display_and_aggregate() {
        let report = HealthReport {
            checks: vec![CheckResult {
                name: "CAN interface",
                detail: "slcan0".into(),
                ok: true,
            }],
        };
        assert!(report.is_ok());
        assert_eq!(report.checks[0].to_string(), "CAN interface: OK (slcan0)");
        assert!(HealthReport::default().is_ok());
    }
}
