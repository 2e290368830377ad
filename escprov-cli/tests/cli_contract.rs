//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("escprov");
    for var in [
        "ESCPROV_PRODUCT",
        "ESCPROV_BITRATE",
        "ESCPROV_LICENSING_URL",
        "ESCPROV_LICENSING_USER",
        "ESCPROV_LICENSING_PASSWORD",
        "ESCPROV_NON_INTERACTIVE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Station config whose probe globs match nothing.
fn write_unplugged_config(dir: &Path) {
    let config = format!(
        "[probe]\ngdb_glob = \"{0}/*Black_Magic_Probe*-if00\"\ncli_glob = \"{0}/*Black_Magic_Probe*-if02\"\n",
        dir.display()
    );
    fs::write(dir.join("escprov.toml"), config).expect("write escprov.toml");
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("escprov"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn run_help_lists_firmware_option() {
    let mut cmd = cli_cmd();
    cmd.args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--firmware"))
        .stdout(predicate::str::contains("--offline"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("escprov"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be valid JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}

#[test]
fn completions_bash_writes_script() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("escprov"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_interface() {
    let mut cmd = cli_cmd();
    cmd.arg("run")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("IFACE"));
}

#[test]
fn exit_code_two_for_invalid_bitrate_value() {
    let mut cmd = cli_cmd();
    cmd.args(["check", "can0", "--bitrate", "fast"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_zero_boot_timeout() {
    let mut cmd = cli_cmd();
    cmd.args(["run", "can0", "--boot-timeout", "0"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--boot-timeout"));
}

#[test]
fn zero_boot_timeout_in_config_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path().join("escprov.toml"),
        "[station]\nboot_timeout_secs = 0\n",
    )
    .expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .assert()
        .success()
        .stderr(predicate::str::contains("boot_timeout_secs must be at least 1"));
}

#[test]
fn check_without_probe_is_fatal() {
    let dir = tempdir().expect("tempdir should be created");
    write_unplugged_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["check", "escprov-test-can9"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Debug probe GDB channel"))
        .stderr(predicate::str::contains("Device CLI channel"))
        .stderr(predicate::str::contains("physical connections"));
}

#[test]
fn check_rejects_unsupported_adapter_bitrate() {
    let dir = tempdir().expect("tempdir should be created");
    write_unplugged_config(dir.path());
    let adapter = dir.path().join("ttyACM9");
    fs::write(&adapter, b"").expect("create fake adapter");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("check")
        .arg(adapter.as_os_str())
        .args(["--bitrate", "300000"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("300000"));
}

#[test]
fn run_stops_before_firmware_when_bench_is_unusable() {
    let dir = tempdir().expect("tempdir should be created");
    write_unplugged_config(dir.path());

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--non-interactive", "run", "escprov-test-can9", "--offline"])
        .arg("--firmware")
        .arg(dir.path().join("missing.compound.bin").as_os_str())
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("interface check failed"))
        .stderr(predicate::str::contains("Loading the firmware").not());
}

#[test]
fn invalid_config_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("escprov.toml"), "invalid toml [[[").expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");
    assert!(
        output.status.success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn explicit_config_path_is_used() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("line-3.toml");
    fs::write(
        &config,
        "[probe]\ngdb_glob = \"/nonexistent/escprov-gdb-*\"\n",
    )
    .expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(config.as_os_str())
        .arg("list-ports")
        .assert()
        .success()
        .stderr(predicate::str::contains("/nonexistent/escprov-gdb-*"));
}
