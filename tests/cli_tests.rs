//! Integration tests for the vpnkit command-line front end
//!
//! Each test runs the built binary with `VPNKIT_CONFIG_DIR` pointing at a
//! fresh temporary directory, so the user's configuration is never touched.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn vpnkit(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vpnkit"))
        .args(args)
        .env("VPNKIT_CONFIG_DIR", config_dir)
        .env_remove("JOURNAL_STREAM")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run vpnkit")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn server_list(dir: &Path) -> std::path::PathBuf {
    let servers = serde_json::json!({
        "Code": 1000,
        "LogicalServers": [
            {
                "ID": "ch-1", "Name": "CH#1", "Domain": "ch-01.example.net", "Load": 40,
                "EntryCountry": "CH", "ExitCountry": "CH", "City": "Zurich",
                "Tier": 0, "Features": 0, "Score": 2.5, "Status": 1,
                "Servers": [{"ID": "ip-1", "EntryIP": "192.0.2.1", "ExitIP": "192.0.2.1",
                             "Domain": "node-ch-01.example.net", "Status": 1}]
            },
            {
                "ID": "se-1", "Name": "SE#1", "Domain": "se-01.example.net", "Load": 10,
                "EntryCountry": "SE", "ExitCountry": "SE", "City": "Stockholm",
                "Tier": 0, "Features": 0, "Score": 1.0, "Status": 1,
                "Servers": [{"ID": "ip-2", "EntryIP": "192.0.2.2", "ExitIP": "192.0.2.2",
                             "Domain": "node-se-01.example.net", "Status": 1}]
            },
            {
                "ID": "ch-9", "Name": "CH#9", "Domain": "ch-09.example.net", "Load": 5,
                "EntryCountry": "CH", "ExitCountry": "CH", "City": "Geneva",
                "Tier": 2, "Features": 0, "Score": 0.5, "Status": 1,
                "Servers": [{"ID": "ip-9", "EntryIP": "192.0.2.9", "ExitIP": "192.0.2.9",
                             "Domain": "node-ch-09.example.net", "Status": 1}]
            }
        ]
    });
    let path = dir.join("servers.json");
    std::fs::write(&path, servers.to_string()).unwrap();
    path
}

#[test]
fn test_keygen_prints_public_key_only() {
    let dir = TempDir::new().unwrap();

    let output = vpnkit(dir.path(), &["keygen"]);

    assert!(output.status.success());
    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1, "keygen should print a single line");
    // 32 bytes in padded base64
    assert_eq!(lines[0].len(), 44);
}

#[test]
fn test_config_init_then_validate() {
    let dir = TempDir::new().unwrap();

    let init = vpnkit(dir.path(), &["config", "init"]);
    let validate = vpnkit(dir.path(), &["config", "validate"]);

    assert!(init.status.success());
    assert!(dir.path().join("config.toml").exists());
    assert!(validate.status.success());
    assert!(stdout(&validate).contains("is valid"));
}

#[test]
fn test_config_init_keeps_existing_file() {
    // Given an existing configuration with a custom value
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[probe]\ntimeout_ms = 1500\n").unwrap();

    // When init runs without --force
    let output = vpnkit(dir.path(), &["config", "init"]);

    // Then the file is left alone
    assert!(output.status.success());
    assert!(stdout(&output).contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[probe]\ntimeout_ms = 1500\n");
}

#[test]
fn test_config_show_without_file_prints_defaults() {
    let dir = TempDir::new().unwrap();

    let output = vpnkit(dir.path(), &["config", "show"]);

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("[connection]"));
    assert!(out.contains("attempt_timeout_secs = 30"));
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    // Given a configuration with an out-of-range attempt timeout
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[connection]\nattempt_timeout_secs = 1\n",
    )
    .unwrap();

    // When it is validated
    let output = vpnkit(dir.path(), &["config", "validate"]);

    // Then the configuration exit code is used
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_select_fastest_accessible_server() {
    // Given a free user and a faster server that needs a paid tier
    let dir = TempDir::new().unwrap();
    let servers = server_list(dir.path());

    // When the fastest server is selected
    let output = vpnkit(
        dir.path(),
        &["select", "--servers", servers.to_str().unwrap(), "--tier", "0"],
    );

    // Then the lowest score the user may use wins
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("SE#1"), "unexpected output: {}", out);
    assert!(!out.contains("CH#9"));
}

#[test]
fn test_select_in_country() {
    let dir = TempDir::new().unwrap();
    let servers = server_list(dir.path());

    let output = vpnkit(
        dir.path(),
        &["select", "--servers", servers.to_str().unwrap(), "--country", "CH", "--tier", "2"],
    );

    assert!(output.status.success());
    assert!(stdout(&output).contains("CH#9"));
}

#[test]
fn test_select_reports_missing_server() {
    let dir = TempDir::new().unwrap();
    let servers = server_list(dir.path());

    let output = vpnkit(
        dir.path(),
        &["select", "--servers", servers.to_str().unwrap(), "--country", "DE"],
    );

    assert!(output.status.success());
    assert!(stdout(&output).contains("No server matches"));
}

#[test]
fn test_probe_rejects_unknown_protocol() {
    let dir = TempDir::new().unwrap();

    let output = vpnkit(dir.path(), &["probe", "--ip", "192.0.2.1", "--protocol", "pptp"]);

    assert!(!output.status.success());
}
