//! CLI contract tests.

use assert_cmd::Command;

const WEIR_VARS: [&str; 6] = [
    "WEIR_CONFIG_PATH",
    "WEIR_LOG_LEVEL",
    "WEIR_LOGS_DIR",
    "WEIR_QUERY_SOCKET",
    "WEIR_DNS_SOCKET",
    "WEIR_NAMESPACE_NAMING",
];

fn weir() -> Command {
    let mut cmd = Command::cargo_bin("weir").expect("weir binary should be built");
    for var in WEIR_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn help_lists_subcommands() {
    let output = weir().arg("--help").output().expect("run");
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    for sub in ["serve", "query", "observe", "check-config"] {
        assert!(stdout.contains(sub), "missing {sub} in help:\n{stdout}");
    }
}

#[test]
fn check_config_accepts_valid_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weir.toml");
    std::fs::write(
        &path,
        r#"
[sockets]
query = "/tmp/weir-test/q.sock"
dns = "/tmp/weir-test/d.sock"

[[tags]]
owner = "com.example.mail"
name = "inbox"
domains = ["mail.example.com"]
"#,
    )
    .expect("write config");

    let output = weir()
        .args(["check-config", "--config"])
        .arg(&path)
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("config OK"));
    assert!(stdout.contains("/tmp/weir-test/q.sock"));
    assert!(stdout.contains("bootstrap tags: 1"));
}

#[test]
fn check_config_rejects_shared_socket_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("weir.toml");
    std::fs::write(
        &path,
        "[sockets]\nquery = \"/tmp/same.sock\"\ndns = \"/tmp/same.sock\"\n",
    )
    .expect("write config");

    let output = weir()
        .args(["check-config", "--config"])
        .arg(&path)
        .output()
        .expect("run");
    assert!(!output.status.success());
}

#[test]
fn check_config_requires_explicit_file_to_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = weir()
        .args(["check-config", "--config"])
        .arg(dir.path().join("absent.toml"))
        .output()
        .expect("run");
    assert!(!output.status.success());
}

#[test]
fn query_without_service_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = weir()
        .args(["query", "socket;203.0.113.5;1;2;42", "--socket"])
        .arg(dir.path().join("absent.sock"))
        .output()
        .expect("run");
    assert!(!output.status.success());
}
