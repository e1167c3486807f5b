use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rollout(dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("rollout").unwrap();
    cmd.current_dir(dir.path())
        .env("ROLLOUT_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    rollout(dir).arg("init").assert().success();
}

const SHOP_CONFIG: &str = "\
project:
  name: shop
registry:
  host: reg.example.com
artifacts:
  - name: auth
    context: services/auth
workloads:
  - name: auth
    descriptor: k8s/auth.yaml
    primary: true
";

fn write_shop_project(dir: &TempDir, config: &str) {
    init_project(dir);
    std::fs::write(dir.path().join(".rollout/config.yaml"), config).unwrap();
    std::fs::create_dir_all(dir.path().join("k8s")).unwrap();
    std::fs::write(
        dir.path().join("k8s/auth.yaml"),
        "kind: Deployment\nmetadata:\n  name: auth\nspec:\n  image: {{IMAGE}}\n",
    )
    .unwrap();
}

// ---------------------------------------------------------------------------
// rollout init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_descriptor_dirs() {
    let dir = TempDir::new().unwrap();
    rollout(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .rollout/config.yaml"));

    assert!(dir.path().join(".rollout/config.yaml").exists());
    assert!(dir.path().join(".rollout/descriptors").is_dir());
    assert!(dir.path().join(".rollout/descriptors/observability").is_dir());
    assert!(dir.path().join(".rollout/descriptors/example.yaml").exists());
}

#[test]
fn init_is_idempotent_and_never_overwrites() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let config = dir.path().join(".rollout/config.yaml");
    std::fs::write(&config, SHOP_CONFIG).unwrap();

    rollout(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .rollout/config.yaml"));
    assert_eq!(std::fs::read_to_string(&config).unwrap(), SHOP_CONFIG);
}

#[test]
fn init_config_names_the_project() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let text = std::fs::read_to_string(dir.path().join(".rollout/config.yaml")).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
    let name = value["project"]["name"].as_str().unwrap();
    assert!(!name.is_empty());
    assert_eq!(value["project"]["region"].as_str(), Some("us-east-1"));
}

// ---------------------------------------------------------------------------
// rollout config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_fresh_project_is_clean() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    rollout(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_errors_exit_13() {
    let dir = TempDir::new().unwrap();
    let config = format!(
        "{SHOP_CONFIG}  - name: orders\n    descriptor: k8s/auth.yaml\n    primary: true\n"
    );
    write_shop_project(&dir, &config);
    rollout(&dir)
        .args(["config", "validate"])
        .assert()
        .code(13)
        .stdout(predicate::str::contains("[error] 2 workloads are marked primary"))
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn config_validate_json_lists_warnings() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    std::fs::write(dir.path().join("k8s/auth.yaml"), "kind: Deployment\n").unwrap();
    let out = rollout(&dir)
        .args(["--json", "config", "validate"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let warnings = value["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w["level"] == "warning"
        && w["message"].as_str().unwrap().contains("placeholder")));
}

#[test]
fn uninitialized_project_exits_13() {
    let dir = TempDir::new().unwrap();
    rollout(&dir)
        .arg("up")
        .assert()
        .code(13)
        .stderr(predicate::str::contains("rollout init"));
}

// ---------------------------------------------------------------------------
// rollout up
// ---------------------------------------------------------------------------

#[test]
fn up_without_tools_exits_10_before_any_phase() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    let empty = TempDir::new().unwrap();
    rollout(&dir)
        .args(["up", "--non-interactive"])
        .env("PATH", empty.path())
        .assert()
        .code(10)
        .stderr(predicate::str::contains("not found on PATH"));
    assert!(!dir.path().join(".rollout/last-run.md").exists());
}

#[cfg(unix)]
const FAKE_AWS: &str =
    r#"echo '{"UserId":"AIDA","Account":"123456789012","Arn":"arn:aws:iam::123456789012:user/ci"}'"#;

#[cfg(unix)]
fn fake_tool(bin: &std::path::Path, name: &str, script: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = bin.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[test]
fn non_interactive_cost_gate_refuses_without_yes() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    let bin = TempDir::new().unwrap();
    let log = bin.path().join("calls.log");
    fake_tool(
        bin.path(),
        "terraform",
        &format!(
            r#"echo "$2" >> "{log}"
case "$2" in
  plan) exit 2 ;;
  show) echo '{{"resource_changes":[{{"address":"aws_eks_cluster.main","change":{{"actions":["create"]}}}}]}}' ;;
esac
exit 0"#,
            log = log.display()
        ),
    );
    fake_tool(bin.path(), "aws", FAKE_AWS);

    rollout(&dir)
        .args([
            "up",
            "--non-interactive",
            "--skip-artifacts",
            "--skip-workloads",
            "--skip-observability",
        ])
        .env("PATH", bin.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("declined"));

    let calls = std::fs::read_to_string(&log).unwrap();
    assert!(calls.contains("plan"));
    assert!(!calls.contains("apply"));

    let summary = std::fs::read_to_string(dir.path().join(".rollout/last-run.md")).unwrap();
    assert!(summary.contains("FAILED"));
    assert!(summary.contains("| infrastructure | failed |"));
}

#[cfg(unix)]
#[test]
fn unreachable_account_exits_11_before_any_phase() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    let bin = TempDir::new().unwrap();
    let log = bin.path().join("calls.log");
    fake_tool(
        bin.path(),
        "terraform",
        &format!(r#"echo "$2" >> "{}""#, log.display()),
    );
    fake_tool(
        bin.path(),
        "aws",
        "echo 'Unable to locate credentials' >&2\nexit 255",
    );

    rollout(&dir)
        .args([
            "up",
            "--yes",
            "--non-interactive",
            "--skip-artifacts",
            "--skip-workloads",
            "--skip-observability",
        ])
        .env("PATH", bin.path())
        .assert()
        .code(11)
        .stderr(predicate::str::contains("cannot reach the cloud account"));
    assert!(!log.exists());
    assert!(!dir.path().join(".rollout/last-run.md").exists());
}

#[cfg(unix)]
#[test]
fn up_with_every_phase_satisfied_or_skipped_succeeds() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    let bin = TempDir::new().unwrap();
    fake_tool(bin.path(), "terraform", "exit 0");
    fake_tool(bin.path(), "aws", FAKE_AWS);

    let out = rollout(&dir)
        .args([
            "--json",
            "up",
            "--non-interactive",
            "--skip-artifacts",
            "--skip-workloads",
            "--skip-observability",
        ])
        .env("PATH", bin.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(summary["succeeded"], true);
    assert_eq!(summary["phases"][0]["status"], "satisfied");
    assert_eq!(summary["phases"][1]["status"], "skipped");
}

// ---------------------------------------------------------------------------
// rollout status / credentials
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn status_without_kubectl_exits_10() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    let bin = TempDir::new().unwrap();
    fake_tool(bin.path(), "aws", FAKE_AWS);

    for command in ["status", "credentials"] {
        rollout(&dir)
            .arg(command)
            .env("PATH", bin.path())
            .assert()
            .code(10)
            .stderr(predicate::str::contains("'kubectl' not found on PATH"));
    }
}

// ---------------------------------------------------------------------------
// rollout wait / rollback
// ---------------------------------------------------------------------------

#[test]
fn wait_unknown_workload_exits_13() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    rollout(&dir)
        .args(["wait", "billing"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("workload not configured: billing"));
}

#[cfg(unix)]
#[test]
fn rollback_non_interactive_requires_yes() {
    let dir = TempDir::new().unwrap();
    write_shop_project(&dir, SHOP_CONFIG);
    let bin = TempDir::new().unwrap();
    let log = bin.path().join("calls.log");
    let record = format!(r#"echo "$0 $*" >> "{}""#, log.display());
    fake_tool(bin.path(), "aws", &record);
    fake_tool(bin.path(), "kubectl", &record);

    rollout(&dir)
        .args(["rollback", "auth", "--non-interactive"])
        .env("PATH", bin.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rollback of 'auth' declined"));
    assert!(!log.exists());
}
