use crate::common::*;
use std::time::Duration;
use tokio::process::Command;

/// l1 comes up, the deployer fails: the run exits 1, l1 keeps running and
/// `stackrig stop` cleans it up afterwards.
#[tokio::test]
async fn failed_phase_leaves_stack_for_stop() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[readiness]
max_attempts = 50
interval = "100ms"

[components.l1]
command = "python3"
args = ["-m", "http.server", "{{{{ l1.port }}}}", "--bind", "127.0.0.1"]
port = {port}
probe = {{ type = "http" }}

[contracts]
command = "sh"
args = ["-c", "echo 'no deployer here' >&2; exit 2"]
cwd = "."
"#
    ));

    let flags: Vec<&str> = ONLY_L1
        .iter()
        .copied()
        .filter(|f| *f != "--no-contracts")
        .collect();
    let output = tokio::time::timeout(
        Duration::from_secs(30),
        Command::new(env!("CARGO_BIN_EXE_stackrig"))
            .args(["start", "-f", project.config_path.to_str().unwrap()])
            .args(&flags)
            .output(),
    )
    .await
    .expect("stackrig did not exit")
    .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("phase `contracts` failed"), "{stderr}");
    assert!(stderr.contains("no deployer here"), "{stderr}");

    // Still running, and recorded.
    assert!(wait_for_port(port, Duration::from_secs(2)).await);
    let state = project.state().expect("state.json should survive a failed run");
    assert_eq!(state["processes"][0]["name"], "l1");

    let stop = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["stop", "-f", project.config_path.to_str().unwrap()])
        .output()
        .await
        .unwrap();
    assert!(stop.status.success());
    assert!(wait_for_port_release(port, Duration::from_secs(10)).await);
    assert!(project.state().is_none());
}

#[tokio::test]
async fn teardown_on_failure_stops_started_processes() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[components.l1]
command = "python3"
args = ["-m", "http.server", "{{{{ l1.port }}}}", "--bind", "127.0.0.1"]
port = {port}
probe = {{ type = "http" }}

[contracts]
command = "false"
"#
    ));

    let flags: Vec<&str> = ONLY_L1
        .iter()
        .copied()
        .filter(|f| *f != "--no-contracts")
        .collect();
    let output = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["start", "--teardown-on-failure", "-f", project.config_path.to_str().unwrap()])
        .args(&flags)
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(wait_for_port_release(port, Duration::from_secs(10)).await);
    assert!(project.state().is_none());
}

#[tokio::test]
async fn readiness_timeout_is_fatal() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[readiness]
max_attempts = 3
interval = "50ms"

[components.l1]
command = "sleep"
args = ["30"]
port = {port}
probe = {{ type = "tcp" }}
"#
    ));

    let output = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["start", "--teardown-on-failure", "-f", project.config_path.to_str().unwrap()])
        .args(ONLY_L1)
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("phase `chains` failed"), "{stderr}");
    assert!(stderr.contains("did not become ready after 3 attempts"), "{stderr}");
}
