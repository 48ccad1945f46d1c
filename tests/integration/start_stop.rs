use crate::common::*;
use std::time::Duration;
use tokio::process::Command;

fn l1_only_project(port: u16) -> TestProject {
    TestProject::new(&format!(
        r#"
[components.l1]
command = "python3"
args = ["-m", "http.server", "{{{{ l1.port }}}}", "--bind", "127.0.0.1"]
port = {port}
probe = {{ type = "http" }}
stop = ["touch", "{{{{ data_dir }}}}/l1-stopped"]
"#
    ))
}

#[tokio::test]
async fn start_stop_lifecycle() {
    let port = free_port();
    let project = l1_only_project(port);

    let mut child = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["start", "-f", project.config_path.to_str().unwrap()])
        .args(ONLY_L1)
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start stackrig");

    assert!(
        wait_for_port(port, Duration::from_secs(10)).await,
        "l1 did not become reachable on port {port}"
    );
    assert!(
        wait_for(
            || project
                .state()
                .is_some_and(|s| s["processes"][0]["name"] == "l1"),
            Duration::from_secs(10)
        )
        .await,
        "state.json never listed l1"
    );

    #[cfg(unix)]
    {
        let pid = child.id().unwrap();
        send_signal(pid, nix::sys::signal::Signal::SIGINT);
        // A second signal during teardown must not start a second teardown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        send_signal(pid, nix::sys::signal::Signal::SIGTERM);
    }

    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("stackrig did not exit in time")
        .expect("failed to wait on stackrig");
    assert!(status.success(), "clean shutdown should exit 0, got {status}");

    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after stop"
    );
    assert!(project.data_dir().join("l1-stopped").exists(), "stop hook did not run");
    assert!(project.state().is_none(), "state.json should be removed");
    assert!(project.data_dir().join("logs/l1.log").exists());
}

#[tokio::test]
async fn status_reports_running_stack() {
    let port = free_port();
    let project = l1_only_project(port);

    let mut child = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["start", "-f", project.config_path.to_str().unwrap()])
        .args(ONLY_L1)
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start stackrig");

    assert!(wait_for_port(port, Duration::from_secs(10)).await);
    assert!(wait_for(|| project.state().is_some(), Duration::from_secs(10)).await);

    let output = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["status", "-f", project.config_path.to_str().unwrap()])
        .output()
        .await
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("l1"), "{stdout}");
    assert!(stdout.contains(&format!("http://127.0.0.1:{port}")), "{stdout}");
    assert!(stdout.contains("ok"), "{stdout}");

    #[cfg(unix)]
    send_signal(child.id().unwrap(), nix::sys::signal::Signal::SIGINT);
    let _ = tokio::time::timeout(Duration::from_secs(15), child.wait()).await;
    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
}
