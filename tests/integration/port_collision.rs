use crate::common::*;
use std::net::TcpListener;
use tokio::process::Command;

#[tokio::test]
async fn port_collision_detected_before_start() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let project = TestProject::new(&format!(
        r#"
[components.l1]
command = "sleep"
args = ["30"]
port = {port}
"#
    ));

    let output = Command::new(env!("CARGO_BIN_EXE_stackrig"))
        .args(["start", "-f", project.config_path.to_str().unwrap()])
        .args(ONLY_L1)
        .output()
        .await
        .expect("failed to run stackrig");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Port conflicts detected"), "{stderr}");
    assert!(stderr.contains(&port.to_string()), "{stderr}");
    assert!(project.state().is_none());

    drop(listener);
}
