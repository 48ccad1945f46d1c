use crate::common::*;
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn unknown_component_suggests_fix() {
    let project = TestProject::new("[components.gatway]\nport = 4001\n");

    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["start", "-f", project.config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown component `gatway`"))
        .stderr(predicate::str::contains("gateway"));
}

#[test]
fn duplicate_ports_are_rejected() {
    let project = TestProject::new("[components.gateway]\nport = 8545\n");

    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["start", "-f", project.config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("port 8545 is used by multiple components"));
}

#[test]
fn missing_config_file_errors() {
    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["start", "-f", "/definitely/not/here/stackrig.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn status_without_stack() {
    let project = TestProject::new("");

    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["status", "--root", project.root().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No running stack found"));
}
