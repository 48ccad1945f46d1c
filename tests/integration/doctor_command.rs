use crate::common::*;
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn doctor_lists_tools_for_enabled_components() {
    let project = TestProject::new(
        r#"
[components.l1]
command = "sh"

[components.l2]
command = "definitely-missing-l2-binary"
"#,
    );

    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["doctor", "-f", project.config_path.to_str().unwrap(), "--no-database"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[ok] sh"))
        .stdout(predicate::str::contains("[!!] definitely-missing-l2-binary"))
        .stdout(predicate::str::contains("docker").not());
}
