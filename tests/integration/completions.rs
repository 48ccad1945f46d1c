use clap::CommandFactory;
use clap_complete::aot::{generate, Shell};
use std::io::BufWriter;

fn completions(shell: Shell) -> String {
    let mut buf = BufWriter::new(Vec::new());
    generate(shell, &mut stackrig::cli::Cli::command(), "stackrig", &mut buf);
    String::from_utf8(buf.into_inner().unwrap()).unwrap()
}

#[test]
fn completions_bash_generates_output() {
    let output = completions(Shell::Bash);
    assert!(!output.is_empty(), "bash completions should not be empty");
    assert!(output.contains("stackrig"));
    assert!(output.contains("--no-validator"));
}

#[test]
fn completions_zsh_generates_output() {
    let output = completions(Shell::Zsh);
    assert!(!output.is_empty(), "zsh completions should not be empty");
    assert!(output.contains("stackrig"));
}

#[test]
fn completions_fish_generates_output() {
    let output = completions(Shell::Fish);
    assert!(output.contains("teardown-on-failure"));
}
