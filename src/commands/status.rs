use anyhow::Result;
use is_terminal::IsTerminal;
use std::path::Path;

use crate::orchestrator::state::StackState;
use crate::platform::is_process_alive;
use crate::ui::summary::{render_status, StatusRow};

pub fn run(config_file: Option<&Path>, root: Option<&Path>, data_dir: Option<&Path>) -> Result<()> {
    let data_dir = crate::config::locate_data_dir(config_file, root, data_dir)?;

    let state = match StackState::load(&data_dir) {
        Some(s) => s,
        None => {
            println!("No running stack found.");
            println!("Run `stackrig start` to start one.");
            return Ok(());
        }
    };

    println!();
    println!(
        "  Stack started {} ({} phase(s) completed)",
        state.started_at.format("%Y-%m-%d %H:%M:%S"),
        state.phases_completed.len()
    );
    println!();
    println!(
        "{}",
        render_status(&status_rows(&state), std::io::stdout().is_terminal())
    );
    println!();
    Ok(())
}

/// One row per recorded process, with liveness checked against its pid.
pub fn status_rows(state: &StackState) -> Vec<StatusRow> {
    let host = state.host.as_deref().unwrap_or("127.0.0.1");
    state
        .processes
        .iter()
        .map(|p| StatusRow {
            name: p.name.clone(),
            endpoint: p
                .port
                .map(|port| format!("http://{}:{}", host, port))
                .unwrap_or_else(|| "-".to_string()),
            ok: p.pid.is_some_and(is_process_alive),
            pid: p.pid,
        })
        .collect()
}
