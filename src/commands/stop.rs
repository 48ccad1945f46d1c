use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::orchestrator::error::ShutdownError;
use crate::orchestrator::shutdown::{CommandHook, StopHook};
use crate::orchestrator::state::StackState;
use crate::platform::{is_process_alive, terminate_pid};

const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(
    config_file: Option<&Path>,
    root: Option<&Path>,
    data_dir: Option<&Path>,
) -> Result<()> {
    let data_dir = crate::config::locate_data_dir(config_file, root, data_dir)?;

    let state = match StackState::load(&data_dir) {
        Some(s) => s,
        None => {
            println!("No stack state found in {}; nothing to stop.", data_dir.display());
            return Ok(());
        }
    };

    let errors = stop_recorded(&state).await;
    StackState::remove(&data_dir)?;

    if errors.is_empty() {
        println!("Stopped {} process(es).", state.processes.len());
    } else {
        for e in &errors {
            eprintln!("  warning: {}", e);
        }
        println!(
            "Stopped with {} error(s); some processes may still be running.",
            errors.len()
        );
    }
    Ok(())
}

/// Tear down a stack from its persisted snapshot: processes newest-first,
/// then stop hooks newest-first. Every step is attempted.
pub async fn stop_recorded(state: &StackState) -> Vec<ShutdownError> {
    let mut errors = Vec::new();

    for process in state.processes.iter().rev() {
        let Some(pid) = process.pid else {
            continue;
        };
        if !is_process_alive(pid) {
            info!(process = %process.name, pid, "already exited");
            continue;
        }
        info!(process = %process.name, pid, "stopping");
        if let Err(e) = terminate_pid(pid).await {
            let err = ShutdownError::Terminate {
                name: process.name.clone(),
                message: e.to_string(),
            };
            warn!(error = %err, "terminate failed");
            errors.push(err);
        }
    }

    for hook in state.stop_hooks.iter().rev() {
        let command = CommandHook::new(&hook.name, &hook.program, hook.args.clone())
            .with_cwd(hook.cwd.as_ref().map(PathBuf::from));
        info!(hook = %hook.name, command = %command.command_line(), "running stop hook");
        let result = match tokio::time::timeout(HOOK_TIMEOUT, command.stop()).await {
            Ok(result) => result,
            Err(_) => Err(ShutdownError::Hook {
                name: hook.name.clone(),
                message: format!("timed out after {:?}", HOOK_TIMEOUT),
            }),
        };
        if let Err(e) = result {
            warn!(error = %e, "stop hook failed");
            errors.push(e);
        }
    }

    errors
}
