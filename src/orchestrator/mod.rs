pub mod apps;
pub mod components;
pub mod deployment;
pub mod error;
pub mod graph;
pub mod phase;
pub mod ports;
pub mod process;
pub mod ready;
pub mod registry;
pub mod shutdown;
pub mod state;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::model::StackConfig;
use crate::ui::summary::print_status;

use components::{full_stack, StackContext};
use error::StackError;
use phase::{PhaseReport, PhaseRunner, PhaseState};
use ports::{check_all_ports, format_port_conflicts};
use registry::ProcessRegistry;
use shutdown::{spawn_signal_handler, ShutdownCoordinator};
use state::StackState;

/// Brings the whole stack up phase by phase, keeps it alive until a
/// termination signal, then tears it down.
///
/// Startup order:
///   infrastructure -> chains -> contracts -> platform
///                            \-> node ------------------> apps
pub struct StackOrchestrator {
    ctx: StackContext,
}

impl StackOrchestrator {
    pub fn new(config: Arc<StackConfig>) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new(registry.clone()));
        Self {
            ctx: StackContext::new(config, registry, shutdown),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.ctx.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.ctx.shutdown
    }

    /// Run the stack until shutdown. Returns `Ok` after a signal-triggered
    /// teardown and `Err` when a required phase fails.
    pub async fn run(&self) -> Result<()> {
        let config = self.ctx.config.clone();

        let conflicts = check_all_ports(&config);
        if !conflicts.is_empty() {
            bail!("{}", format_port_conflicts(&conflicts));
        }

        std::fs::create_dir_all(config.log_dir())
            .with_context(|| format!("creating log directory {}", config.log_dir().display()))?;

        let plan = full_stack(&self.ctx)?;
        info!(phases = ?plan.names(), "startup plan");

        let signals = spawn_signal_handler(self.ctx.shutdown.clone());
        let requested = self.ctx.shutdown.requested();

        let mut runner = PhaseRunner::new();
        let mut snapshot = StackState::new(Utc::now());
        snapshot.host = Some(config.host.clone());

        let outcome = tokio::select! {
            result = runner.run(plan, |report| self.checkpoint(&mut snapshot, report)) => Some(result),
            _ = requested.cancelled() => None,
        };

        match outcome {
            None => {
                eprintln!("\nShutting down...");
                self.finish_shutdown().await;
                signals.abort();
                return Ok(());
            }
            Some(Err(e)) => {
                let result = self.abort_startup(e).await;
                signals.abort();
                return result;
            }
            Some(Ok(reports)) => {
                let skipped: Vec<&str> = reports
                    .iter()
                    .filter(|r| r.state == PhaseState::Skipped)
                    .map(|r| r.name.as_str())
                    .collect();
                info!(processes = self.ctx.registry.len(), skipped = ?skipped, "stack is up");
            }
        }

        print_status(&config, &self.ctx.registry.list());

        requested.cancelled().await;
        eprintln!("\nShutting down...");
        self.finish_shutdown().await;
        signals.abort();
        Ok(())
    }

    /// Persist what is running after every phase, so `stackrig stop` can find
    /// processes left behind by an aborted run.
    fn checkpoint(&self, snapshot: &mut StackState, report: &PhaseReport) {
        if report.state.satisfies_dependents() {
            snapshot.phases_completed.push(report.name.clone());
        }
        snapshot.processes = self.ctx.registry.list();
        snapshot.stop_hooks = self.ctx.hooks();
        if let Err(e) = snapshot.save(&self.ctx.config.data_dir) {
            warn!(error = %e, "failed to write stack state");
        }
    }

    async fn abort_startup(&self, err: StackError) -> Result<()> {
        let phase = err.phase().unwrap_or("startup").to_string();
        error!(phase = %phase, "startup failed: {:#}", err);

        if self.ctx.config.teardown_on_failure {
            eprintln!("Tearing down processes started so far...");
            self.ctx.shutdown.shutdown().await;
            self.remove_state();
        } else if !self.ctx.registry.is_empty() {
            eprintln!(
                "{} process(es) from earlier phases are still running; \
                 run `stackrig stop` to clean them up.",
                self.ctx.registry.len()
            );
        }

        Err(err.into())
    }

    async fn finish_shutdown(&self) {
        self.ctx.shutdown.wait_exited().await;

        // A step that was still in flight when the signal arrived may have
        // registered after the registry was drained.
        let stragglers = self.ctx.registry.kill_all().await;
        for e in stragglers {
            warn!(error = %e, "failed to stop process");
        }

        self.remove_state();
    }

    fn remove_state(&self) {
        if let Err(e) = StackState::remove(&self.ctx.config.data_dir) {
            warn!(error = %e, "failed to remove stack state");
        }
    }
}
