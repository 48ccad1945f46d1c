use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ShutdownError;
use super::registry::ProcessRegistry;

const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Exited,
}

/// Cleanup that is not a registered process, e.g. `docker compose down`.
pub trait StopHook: Send + Sync {
    fn name(&self) -> &str;
    fn stop(&self) -> BoxFuture<'_, Result<(), ShutdownError>>;
}

/// A stop hook that runs an external command and expects exit status 0.
#[derive(Debug, Clone)]
pub struct CommandHook {
    name: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandHook {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }
}

impl StopHook for CommandHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ShutdownError>> {
        Box::pin(async move {
            let hook_err = |message: String| ShutdownError::Hook {
                name: self.name.clone(),
                message,
            };

            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            if let Some(dir) = &self.cwd {
                cmd.current_dir(dir);
            }

            debug!(hook = %self.name, "running: {}", self.command_line());
            let status = cmd
                .status()
                .await
                .map_err(|e| hook_err(format!("`{}`: {}", self.command_line(), e)))?;
            if !status.success() {
                return Err(hook_err(format!("`{}` exited with {}", self.command_line(), status)));
            }
            Ok(())
        })
    }
}

/// Tears the stack down exactly once, however many times it is asked to.
///
/// Order: every registered process newest-first, then stop hooks
/// newest-first. Failures are logged and returned but never stop the
/// remaining teardown.
pub struct ShutdownCoordinator {
    registry: Arc<ProcessRegistry>,
    hooks: Mutex<Vec<Arc<dyn StopHook>>>,
    hook_timeout: Duration,
    started: AtomicBool,
    requested: CancellationToken,
    state_tx: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            registry,
            hooks: Mutex::new(Vec::new()),
            hook_timeout: HOOK_TIMEOUT,
            started: AtomicBool::new(false),
            requested: CancellationToken::new(),
            state_tx,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn add_hook(&self, hook: Arc<dyn StopHook>) {
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    pub fn hook_names(&self) -> Vec<String> {
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    /// Cancelled as soon as a shutdown begins. The orchestrator's keep-alive
    /// waits on this.
    pub fn requested(&self) -> CancellationToken {
        self.requested.clone()
    }

    /// Run the teardown. Every call after the first returns immediately with
    /// no errors.
    pub async fn shutdown(&self) -> Vec<ShutdownError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("shutdown already in progress");
            return Vec::new();
        }

        self.state_tx.send_replace(ShutdownState::ShuttingDown);
        self.requested.cancel();
        info!(processes = self.registry.len(), "shutting down");

        let mut errors = self.registry.kill_all().await;

        let hooks: Vec<Arc<dyn StopHook>> = self
            .hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks.iter().rev() {
            info!(hook = %hook.name(), "running stop hook");
            let result = match tokio::time::timeout(self.hook_timeout, hook.stop()).await {
                Ok(result) => result,
                Err(_) => Err(ShutdownError::Hook {
                    name: hook.name().to_string(),
                    message: format!("timed out after {:?}", self.hook_timeout),
                }),
            };
            if let Err(e) = result {
                warn!(error = %e, "stop hook failed");
                errors.push(e);
            }
        }

        self.state_tx.send_replace(ShutdownState::Exited);
        info!("shutdown complete");
        errors
    }

    /// Resolve once a shutdown has fully completed.
    pub async fn wait_exited(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| *s == ShutdownState::Exited).await;
    }
}

/// Wait for the next SIGINT or SIGTERM and return its name.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(windows)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Forward every termination signal to `coordinator.shutdown()`.
pub fn spawn_signal_handler(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match wait_for_signal().await {
                Ok(signal) => {
                    info!("received {}", signal);
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move {
                        coordinator.shutdown().await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to install signal handler");
                    coordinator.shutdown().await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::process::ProcessHandle;
    use crate::orchestrator::testing::{FakeHook, FakeProcess, TerminationLog};

    async fn coordinator_with(log: &TerminationLog) -> (Arc<ShutdownCoordinator>, Vec<FakeProcess>) {
        let registry = Arc::new(ProcessRegistry::new());
        let mut fakes = Vec::new();
        for name in ["database", "l1", "gateway"] {
            let fake = FakeProcess::logged(log, name).slow(Duration::from_millis(20));
            fakes.push(fake.clone());
            registry.register(ProcessHandle::new(name, None, fake)).await;
        }
        let coordinator = ShutdownCoordinator::new(registry);
        coordinator.add_hook(Arc::new(FakeHook::new(log, "eqlite-down")));
        coordinator.add_hook(Arc::new(FakeHook::new(log, "storage-cleanup")));
        (Arc::new(coordinator), fakes)
    }

    #[tokio::test]
    async fn concurrent_shutdowns_tear_down_once() {
        let log = TerminationLog::default();
        let (coordinator, fakes) = coordinator_with(&log).await;

        let (a, b) = tokio::join!(coordinator.shutdown(), coordinator.shutdown());
        assert!(a.is_empty() && b.is_empty());
        coordinator.shutdown().await;

        assert!(fakes.iter().all(|f| f.terminations() == 1));
        assert_eq!(
            log.entries(),
            vec![
                "gateway",
                "l1",
                "database",
                "hook:storage-cleanup",
                "hook:eqlite-down"
            ]
        );
        assert_eq!(coordinator.state(), ShutdownState::Exited);
    }

    #[tokio::test]
    async fn failures_are_reported_and_teardown_continues() {
        let log = TerminationLog::default();
        let registry = Arc::new(ProcessRegistry::new());
        registry
            .register(ProcessHandle::new("storage", None, FakeProcess::logged(&log, "storage")))
            .await;
        registry
            .register(ProcessHandle::new("l1", None, FakeProcess::failing(&log, "l1")))
            .await;
        let coordinator = ShutdownCoordinator::new(registry.clone());
        coordinator.add_hook(Arc::new(FakeHook::new(&log, "first")));
        coordinator.add_hook(Arc::new(FakeHook::failing(&log, "second")));

        let errors = coordinator.shutdown().await;

        assert_eq!(errors.len(), 2);
        assert_eq!(
            log.entries(),
            vec!["l1", "storage", "hook:second", "hook:first"]
        );
        assert!(registry.is_empty());
        assert_eq!(coordinator.state(), ShutdownState::Exited);
    }

    #[tokio::test]
    async fn requested_token_and_exit_notification() {
        let log = TerminationLog::default();
        let (coordinator, _) = coordinator_with(&log).await;
        let token = coordinator.requested();
        assert!(!token.is_cancelled());
        assert_eq!(coordinator.state(), ShutdownState::Running);

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_exited().await })
        };
        let trigger = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.shutdown().await })
        };

        token.cancelled().await;
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait_exited should resolve")
            .unwrap();
        trigger.await.unwrap();
        assert_eq!(coordinator.state(), ShutdownState::Exited);
    }

    #[tokio::test]
    async fn slow_hook_is_cut_off() {
        struct Stuck;
        impl StopHook for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }
            fn stop(&self) -> BoxFuture<'_, Result<(), ShutdownError>> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
            }
        }

        let coordinator = ShutdownCoordinator::new(Arc::new(ProcessRegistry::new()))
            .with_hook_timeout(Duration::from_millis(50));
        coordinator.add_hook(Arc::new(Stuck));

        let errors = coordinator.shutdown().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_hook_reports_exit_status() {
        let ok = CommandHook::new("ok", "true", vec![]);
        assert!(ok.stop().await.is_ok());

        let failing = CommandHook::new("down", "sh", vec!["-c".into(), "exit 3".into()]);
        let err = failing.stop().await.unwrap_err();
        assert!(err.to_string().contains("down"));
        assert!(err.to_string().contains("exit"));

        let missing = CommandHook::new("gone", "stackrig-missing-hook-binary", vec![]);
        assert!(missing.stop().await.is_err());
    }
}
