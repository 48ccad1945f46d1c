use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::platform::{self, ProcessGroupHandle};

use super::error::{ShutdownError, SpawnError};

/// The capability to stop whatever sits behind a [`ProcessHandle`].
pub trait Terminate: Send + Sync {
    fn terminate(&self) -> BoxFuture<'_, Result<(), ShutdownError>>;
}

/// The orchestrator's reference to one spawned external process.
pub struct ProcessHandle {
    name: String,
    port: Option<u16>,
    pid: Option<u32>,
    log_path: Option<PathBuf>,
    started_at: DateTime<Utc>,
    process: Box<dyn Terminate>,
}

/// A plain-data view of a registered handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSummary {
    pub name: String,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    #[serde(default)]
    pub log_path: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ProcessHandle {
    pub fn new(name: impl Into<String>, port: Option<u16>, process: impl Terminate + 'static) -> Self {
        Self {
            name: name.into(),
            port,
            pid: None,
            log_path: None,
            started_at: Utc::now(),
            process: Box::new(process),
        }
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn terminate(&self) -> Result<(), ShutdownError> {
        debug!(process = %self.name, pid = ?self.pid, "terminating");
        self.process.terminate().await
    }

    pub fn summary(&self) -> HandleSummary {
        HandleSummary {
            name: self.name.clone(),
            port: self.port,
            pid: self.pid,
            log_path: self
                .log_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Spawning real OS processes
// ---------------------------------------------------------------------------

/// Everything needed to launch one component process.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Overrides layered on top of the orchestrator's own environment.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub port: Option<u16>,
    /// stdout and stderr are appended here; discarded when `None`.
    pub log_path: Option<PathBuf>,
}

impl SpawnRequest {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A child process started by [`spawn`].
struct ChildProcess {
    name: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    group: Option<ProcessGroupHandle>,
}

impl Terminate for ChildProcess {
    fn terminate(&self) -> BoxFuture<'_, Result<(), ShutdownError>> {
        Box::pin(async move {
            let mut child = self.child.lock().await;
            platform::terminate_child(&mut child, self.pid, self.group.as_ref())
                .await
                .map_err(|e| ShutdownError::Terminate {
                    name: self.name.clone(),
                    message: e.to_string(),
                })
        })
    }
}

fn open_log(path: &PathBuf) -> std::io::Result<(Stdio, Stdio)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let err = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(err)))
}

/// Start a process in its own process group and wrap it in a handle.
///
/// The child is not killed when the handle is dropped: a run that aborts
/// half-way leaves its processes in place for `stackrig stop`.
pub fn spawn(req: SpawnRequest) -> Result<ProcessHandle, SpawnError> {
    let command_line = req.command_line();

    let mut cmd = Command::new(&req.program);
    cmd.args(&req.args);
    cmd.envs(&req.env);
    if let Some(dir) = &req.cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());

    match &req.log_path {
        Some(path) => {
            let (out, err) = open_log(path).map_err(|e| {
                SpawnError::new(
                    command_line.clone(),
                    std::io::Error::other(format!("opening log {}: {}", path.display(), e)),
                )
            })?;
            cmd.stdout(out).stderr(err);
        }
        None => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    platform::configure_process_group(&mut cmd);

    let child = cmd
        .spawn()
        .map_err(|e| SpawnError::new(command_line.clone(), e))?;
    let pid = child.id();
    let group = platform::post_spawn_setup(pid);

    info!(process = %req.name, pid = ?pid, port = ?req.port, "spawned: {}", command_line);

    let process = ChildProcess {
        name: req.name.clone(),
        pid,
        child: Mutex::new(child),
        group,
    };

    Ok(ProcessHandle::new(req.name, req.port, process)
        .with_pid(pid)
        .with_log_path(req.log_path))
}
