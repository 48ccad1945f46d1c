use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::process::HandleSummary;

pub const STATE_FILE: &str = "state.json";

/// What a running (or abandoned) stack looks like on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub started_at: DateTime<Utc>,
    /// Host the endpoints were bound to.
    #[serde(default)]
    pub host: Option<String>,
    /// Registered processes in registration order.
    pub processes: Vec<HandleSummary>,
    #[serde(default)]
    pub stop_hooks: Vec<HookState>,
    /// Phases that had completed when this snapshot was taken.
    #[serde(default)]
    pub phases_completed: Vec<String>,
}

/// A stop hook that a later `stackrig stop` can replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookState {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl StackState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            host: None,
            processes: Vec::new(),
            stop_hooks: Vec::new(),
            phases_completed: Vec::new(),
        }
    }

    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(STATE_FILE)
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        write_json_atomic(data_dir, STATE_FILE, self)
    }

    pub fn load(data_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path(data_dir)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn remove(data_dir: &Path) -> anyhow::Result<()> {
        let path = Self::path(data_dir);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Write `value` as pretty JSON to `dir/file_name` via a temp file and rename.
pub fn write_json_atomic<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let content = serde_json::to_string_pretty(value)?;
    let tmp_path = dir.join(format!("{}.tmp", file_name));
    std::fs::write(&tmp_path, &content)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}
