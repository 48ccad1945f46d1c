use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::error::StackError;
use super::state::write_json_atomic;

pub const DEPLOYMENT_FILE: &str = "deployment.json";

/// Contract name to deployed address, as written by the contracts phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentRecord {
    contracts: BTreeMap<String, String>,
}

impl DeploymentRecord {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(DEPLOYMENT_FILE)
    }

    pub fn get(&self, contract: &str) -> Option<&str> {
        self.contracts.get(contract).map(String::as_str)
    }

    pub fn insert(&mut self, contract: impl Into<String>, address: impl Into<String>) {
        self.contracts.insert(contract.into(), address.into());
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Overwrite `<data_dir>/deployment.json` with this record.
    pub fn save(&self, data_dir: &Path) -> Result<(), StackError> {
        write_json_atomic(data_dir, DEPLOYMENT_FILE, self).map_err(|e| StackError::Record {
            path: Self::path(data_dir).display().to_string(),
            message: format!("{:#}", e),
        })
    }

    pub fn load(data_dir: &Path) -> Result<Self, StackError> {
        let path = Self::path(data_dir);
        let record_err = |message: String| StackError::Record {
            path: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(&path).map_err(|e| record_err(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| record_err(e.to_string()))
    }

    /// `STACKRIG_CONTRACT_<NAME>_ADDRESS` for every entry.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.contracts
            .iter()
            .map(|(name, address)| {
                (
                    format!("STACKRIG_CONTRACT_{}_ADDRESS", screaming_snake(name)),
                    address.clone(),
                )
            })
            .collect()
    }

    /// Pick the address map out of deployer output: the last line that is a
    /// JSON object of strings.
    pub fn from_deployer_output(stdout: &str) -> Option<Self> {
        stdout.lines().rev().find_map(|line| {
            let line = line.trim();
            if !line.starts_with('{') {
                return None;
            }
            serde_json::from_str::<BTreeMap<String, String>>(line)
                .ok()
                .map(|contracts| Self { contracts })
        })
    }
}

/// `identityRegistry` -> `IDENTITY_REGISTRY`, `L2StandardBridge` -> `L2_STANDARD_BRIDGE`.
fn screaming_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase()
                && prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
            {
                out.push('_');
            }
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
        prev = Some(c);
    }
    out.trim_end_matches('_').to_string()
}

/// How to invoke the one-shot contract deployer.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub log_path: Option<PathBuf>,
}

impl DeployRequest {
    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run the deployer to completion, persist the address map it prints and
/// return it.
pub async fn deploy_contracts(
    req: &DeployRequest,
    data_dir: &Path,
) -> Result<DeploymentRecord, StackError> {
    let command_line = req.command_line();
    info!(command = %command_line, "deploying contracts");

    let mut cmd = Command::new(&req.program);
    cmd.args(&req.args)
        .envs(&req.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &req.cwd {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| StackError::Deploy(format!("`{}`: {}", command_line, e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if let Some(path) = &req.log_path {
        if let Err(e) = append_log(path, &output.stdout, &output.stderr).await {
            warn!(path = %path.display(), error = %e, "could not write deployer log");
        }
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("").trim();
        return Err(StackError::Deploy(format!(
            "`{}` exited with {}{}",
            command_line,
            output.status,
            if tail.is_empty() {
                String::new()
            } else {
                format!(": {}", tail)
            }
        )));
    }

    let record = DeploymentRecord::from_deployer_output(&stdout).ok_or_else(|| {
        StackError::Deploy(format!("`{}` printed no contract address map", command_line))
    })?;
    record.save(data_dir)?;
    debug!(contracts = record.len(), "deployment record written");
    info!(contracts = record.len(), "contracts deployed");
    Ok(record)
}

async fn append_log(path: &Path, stdout: &[u8], stderr: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(stdout).await?;
    file.write_all(stderr).await?;
    file.flush().await
}
