use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::ready::{Probe, ReadinessPolicy};

/// Every long-running component the stack knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    L1,
    L2,
    Validator,
    Database,
    Storage,
    Gateway,
    Compute,
    StorageWorker,
    Tunnel,
    Proxy,
}

impl ComponentKind {
    /// Display order for status output.
    pub const ALL: [ComponentKind; 10] = [
        ComponentKind::L1,
        ComponentKind::L2,
        ComponentKind::Validator,
        ComponentKind::Database,
        ComponentKind::Storage,
        ComponentKind::Gateway,
        ComponentKind::Compute,
        ComponentKind::StorageWorker,
        ComponentKind::Tunnel,
        ComponentKind::Proxy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::L1 => "l1",
            ComponentKind::L2 => "l2",
            ComponentKind::Validator => "validator",
            ComponentKind::Database => "database",
            ComponentKind::Storage => "storage",
            ComponentKind::Gateway => "gateway",
            ComponentKind::Compute => "compute",
            ComponentKind::StorageWorker => "storage-worker",
            ComponentKind::Tunnel => "tunnel",
            ComponentKind::Proxy => "proxy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// `STACKRIG_<PREFIX>_*` environment variable prefix.
    pub fn env_prefix(self) -> String {
        self.name().replace('-', "_").to_ascii_uppercase()
    }

    pub fn default_port(self) -> u16 {
        match self {
            ComponentKind::L1 => 8545,
            ComponentKind::L2 => 9545,
            ComponentKind::Validator => 8899,
            ComponentKind::Database => 4661,
            ComponentKind::Storage => 4010,
            ComponentKind::Gateway => 4001,
            ComponentKind::Compute => 4007,
            ComponentKind::StorageWorker => 4008,
            ComponentKind::Tunnel => 4009,
            ComponentKind::Proxy => 4020,
        }
    }

    /// Node worker capabilities are started by the `node` phase and are off
    /// unless asked for.
    pub fn is_worker(self) -> bool {
        matches!(
            self,
            ComponentKind::Compute
                | ComponentKind::StorageWorker
                | ComponentKind::Tunnel
                | ComponentKind::Proxy
        )
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which parts of the stack this run brings up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub l1: bool,
    pub l2: bool,
    pub database: bool,
    pub validator: bool,
    pub storage: bool,
    pub gateway: bool,
    pub node: bool,
    pub contracts: bool,
    pub apps: bool,
    pub compute: bool,
    pub storage_worker: bool,
    pub tunnel: bool,
    pub proxy: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            l1: true,
            l2: true,
            database: true,
            validator: true,
            storage: true,
            gateway: true,
            node: true,
            contracts: true,
            apps: true,
            compute: false,
            storage_worker: false,
            tunnel: false,
            proxy: false,
        }
    }
}

impl Features {
    pub fn is_enabled(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::L1 => self.l1,
            ComponentKind::L2 => self.l2,
            ComponentKind::Validator => self.validator,
            ComponentKind::Database => self.database,
            ComponentKind::Storage => self.storage,
            ComponentKind::Gateway => self.gateway,
            ComponentKind::Compute => self.node && self.compute,
            ComponentKind::StorageWorker => self.node && self.storage_worker,
            ComponentKind::Tunnel => self.node && self.tunnel,
            ComponentKind::Proxy => self.node && self.proxy,
        }
    }
}

/// How to launch and probe one component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub probe: Probe,
    /// Command run during teardown, after processes are stopped.
    pub stop: Option<Vec<String>>,
    /// A missing binary skips the component instead of failing the phase.
    pub optional: bool,
}

impl ComponentSpec {
    fn new(program: &str, args: &[&str], port: u16, probe: Probe) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            env: BTreeMap::new(),
            port,
            probe,
            stop: None,
            optional: false,
        }
    }

    fn in_dir(mut self, dir: &str) -> Self {
        self.cwd = Some(PathBuf::from(dir));
        self
    }

    /// Built-in launch recipe. Arguments may contain `{{ var }}` templates
    /// that are resolved once the final ports and directories are known.
    pub fn builtin(kind: ComponentKind) -> Self {
        let port = kind.default_port();
        let health = || Probe::Http {
            path: "/health".to_string(),
        };
        match kind {
            ComponentKind::L1 => Self::new(
                "anvil",
                &["--host", "{{ host }}", "--port", "{{ l1.port }}", "--chain-id", "1337"],
                port,
                Probe::ChainId,
            ),
            ComponentKind::L2 => Self::new(
                "geth",
                &[
                    "--dev",
                    "--http",
                    "--http.addr",
                    "{{ host }}",
                    "--http.port",
                    "{{ l2.port }}",
                    "--http.api",
                    "eth,net,web3,debug",
                    "--ws",
                    "--ws.addr",
                    "{{ host }}",
                    "--ws.port",
                    "{{ l2.ws_port }}",
                    "--datadir",
                    "{{ data_dir }}/l2",
                ],
                port,
                Probe::ChainId,
            ),
            ComponentKind::Validator => Self {
                optional: true,
                ..Self::new(
                    "solana-test-validator",
                    &[
                        "--rpc-port",
                        "{{ validator.port }}",
                        "--ledger",
                        "{{ data_dir }}/solana-ledger",
                        "--quiet",
                        "--reset",
                    ],
                    port,
                    Probe::Health,
                )
            },
            ComponentKind::Database => {
                let compose = [
                    "compose",
                    "-f",
                    "{{ root }}/packages/eqlite/docker-compose.yml",
                    "-p",
                    "stackrig-eqlite",
                ];
                let up: Vec<&str> = compose.iter().copied().chain(["up"]).collect();
                let down: Vec<String> = std::iter::once("docker")
                    .chain(compose.iter().copied())
                    .chain(["down"])
                    .map(String::from)
                    .collect();
                Self {
                    stop: Some(down),
                    ..Self::new("docker", &up, port, Probe::Tcp)
                }
            }
            ComponentKind::Storage => {
                Self::new("bun", &["run", "start"], port, health()).in_dir("{{ root }}/packages/storage")
            }
            ComponentKind::Gateway => {
                Self::new("bun", &["run", "start"], port, health()).in_dir("{{ root }}/packages/gateway")
            }
            ComponentKind::Compute => Self::new("bun", &["run", "start:compute"], port, Probe::Tcp)
                .in_dir("{{ root }}/packages/node"),
            ComponentKind::StorageWorker => {
                Self::new("bun", &["run", "start:storage"], port, Probe::Tcp)
                    .in_dir("{{ root }}/packages/node")
            }
            ComponentKind::Tunnel => Self::new("bun", &["run", "start:tunnel"], port, Probe::Tcp)
                .in_dir("{{ root }}/packages/node"),
            ComponentKind::Proxy => Self::new("bun", &["run", "start:proxy"], port, Probe::Tcp)
                .in_dir("{{ root }}/packages/node"),
        }
    }
}

/// The one-shot contract deployer.
#[derive(Clone, PartialEq)]
pub struct DeployerSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Opaque secret handed to the deployer as `DEPLOYER_PRIVATE_KEY`.
    pub key: Option<String>,
}

impl Default for DeployerSpec {
    fn default() -> Self {
        Self {
            program: "bun".to_string(),
            args: vec!["run".to_string(), "scripts/deploy-localnet.ts".to_string()],
            cwd: Some(PathBuf::from("{{ root }}/packages/contracts")),
            env: BTreeMap::new(),
            key: None,
        }
    }
}

impl std::fmt::Debug for DeployerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployerSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Directory scanned for `*/stackrig.app.toml`.
    pub dir: PathBuf,
    pub skip: BTreeSet<String>,
}

/// Everything a run needs, fixed before the first phase starts.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub features: Features,
    pub root_dir: PathBuf,
    pub data_dir: PathBuf,
    pub host: String,
    pub components: BTreeMap<ComponentKind, ComponentSpec>,
    pub deployer: DeployerSpec,
    pub apps: AppSettings,
    pub readiness: ReadinessPolicy,
    pub teardown_on_failure: bool,
}

impl StackConfig {
    pub fn is_enabled(&self, kind: ComponentKind) -> bool {
        self.features.is_enabled(kind)
    }

    /// Enabled components in display order.
    pub fn enabled_components(&self) -> Vec<ComponentKind> {
        ComponentKind::ALL
            .into_iter()
            .filter(|k| self.is_enabled(*k))
            .collect()
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&ComponentSpec> {
        self.components.get(&kind)
    }

    pub fn port(&self, kind: ComponentKind) -> u16 {
        self.component(kind)
            .map(|c| c.port)
            .unwrap_or_else(|| kind.default_port())
    }

    pub fn l2_ws_port(&self) -> u16 {
        self.port(ComponentKind::L2).saturating_add(1)
    }

    pub fn endpoint(&self, kind: ComponentKind) -> String {
        format!("http://{}:{}", self.host, self.port(kind))
    }

    pub fn l2_ws_endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.l2_ws_port())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir().join(format!("{}.log", name.replace(':', "-")))
    }

    /// `STACKRIG_*` variables describing the enabled topology.
    pub fn child_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "STACKRIG_DATA_DIR".to_string(),
            self.data_dir.to_string_lossy().to_string(),
        );
        for kind in self.enabled_components() {
            let prefix = kind.env_prefix();
            env.insert(format!("STACKRIG_{}_HOST", prefix), self.host.clone());
            env.insert(format!("STACKRIG_{}_PORT", prefix), self.port(kind).to_string());
            env.insert(format!("STACKRIG_{}_URL", prefix), self.endpoint(kind));
        }
        if self.is_enabled(ComponentKind::L2) {
            env.insert("STACKRIG_L2_WS_URL".to_string(), self.l2_ws_endpoint());
        }
        env
    }
}

// ---------------------------------------------------------------------------
// stackrig.toml
// ---------------------------------------------------------------------------

/// The optional on-disk overrides. Every field falls back to a built-in.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackFile {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub readiness: Option<ReadinessFile>,
    /// Keyed by component name; unknown names are reported by validation.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentOverride>,
    #[serde(default)]
    pub contracts: Option<DeployerOverride>,
    #[serde(default)]
    pub apps: Option<AppsFile>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentOverride {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub probe: Option<Probe>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub optional: Option<bool>,
}

impl ComponentOverride {
    pub fn apply(&self, spec: &mut ComponentSpec) {
        if let Some(command) = &self.command {
            spec.program = command.clone();
        }
        if let Some(args) = &self.args {
            spec.args = args.clone();
        }
        if let Some(cwd) = &self.cwd {
            spec.cwd = Some(PathBuf::from(cwd));
        }
        if let Some(port) = self.port {
            spec.port = port;
        }
        spec.env.extend(self.env.clone());
        if let Some(probe) = &self.probe {
            spec.probe = probe.clone();
        }
        if let Some(stop) = &self.stop {
            spec.stop = (!stop.is_empty()).then(|| stop.clone());
        }
        if let Some(optional) = self.optional {
            spec.optional = optional;
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployerOverride {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DeployerOverride {
    pub fn apply(&self, spec: &mut DeployerSpec) {
        if let Some(command) = &self.command {
            spec.program = command.clone();
        }
        if let Some(args) = &self.args {
            spec.args = args.clone();
        }
        if let Some(cwd) = &self.cwd {
            spec.cwd = Some(PathBuf::from(cwd));
        }
        spec.env.extend(self.env.clone());
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppsFile {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub skip: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessFile {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "de_duration")]
    pub interval: Option<Duration>,
    #[serde(default, deserialize_with = "de_duration")]
    pub attempt_timeout: Option<Duration>,
}

impl ReadinessFile {
    pub fn apply(&self, policy: &mut ReadinessPolicy) {
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(d) = self.interval {
            policy.interval = d;
        }
        if let Some(d) = self.attempt_timeout {
            policy.attempt_timeout = d;
        }
    }
}

/// Accepts humantime strings (`"500ms"`, `"2s"`).
fn de_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

/// An application discovered under the apps directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppManifest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub probe: Option<Probe>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl AppManifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
    }
}
