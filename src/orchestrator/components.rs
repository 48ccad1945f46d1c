use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tracing::{debug, info};

use crate::config::model::{ComponentKind, StackConfig};
use crate::platform;

use super::apps::{self, DiscoveredApp};
use super::deployment::{deploy_contracts, DeployRequest, DeploymentRecord};
use super::error::StackError;
use super::graph::PhasePlan;
use super::phase::{PhaseDescriptor, PhaseMode, Step};
use super::process::{self, SpawnRequest};
use super::ready::{wait_for_probe, Probe};
use super::registry::ProcessRegistry;
use super::shutdown::{CommandHook, ShutdownCoordinator};
use super::state::HookState;

pub const INFRASTRUCTURE: &str = "infrastructure";
pub const CHAINS: &str = "chains";
pub const CONTRACTS: &str = "contracts";
pub const PLATFORM: &str = "platform";
pub const NODE: &str = "node";
pub const APPS: &str = "apps";

/// Shared handles every step of a run works against.
#[derive(Clone)]
pub struct StackContext {
    pub config: Arc<StackConfig>,
    pub registry: Arc<ProcessRegistry>,
    pub shutdown: Arc<ShutdownCoordinator>,
    hooks: Arc<Mutex<Vec<HookState>>>,
}

impl StackContext {
    pub fn new(
        config: Arc<StackConfig>,
        registry: Arc<ProcessRegistry>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
            hooks: Arc::default(),
        }
    }

    /// Stop hooks registered so far, in registration order.
    pub fn hooks(&self) -> Vec<HookState> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn add_stop_hook(&self, name: &str, command: &[String], cwd: Option<PathBuf>) {
        let Some((program, args)) = command.split_first() else {
            return;
        };
        let hook = CommandHook::new(name, program.clone(), args.to_vec()).with_cwd(cwd.clone());
        self.shutdown.add_hook(Arc::new(hook));
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HookState {
                name: name.to_string(),
                program: program.clone(),
                args: args.to_vec(),
                cwd: cwd.map(|p| p.to_string_lossy().to_string()),
            });
    }
}

/// Probing `0.0.0.0` is not portable; a wildcard bind is reachable on loopback.
pub fn probe_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    }
}

/// One long-running process to start, register and wait on.
#[derive(Debug, Clone)]
struct Launch {
    name: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    port: Option<u16>,
    probe: Probe,
    stop: Option<Vec<String>>,
    optional: bool,
}

async fn launch(ctx: StackContext, launch: Launch) -> Result<(), StackError> {
    if launch.optional && platform::find_on_path(&launch.program).is_none() {
        return Err(StackError::DependencyMissing {
            component: launch.name,
            tool: launch.program,
        });
    }

    let handle = process::spawn(SpawnRequest {
        name: launch.name.clone(),
        program: launch.program,
        args: launch.args,
        env: launch.env,
        cwd: launch.cwd.clone(),
        port: launch.port,
        log_path: Some(ctx.config.log_path(&launch.name)),
    })?;
    ctx.registry.register(handle).await;

    if let Some(stop) = &launch.stop {
        ctx.add_stop_hook(&launch.name, stop, launch.cwd);
    }

    if let Some(port) = launch.port {
        let host = probe_host(&ctx.config.host);
        let result =
            wait_for_probe(&launch.name, &launch.probe, host, port, &ctx.config.readiness).await?;
        info!(
            component = %launch.name,
            attempts = result.attempts,
            elapsed = ?result.elapsed,
            "ready"
        );
    }
    Ok(())
}

fn component_launch(
    config: &StackConfig,
    kind: ComponentKind,
    extra_env: BTreeMap<String, String>,
) -> Result<Launch, StackError> {
    let spec = config
        .component(kind)
        .ok_or_else(|| anyhow!("no launch recipe for component '{}'", kind))?;

    let mut env = config.child_env();
    env.insert("PORT".to_string(), spec.port.to_string());
    env.extend(extra_env);
    env.extend(spec.env.clone());

    Ok(Launch {
        name: kind.name().to_string(),
        program: spec.program.clone(),
        args: spec.args.clone(),
        cwd: spec.cwd.clone(),
        env,
        port: Some(spec.port),
        probe: spec.probe.clone(),
        stop: spec.stop.clone(),
        optional: spec.optional,
    })
}

fn component_step(ctx: &StackContext, kind: ComponentKind) -> Step {
    let optional = ctx
        .config
        .component(kind)
        .is_some_and(|spec| spec.optional);
    let ctx = ctx.clone();
    let fut = async move {
        let spec = component_launch(&ctx.config, kind, BTreeMap::new())?;
        launch(ctx, spec).await
    };
    if optional {
        Step::optional(kind.name(), fut)
    } else {
        Step::required(kind.name(), fut)
    }
}

/// Environment carrying the deployed contract addresses. Read when the step
/// runs, so it sees what the contracts phase just wrote.
fn deployment_env(config: &StackConfig) -> Result<BTreeMap<String, String>, StackError> {
    if config.features.contracts {
        return Ok(DeploymentRecord::load(&config.data_dir)?.env_vars());
    }
    match DeploymentRecord::load(&config.data_dir) {
        Ok(record) => Ok(record.env_vars()),
        Err(e) => {
            debug!("no deployment record: {}", e);
            Ok(BTreeMap::new())
        }
    }
}

fn platform_step(ctx: &StackContext, kind: ComponentKind) -> Step {
    let ctx = ctx.clone();
    Step::required(kind.name(), async move {
        let contracts = deployment_env(&ctx.config)?;
        let spec = component_launch(&ctx.config, kind, contracts)?;
        launch(ctx, spec).await
    })
}

fn contracts_step(ctx: &StackContext) -> Step {
    let config = ctx.config.clone();
    Step::required("deployer", async move {
        let deployer = &config.deployer;
        let mut env = config.child_env();
        if config.is_enabled(ComponentKind::L1) {
            env.insert("L1_RPC_URL".to_string(), config.endpoint(ComponentKind::L1));
        }
        if config.is_enabled(ComponentKind::L2) {
            env.insert("L2_RPC_URL".to_string(), config.endpoint(ComponentKind::L2));
        }
        env.extend(deployer.env.clone());
        if let Some(key) = &deployer.key {
            env.insert("DEPLOYER_PRIVATE_KEY".to_string(), key.clone());
        }

        let request = DeployRequest {
            program: deployer.program.clone(),
            args: deployer.args.clone(),
            cwd: deployer.cwd.clone(),
            env,
            log_path: Some(config.log_path("contracts")),
        };
        deploy_contracts(&request, &config.data_dir).await?;
        Ok(())
    })
}

fn app_step(ctx: &StackContext, app: DiscoveredApp) -> Step {
    let ctx = ctx.clone();
    let name = app.process_name();
    Step::required(name.clone(), async move {
        let mut env = ctx.config.child_env();
        env.extend(deployment_env(&ctx.config)?);
        if let Some(port) = app.manifest.port {
            env.insert("PORT".to_string(), port.to_string());
        }
        env.extend(app.manifest.env.clone());

        let probe = app.manifest.probe.clone().unwrap_or(Probe::Http {
            path: "/".to_string(),
        });
        launch(
            ctx,
            Launch {
                name,
                program: app.manifest.command.clone(),
                args: app.manifest.args.clone(),
                cwd: Some(app.dir),
                env,
                port: app.manifest.port,
                probe,
                stop: None,
                optional: false,
            },
        )
        .await
    })
}

fn with_steps(phase: PhaseDescriptor, steps: impl IntoIterator<Item = Step>) -> PhaseDescriptor {
    steps.into_iter().fold(phase, PhaseDescriptor::step)
}

fn enabled_steps(ctx: &StackContext, kinds: &[ComponentKind]) -> Vec<Step> {
    kinds
        .iter()
        .filter(|kind| ctx.config.is_enabled(**kind))
        .map(|kind| component_step(ctx, *kind))
        .collect()
}

/// The fixed full-stack startup plan. Disabled subsystems leave their phase
/// empty, which the runner reports as skipped.
pub fn full_stack(ctx: &StackContext) -> Result<PhasePlan, StackError> {
    use ComponentKind::*;
    let config = &ctx.config;

    let infrastructure = with_steps(
        PhaseDescriptor::new(INFRASTRUCTURE, PhaseMode::Parallel),
        enabled_steps(ctx, &[Database, Storage]),
    );

    let chains = with_steps(
        PhaseDescriptor::new(CHAINS, PhaseMode::Sequential).after(INFRASTRUCTURE),
        enabled_steps(ctx, &[L1, L2, Validator]),
    );

    let mut contracts = PhaseDescriptor::new(CONTRACTS, PhaseMode::Sequential).after(CHAINS);
    if config.features.contracts {
        contracts = contracts.step(contracts_step(ctx));
    }

    let mut platform = PhaseDescriptor::new(PLATFORM, PhaseMode::Sequential).after(CONTRACTS);
    if config.is_enabled(Gateway) {
        platform = platform.step(platform_step(ctx, Gateway));
    }

    let node = with_steps(
        PhaseDescriptor::new(NODE, PhaseMode::Parallel)
            .after(CHAINS)
            .after(PLATFORM),
        enabled_steps(ctx, &[Compute, StorageWorker, Tunnel, Proxy]),
    );

    let mut apps_phase = PhaseDescriptor::new(APPS, PhaseMode::Sequential)
        .after(PLATFORM)
        .after(NODE);
    if config.features.apps {
        for app in apps::discover(&config.apps)? {
            apps_phase = apps_phase.step(app_step(ctx, app));
        }
    }

    PhasePlan::new(vec![infrastructure, chains, contracts, platform, node, apps_phase])
}
