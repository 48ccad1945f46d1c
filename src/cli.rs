use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::aot::Shell;
use std::path::PathBuf;

use crate::config::model::Features;
use crate::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "stackrig",
    version,
    about = "Bring up the full local network stack and keep it running"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific stackrig.toml
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,

    /// Project root (defaults to the directory holding stackrig.toml, or the
    /// current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Where state, logs and the deployment record are written
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the stack and keep it running until Ctrl+C
    Start(StartArgs),
    /// Show the processes of the current stack
    Status,
    /// Stop a stack left behind by a failed run
    Stop,
    /// Check that the tools for the enabled components are installed
    Doctor(FeatureArgs),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which parts of the stack to bring up.
#[derive(Debug, Clone, Args)]
pub struct FeatureArgs {
    /// Skip the L1 chain
    #[arg(long = "no-l1", action = ArgAction::SetFalse)]
    pub l1: bool,
    /// Skip the L2 chain
    #[arg(long = "no-l2", action = ArgAction::SetFalse)]
    pub l2: bool,
    /// Skip the EQLite database
    #[arg(long = "no-database", action = ArgAction::SetFalse)]
    pub database: bool,
    /// Skip the Solana validator
    #[arg(long = "no-validator", action = ArgAction::SetFalse)]
    pub validator: bool,
    /// Skip the storage daemon
    #[arg(long = "no-storage", action = ArgAction::SetFalse)]
    pub storage: bool,
    /// Skip the gateway
    #[arg(long = "no-gateway", action = ArgAction::SetFalse)]
    pub gateway: bool,
    /// Skip every node worker
    #[arg(long = "no-node", action = ArgAction::SetFalse)]
    pub node: bool,
    /// Skip contract deployment
    #[arg(long = "no-contracts", action = ArgAction::SetFalse)]
    pub contracts: bool,
    /// Skip applications
    #[arg(long = "no-apps", action = ArgAction::SetFalse)]
    pub apps: bool,
    /// Run the compute worker
    #[arg(long)]
    pub compute: bool,
    /// Run the storage worker
    #[arg(long)]
    pub storage_worker: bool,
    /// Run the tunnel worker
    #[arg(long)]
    pub tunnel: bool,
    /// Run the proxy worker
    #[arg(long)]
    pub proxy: bool,
}

impl FeatureArgs {
    pub fn features(&self) -> Features {
        Features {
            l1: self.l1,
            l2: self.l2,
            database: self.database,
            validator: self.validator,
            storage: self.storage,
            gateway: self.gateway,
            node: self.node,
            contracts: self.contracts,
            apps: self.apps,
            compute: self.compute,
            storage_worker: self.storage_worker,
            tunnel: self.tunnel,
            proxy: self.proxy,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    #[command(flatten)]
    pub features: FeatureArgs,

    /// Do not start this application (repeatable)
    #[arg(long = "skip-app", value_name = "NAME")]
    pub skip_apps: Vec<String>,

    /// Address components bind to and endpoints are advertised on
    #[arg(long)]
    pub host: Option<String>,

    /// Stop everything already started when a phase fails
    #[arg(long)]
    pub teardown_on_failure: bool,

    /// Private key handed to the contract deployer
    #[arg(long, env = "STACKRIG_DEPLOYER_KEY", hide_env_values = true)]
    pub deployer_key: Option<String>,
}

impl StartArgs {
    pub fn load_options(self, global: &GlobalOpts) -> LoadOptions {
        LoadOptions {
            file: global.config_file.clone(),
            root: global.root.clone(),
            data_dir: global.data_dir.clone(),
            features: self.features.features(),
            host: self.host,
            skip_apps: self.skip_apps,
            deployer_key: self.deployer_key,
            teardown_on_failure: self.teardown_on_failure,
        }
    }
}
