use std::sync::Arc;

use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use stackrig::cli::{Cli, Commands, GlobalOpts, StartArgs};
use stackrig::commands;
use stackrig::config::{self, LoadOptions};
use stackrig::orchestrator::StackOrchestrator;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let global = &cli.global;

    let result = match cli.command {
        Commands::Start(args) => run_start(args, global).await,
        Commands::Status => commands::status::run(
            global.config_file.as_deref(),
            global.root.as_deref(),
            global.data_dir.as_deref(),
        ),
        Commands::Stop => {
            commands::stop::run(
                global.config_file.as_deref(),
                global.root.as_deref(),
                global.data_dir.as_deref(),
            )
            .await
        }
        Commands::Doctor(features) => config::load(LoadOptions {
            file: global.config_file.clone(),
            root: global.root.clone(),
            data_dir: global.data_dir.clone(),
            features: features.features(),
            ..Default::default()
        })
        .and_then(|config| commands::doctor::run(&config)),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "stackrig", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_start(args: StartArgs, global: &GlobalOpts) -> anyhow::Result<()> {
    let config = config::load(args.load_options(global))?;
    let orchestrator = StackOrchestrator::new(Arc::new(config));
    orchestrator.run().await
}
