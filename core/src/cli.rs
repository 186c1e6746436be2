use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::init::{self, InitBuilder, InitOptions};
use crate::interpreter::Interpreter;
use crate::services::{shutdown_signal, ServiceState};

#[derive(Parser)]
#[command(name = "luaservice")]
#[command(about = "LuaService - Run a Lua script as a long-running service", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Folder holding the scripts (defaults to the executable's folder)
    #[arg(long, global = true)]
    pub install_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the main script in the foreground until it ends or a stop arrives
    Run,

    /// Load and execute one script once, printing what it returns
    Exec {
        /// Script name, relative to the install directory
        script: String,

        /// Skip the pre-initialization script
        #[arg(long)]
        no_init: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Skip the pre-initialization script
        #[arg(long)]
        no_init: bool,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

fn builder(cli: &Cli) -> InitBuilder {
    let mut builder = InitBuilder::new();
    if let Some(path) = &cli.config {
        builder = builder.config_path(path);
    }
    if let Some(dir) = &cli.install_dir {
        builder = builder.install_dir(dir);
    }
    builder
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Eagerly load and validate configuration so errors show before any work
    let options: InitOptions = builder(&cli).options();
    init::resolve_config(&options)?;

    match &cli.command {
        Commands::Run => {
            let app = builder(&cli).init()?;
            let service = app.lifecycle_service();
            tracing::info!(
                service = %app.config.service.name,
                script = %app.config.service.script,
                install_dir = %app.context.install_dir().display(),
                "Starting service"
            );

            let status = service.run(shutdown_signal()).await?;
            if status.state == ServiceState::Stopped && status.exit_code != 0 {
                eprintln!(
                    "Service stopped with exit code {} ({})",
                    status.exit_code, status.service_specific_exit_code
                );
                std::process::exit(status.exit_code as i32);
            }
        }

        Commands::Exec { script, no_init } => {
            let app = builder(&cli).run_init_script(!no_init).init()?;
            let ctx = app.context.clone();
            let script = script.clone();

            // The interpreter is !Send; keep it on one blocking thread.
            let results = tokio::task::spawn_blocking(move || -> Result<Vec<serde_json::Value>> {
                let mut interp = Interpreter::create(ctx)?;
                interp.load(&script)?;
                interp.execute()?;
                let results = interp.results_json();
                interp.destroy();
                Ok(results)
            })
            .await
            .context("Script thread failed")??;

            for (pos, value) in results.iter().enumerate() {
                println!("{}: {}", pos + 1, value);
            }
        }

        Commands::Config { no_init } => {
            let app = builder(&cli).run_init_script(!no_init).init()?;
            print!("{}", app.config.to_toml()?);
        }
    }

    Ok(())
}
