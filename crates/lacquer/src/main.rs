//! Lacquer CLI - static site asset pipeline.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lacquer_pipeline::{Category, TargetKind, CONFIG_FILE};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod tasks;

use commands::dev::ServerOverrides;
use commands::run::load_config;

#[derive(Parser)]
#[command(name = "lacquer")]
#[command(about = "Build, watch and serve static site assets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to lacquer.toml config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more named tasks
    Run {
        /// Task names, e.g. `default`, `scss:build`, `netlify`
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Clean, build for dev, then watch and serve with live reload
    Dev {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,

        /// Proxy this backend instead of serving the output directory
        #[arg(long, value_name = "URL")]
        proxy: Option<String>,
    },

    /// Build one category, or all of them
    Build {
        /// Target to build (dev or production)
        #[arg(short, long, default_value = "dev")]
        target: TargetKind,

        /// Category to build; all when omitted
        category: Option<Category>,
    },

    /// Remove a target's output directory
    Clean {
        /// Target to clean (dev or production)
        #[arg(short, long, default_value = "dev")]
        target: TargetKind,
    },

    /// Build everything for production
    Netlify,

    /// Rebuild categories as their sources change
    Watch,

    /// Serve the dev output with live reload
    Serve,

    /// List available tasks
    Tasks,

    /// Initialize a project in the config file's directory
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Init { yes } => {
            commands::init::run(&cli.config, yes).await?;
        }
        Commands::Run { tasks } => {
            commands::run::run(load_config(&cli.config)?, &tasks).await?;
        }
        Commands::Dev {
            port,
            no_open,
            proxy,
        } => {
            let overrides = ServerOverrides {
                port,
                open: no_open.then_some(false),
                proxy,
            };
            commands::dev::run(load_config(&cli.config)?, overrides).await?;
        }
        Commands::Build { target, category } => {
            commands::build::run(load_config(&cli.config)?, target, category).await?;
        }
        Commands::Clean { target } => {
            commands::clean::run(load_config(&cli.config)?, target).await?;
        }
        Commands::Netlify => {
            commands::run::run(load_config(&cli.config)?, &[tasks::NETLIFY.to_string()]).await?;
        }
        Commands::Watch => {
            commands::run::run(load_config(&cli.config)?, &["watch".to_string()]).await?;
        }
        Commands::Serve => {
            commands::run::run(load_config(&cli.config)?, &["serve".to_string()]).await?;
        }
        Commands::Tasks => {
            commands::tasks::run(load_config(&cli.config)?).await?;
        }
    }

    Ok(())
}
