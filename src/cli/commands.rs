//! CLI entry point: thin enough to drive the core from a command line,
//! never a complete subsystem. `dev` is the real path into the core;
//! `build`/`preview` are honest stubs since the production build pipeline
//! isn't part of this crate.

use crate::config;
use crate::core::services::BuildStub;
use crate::server::DevServer;
use crate::utils::errors::SprigError;
use crate::utils::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sprig")]
#[command(about = "A dev server for JSX-based single-page apps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the development server
    Dev {
        /// Project root directory
        #[arg(short, long, default_value = ".")]
        root: String,
        /// Port to listen on (overrides sprig.config.json)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Produce a production build (not implemented by this tool)
    Build {
        #[arg(short, long, default_value = ".")]
        root: String,
    },
    /// Serve a production build directory (not implemented by this tool)
    Preview {
        #[arg(short, long, default_value = "dist")]
        dir: String,
        #[arg(short, long, default_value_t = 4173)]
        port: u16,
    },
    /// Print version and environment information
    Info,
}

pub struct CliHandler {
    cli: Cli,
}

impl CliHandler {
    pub fn new() -> Self {
        Self { cli: Cli::parse() }
    }

    pub async fn run(self) -> Result<()> {
        match self.cli.command {
            Commands::Dev { root, port } => Self::run_dev(root, port).await,
            Commands::Build { root } => {
                BuildStub::new().build(&std::path::PathBuf::from(root)).await
            }
            Commands::Preview { dir, port } => Self::run_preview(dir, port).await,
            Commands::Info => Self::run_info(),
        }
    }

    async fn run_dev(root: String, port: Option<u16>) -> Result<()> {
        crate::utils::logging::Logger::init();
        let project_config = config::load(&root, port, Vec::new())?;
        DevServer::new(project_config).run().await
    }

    async fn run_preview(_dir: String, _port: u16) -> Result<()> {
        Err(SprigError::Other(
            "preview is not implemented by this tool; it only serves the development server"
                .to_string(),
        ))
    }

    fn run_info() -> Result<()> {
        println!("sprig {}", env!("CARGO_PKG_VERSION"));
        println!("dev server core: module resolver, prebundle cache, transform pipeline, HMR");
        Ok(())
    }
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}
