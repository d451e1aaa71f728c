// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dispatch main entry point - CLI and server lifecycle.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use dispatch::config::{self, CliOptions, ResolvedConfig};
use dispatch::server::DispatchServer;
use dispatch::telemetry::{init_telemetry, TelemetryConfig};
use dispatch::VERSION;

/// dispatch - task dispatch server for coding agents.
#[derive(Parser)]
#[command(name = "dispatch")]
#[command(author, version, about = "Task dispatch server for coding agents", long_about = None)]
struct Cli {
    /// Config file to use instead of the workspace config
    #[arg(short, long, env = "DISPATCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level with spans and source locations
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve {
        /// Host to bind the HTTP channel to
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP channel
        #[arg(short, long)]
        port: Option<u16>,

        /// Also serve JSON-RPC over stdin/stdout
        #[arg(long)]
        stdio: bool,

        /// Disable the HTTP channel
        #[arg(long)]
        no_http: bool,

        /// Number of task workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Directory holding task worktrees
        #[arg(long)]
        worktree_dir: Option<PathBuf>,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show,

    /// Write a starter config file in the current directory
    Init {
        #[arg(short, long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    fn filename(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => ".dispatch.yaml",
            ConfigFormat::Json => ".dispatch.json",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            stdio,
            no_http,
            workers,
            worktree_dir,
        } => {
            let options = CliOptions {
                host,
                port,
                http: no_http.then_some(false),
                stdio: stdio.then_some(true),
                workers,
                worktree_dir,
                log_level: cli.verbose.then(|| "debug".to_string()),
                log_format: cli.verbose.then(|| "full".to_string()),
            };
            let config = load(cli.config, options)?;
            serve(config).await
        }
        Commands::Config { action } => {
            let workspace_root = std::env::current_dir()?;
            match action {
                Some(ConfigAction::Show) | None => {
                    let config = load(cli.config, CliOptions::default())?;
                    print!("{}", serde_yaml::to_string(&config)?);
                }
                Some(ConfigAction::Init { format }) => {
                    let path = config::init_config(&workspace_root, Some(format.filename()))?;
                    println!("{} {}", "Created config file:".green(), path.display());
                }
            }
            Ok(())
        }
        Commands::Version => {
            println!("{} {}", "dispatch".bold(), VERSION);
            println!("JSON-RPC protocol {}", dispatch::protocol::PROTOCOL_VERSION);
            Ok(())
        }
    }
}

fn load(explicit: Option<PathBuf>, options: CliOptions) -> anyhow::Result<ResolvedConfig> {
    let workspace_root = std::env::current_dir()?;
    Ok(config::load_config(
        &workspace_root,
        explicit.as_deref(),
        options,
    )?)
}

async fn serve(config: ResolvedConfig) -> anyhow::Result<()> {
    let telemetry = TelemetryConfig::from_settings(&config.log_level, &config.log_format)
        .with_ansi(std::io::stderr().is_terminal() && config.log_format != "plain");
    let _telemetry = init_telemetry(&telemetry)?;

    let stdio = config.server.stdio;
    let http_only = config.server.http && !stdio;
    let address = config.server.address();

    let server = DispatchServer::new(config)?;
    server.start().await?;

    if http_only {
        eprintln!(
            "{} listening on {}",
            "dispatch".green().bold(),
            server
                .http_addr()
                .await
                .map(|a| a.to_string())
                .unwrap_or(address)
        );
    }

    // Run until Ctrl-C, or until the stdio peer goes away when stdio is enabled.
    match server.stdio_closed() {
        Some(closed) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = closed.cancelled() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    tracing::info!("Shutting down");
    let result = server.stop().await;
    if stdio {
        // The blocking stdin reader would otherwise hold the runtime open.
        if let Err(e) = &result {
            eprintln!("{} {}", "error:".red().bold(), e);
        }
        std::process::exit(if result.is_ok() { 0 } else { 1 });
    }
    result.map_err(Into::into)
}
