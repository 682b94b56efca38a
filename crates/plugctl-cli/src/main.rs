//! plugctl - registry plugin manager
//!
//! Installs versioned plugins from a plugin registry into
//! `<plugins_dir>/<vendor>/<name>` and keeps `plugins.json` and
//! `plugins-lock.json` in step with what is installed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use plugctl_core::config::ConfigOverrides;
use plugctl_core::logging::{ConsoleSink, FanoutSink, JsonSink, LogSink};
use plugctl_core::{paths, Logger, ManagerConfig, PluginManager, Severity};

mod commands;

/// plugctl - registry plugin manager
#[derive(Parser, Debug)]
#[command(name = "plugctl", version)]
#[command(about = "Install, update, and remove registry plugins", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Config file (default: <state dir>/plugctl.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding plugins.json and plugins-lock.json
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Where plugins are installed (default: <state dir>/plugins)
    #[arg(long, global = true)]
    plugins_dir: Option<PathBuf>,

    /// Registry root URL
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Parent directory for temporary download workspaces
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Plugins installed in parallel by `install`
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also append every record as JSON lines (default: ~/.plugctl/logs/plugctl.log)
    #[arg(long, global = true)]
    log_file: Option<Option<PathBuf>>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Install a plugin and declare it in plugins.json
    ///
    /// CONSTRAINT is a semver range (`^1.2`, `>=1.0 <2.0`), an exact
    /// version, a `dev-*` ref, or omitted for the latest release.
    Add {
        /// Plugin key, `vendor/name`
        key: String,
        /// Version constraint
        constraint: Option<String>,
        /// Install without declaring the plugin in plugins.json
        #[arg(long)]
        no_save: bool,
    },

    /// Re-resolve a declared plugin and install the newer version, if any
    Update {
        /// Plugin key, `vendor/name`
        key: String,
    },

    /// Delete a plugin and drop it from plugins.json and plugins-lock.json
    Remove {
        /// Plugin key, `vendor/name`
        key: String,
    },

    /// Install every plugin declared in plugins.json
    Install,

    /// Show declared and locked plugins
    List,

    /// Compare plugins.json, plugins-lock.json, and the plugins directory
    Status,
}

impl Commands {
    /// Read-only commands never persist anything
    fn mutates(&self) -> bool {
        !matches!(self, Self::List | Self::Status)
    }
}

impl GlobalArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            registry_url: self.registry.clone(),
            state_dir: self.state_dir.clone(),
            plugins_dir: self.plugins_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            concurrency: self.concurrency,
        }
    }

    fn logger(&self) -> Result<Logger> {
        let console: Arc<dyn LogSink> = Arc::new(ConsoleSink);
        let sink: Arc<dyn LogSink> = match &self.log_file {
            Some(path) => {
                let path = path.clone().unwrap_or_else(paths::default_log_file);
                let json = JsonSink::to_file(&path)
                    .with_context(|| format!("Failed to open log file {}", path.display()))?;
                Arc::new(FanoutSink::new(vec![console, Arc::new(json)]))
            }
            None => console,
        };

        let min_severity = if self.quiet {
            Severity::Warning
        } else {
            Severity::Info
        };
        Ok(Logger::new(sink).with_min_severity(min_severity))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Diagnostics only; operation records go through the Logger
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ManagerConfig::resolve(cli.global.config.as_deref(), cli.global.overrides())?;
    tracing::debug!(
        registry = %config.registry_url,
        plugins_dir = %config.plugins_dir.display(),
        "Resolved configuration"
    );

    let logger = cli.global.logger()?;
    let manager = PluginManager::from_config(config, logger)?;

    let mutates = cli.command.mutates();
    let succeeded = commands::run(&manager, cli.command).await?;

    if mutates {
        let report = manager.commit();
        for error in &report.errors {
            eprintln!("error: {}", error);
        }
        if !report.is_success() {
            return Ok(ExitCode::FAILURE);
        }
    }

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
