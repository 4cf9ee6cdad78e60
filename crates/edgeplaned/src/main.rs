//! edgeplaned: the edgeplane template router daemon.
//!
//! Consumes Route and Endpoints watch events, keeps the router state, and
//! renders proxy configuration plus certificate files on every change
//! before triggering a proxy reload.
//!
//! # Usage
//!
//! ```text
//! edgeplaned run --config /etc/edgeplane/edgeplane.toml < events.jsonl
//! edgeplaned commit --config /etc/edgeplane/edgeplane.toml
//! edgeplaned check --config /etc/edgeplane/edgeplane.toml
//! ```

mod dispatch;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info};

use edge_core::RouterConfig;
use edge_core::config::TemplateConfig;
use edgeplane_state::StateStore;
use edgeplane_template::{ReloadScript, TemplatePlugin, TemplateRouter, TemplateSet};

use crate::dispatch::Dispatcher;

const DEFAULT_LOG_FILTER: &str = "info,edgeplane=debug,edgeplaned=debug";

#[derive(Parser)]
#[command(name = "edgeplaned", about = "Edgeplane template router daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch watch events from a file or stdin until end of input.
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Newline-delimited JSON events. Reads stdin when omitted.
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Commit the persisted state once: certificates, config, reload.
    Commit {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Validate the configuration and compile templates.
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// Router configuration file.
    #[arg(long, short, env = "EDGEPLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Replace the configured templates with this single template.
    #[arg(long, env = "TEMPLATE_FILE")]
    template: Option<PathBuf>,

    /// Output path for `--template`.
    #[arg(long, env = "TEMPLATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Override the reload script.
    #[arg(long, env = "RELOAD_SCRIPT")]
    reload: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, events } => run(&config, events).await,
        Command::Commit { config } => commit(&config),
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: &ConfigArgs, events: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let validate_routes = config.router.validate_routes;
    let router = open_router(&config)?;
    let dispatcher =
        Dispatcher::new(TemplatePlugin::new(router).with_route_validation(validate_routes));

    info!(
        events = ?events.as_deref().unwrap_or(Path::new("-")),
        validate_routes,
        "edgeplane router started"
    );

    let stats = match events {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open events file {}", path.display()))?;
            dispatcher.run(BufReader::new(file), shutdown_signal()).await?
        }
        None => {
            dispatcher
                .run(BufReader::new(tokio::io::stdin()), shutdown_signal())
                .await?
        }
    };

    info!(
        events = stats.events,
        failed = stats.failed,
        skipped = stats.skipped,
        "edgeplane router stopped"
    );
    Ok(())
}

fn commit(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let mut router = open_router(&config)?;
    let stats = router.commit().context("commit failed")?;
    info!(
        service_units = stats.service_units,
        routes = stats.routes,
        certificates = stats.certificates,
        templates = stats.templates,
        "state committed"
    );
    Ok(())
}

fn check(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let templates = TemplateSet::load(&config.templates)?;
    let store = StateStore::open(&config.router.state_file)?;
    info!(
        templates = templates.len(),
        service_units = store.service_units().len(),
        reload = ?config.router.reload_script,
        "configuration ok"
    );
    Ok(())
}

fn open_router(config: &RouterConfig) -> anyhow::Result<TemplateRouter> {
    let reload =
        ReloadScript::new(&config.router.reload_script).with_timeout(config.reload_timeout()?);
    Ok(TemplateRouter::open(config, reload)?)
}

/// Load the configuration file (or defaults) and apply flag overrides.
fn load_config(args: &ConfigArgs) -> anyhow::Result<RouterConfig> {
    let mut config = match &args.config {
        Some(path) => RouterConfig::from_file(path)?,
        None => RouterConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut RouterConfig, args: &ConfigArgs) -> anyhow::Result<()> {
    match (&args.template, &args.output) {
        (Some(source), Some(output)) => {
            let name = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default".to_string());
            config.templates = vec![TemplateConfig {
                name,
                source: source.clone(),
                output: output.clone(),
            }];
        }
        (Some(_), None) => bail!("--output (TEMPLATE_OUTPUT) is required with --template"),
        (None, Some(_)) => bail!("--output (TEMPLATE_OUTPUT) requires --template"),
        (None, None) => {}
    }

    if let Some(reload) = &args.reload {
        config.router.reload_script = reload.clone();
    }
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
