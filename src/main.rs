use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dockscope_logs::{LogStreamManager, SearchEngine, SearchMode, StreamStatus, TextView};
use dockscope_runtime::{ContainerAction, ContainerId, ContainerRuntime, DockerRuntime};
use dockscope_telemetry::{Collector, Poller};

mod config;
mod report;

use config::Config;

/// Dockscope - container telemetry and logs from the terminal
#[derive(Parser, Debug)]
#[command(name = "dockscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ~/.config/dockscope/config.toml)
    #[arg(long, env = "DOCKSCOPE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Docker daemon socket, overriding the config file
    #[arg(long, value_name = "PATH")]
    socket: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show resource usage for every container
    Stats {
        /// Print a single table and exit
        #[arg(long)]
        once: bool,

        /// Poll interval, overriding the config file
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,

        /// Emit each tick as one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Print a container's logs
    Logs {
        container: String,

        /// Keep printing new lines as they arrive
        #[arg(short, long)]
        follow: bool,

        /// Show raw text instead of normalized lines
        #[arg(long)]
        raw: bool,

        /// Highlight occurrences of a literal string
        #[arg(long, value_name = "QUERY", conflicts_with = "filter")]
        search: Option<String>,

        /// Only show lines matching terms like `error "db down" -health`
        #[arg(long, value_name = "QUERY")]
        filter: Option<String>,

        #[arg(short = 'c', long)]
        case_sensitive: bool,
    },

    /// Start, stop, pause, unpause or restart a container
    Action {
        container: String,
        action: ContainerAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_app(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run_app(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    debug!(?config, "configuration loaded");

    let socket = args.socket.or_else(|| config.docker.socket.clone());
    let docker = DockerRuntime::connect(socket.as_deref(), config.docker_timeout())
        .context("failed to connect to the container runtime")?;
    info!(socket = socket.as_deref().unwrap_or("default"), "connected to docker");
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted, shutting down");
                cancel.cancel();
            }
        }
    });

    match args.command {
        Command::Stats {
            once,
            interval_ms,
            json,
        } => {
            let mut config = config;
            if let Some(ms) = interval_ms {
                config.telemetry.interval_ms = ms;
            }
            run_stats(runtime, &config, once, json, cancel).await
        }
        Command::Logs {
            container,
            follow,
            raw,
            search,
            filter,
            case_sensitive,
        } => {
            let view = if raw || !config.logs.normalize {
                TextView::Raw
            } else {
                TextView::Normalized
            };
            let query = match (search, filter) {
                (_, Some(q)) => Some((SearchMode::Filter, q)),
                (Some(q), None) => Some((SearchMode::Search, q)),
                (None, None) => None,
            };
            let opts = LogsOptions {
                container: ContainerId::from(container),
                follow,
                view,
                query,
                case_sensitive,
            };
            run_logs(runtime, &config, opts, cancel).await
        }
        Command::Action { container, action } => {
            let id = ContainerId::from(container);
            runtime
                .apply(&id, action)
                .await
                .with_context(|| format!("failed to {action} {id}"))?;
            println!("{action} {id}: ok");
            Ok(())
        }
    }
}

async fn run_stats(
    runtime: Arc<dyn ContainerRuntime>,
    config: &Config,
    once: bool,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let poller_config = config.poller_config();
    let collector = Arc::new(Collector::new(runtime, config.telemetry.max_concurrency));

    if once {
        let ids = collector
            .runtime()
            .list_containers()
            .await
            .context("failed to list containers")?;
        let result = collector.collect_all(&ids, poller_config.deadline).await;
        if json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            print!("{}", report::stats_table(&result));
        }
        return Ok(());
    }

    let clear = !json && std::io::stdout().is_terminal();
    let handle = Poller::spawn_with_cancel(collector, poller_config, cancel.clone());
    let mut ticks = handle.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = ticks.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let Some(tick) = ticks.borrow_and_update().clone() else {
            continue;
        };

        let mut out = std::io::stdout().lock();
        if json {
            writeln!(out, "{}", serde_json::to_string(&tick.result)?)?;
        } else {
            if clear {
                write!(out, "\x1b[2J\x1b[H")?;
            }
            write!(out, "{}", report::stats_table(&tick.result))?;
        }
        out.flush()?;
    }

    handle.shutdown().await;
    Ok(())
}

struct LogsOptions {
    container: ContainerId,
    follow: bool,
    view: TextView,
    query: Option<(SearchMode, String)>,
    case_sensitive: bool,
}

async fn run_logs(
    runtime: Arc<dyn ContainerRuntime>,
    config: &Config,
    opts: LogsOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut manager = LogStreamManager::new(runtime, config.stream_config()?);
    let mut session = manager.open(&opts.container, opts.follow).await;

    let mut engine = SearchEngine::new(opts.view);
    if let Some((mode, query)) = &opts.query {
        let snapshot = session.snapshot();
        engine
            .set_mode(&snapshot, *mode)
            .and_then(|()| engine.set_query(&snapshot, query, opts.case_sensitive))
            .with_context(|| format!("invalid query '{query}'"))?;
    }
    let filtering = engine.state().mode() == SearchMode::Filter && engine.is_active();
    let color = std::io::stdout().is_terminal();

    let mut next = 0u64;
    let mut stopping = false;
    let last = loop {
        let snapshot = session.snapshot();
        engine.sync(&snapshot);
        let done = stopping || snapshot.status().is_terminal();

        // The newest line may still take continuation lines
        let limit = if done {
            snapshot.next_index()
        } else {
            snapshot.next_index().saturating_sub(1)
        };

        let mut out = std::io::stdout().lock();
        for line in snapshot.since(next) {
            if line.index >= limit {
                break;
            }
            if filtering && engine.spans(line.index).is_none() {
                continue;
            }
            writeln!(out, "{}", report::render_line(line, &engine, color))?;
        }
        out.flush()?;
        drop(out);
        next = next.max(limit);

        if done {
            break snapshot;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                manager.close(&opts.container).await;
                stopping = true;
            }
            alive = session.changed() => {
                if !alive {
                    stopping = true;
                }
            }
        }
    };

    manager.close_all().await;
    eprintln!("{}", report::stream_summary(&last, &engine));

    match last.status() {
        StreamStatus::Failed(e) => {
            Err(e.clone()).with_context(|| format!("log stream for {} failed", opts.container))
        }
        _ => Ok(()),
    }
}
