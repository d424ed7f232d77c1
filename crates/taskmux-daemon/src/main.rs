//! taskmux Daemon
//!
//! Drives a host agent runtime through the task multiplexer. The bundled
//! runtime replays NDJSON event scripts, which makes the binary usable for
//! rehearsing orchestration runs and inspecting per-task sequences.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use taskmux_core::config::{Config, load_config};
use taskmux_daemon::hub::TaskHub;
use taskmux_daemon::orchestration::AggregateReport;
use taskmux_daemon::runtime::ScriptedRuntime;

#[derive(Parser, Debug)]
#[command(name = "taskmuxd")]
#[command(version, about = "taskmux daemon - per-task agent event multiplexer")]
struct Args {
    /// Project directory whose `.taskmux/settings.json` is applied
    #[arg(long, global = true, env = "TASKMUX_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, global = true, env = "TASKMUX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "TASKMUX_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run queries under a concurrency cap and print the final report
    Run {
        /// NDJSON event script replayed by the runtime
        #[arg(long)]
        script: PathBuf,

        /// Maximum queries in flight (defaults to the configured value)
        #[arg(short = 'k', long, env = "TASKMUX_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Delay between scripted events, in milliseconds
        #[arg(long, default_value_t = 0)]
        event_delay_ms: u64,

        /// Print every intermediate report to stderr
        #[arg(long)]
        watch: bool,

        /// Queries to run, in submission order
        #[arg(required = true)]
        queries: Vec<String>,
    },
    /// Start one task and print its event sequence as NDJSON
    Replay {
        /// NDJSON event script replayed by the runtime
        #[arg(long)]
        script: PathBuf,

        /// Query passed to the runtime
        #[arg(long, default_value = "replay")]
        query: String,

        /// Delay between scripted events, in milliseconds
        #[arg(long, default_value_t = 0)]
        event_delay_ms: u64,
    },
}

#[tokio::main]
#[allow(clippy::print_stdout, clippy::print_stderr)]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(args.project_dir.as_deref()).context("Failed to load config")?;
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let log_filter = format!("taskmux_daemon={level},taskmux_core={level}");
    taskmux_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        default_concurrency = config.orchestrator.default_concurrency,
        "Starting taskmuxd"
    );

    match args.command {
        Command::Run {
            script,
            concurrency,
            event_delay_ms,
            watch,
            queries,
        } => {
            let hub = open_hub(&script, event_delay_ms, config)?;
            let sink = move |report: &AggregateReport| {
                if watch {
                    eprintln!("{report}");
                }
            };
            let summary = hub.orchestrator().run(queries, concurrency, sink).await?;

            for failure in summary.failures() {
                warn!(error = %failure, "Query failed");
            }
            print!("{}", summary.report);
            info!(peak = summary.peak_concurrency, "Run complete");
        }
        Command::Replay {
            script,
            query,
            event_delay_ms,
        } => {
            let hub = open_hub(&script, event_delay_ms, config)?;
            let task_id = hub.start_task(&query).await?;
            let mut sequence = hub.open_sequence(&task_id)?;

            let mut stdout = std::io::stdout();
            while let Some(event) = sequence.next().await {
                serde_json::to_writer(&mut stdout, &event)?;
                writeln!(stdout)?;
            }
            info!(%task_id, "Sequence finished");
        }
    }

    Ok(())
}

fn open_hub(script: &Path, event_delay_ms: u64, config: Config) -> anyhow::Result<TaskHub> {
    let runtime = ScriptedRuntime::builder()
        .ndjson_file(script)
        .with_context(|| format!("Failed to load script {}", script.display()))?
        .event_delay(Duration::from_millis(event_delay_ms))
        .event_capacity(config.multiplexer.event_capacity)
        .build();
    Ok(TaskHub::new(Arc::new(runtime), config)?)
}
