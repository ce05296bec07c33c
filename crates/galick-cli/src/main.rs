mod report;
mod tui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use galick_core::attack::{Attacker, HttpAttacker, ScriptAttacker};
use galick_core::engine::{Engine, RunConfig};

/// A modern, high-performance load testing tool.
///
/// Supports static target benchmarking and dynamic Rhai-based scenario
/// scripting.
#[derive(Parser, Debug)]
#[command(
    name = "galick",
    version,
    about = "A modern, high-performance load testing tool",
    after_help = "Examples:\n  \
        galick --url https://api.example.com --qps 50\n  \
        galick --script demos/attack.rhai --qps 50\n  \
        galick --url https://api.example.com --headless"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Target URL (required for static mode)
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// HTTP method
    #[arg(short = 'm', long, default_value = "GET")]
    method: String,

    /// Path to Rhai script (dynamic mode)
    #[arg(short = 's', long)]
    script: Option<PathBuf>,

    /// Queries per second
    #[arg(short = 'q', long, default_value_t = 50)]
    qps: u32,

    /// Number of workers
    #[arg(short = 'w', long, default_value_t = 10)]
    workers: u32,

    /// Duration of the test
    #[arg(short = 'd', long, value_parser = humantime::parse_duration, default_value = "10s")]
    duration: Duration,

    /// Timeout for each request
    #[arg(short = 't', long, value_parser = humantime::parse_duration, default_value = "10s")]
    timeout: Duration,

    /// Run without the TUI (useful for CI / Docker)
    #[arg(long)]
    headless: bool,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print version information
    Version,
}

fn print_version() {
    println!("Galick version {}", env!("CARGO_PKG_VERSION"));
    println!("Commit: {}", option_env!("GALICK_COMMIT").unwrap_or("none"));
    println!(
        "Built at: {}",
        option_env!("GALICK_BUILD_DATE").unwrap_or("unknown")
    );
}

fn init_tracing() {
    // Logs go to stderr: stdout is reserved for the final report and the
    // TUI owns the terminal while it runs.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GALICK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_attacker(cli: &Cli, config: &RunConfig) -> Result<Arc<dyn Attacker>> {
    match (&cli.script, &cli.url) {
        (Some(_), Some(_)) => bail!("supply exactly one of --url or --script, not both"),
        (Some(script), None) => {
            let attacker = ScriptAttacker::new(script, config.timeout, config.insecure)
                .with_context(|| format!("failed to load script {}", script.display()))?;
            Ok(Arc::new(attacker))
        }
        (None, Some(url)) => {
            let attacker = HttpAttacker::new(&cli.method, url, config.timeout, config.insecure)?;
            Ok(Arc::new(attacker))
        }
        (None, None) => bail!("--url is required unless --script is provided"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = cli.command {
        print_version();
        return Ok(());
    }

    init_tracing();

    let config = RunConfig {
        rate: cli.qps,
        workers: cli.workers,
        duration: cli.duration,
        timeout: cli.timeout,
        insecure: cli.insecure,
    };
    config.validate()?;
    let attacker = build_attacker(&cli, &config)?;

    tracing::debug!(?config, "run configuration validated");
    let engine = Arc::new(Engine::new(attacker, config));
    let cancel = CancellationToken::new();

    // Ctrl-C ends the run through the same token as the duration timer.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let start = Instant::now();

    if cli.headless {
        let target = match &cli.script {
            Some(script) => script.display().to_string(),
            None => cli.url.clone().unwrap_or_default(),
        };
        println!("Starting load test (headless mode)...");
        println!(
            "Target: {target}\nQPS: {}\nDuration: {}\nWorkers: {}\n",
            cli.qps,
            humantime::format_duration(cli.duration),
            cli.workers
        );

        engine.run(cancel).await;
    } else {
        let run_task = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.run(cancel).await })
        };

        let ui = tui::run(
            engine.stats(),
            cli.duration,
            engine.attacker_name(),
            cancel.clone(),
        )
        .await;

        // A TUI failure must not leave the engine running; a clean exit
        // lets it drain on its own timer.
        if ui.is_err() {
            cancel.cancel();
        }
        let _ = run_task.await;
        ui?;
    }

    print!("{}", report::render(&engine.stats().snapshot(), start.elapsed()));
    Ok(())
}
