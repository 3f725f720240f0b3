mod config;
mod error;
mod render;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use sandbox_proc::SandboxRunner;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::time::FormatTime;

use crate::config::{Network, OnUnsupported, RunConfig};
use crate::error::CliResult;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Run a shell command under CPU, memory, wall-clock and network limits.
#[derive(Parser)]
#[command(name = "sandbox-run", version)]
struct Cli {
    /// Command to run (through `sh -c`)
    #[arg(long)]
    cmd: String,
    /// CPU time limit in seconds [default: 2]
    #[arg(long)]
    cpu: Option<f64>,
    /// Memory limit in MB [default: 256]
    #[arg(long)]
    mem: Option<u64>,
    /// Wall-clock timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
    /// Run the command without network access
    #[arg(long)]
    no_net: bool,
    /// Maximum bytes kept per output stream
    #[arg(long)]
    output_cap: Option<usize>,
    /// Wait between SIGTERM and SIGKILL, in milliseconds
    #[arg(long)]
    grace_ms: Option<u64>,
    /// Interval between resource samples, in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,
    /// Fail instead of running when a limit cannot be enforced
    #[arg(long)]
    strict: bool,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
    /// YAML file with defaults for the limits above
    #[arg(long, short, env = "SANDBOX_CONFIG")]
    config: Option<PathBuf>,
    /// Log lifecycle events
    #[arg(long, short, conflicts_with = "quiet")]
    verbose: bool,
    /// Only log errors
    #[arg(long, short)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> RunConfig {
        RunConfig {
            cpu_time_limit: self.cpu,
            memory_limit: self.mem,
            wall_clock_timeout: self.timeout,
            network: self.no_net.then_some(Network::Disabled),
            output_cap_bytes: self.output_cap,
            grace_period_ms: self.grace_ms,
            tick_interval_ms: self.tick_ms,
            on_unsupported: self.strict.then_some(OnUnsupported::Fail),
        }
    }

    fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else if self.quiet {
            Level::ERROR
        } else {
            Level::WARN
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let file = match &cli.config {
        Some(path) => config::load(path).await?,
        None => RunConfig::default(),
    };
    let settings = file.merge(cli.overrides()).into_settings()?;

    let runner = SandboxRunner::new(settings.supervisor);
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = runner
        .run_with_cancel(&cli.cmd, &settings.policy, cancel)
        .await?;

    if cli.json {
        render::json(&result, &mut std::io::stdout().lock())?;
    } else {
        render::text(
            &result,
            &mut std::io::stdout().lock(),
            &mut std::io::stderr().lock(),
        )?;
    }

    let code = u8::try_from(result.exit_status.code()).unwrap_or(u8::MAX);
    Ok(ExitCode::from(code))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
