use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use limitprobe::config::ProbeConfig;
use limitprobe::escalation::ScheduleConfig;

#[derive(Parser)]
#[command(
    name = "limitprobe",
    about = "Adaptive rate limit detection for a single HTTP endpoint",
    version,
    long_about = "Measures a baseline, then escalates concurrent load in small steps until the \
                  endpoint shows a rate limiting signal or the request ceiling is reached. \
                  Only probe endpoints you are authorized to test."
)]
struct Cli {
    /// Target URL (e.g. https://api.example.com/login)
    url: String,

    /// HTTP method
    #[arg(short, long, value_enum, ignore_case = true)]
    method: Option<HttpMethod>,

    /// Add a header ("Key: Value"); repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Maximum total requests to send, baseline included (safety cap)
    #[arg(long = "max")]
    max_requests: Option<usize>,

    /// Sequential requests used to establish the baseline
    #[arg(long)]
    baseline_samples: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Median latency multiple over baseline that counts as throttling
    #[arg(long)]
    latency_multiplier: Option<f64>,

    /// Density ramp shape
    #[arg(long, value_enum)]
    schedule: Option<ScheduleKind>,

    /// TOML config file (falls back to $LIMITPROBE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the verdict as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScheduleKind {
    /// Add 5 concurrent requests per step, starting at 5
    Linear,
    /// Double the concurrency each step, starting at 2
    Exponential,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_config(cli: &Cli) -> Result<ProbeConfig> {
    let mut config = ProbeConfig::load_or_default(cli.config.as_deref())?;

    if let Some(method) = cli.method {
        config.target.method = method.as_str().to_string();
    }
    config.add_header_lines(cli.headers.iter().map(String::as_str));
    if let Some(max) = cli.max_requests {
        config.escalation.max_requests = max;
    }
    if let Some(n) = cli.baseline_samples {
        config.baseline.sample_count = n;
        config.baseline.min_successes = config.baseline.min_successes.min(n).max(1);
    }
    if let Some(secs) = cli.timeout {
        config.target.request_timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(x) = cli.latency_multiplier {
        config.detection.latency_multiplier = x;
    }
    match cli.schedule {
        Some(ScheduleKind::Linear) => {
            config.escalation.schedule = ScheduleConfig::Linear { start: 5, step: 5 };
        }
        Some(ScheduleKind::Exponential) => {
            config.escalation.schedule = ScheduleConfig::Exponential { start: 2, factor: 2 };
        }
        None => {}
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli).context("failed to load configuration")?;
    let verdict = limitprobe::probe(&cli.url, &config).await?;

    if cli.json {
        println!("{}", limitprobe::report::render_json(&verdict)?);
    } else {
        print!("{}", limitprobe::report::render_text(&verdict));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    tokio::select! {
        res = run(cli) => match res {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nTest interrupted by user.");
            ExitCode::from(130)
        }
    }
}
