//! wxpath CLI: run one expression, print NDJSON to stdout.

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use wxpath::{Engine, RunOptions, Settings};

#[derive(Parser)]
#[command(name = "wxpath")]
#[command(about = "Declarative web crawling with XPath expressions")]
#[command(version)]
struct Cli {
    /// The wxpath expression, e.g. "url('https://example.com')//a/@href"
    expression: String,

    /// Maximum crawl depth
    #[arg(long, default_value = "1")]
    depth: usize,

    /// Global maximum in-flight requests
    #[arg(long, default_value = "16")]
    concurrency: usize,

    /// Maximum in-flight requests per host
    #[arg(long, default_value = "8")]
    concurrency_per_host: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "15")]
    timeout: u64,

    /// Add a request header ('Key:Value'); repeatable
    #[arg(long = "header", value_name = "KEY:VALUE")]
    headers: Vec<String>,

    /// Enforce robots.txt (pass `--respect-robots false` to disable)
    #[arg(
        long,
        action = clap::ArgAction::Set,
        default_value_t = true,
        default_missing_value = "true",
        num_args = 0..=1
    )]
    respect_robots: bool,

    /// Enable the response cache
    #[arg(long)]
    cache: bool,

    /// Cache backend (sqlite)
    #[arg(long, default_value = "sqlite")]
    cache_backend: String,

    /// Path of the cache database
    #[arg(long, default_value = "cache.db")]
    cache_path: String,

    /// Emit error maps for failed fetches instead of dropping them
    #[arg(long)]
    yield_errors: bool,

    /// Print the parsed program and final crawl stats to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Verbose engine tracing
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut settings = Settings::default();
    settings.http.concurrency = cli.concurrency;
    settings.http.per_host = cli.concurrency_per_host;
    settings.http.timeout_secs = cli.timeout;
    settings.http.respect_robots = cli.respect_robots;
    settings.cache.enabled = cli.cache;
    settings.cache.backend = cli.cache_backend.clone();
    settings.cache.path = cli.cache_path.clone();

    for header in &cli.headers {
        match header.split_once(':') {
            Some((key, value)) => {
                settings
                    .http
                    .headers
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                eprintln!("warning: invalid header '{header}', use 'Key:Value'");
            }
        }
    }

    if cli.verbose {
        let program = wxpath::program::parse(&cli.expression)?;
        eprintln!("parsed program: {program}");
    }

    let engine = Engine::new(settings)?;
    let options = RunOptions {
        progress: cli.verbose,
        yield_errors: cli.yield_errors,
    };

    let results = engine.run_blocking_iter(&cli.expression, cli.depth, options)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for value in results {
        let line = serde_json::to_string(&value)?;
        if writeln!(out, "{line}").is_err() {
            // downstream pipe closed
            break;
        }
    }

    if cli.verbose {
        eprintln!("{}", engine.stats());
    }

    Ok(())
}
