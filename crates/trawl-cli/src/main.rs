use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trawl_client::{
    EnvProxyResolver, JsonPostProcessor, MarkdownPostProcessor, ReqwestFetcher,
    RotatingHeaderGenerator,
};
use trawl_core::{
    Engine, HttpResponse, Payload, PostProcessArgs, PostProcessor, RequestKind, ScrapeConfig,
    ScrapeError, ScrapeOutcome, TracingScrapeReporter,
};

#[derive(Parser)]
#[command(name = "trawl", version, about = "Batch scraper with retries and circuit breaking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a list of URLs, retrying failures in rounds
    Scrape {
        /// URLs to scrape
        urls: Vec<String>,

        /// File with one URL per line (blank lines and `#` comments skipped)
        #[arg(long)]
        urls_file: Option<PathBuf>,

        /// HTTP method
        #[arg(short, long, default_value = "GET", env = "TRAWL_METHOD")]
        method: RequestKind,

        /// JSON array of payload objects (or null), matched to URLs by position
        #[arg(long)]
        payloads_file: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write results here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Scrape a single URL (POST when a payload is given)
    One {
        /// Target URL
        url: String,

        /// JSON object sent as the POST body
        #[arg(long)]
        payload: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Rounds a request may be tried before it is abandoned
    #[arg(long, env = "TRAWL_ATTEMPT_LIMIT", default_value_t = 5)]
    attempt_limit: u32,

    /// Same-kind errors in a row before a batch is shut down
    #[arg(long, env = "TRAWL_CONSECUTIVE_ERROR_LIMIT", default_value_t = 100)]
    consecutive_error_limit: u32,

    /// Seconds to rest after a batch shutdown
    #[arg(long, env = "TRAWL_REST_WAIT", default_value_t = 60)]
    rest_wait: u64,

    /// Never rest between rounds
    #[arg(long, default_value_t = false)]
    no_rest: bool,

    /// Calls per minute
    #[arg(long, env = "TRAWL_RATE_LIMIT")]
    rate_limit: Option<u32>,

    /// Upper bound on concurrent fetches within a batch
    #[arg(long, env = "TRAWL_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, env = "TRAWL_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Proxy for every request
    #[arg(long, env = "TRAWL_PROXY")]
    proxy: Option<String>,

    /// Resolve proxies from HTTP_PROXY / HTTPS_PROXY / NO_PROXY
    #[arg(long, default_value_t = false, conflicts_with = "proxy")]
    env_proxy: bool,

    /// Rotate browser-like headers on every request
    #[arg(long, default_value_t = false)]
    randomise_headers: bool,

    /// How each page is turned into a result
    #[arg(long, value_enum, default_value_t = Output::Markdown)]
    output: Output,

    /// Markdown output: truncate to this many characters
    #[arg(long)]
    max_chars: Option<u64>,

    /// JSON output: JSON pointer selecting the part of the document to keep
    #[arg(long)]
    pointer: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    /// Page converted to Markdown
    Markdown,
    /// Raw response body
    Html,
    /// Body parsed as JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawl=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            urls,
            urls_file,
            method,
            payloads_file,
            engine,
            format,
            out,
        } => {
            let mut urls = urls;
            if let Some(path) = &urls_file {
                urls.extend(read_urls(path)?);
            }
            if urls.is_empty() {
                bail!("No URLs given. Pass them as arguments or with --urls-file.");
            }
            let payloads = payloads_file.as_deref().map(read_payloads).transpose()?;
            let job = Job {
                urls,
                payloads,
                method,
                format,
                out,
            };
            match engine.output {
                Output::Markdown => cmd_scrape(&engine, MarkdownPostProcessor::new(), job).await?,
                Output::Html => cmd_scrape(&engine, raw_body, job).await?,
                Output::Json => cmd_scrape(&engine, JsonPostProcessor, job).await?,
            }
        }
        Commands::One {
            url,
            payload,
            engine,
        } => {
            let payload = payload.as_deref().map(parse_payload).transpose()?;
            match engine.output {
                Output::Markdown => {
                    cmd_one(&engine, MarkdownPostProcessor::new(), &url, payload).await?
                }
                Output::Html => cmd_one(&engine, raw_body, &url, payload).await?,
                Output::Json => cmd_one(&engine, JsonPostProcessor, &url, payload).await?,
            }
        }
    }

    Ok(())
}

fn raw_body(
    body: &str,
    _response: &HttpResponse,
    _kwargs: &PostProcessArgs,
) -> Result<String, ScrapeError> {
    Ok(body.to_string())
}

struct Job {
    urls: Vec<String>,
    payloads: Option<Vec<Option<Payload>>>,
    method: RequestKind,
    format: Format,
    out: Option<PathBuf>,
}

impl EngineArgs {
    fn config(&self) -> ScrapeConfig {
        let mut config = ScrapeConfig::default()
            .with_attempt_limit(self.attempt_limit)
            .with_consecutive_error_limit(self.consecutive_error_limit)
            .with_rest(Duration::from_secs(self.rest_wait));
        if self.no_rest {
            config = config.without_rest();
        }
        if let Some(limit) = self.rate_limit {
            config = config.with_call_rate_limit(limit);
        }
        if let Some(max) = self.max_concurrency {
            config = config.with_max_concurrency(max);
        }
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(proxy.clone());
        } else if self.env_proxy {
            config = config.with_resolved_proxy();
        }
        if self.randomise_headers {
            config = config.with_randomised_headers();
        }
        config
    }

    fn post_process_kwargs(&self) -> PostProcessArgs {
        let mut kwargs = PostProcessArgs::new();
        if let Some(max) = self.max_chars {
            kwargs.insert("max_chars".into(), max.into());
        }
        if let Some(pointer) = &self.pointer {
            kwargs.insert("pointer".into(), pointer.clone().into());
        }
        kwargs
    }

    fn build<P: PostProcessor>(&self, post_processor: P) -> Result<Engine<ReqwestFetcher, P>> {
        let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(self.timeout));
        let mut builder = Engine::builder(fetcher, post_processor)
            .config(self.config())
            .post_process_kwargs(self.post_process_kwargs());
        if self.env_proxy {
            builder = builder.proxy_resolver(EnvProxyResolver::new());
        }
        if self.randomise_headers {
            builder = builder.header_generator(RotatingHeaderGenerator::new());
        }
        builder.build().context("Invalid scrape configuration")
    }
}

async fn cmd_scrape<P>(args: &EngineArgs, post_processor: P, job: Job) -> Result<()>
where
    P: PostProcessor,
    P::Output: Serialize,
{
    let engine = args.build(post_processor)?;

    // Ctrl-C aborts the job; finished results are still written.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing current batch ...");
            on_signal.cancel();
        }
    });

    let report = engine
        .run_job(
            &job.urls,
            job.payloads.as_deref(),
            job.method,
            &cancel,
            &TracingScrapeReporter,
        )
        .await
        .context("Scrape job aborted")?;

    tracing::info!(
        job_id = %report.job_id,
        rounds = report.rounds,
        failed = report.failed_count(),
        abandoned = report.tracker.failed_requests().len(),
        "Job finished in {}s",
        report.runtime().num_seconds()
    );

    match &job.out {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            write_results(&report.results, job.format, file)?;
        }
        None => write_results(&report.results, job.format, std::io::stdout().lock())?,
    }

    Ok(())
}

async fn cmd_one<P>(
    args: &EngineArgs,
    post_processor: P,
    url: &str,
    payload: Option<Payload>,
) -> Result<()>
where
    P: PostProcessor,
    P::Output: Serialize,
{
    let engine = args.build(post_processor)?;
    let outcome = engine.scrape_one(url, payload).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Read one URL per line.
fn read_urls(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Read a JSON array whose entries are payload objects or null.
fn read_payloads(path: &Path) -> Result<Vec<Option<Payload>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payloads file: {}", path.display()))?;
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&content).context("Payloads file must be a JSON array")?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            serde_json::Value::Null => Ok(None),
            value => Payload::try_from(value)
                .map(Some)
                .with_context(|| format!("Invalid payload at index {i}")),
        })
        .collect()
}

fn parse_payload(raw: &str) -> Result<Payload> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Payload is not valid JSON")?;
    Ok(Payload::try_from(value)?)
}

fn write_results<T: Serialize>(
    results: &[ScrapeOutcome<T>],
    format: Format,
    mut writer: impl Write,
) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut writer, results)?;
            writeln!(writer)?;
        }
        Format::Csv => {
            let mut csv = csv::Writer::from_writer(writer);
            csv.write_record(["url", "payload", "status", "error", "result"])?;
            for outcome in results {
                let payload = outcome
                    .req
                    .payload
                    .as_ref()
                    .map(|p| p.to_json().to_string())
                    .unwrap_or_default();
                let status = outcome.status.map(|s| s.to_string()).unwrap_or_default();
                let error = outcome
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                let result = match &outcome.result {
                    Some(result) => match serde_json::to_value(result)? {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    },
                    None => String::new(),
                };
                csv.write_record([&outcome.url, &payload, &status, &error, &result])?;
            }
            csv.flush()?;
        }
    }
    Ok(())
}
