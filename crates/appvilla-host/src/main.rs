//! Command-line host for the AppVilla offline agent.
//!
//! Plays the browser's part: delivers events to one worker, persists its
//! caches and the deferred action queue between runs, and prints what the
//! worker asked the platform to do.
//!
//! ## Usage
//!
//! ```bash
//! # Prime and activate the cache generation from a running storefront
//! appvilla --config appvilla.json install
//!
//! # Serve a request as the worker would with the network down
//! appvilla fetch /products --offline
//!
//! # Queue an order while offline, then replay it
//! appvilla enqueue --method POST --url /api/orders --body '{"sku":"A1"}'
//! appvilla sync sync-new-order --attempts 3 --backoff-secs 2
//!
//! # Render a push message and click it
//! appvilla push --payload '{"title":"Sale","url":"/deals"}' --click
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use appvilla_common::{init_logging, LogConfig, LogFormat, RetryConfig};
use appvilla_net::{HttpFetcher, LoaderConfig};
use appvilla_sw::{
    Collaborators, DeferredAction, DeferredQueue, EventOutcome, MemoryCacheStore, NetworkFetch,
    QueueReplay, Request, ServiceWorker, SyncRegistry, SyncReport, WorkerConfig, WorkerEvent,
};
use bytes::Bytes;
use clap::{ArgAction, Args, Parser, Subcommand};
use http::Method;
use tracing::{debug, info, warn};

mod platform;
mod queue;

use platform::{CliHost, ConsolePlatform, Disconnected};
use queue::FileQueue;

#[derive(Parser)]
#[command(name = "appvilla")]
#[command(about = "Drive the AppVilla offline agent from the command line")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Worker configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Where cache generations are persisted between runs
    #[arg(long, global = true, default_value = "appvilla-cache.json")]
    cache_file: PathBuf,

    /// Where the deferred action queue is persisted
    #[arg(long, global = true, default_value = "appvilla-queue.json")]
    queue_file: PathBuf,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured cache generation, then activate it
    Install,

    /// Route one request through the fetch interceptor
    Fetch {
        /// Path (or absolute URL) to request
        path: String,
        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Make every network call throw
        #[arg(long)]
        offline: bool,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },

    /// Render a push message as a notification
    Push {
        /// JSON payload, e.g. '{"title":"T","body":"B","url":"/x"}'
        #[arg(short, long)]
        payload: Option<String>,
        /// Click the notification after showing it
        #[arg(long)]
        click: bool,
    },

    /// Queue an action for the next background sync
    Enqueue {
        /// Request method
        #[arg(short, long, default_value = "POST")]
        method: String,
        /// Path (or absolute URL) of the endpoint
        #[arg(short, long)]
        url: String,
        /// Request body
        #[arg(short, long)]
        body: Option<String>,
        /// Header as NAME:VALUE; may be repeated
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Deliver a background sync signal
    Sync {
        /// Sync tag
        tag: String,
        /// Attempts before giving up
        #[arg(long, default_value = "1")]
        attempts: u32,
        /// Delay before the second attempt, doubled for each one after
        /// (capped at an hour, or at this delay when it is longer)
        #[arg(long, default_value = "30")]
        backoff_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config =
        LogConfig::from_verbosity(cli.global.verbose).with_format(cli.global.log_format);
    init_logging(&log_config)?;

    let config = match &cli.global.config {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    debug!(generation = %config.cache_name, origin = %config.origin, "Configuration loaded");

    match cli.command {
        Commands::Install => install(&cli.global, config).await,
        Commands::Fetch {
            path,
            method,
            offline,
            body,
        } => fetch(&cli.global, config, &path, &method, offline, body).await,
        Commands::Push { payload, click } => push(&cli.global, config, payload, click).await,
        Commands::Enqueue {
            method,
            url,
            body,
            headers,
        } => enqueue(&cli.global, &method, url, body, &headers).await,
        Commands::Sync {
            tag,
            attempts,
            backoff_secs,
        } => sync(&cli.global, config, &tag, attempts, backoff_secs).await,
    }
}

/// A worker wired to the persisted cache and queue files.
struct Session {
    worker: Arc<ServiceWorker>,
    store: Arc<MemoryCacheStore>,
}

impl Session {
    async fn open(global: &GlobalArgs, config: WorkerConfig, offline: bool) -> Result<Self> {
        let store = Arc::new(
            MemoryCacheStore::load(&global.cache_file)
                .await
                .with_context(|| format!("loading caches from {}", global.cache_file.display()))?,
        );

        let network: Arc<dyn NetworkFetch> = if offline {
            Arc::new(Disconnected)
        } else {
            Arc::new(HttpFetcher::new(LoaderConfig::default())?)
        };
        let replay = Arc::new(QueueReplay::new(
            Arc::new(FileQueue::new(&global.queue_file)),
            Arc::clone(&network),
            config.origin.clone(),
        ));

        let worker = ServiceWorker::new(
            config,
            Collaborators {
                store: store.clone(),
                network,
                host: Arc::new(CliHost),
                replay,
                notifications: Arc::new(ConsolePlatform::stdout()),
            },
        )?;

        Ok(Self {
            worker: Arc::new(worker),
            store,
        })
    }

    async fn save(&self, path: &Path) -> Result<()> {
        self.worker.keep_alive().until_idle().await;
        self.store
            .save(path)
            .await
            .with_context(|| format!("saving caches to {}", path.display()))
    }
}

async fn install(global: &GlobalArgs, config: WorkerConfig) -> Result<()> {
    let session = Session::open(global, config, false).await?;

    let installed = session.worker.dispatch(WorkerEvent::Install).await?;
    let activated = session.worker.dispatch(WorkerEvent::Activate).await?;
    session.save(&global.cache_file).await?;

    if let (EventOutcome::Installed(install), EventOutcome::Activated(activation)) =
        (installed, activated)
    {
        println!("{}", serde_json::to_string_pretty(&install)?);
        println!("{}", serde_json::to_string_pretty(&activation)?);
        for (generation, reason) in &activation.failed {
            warn!(%generation, %reason, "Stale generation left in place");
        }
    }
    Ok(())
}

async fn fetch(
    global: &GlobalArgs,
    config: WorkerConfig,
    path: &str,
    method: &str,
    offline: bool,
    print_body: bool,
) -> Result<()> {
    let url = config.resolve(path)?;
    let method = parse_method(method)?;
    let session = Session::open(global, config, offline).await?;

    // The generation on disk was activated by an earlier run, so this process
    // acts as the controlling worker.
    let request = Request::new(method, url);
    let outcome = session
        .worker
        .keep_alive()
        .wait_until("fetch", session.worker.interceptor().handle(&request))
        .await?;

    let response = outcome.response();
    println!("source: {}", outcome.source());
    println!("status: {} {}", response.status, response.status_text);
    for (name, value) in &response.headers {
        println!("{name}: {value}");
    }
    println!("bytes:  {}", response.body.len());
    if print_body {
        println!();
        println!("{}", String::from_utf8_lossy(&response.body));
    }
    Ok(())
}

async fn push(
    global: &GlobalArgs,
    config: WorkerConfig,
    payload: Option<String>,
    click: bool,
) -> Result<()> {
    let session = Session::open(global, config, true).await?;

    let data = payload.map(Bytes::from);
    let EventOutcome::NotificationShown(notification) =
        session.worker.dispatch(WorkerEvent::Push { data }).await?
    else {
        bail!("push produced no notification");
    };

    if click {
        session
            .worker
            .dispatch(WorkerEvent::NotificationClick(notification))
            .await?;
    }
    Ok(())
}

async fn enqueue(
    global: &GlobalArgs,
    method: &str,
    url: String,
    body: Option<String>,
    headers: &[String],
) -> Result<()> {
    let method = parse_method(method)?;
    let headers = headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<Vec<_>>>()?;
    let queued_at_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let queue = FileQueue::new(&global.queue_file);
    let action = DeferredAction {
        id: format!("{queued_at_ms}-{}", queue.actions().await?.len()),
        method: method.to_string(),
        url,
        headers,
        body: body.map(Bytes::from),
        queued_at_ms,
    };
    info!(id = %action.id, method = %action.method, url = %action.url, "Queued deferred action");
    queue.push(action.clone()).await?;

    println!("{}", action.id);
    Ok(())
}

/// Backoff for `sync`. The cap never sits below the first delay.
fn sync_retry(attempts: u32, backoff_secs: u64) -> RetryConfig {
    let defaults = RetryConfig::default();
    let initial_delay = Duration::from_secs(backoff_secs);
    RetryConfig {
        max_attempts: attempts.max(1),
        initial_delay,
        max_delay: defaults.max_delay.max(initial_delay),
        ..defaults
    }
}

async fn sync(
    global: &GlobalArgs,
    config: WorkerConfig,
    tag: &str,
    attempts: u32,
    backoff_secs: u64,
) -> Result<()> {
    let session = Session::open(global, config, false).await?;
    let mut registry = SyncRegistry::new(sync_retry(attempts, backoff_secs));
    registry.register(tag, Instant::now());

    loop {
        let guard = session.worker.keep_alive().hold("sync");
        for report in registry.fire_due(session.worker.relay(), Instant::now()).await {
            match report {
                SyncReport::Completed { tag, attempts } => {
                    println!("{tag}: completed after {attempts} attempt(s)");
                }
                SyncReport::Rescheduled { tag, attempts, delay } => {
                    println!("{tag}: attempt {attempts} failed, retrying in {delay:?}");
                }
                SyncReport::GaveUp { tag, attempts, error } => {
                    bail!("{tag}: gave up after {attempts} attempt(s): {error}");
                }
            }
        }
        drop(guard);

        match registry.next_due() {
            Some(due) => tokio::time::sleep_until(due.into()).await,
            None => return Ok(()),
        }
    }
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{method}'"))
}

fn parse_header(header: &str) -> Result<(String, String)> {
    match header.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("header '{header}' must look like NAME:VALUE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Content-Type: application/json").unwrap(),
            ("Content-Type".to_string(), "application/json".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(":value").is_err());
    }

    #[test]
    fn test_sync_retry_honours_long_backoff() {
        let retry = sync_retry(3, 7_200);
        assert_eq!(retry.max_attempts, 3);
        assert!(retry.delay_for_attempt(2) >= Duration::from_secs(7_200));

        let short = sync_retry(0, 2);
        assert_eq!(short.max_attempts, 1);
        assert_eq!(short.max_delay, RetryConfig::default().max_delay);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert!(parse_method("BAD METHOD").is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "appvilla",
            "fetch",
            "/index.html",
            "--offline",
            "--log-format",
            "json",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.global.log_format, LogFormat::Json);
        assert_eq!(cli.global.verbose, 2);
        assert!(matches!(cli.command, Commands::Fetch { offline: true, .. }));
    }
}
