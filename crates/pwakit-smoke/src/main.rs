//! PwaKit Smoke Harness
//!
//! Drives the offline worker through install, activate and a scripted set of
//! fetches against a live origin (or a built-in simulated one with
//! `--dry-run`), then prints a JSON summary.
//!
//! ```text
//! pwakit-smoke [--config FILE] [--offline] [--post N] [--reset]
//!              [--log-format pretty|compact|json] [--dry-run] [PATH...]
//! ```

use http::{Method, StatusCode};
use pwakit_common::{init_logging, LogConfig, LogFormat, WorkerConfig};
use pwakit_net::{
    Connectivity, HttpNetwork, LoaderConfig, MockNetwork, MockReply, Network, Request,
};
use pwakit_sw::{ServiceWorker, WorkerContext};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};

/// Parse command line arguments
struct Args {
    config: Option<String>,
    offline: bool,
    post: Option<String>,
    reset: bool,
    log_format: LogFormat,
    dry_run: bool,
    paths: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Args {
            config: None,
            offline: false,
            post: None,
            reset: false,
            log_format: LogFormat::Compact,
            dry_run: false,
            paths: Vec::new(),
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = args.next(),
                "--offline" => parsed.offline = true,
                "--post" => parsed.post = args.next(),
                "--reset" => parsed.reset = true,
                "--log-format" => {
                    if let Some(format) = args.next().as_deref().and_then(LogFormat::from_name) {
                        parsed.log_format = format;
                    }
                }
                "--dry-run" => parsed.dry_run = true,
                other if other.starts_with("--") => {
                    eprintln!("Warning: ignoring unknown option {}", other);
                }
                path => parsed.paths.push(path.to_string()),
            }
        }

        parsed
    }
}

/// Stand-in origin: serves every static path and keeps a counter at the
/// mutation endpoint.
fn simulated_origin(config: &WorkerConfig) -> MockNetwork {
    let network = MockNetwork::new();
    let mutation_path = config.mutation_path.clone();
    let total = Arc::new(Mutex::new(0i64));

    network.set_handler(move |request| {
        if request.url.path() != mutation_path {
            return MockReply::ok(format!("simulated {}", request.url.path()));
        }
        let mut total = match total.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match request.method {
            Method::GET => MockReply::ok(total.to_string()),
            Method::POST => {
                *total += request.body_text().trim().parse::<i64>().unwrap_or(0);
                MockReply::ok(total.to_string())
            }
            Method::DELETE => {
                *total = 0;
                MockReply::ok("")
            }
            _ => MockReply::status(StatusCode::METHOD_NOT_ALLOWED, ""),
        }
    });
    network
}

fn fail(stage: &str, message: impl std::fmt::Display) -> ! {
    error!(stage, error = %message, "Smoke run failed");
    println!(
        "{}",
        json!({ "status": "fail", "stage": stage, "error": message.to_string() })
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(LogConfig::default().with_format(args.log_format));

    let config = match args.config {
        Some(ref path) => WorkerConfig::load(path).unwrap_or_else(|e| fail("config", e)),
        None => WorkerConfig::default(),
    };
    info!(
        origin = %config.origin,
        cache = %config.cache_name,
        dry_run = args.dry_run,
        offline = args.offline,
        "Starting PwaKit Smoke Harness"
    );

    let network: Arc<dyn Network> = if args.dry_run {
        Arc::new(simulated_origin(&config))
    } else {
        Arc::new(HttpNetwork::new(LoaderConfig::default()).unwrap_or_else(|e| fail("network", e)))
    };
    let connectivity = Connectivity::online();

    let ctx: Arc<WorkerContext> = WorkerContext::builder(config.clone())
        .network(network)
        .connectivity(connectivity.clone())
        .build()
        .unwrap_or_else(|e| fail("context", e));

    let start = Instant::now();
    let (worker, task) = ServiceWorker::spawn(ctx.clone());

    let installed = worker.install().await.unwrap_or_else(|e| fail("install", e));
    let activation = worker.activate().await.unwrap_or_else(|e| fail("activate", e));

    connectivity.set_online(!args.offline);

    let mut requests = Vec::new();
    let targets = if args.paths.is_empty() {
        config.manifest.clone()
    } else {
        args.paths.clone()
    };
    for path in &targets {
        match config.resolve(path) {
            Ok(url) => requests.push(Request::get(url)),
            Err(e) => warn!(path = %path, error = %e, "Skipping unresolvable path"),
        }
    }

    let mutation = ctx.mutation_url().clone();
    if let Some(ref amount) = args.post {
        requests.push(Request::post(mutation.clone(), amount.clone()));
    }
    if args.reset {
        requests.push(Request::delete(mutation.clone()));
    }
    requests.push(Request::get(mutation));

    let mut fetched = Vec::new();
    for request in requests {
        let label = format!("{} {}", request.method, request.url);
        match worker.fetch(request).await {
            Ok(response) => fetched.push(json!({
                "request": label,
                "status": response.status.as_u16(),
                "source": format!("{:?}", response.source),
                "bytes": response.body.len(),
            })),
            Err(e) => fail("fetch", e),
        }
    }

    let queued = ctx.queue.len().await.unwrap_or_else(|e| {
        warn!(error = %e, "Cannot count queued mutations");
        0
    });
    let cached = ctx.current_cache().await.keys().await;
    let result = json!({
        "status": "pass",
        "elapsed_ms": start.elapsed().as_millis(),
        "installed": installed,
        "deleted_caches": activation.deleted,
        "cache": config.cache_name,
        "cached": cached,
        "fetched": fetched,
        "queued": queued,
        "last_total": ctx.last_total().await,
        "placeholder": ctx.placeholder_url().as_str(),
    });
    println!("{}", result);

    drop(worker);
    if let Err(e) = task.await {
        error!(?e, "Worker task ended abnormally");
    }
}
