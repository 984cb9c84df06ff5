//! Verso Smoke Harness
//!
//! Points a cache worker at a live origin: registers it, installs the shell,
//! activates it, replays a list of paths through the fetch handler and
//! prints a JSON summary on stdout.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info};
use url::Url;
use verso_common::{init_logging, LogConfig, LogFormat};
use verso_net::{HttpNetwork, NetworkConfig, OfflineNetwork};
use verso_sw::{
    CacheStore, FetchOutcome, FetchRequest, MemoryCacheStore, NetError, Network,
    RegistrationOptions, Response, ServiceWorkerContainer, StaticScript, WorkerConfig,
};

/// Live network that can be cut after install.
struct SmokeNetwork {
    live: HttpNetwork,
    offline: AtomicBool,
}

#[async_trait]
impl Network for SmokeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, NetError> {
        if self.offline.load(Ordering::SeqCst) {
            OfflineNetwork.fetch(request).await
        } else {
            self.live.fetch(request).await
        }
    }
}

/// Parse command line arguments
struct Args {
    origin: String,
    paths: Vec<String>,
    config: Option<String>,
    offline: bool,
    json_logs: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut origin = "http://localhost:3000".to_string();
        let mut paths = Vec::new();
        let mut config = None;
        let mut offline = false;
        let mut json_logs = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--origin" => {
                    if let Some(val) = args.next() {
                        origin = val;
                    }
                }
                "--path" => {
                    if let Some(val) = args.next() {
                        paths.push(val);
                    }
                }
                "--config" => {
                    config = args.next();
                }
                "--offline" => {
                    offline = true;
                }
                "--json-logs" => {
                    json_logs = true;
                }
                other => eprintln!("Ignoring unknown argument {other}"),
            }
        }

        if paths.is_empty() {
            paths.push("/".to_string());
        }

        Self {
            origin,
            paths,
            config,
            offline,
            json_logs,
        }
    }

    fn worker_config(&self) -> Result<WorkerConfig, String> {
        let Some(ref path) = self.config else {
            return Ok(WorkerConfig::default());
        };
        let contents =
            std::fs::read_to_string(path).map_err(|e| format!("reading {path}: {e}"))?;
        WorkerConfig::from_json(&contents).map_err(|e| format!("parsing {path}: {e}"))
    }
}

/// Navigations are paths whose last segment has no extension.
fn request_for(url: Url) -> FetchRequest {
    let is_document = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map_or(true, |last| !last.contains('.'));
    if is_document {
        FetchRequest::navigate(url)
    } else {
        FetchRequest::get(url)
    }
}

fn outcome_json(path: &str, outcome: &FetchOutcome, elapsed_ms: f64) -> serde_json::Value {
    let elapsed_ms = (elapsed_ms * 100.0).round() / 100.0;
    match outcome {
        FetchOutcome::Passthrough => json!({
            "path": path,
            "outcome": "passthrough",
            "elapsed_ms": elapsed_ms,
        }),
        FetchOutcome::Respond { response, source } => json!({
            "path": path,
            "outcome": "respond",
            "source": format!("{source:?}"),
            "status": response.status,
            "bytes": response.body.len(),
            "elapsed_ms": elapsed_ms,
        }),
        FetchOutcome::Failed(err) => json!({
            "path": path,
            "outcome": "failed",
            "error": err.to_string(),
            "elapsed_ms": elapsed_ms,
        }),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logging(LogConfig::default().with_format(format).with_stderr());

    let origin = match Url::parse(&args.origin) {
        Ok(origin) => origin,
        Err(e) => {
            error!(origin = %args.origin, error = %e, "Invalid origin");
            return ExitCode::from(2);
        }
    };
    let config = match args.worker_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid worker config");
            return ExitCode::from(2);
        }
    };
    let live = match HttpNetwork::new(NetworkConfig::default()) {
        Ok(live) => live,
        Err(e) => {
            error!(error = %e, "HTTP client could not be built");
            return ExitCode::from(2);
        }
    };

    let network = Arc::new(SmokeNetwork {
        live,
        offline: AtomicBool::new(false),
    });
    let store = Arc::new(MemoryCacheStore::new());
    let cache_name = config.cache_name.clone();
    let (container, _events) = ServiceWorkerContainer::new(
        network.clone(),
        store.clone(),
        Arc::new(StaticScript::new(config)),
    );

    let started = Instant::now();
    let script_url = match origin.join("/sw.js") {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Invalid worker script URL");
            return ExitCode::from(2);
        }
    };
    let scope = match container
        .register(script_url.as_str(), RegistrationOptions::default())
        .await
    {
        Ok(scope) => scope,
        Err(e) => {
            error!(error = %e, "SW registration failed");
            return ExitCode::FAILURE;
        }
    };
    let install_ms = started.elapsed().as_secs_f64() * 1000.0;
    let shell: Vec<String> = store
        .keys(&cache_name)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|key| key.to_string())
        .collect();
    info!(scope = %scope, cached = shell.len(), "Shell installed");

    if args.offline {
        network.offline.store(true, Ordering::SeqCst);
        info!("Network cut, replaying offline");
    }

    let mut requests = Vec::new();
    let mut failures = 0usize;
    for path in &args.paths {
        let url = match origin.join(path) {
            Ok(url) => url,
            Err(e) => {
                error!(path = %path, error = %e, "Skipping invalid path");
                failures += 1;
                continue;
            }
        };
        let start = Instant::now();
        let outcome = container.handle_fetch(&request_for(url)).await;
        if matches!(outcome, FetchOutcome::Failed(_)) {
            failures += 1;
        }
        requests.push(outcome_json(
            path,
            &outcome,
            start.elapsed().as_secs_f64() * 1000.0,
        ));
    }
    container.settle().await;

    let cached_after = store.keys(&cache_name).await.map(|k| k.len()).unwrap_or(0);
    let summary = json!({
        "origin": origin.as_str(),
        "scope": scope,
        "cache": cache_name,
        "offline": args.offline,
        "install_ms": (install_ms * 100.0).round() / 100.0,
        "shell": shell,
        "controller": container.controller().await.map(|id| id.raw()),
        "requests": requests,
        "cached_after": cached_after,
        "failures": failures,
    });

    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{text}"),
        Err(e) => error!(error = %e, "Summary could not be serialized"),
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_from_path() {
        let base = Url::parse("https://verso.app/").unwrap();
        assert!(request_for(base.join("/").unwrap()).is_navigation());
        assert!(request_for(base.join("/livros/joao").unwrap()).is_navigation());
        assert!(!request_for(base.join("/static/js/bundle.js").unwrap()).is_navigation());
    }

    #[test]
    fn test_failed_outcome_json() {
        let err = verso_sw::DispatchError::NoShell {
            source: NetError::Unreachable("offline".into()),
        };
        let value = outcome_json("/x", &FetchOutcome::Failed(err), 1.234);
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["elapsed_ms"], 1.23);
    }
}
