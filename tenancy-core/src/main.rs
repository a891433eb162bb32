//! Tenancy proxy entry point.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (localhost:8080 -> localhost:8088)
//! tenancy-core
//!
//! # Point at the workflow backend
//! TARGET_URL=http://conductor-server:8080 tenancy-core
//!
//! # Set listen address and backend timeout
//! LISTEN_ADDR=0.0.0.0:8080 UPSTREAM_TIMEOUT_MS=10000 tenancy-core
//!
//! # Log request counters every 10s (0 disables)
//! METRICS_INTERVAL_SECS=10 tenancy-core
//! ```

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tenancy_core::proxy::report_metrics;
use tenancy_core::runtime::{build_runtime, num_cpus, RuntimeConfig};
use tenancy_core::{ProxyConfig, ProxyServer, ProxyState, RouteTable};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Environment variable for target URL
const ENV_TARGET_URL: &str = "TARGET_URL";

/// Environment variable for listen address
const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";

/// Environment variable for the backend call timeout
const ENV_UPSTREAM_TIMEOUT_MS: &str = "UPSTREAM_TIMEOUT_MS";

/// Environment variable for the body size limit
const ENV_MAX_BODY_BYTES: &str = "MAX_BODY_BYTES";

/// Environment variable for the metrics log interval
const ENV_METRICS_INTERVAL_SECS: &str = "METRICS_INTERVAL_SECS";

/// Environment variable for worker threads
const ENV_WORKER_THREADS: &str = "WORKER_THREADS";

fn main() {
    init_tracing();

    let runtime_config = RuntimeConfig {
        worker_threads: env_or(ENV_WORKER_THREADS, num_cpus()),
        ..Default::default()
    };

    let runtime = match build_runtime(runtime_config) {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        if let Err(e) = run_proxy().await {
            error!(error = %e, "Proxy server failed");
            std::process::exit(1);
        }
    });
}

/// Initialize the tracing subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tenancy_core=debug,info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Run the proxy server.
async fn run_proxy() -> tenancy_core::Result<()> {
    let config = build_config();
    let routes = Arc::new(RouteTable::metadata());

    info!(
        listen = %config.listen_addr,
        target = %config.target_url,
        timeout_ms = config.timeout_ms,
        routes = routes.len(),
        "Starting tenancy proxy"
    );

    let server = ProxyServer::new(ProxyState::new(config, routes));

    let interval_secs: u64 = env_or(ENV_METRICS_INTERVAL_SECS, 60);
    if interval_secs > 0 {
        tokio::spawn(report_metrics(
            server.metrics(),
            Duration::from_secs(interval_secs),
        ));
    }

    server.run().await
}

/// Build proxy configuration from environment, keeping defaults for
/// anything unset or unparsable.
fn build_config() -> ProxyConfig {
    let defaults = ProxyConfig::default();

    ProxyConfig {
        listen_addr: env_or(ENV_LISTEN_ADDR, defaults.listen_addr),
        target_url: env_or(ENV_TARGET_URL, defaults.target_url),
        timeout_ms: env_or(ENV_UPSTREAM_TIMEOUT_MS, defaults.timeout_ms),
        max_body_size: env_or(ENV_MAX_BODY_BYTES, defaults.max_body_size),
    }
}

/// Read and parse an environment variable, warning on a bad value.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(key, value = %raw, error = %e, default = %default, "Ignoring invalid setting");
                default
            }
        },
        Err(_) => default,
    }
}
