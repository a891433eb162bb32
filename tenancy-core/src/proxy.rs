//! Tenant-isolating reverse proxy.
//!
//! Every request runs through the same pipeline:
//!
//! ```text
//! Received -> TenantResolved -> PreTransformed -> Forwarded -> PostTransformed -> Returned
//! ```
//!
//! An error at any stage ends the request with the error's status code.
//! Errors before `Forwarded` mean the backend was never called. When the
//! backend call fails or times out the post-forward hook does not run.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderName, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, Span};

use crate::error::{Result, TenancyError};
use crate::routes::{Forward, InboundResponse, OutboundRequest, RouteTable};
use crate::tenant;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on (default: 127.0.0.1:8080)
    pub listen_addr: SocketAddr,

    /// Backend base URL requests are forwarded to
    pub target_url: Uri,

    /// Backend call timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,

    /// Maximum request or response body size in bytes (default: 10MB)
    pub max_body_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 8080).into(),
            target_url: Uri::from_static("http://127.0.0.1:8088"),
            timeout_ms: 30_000,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Request counters.
///
/// Uses atomic counters for lock-free updates.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    /// Total requests handled
    pub requests_total: AtomicU64,
    /// Requests refused before reaching the backend
    pub requests_rejected: AtomicU64,
    /// Requests that failed after being forwarded
    pub requests_failed: AtomicU64,
    /// Total bytes received from upstream
    pub bytes_received: AtomicU64,
    /// Total bytes sent to clients
    pub bytes_sent: AtomicU64,
    /// Total processing time in microseconds
    pub processing_time_us: AtomicU64,
}

impl ProxyMetrics {
    /// Record a completed request.
    #[inline]
    pub fn record_request(&self, duration_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.processing_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Record a failed request.
    #[inline]
    pub fn record_failure(&self, rejected: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if rejected {
            self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get average latency in microseconds.
    pub fn avg_latency_us(&self) -> u64 {
        let total = self.requests_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.processing_time_us.load(Ordering::Relaxed) / total
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            avg_latency_us: self.avg_latency_us(),
        }
    }
}

/// Counter values read at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_rejected: u64,
    pub requests_failed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub avg_latency_us: u64,
}

/// Log a metrics summary every `every`, forever.
pub async fn report_metrics(metrics: Arc<ProxyMetrics>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snap = metrics.snapshot();
        info!(
            requests = snap.requests_total,
            rejected = snap.requests_rejected,
            failed = snap.requests_failed,
            bytes_in = snap.bytes_received,
            bytes_out = snap.bytes_sent,
            avg_latency_us = snap.avg_latency_us,
            "Proxy metrics"
        );
    }
}

/// Shared state for the proxy service.
///
/// Read-only after construction apart from the metric counters.
pub struct ProxyState {
    /// Configuration
    pub config: ProxyConfig,

    /// HTTP client for upstream requests
    pub client: Client<HttpConnector, Full<Bytes>>,

    /// Route transform table
    pub routes: Arc<RouteTable>,

    /// Metrics
    pub metrics: Arc<ProxyMetrics>,
}

impl ProxyState {
    /// Create a new proxy state.
    pub fn new(config: ProxyConfig, routes: Arc<RouteTable>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();

        Self {
            config,
            client,
            routes,
            metrics: Arc::new(ProxyMetrics::default()),
        }
    }
}

/// The tenancy proxy server.
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new proxy server.
    pub fn new(state: ProxyState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.state.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            target = %self.state.config.target_url,
            routes = self.state.routes.len(),
            "Tenancy proxy listening"
        );

        loop {
            let (stream, peer_addr) = listener.accept().await?;

            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(state, req).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer_addr, error = %e, "Connection error");
                }
            });
        }
    }

    /// Shared handle to the request counters.
    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.state.metrics)
    }
}

/// Handle a single request, turning pipeline errors into responses.
#[instrument(
    skip(state, req),
    fields(method = %req.method(), uri = %req.uri(), tenant = tracing::field::Empty)
)]
async fn handle_request(
    state: Arc<ProxyState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let start = Instant::now();

    match process_request(&state, req).await {
        Ok(response) => {
            state
                .metrics
                .record_request(start.elapsed().as_micros() as u64);
            Ok(response)
        }
        Err(e) => {
            state.metrics.record_failure(e.is_rejection());
            error!(error = %e, status = e.status_code(), "Request processing failed");
            Ok(error_response(e.status_code(), &e.to_string()))
        }
    }
}

/// Run one request through the transform pipeline.
async fn process_request(
    state: &ProxyState,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();

    let tenant = tenant::resolve(&parts.headers)?;
    Span::current().record("tenant", tenant.as_str());

    let matched = state.routes.dispatch(&parts.method, parts.uri.path());

    let body_bytes = read_body(body, state.config.max_body_size).await?;
    let mut outbound = OutboundRequest::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query().map(str::to_owned),
        parts.headers,
        body_bytes,
    );

    let forward = match matched.as_ref().and_then(|m| m.route.pre.map(|hook| (m, hook))) {
        Some((m, hook)) => hook(&m.context(&tenant), &mut outbound)?,
        None => Forward::unchanged(),
    };

    let post_hook = matched.as_ref().and_then(|m| m.route.post.map(|hook| (m, hook)));
    if post_hook.is_some() {
        // filtered responses must arrive as plain JSON
        outbound.headers.remove(ACCEPT_ENCODING);
    }

    let upstream_req = build_upstream_request(&state.config.target_url, outbound, forward)?;
    let (resp_parts, resp_bytes) = forward_upstream(state, upstream_req).await?;

    state
        .metrics
        .bytes_received
        .fetch_add(resp_bytes.len() as u64, Ordering::Relaxed);

    let final_body = match post_hook {
        Some((m, hook)) if resp_parts.status.is_success() && !resp_bytes.is_empty() => {
            let body = parse_filtered_body(&resp_parts, &resp_bytes)?;
            let mut inbound = InboundResponse {
                status: resp_parts.status,
                body,
            };
            hook(&m.context(&tenant), &mut inbound)?;
            Bytes::from(inbound.body.to_string())
        }
        _ => resp_bytes,
    };

    state
        .metrics
        .bytes_sent
        .fetch_add(final_body.len() as u64, Ordering::Relaxed);

    let mut response = Response::new(Full::new(final_body));
    *response.status_mut() = resp_parts.status;
    // content-length is recomputed from the rewritten body
    let headers = response.headers_mut();
    for (name, value) in resp_parts.headers.iter() {
        if name != CONTENT_LENGTH && !is_hop_by_hop(name) {
            headers.append(name, value.clone());
        }
    }
    Ok(response)
}

/// Parse a 2xx body that a post-forward hook has to inspect.
///
/// Anything the hook cannot see through is refused instead of being
/// returned unfiltered.
fn parse_filtered_body(parts: &http::response::Parts, bytes: &Bytes) -> Result<Value> {
    if let Some(encoding) = parts.headers.get(CONTENT_ENCODING) {
        if encoding.as_bytes() != b"identity" {
            let encoding = String::from_utf8_lossy(encoding.as_bytes()).into_owned();
            error!(encoding = %encoding, "Encoded upstream body on a filtered route");
            return Err(TenancyError::UpstreamResponse(format!(
                "unexpected content-encoding '{encoding}'"
            )));
        }
    }

    serde_json::from_slice(bytes).map_err(|e| {
        error!(error = %e, status = %parts.status, "Upstream body is not JSON");
        TenancyError::UpstreamResponse(format!("invalid JSON: {e}"))
    })
}

/// Send the request upstream and read the whole response, within the
/// configured timeout.
async fn forward_upstream(
    state: &ProxyState,
    upstream_req: Request<Full<Bytes>>,
) -> Result<(http::response::Parts, Bytes)> {
    let call = async {
        let upstream_resp = state.client.request(upstream_req).await?;
        let (parts, body) = upstream_resp.into_parts();
        let bytes = read_body(body, state.config.max_body_size)
            .await
            .map_err(|e| TenancyError::UpstreamResponse(e.to_string()))?;
        Ok::<_, TenancyError>((parts, bytes))
    };

    tokio::time::timeout(Duration::from_millis(state.config.timeout_ms), call)
        .await
        .map_err(|_| TenancyError::Timeout(state.config.timeout_ms))?
}

/// Build the upstream request.
///
/// Points the (possibly rewritten) path at the target and picks the body
/// the pre-forward continuation selected.
fn build_upstream_request(
    target: &Uri,
    outbound: OutboundRequest,
    forward: Forward,
) -> Result<Request<Full<Bytes>>> {
    let (method, path_and_query, headers, body) = outbound.into_parts(forward);

    let uri = format!(
        "{}://{}{}",
        target.scheme_str().unwrap_or("http"),
        target.authority().map(|a| a.as_str()).unwrap_or("localhost"),
        path_and_query,
    );
    debug!(method = %method, uri = %uri, "Forwarding upstream");

    let mut builder = Request::builder().method(method).uri(uri.parse::<Uri>()?);
    for (name, value) in headers.iter() {
        if !is_hop_by_hop(name) && name != HOST {
            builder = builder.header(name, value);
        }
    }

    Ok(builder.body(Full::new(body))?)
}

/// Read body into bytes, respecting size limit.
async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    if let Some(upper) = body.size_hint().upper() {
        if upper > max_size as u64 {
            return Err(TenancyError::BodyTooLarge {
                size: upper as usize,
                limit: max_size,
            });
        }
    }

    let collected = body
        .collect()
        .await
        .map_err(|e| TenancyError::Body(e.to_string()))?;
    let bytes = collected.to_bytes();

    if bytes.len() > max_size {
        return Err(TenancyError::BodyTooLarge {
            size: bytes.len(),
            limit: max_size,
        });
    }

    Ok(bytes)
}

/// Check if a header is hop-by-hop (should not be forwarded).
#[inline]
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Build an error response.
fn error_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
