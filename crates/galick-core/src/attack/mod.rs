use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::GalickError;
use crate::metrics::AttackResult;

pub mod http;
pub mod script;

pub use http::HttpAttacker;
pub use script::ScriptAttacker;

// ---------------------------------------------------------------------------
// Attacker — the "perform one request" capability
// ---------------------------------------------------------------------------

/// Context handed to every [`Attacker::attack`] call: the run-wide
/// cancellation signal plus the per-request timeout.
#[derive(Debug, Clone)]
pub struct AttackContext {
    /// Cancelled when the run ends (duration expiry or user cancel).
    pub cancel: CancellationToken,
    /// Deadline applied to each individual request.
    pub timeout: Duration,
}

/// A protocol implementation that performs exactly one request per call.
///
/// Implementations never let an error escape: transport failures, timeouts,
/// TLS and DNS errors, body-read failures, and script defects are all
/// reported as an [`AttackResult`] with `error` set. Attackers are shared
/// across every worker, so implementations must be reentrant.
#[async_trait]
pub trait Attacker: Send + Sync {
    /// Perform a single request and return its outcome.
    async fn attack(&self, ctx: &AttackContext) -> AttackResult;

    /// Short protocol tag for reporting ("http", "script").
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Shared HTTP client plumbing
// ---------------------------------------------------------------------------

// Generous idle-connection reuse so socket setup does not dominate latency.
const POOL_MAX_IDLE_PER_HOST: usize = 1000;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Build the pooled client shared by all workers of one attacker.
pub(crate) fn build_client(
    timeout: Duration,
    insecure: bool,
) -> Result<reqwest::Client, GalickError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .user_agent(concat!("galick/", env!("CARGO_PKG_VERSION")))
        .danger_accept_invalid_certs(insecure)
        .build()?)
}

/// Short classification of a transport-level failure.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("connect: {err}")
    } else if err.is_request() {
        format!("request: {err}")
    } else {
        err.to_string()
    }
}

/// Drain the response body chunk by chunk, counting bytes without ever
/// buffering the whole body. A read failure mid-body keeps the status code
/// and the bytes received so far.
pub(crate) async fn drain_body(
    mut response: reqwest::Response,
    start: Instant,
    bytes_out: u64,
) -> AttackResult {
    let code = response.status().as_u16();
    let mut bytes_in = 0u64;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => bytes_in += chunk.len() as u64,
            Ok(None) => break,
            Err(err) => {
                return AttackResult {
                    timestamp: start,
                    latency: start.elapsed(),
                    code,
                    bytes_in,
                    bytes_out,
                    error: Some(format!("body read failed: {err}")),
                }
            }
        }
    }

    AttackResult {
        timestamp: start,
        latency: start.elapsed(),
        code,
        bytes_in,
        bytes_out,
        error: None,
    }
}
