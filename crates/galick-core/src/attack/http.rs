use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, Url};

use crate::attack::{build_client, classify_transport_error, drain_body, AttackContext, Attacker};
use crate::error::GalickError;
use crate::metrics::AttackResult;

/// Static-target attacker: issues the same request on every invocation.
///
/// The method and URL are validated at construction so a typo fails the run
/// before any load is generated. One pooled [`reqwest::Client`] lives for
/// the attacker's lifetime and is shared by every worker.
pub struct HttpAttacker {
    client: reqwest::Client,
    method: Method,
    url: Url,
}

impl HttpAttacker {
    pub fn new(
        method: &str,
        url: &str,
        timeout: Duration,
        insecure: bool,
    ) -> Result<Self, GalickError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| GalickError::Validation(format!("invalid HTTP method: {e}")))?;
        let url = Url::parse(url)
            .map_err(|e| GalickError::Validation(format!("invalid target URL: {e}")))?;
        let client = build_client(timeout, insecure)?;

        Ok(Self {
            client,
            method,
            url,
        })
    }

    async fn dispatch(&self, start: Instant, timeout: Duration) -> AttackResult {
        let response = match self
            .client
            .request(self.method.clone(), self.url.clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return AttackResult::failure(start, classify_transport_error(&err)),
        };

        drain_body(response, start, 0).await
    }
}

#[async_trait]
impl Attacker for HttpAttacker {
    async fn attack(&self, ctx: &AttackContext) -> AttackResult {
        let start = Instant::now();
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => AttackResult::failure(start, "request cancelled"),
            result = self.dispatch(start, ctx.timeout) => result,
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
