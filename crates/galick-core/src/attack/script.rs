use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;

use crate::attack::{build_client, classify_transport_error, drain_body, AttackContext, Attacker};
use crate::error::GalickError;
use crate::metrics::AttackResult;

/// Scripted attacker: a user-provided Rhai script decides what to request.
///
/// The script is compiled once at startup and must define a zero-argument
/// `request()` function returning a map `#{method?, url, body?, headers?}`.
/// Every invocation evaluates `request()` in a fresh scope, so script
/// execution state never leaks between calls; only the compiled
/// [`rhai::AST`] is shared. Script defects are reported as error results
/// and never tear down the engine.
pub struct ScriptAttacker {
    engine: rhai::Engine,
    ast: rhai::AST,
    client: reqwest::Client,
}

impl std::fmt::Debug for ScriptAttacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptAttacker").finish_non_exhaustive()
    }
}

/// Coerced output of one `request()` evaluation.
struct ScriptedRequest {
    method: String,
    url: String,
    body: Option<String>,
    headers: Vec<(String, String)>,
}

impl ScriptAttacker {
    pub fn new(path: &Path, timeout: Duration, insecure: bool) -> Result<Self, GalickError> {
        let source = std::fs::read_to_string(path)?;

        let engine = rhai::Engine::new();
        let ast = engine
            .compile(&source)
            .map_err(|e| GalickError::Script(format!("script compilation failed: {e}")))?;

        let defines_request = ast
            .iter_functions()
            .any(|f| f.name == "request" && f.params.is_empty());
        if !defines_request {
            return Err(GalickError::Script(
                "script must define a 'request()' function".to_string(),
            ));
        }

        Ok(Self {
            engine,
            ast,
            client: build_client(timeout, insecure)?,
        })
    }

    /// Run `request()` in a fresh scope and coerce its return value.
    fn evaluate(&self) -> Result<ScriptedRequest, String> {
        let mut scope = rhai::Scope::new();
        let value = self
            .engine
            .call_fn::<rhai::Dynamic>(&mut scope, &self.ast, "request", ())
            .map_err(|e| format!("script error: {e}"))?;

        let map = value
            .try_cast::<rhai::Map>()
            .ok_or_else(|| "script must return a map".to_string())?;

        let url = map
            .get("url")
            .and_then(|v| v.clone().into_string().ok())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "script returned no url".to_string())?;

        let method = map
            .get("method")
            .and_then(|v| v.clone().into_string().ok())
            .unwrap_or_else(|| "GET".to_string());

        let body = map.get("body").and_then(|v| v.clone().into_string().ok());

        let mut headers = Vec::new();
        if let Some(header_map) = map
            .get("headers")
            .and_then(|v| v.clone().try_cast::<rhai::Map>())
        {
            for (name, value) in header_map {
                if let Ok(value) = value.into_string() {
                    headers.push((name.to_string(), value));
                }
            }
        }

        Ok(ScriptedRequest {
            method,
            url,
            body,
            headers,
        })
    }

    async fn dispatch(
        &self,
        start: Instant,
        scripted: ScriptedRequest,
        timeout: Duration,
    ) -> AttackResult {
        let method = match Method::from_bytes(scripted.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                return AttackResult::failure(start, format!("script returned invalid method: {e}"))
            }
        };

        let mut builder = self.client.request(method, scripted.url).timeout(timeout);
        for (name, value) in &scripted.headers {
            builder = builder.header(name, value);
        }

        let bytes_out = scripted.body.as_ref().map_or(0, |b| b.len() as u64);
        if let Some(body) = scripted.body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => return AttackResult::failure(start, classify_transport_error(&err)),
        };

        drain_body(response, start, bytes_out).await
    }
}

#[async_trait]
impl Attacker for ScriptAttacker {
    async fn attack(&self, ctx: &AttackContext) -> AttackResult {
        let start = Instant::now();

        // Script evaluation is synchronous and cheap; only the network part
        // races against cancellation.
        let scripted = match self.evaluate() {
            Ok(scripted) => scripted,
            Err(message) => return AttackResult::failure(start, message),
        };

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => AttackResult::failure(start, "request cancelled"),
            result = self.dispatch(start, scripted, ctx.timeout) => result,
        }
    }

    fn name(&self) -> &'static str {
        "script"
    }
}
