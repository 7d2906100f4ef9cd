//! HTTP action executor.
//!
//! Posts rendered actions as JSON to the host's service API:
//! `POST {base_url}/api/services/{domain}/{service}`.

use std::time::Duration;

use serde_json::{Map, Value};
use template_update_core::{Result, UpdateError};

use crate::traits::{ActionCall, ActionExecutor};

/// Invokes actions through the host's HTTP service API.
///
/// Environment variable references (`${VAR_NAME}`) in the base URL and
/// token are resolved at construction time.
#[derive(Debug)]
pub struct HttpActionExecutor {
    /// Base URL (env vars already resolved, no trailing slash).
    base_url: String,
    /// Bearer token sent with every request.
    token: Option<String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl HttpActionExecutor {
    /// Create a new executor.
    ///
    /// Missing env vars produce an [`UpdateError::Configuration`] error.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = resolve_env_vars(base_url)?.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(UpdateError::Configuration("host base URL is empty".into()));
        }
        let token = token.map(resolve_env_vars).transpose()?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    fn service_url(&self, call: &ActionCall) -> String {
        format!(
            "{}/api/services/{}/{}",
            self.base_url, call.domain, call.service
        )
    }
}

/// Request body: the action data with the target keys merged in.
fn request_body(call: &ActionCall) -> Value {
    let mut body: Map<String, Value> = call.data.clone();
    if let Some(target) = &call.target {
        for (key, value) in target {
            body.insert(key.clone(), value.clone());
        }
    }
    Value::Object(body)
}

#[async_trait::async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn invoke(&self, call: &ActionCall) -> Result<()> {
        let url = self.service_url(call);
        let mut request = self.client.post(&url).json(&request_body(call));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpdateError::Dispatch(format!("request to {url} failed: {e}")))?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %url,
                %status,
                body = %body_text,
                "host returned non-2xx status"
            );
            return Err(UpdateError::Dispatch(format!(
                "host returned {status}: {body_text}"
            )));
        }

        tracing::debug!(
            url = %url,
            entity = %call.entity,
            status = %status,
            "action accepted by host"
        );

        Ok(())
    }

    fn executor_name(&self) -> &str {
        "http"
    }
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(UpdateError::Configuration(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name).map_err(|_| {
                UpdateError::Configuration(format!("env var not found: {var_name}"))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
