//! HTTP management API client
//!
//! Transport failures (connect errors, timeouts, 429, 5xx) are retried with
//! bounded exponential backoff. Any other 4xx is returned immediately.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    Action, ActionSpec, BindingUpdate, Client, ClientSpec, ManagementApi, ManagementError,
    TriggerBinding,
};

const ACTIONS_PATH: &str = "/api/v2/actions/actions";
const TRIGGERS_PATH: &str = "/api/v2/actions/triggers";
const CLIENTS_PATH: &str = "/api/v2/clients";
const CLIENT_FIELDS: &str = "client_id,name,callbacks,grant_types,jwt_configuration";
const PAGE_SIZE: usize = 50;
const MAX_PAGES: usize = 100;

/// Backoff schedule for retryable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// No retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Management API over HTTPS with a bearer token
pub struct HttpManagementApi {
    base_url: String,
    token: String,
    retry: RetryPolicy,
    client: HttpClient,
}

impl std::fmt::Debug for HttpManagementApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpManagementApi")
            .field("base_url", &self.base_url)
            .field("token", &"[redacted]")
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Deserialize)]
struct ActionsPage {
    #[serde(default)]
    actions: Vec<Action>,
}

#[derive(Serialize, Deserialize)]
struct Bindings<T> {
    bindings: Vec<T>,
}

impl HttpManagementApi {
    /// Client for `https://<domain>`
    pub fn new(domain: &str, token: impl Into<String>, retry: RetryPolicy) -> Result<Self, ManagementError> {
        let base_url = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", domain.trim_end_matches('/'))
        };
        let client = HttpClient::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ManagementError::Configuration(e.to_string()))?;
        Self::with_client(base_url, token, retry, client)
    }

    /// Use an existing HTTP client and base URL
    pub fn with_client(
        base_url: impl Into<String>,
        token: impl Into<String>,
        retry: RetryPolicy,
        client: HttpClient,
    ) -> Result<Self, ManagementError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ManagementError::Configuration("management API token is empty".into()));
        }
        Ok(Self {
            base_url: base_url.into(),
            token,
            retry,
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T, ManagementError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(method.clone(), &url, query, body).await {
                Ok(value) => {
                    return serde_json::from_value(value)
                        .map_err(|e| ManagementError::InvalidResponse(format!("{}: {}", path, e)))
                }
                Err((e, retry_after)) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = retry_after
                        .unwrap_or_else(|| self.retry.delay(attempt))
                        .min(self.retry.max_delay);
                    warn!(
                        method = %method,
                        path = %path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Management call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err((e, _)) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, (ManagementError, Option<Duration>)> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&self.token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| (ManagementError::Transport(e.to_string()), None))?;

        let status = response.status();
        debug!(method = %method, url = %url, status = status.as_u16(), "Management call");

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let text = response
                .text()
                .await
                .map_err(|e| (ManagementError::Transport(e.to_string()), None))?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| (ManagementError::InvalidResponse(e.to_string()), None));
        }

        let message = response.text().await.unwrap_or_default();
        let error = classify(status, message);
        Err((error, retry_after))
    }

    fn body<T: Serialize>(value: &T) -> Result<Value, ManagementError> {
        serde_json::to_value(value).map_err(|e| ManagementError::Configuration(e.to_string()))
    }
}

fn classify(status: StatusCode, message: String) -> ManagementError {
    let message = message.chars().take(512).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ManagementError::RateLimited,
        StatusCode::NOT_FOUND => ManagementError::NotFound(message),
        s if s.is_server_error() => ManagementError::Server {
            status: s.as_u16(),
            message,
        },
        s => ManagementError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn list_actions(&self, name: &str) -> Result<Vec<Action>, ManagementError> {
        let page: ActionsPage = self
            .call(
                Method::GET,
                ACTIONS_PATH,
                &[("actionName", name.to_string()), ("per_page", PAGE_SIZE.to_string())],
                None,
            )
            .await?;
        Ok(page.actions.into_iter().filter(|a| a.name == name).collect())
    }

    async fn get_action(&self, id: &str) -> Result<Action, ManagementError> {
        self.call(Method::GET, &format!("{}/{}", ACTIONS_PATH, id), &[], None)
            .await
    }

    async fn create_action(&self, spec: &ActionSpec) -> Result<Action, ManagementError> {
        let body = Self::body(spec)?;
        self.call(Method::POST, ACTIONS_PATH, &[], Some(&body)).await
    }

    async fn update_action(&self, id: &str, spec: &ActionSpec) -> Result<Action, ManagementError> {
        let body = Self::body(spec)?;
        self.call(Method::PATCH, &format!("{}/{}", ACTIONS_PATH, id), &[], Some(&body))
            .await
    }

    async fn deploy_action(&self, id: &str) -> Result<(), ManagementError> {
        let _: Value = self
            .call(Method::POST, &format!("{}/{}/deploy", ACTIONS_PATH, id), &[], None)
            .await?;
        Ok(())
    }

    async fn trigger_bindings(&self, trigger: &str) -> Result<Vec<TriggerBinding>, ManagementError> {
        let page: Bindings<TriggerBinding> = self
            .call(
                Method::GET,
                &format!("{}/{}/bindings", TRIGGERS_PATH, trigger),
                &[("per_page", PAGE_SIZE.to_string())],
                None,
            )
            .await?;
        Ok(page.bindings)
    }

    async fn set_trigger_bindings(
        &self,
        trigger: &str,
        bindings: &[BindingUpdate],
    ) -> Result<Vec<TriggerBinding>, ManagementError> {
        let body = Self::body(&Bindings {
            bindings: bindings.to_vec(),
        })?;
        let page: Bindings<TriggerBinding> = self
            .call(
                Method::PATCH,
                &format!("{}/{}/bindings", TRIGGERS_PATH, trigger),
                &[],
                Some(&body),
            )
            .await?;
        Ok(page.bindings)
    }

    async fn list_clients(&self) -> Result<Vec<Client>, ManagementError> {
        let mut clients = Vec::new();
        for page in 0..MAX_PAGES {
            let batch: Vec<Client> = self
                .call(
                    Method::GET,
                    CLIENTS_PATH,
                    &[
                        ("fields", CLIENT_FIELDS.to_string()),
                        ("include_fields", "true".to_string()),
                        ("page", page.to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                    ],
                    None,
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            clients.extend(batch);
            if done {
                break;
            }
        }
        Ok(clients)
    }

    async fn create_client(&self, spec: &ClientSpec) -> Result<Client, ManagementError> {
        let body = Self::body(spec)?;
        self.call(Method::POST, CLIENTS_PATH, &[], Some(&body)).await
    }

    async fn update_client(&self, id: &str, spec: &ClientSpec) -> Result<Client, ManagementError> {
        let body = Self::body(spec)?;
        self.call(Method::PATCH, &format!("{}/{}", CLIENTS_PATH, id), &[], Some(&body))
            .await
    }
}
