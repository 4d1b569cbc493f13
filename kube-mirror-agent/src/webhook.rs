use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{BasicAuthConfig, HttpMethod, RequestConfig, RetryConfig};
use crate::kubernetes::resource::Snapshot;
use crate::{Error, Result};

/// Body sent to the configured webhook for every processed event.
#[derive(Debug, Serialize)]
pub struct Notification {
    pub resource: String,
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            resource: snapshot.id.name.clone(),
            namespace: snapshot.id.namespace.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Stateless JSON webhook client with bounded retries.
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    method: HttpMethod,
    retry: RetryConfig,
    auth: Option<BasicAuthConfig>,
}

impl WebhookClient {
    pub fn new(cfg: &RequestConfig) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().danger_accept_invalid_certs(cfg.skip_tls_verify);
        // a timeout of 0 leaves attempts unbounded
        if cfg.timeout > 0.0 {
            builder = builder.timeout(Duration::from_secs_f64(cfg.timeout));
        }
        let client = builder.build()?;
        let auth = cfg
            .auth
            .as_ref()
            .map(|auth| auth.basic.clone())
            .filter(|basic| !basic.username.is_empty());
        Ok(Self {
            client,
            url: cfg.url.clone(),
            method: cfg.method,
            retry: cfg.retry.clone(),
            auth,
        })
    }

    /// Sends the payload, allowing `retry.total` additional attempts after
    /// the first. After the k-th failed attempt the next one waits
    /// `k * backoffFactor` seconds. An attempt fails on transport errors,
    /// unreadable responses and any status >= 400.
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<()> {
        let body = match self.method {
            HttpMethod::Post => Some(serde_json::to_vec(payload)?),
            HttpMethod::Get => None,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(body.as_deref()).await {
                Ok(status) => {
                    info!(url = %self.url, status = status.as_u16(), attempt, "webhook delivered");
                    return Ok(());
                }
                Err(e) if attempt > self.retry.total => {
                    return Err(Error::WebhookExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        url = %self.url,
                        attempt,
                        attempts = self.retry.total + 1,
                        error = %e,
                        "webhook attempt failed"
                    );
                    let wait = f64::from(attempt) * self.retry.backoff_factor;
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
            }
        }
    }

    async fn attempt(&self, body: Option<&[u8]>) -> Result<StatusCode> {
        let mut request = match self.method {
            HttpMethod::Get => self.client.get(&self.url),
            HttpMethod::Post => self.client.post(&self.url),
        };
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.as_u16() >= 400 {
            return Err(Error::WebhookStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(status)
    }
}
