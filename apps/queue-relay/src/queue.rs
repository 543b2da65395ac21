use std::time::Duration;

use anyhow::{Context, Result};
use http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use relay_http::{HttpClient, ProxyConfig, Request, SecretString};
use serde_json::{Value, json};

use crate::config::RelayConfig;

/// Content type the queue expects for posted entries
pub const ATOM_ENTRY_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

/// Message posted by `send` when none is given
#[must_use]
pub fn sample_message() -> Value {
    json!({
        "key1": false,
        "key2": 44,
        "key3": 43.6,
        "key4": "str",
    })
}

/// Head of the queue as returned by the service
#[derive(Debug)]
pub struct Received {
    pub status: StatusCode,
    pub body: String,
}

/// Client for one message queue
pub struct ServiceQueue {
    client: HttpClient,
    authorization: Option<SecretString>,
}

impl ServiceQueue {
    /// # Errors
    /// Returns an error if the endpoint is unset or invalid, or the proxy URI
    /// is invalid.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            anyhow::bail!("queue endpoint is not configured");
        }

        let mut builder = HttpClient::builder(config.endpoint.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .validate_certificates(config.validate_certificates);
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(ProxyConfig::new(proxy)?);
        }
        let client = builder
            .build()
            .with_context(|| format!("cannot build client for {}", config.endpoint))?;

        Ok(Self {
            client,
            authorization: config.authorization.as_deref().map(SecretString::from),
        })
    }

    fn authorize(&self, mut request: Request) -> Result<Request> {
        if let Some(authorization) = &self.authorization {
            let mut value = HeaderValue::from_str(authorization.expose())
                .context("authorization is not a valid header value")?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }

    /// Post `message` as a new queue entry and return the response status.
    ///
    /// # Errors
    /// Returns an error if the request cannot be built or the exchange fails.
    pub async fn send_json(&self, message: &Value) -> Result<StatusCode> {
        let request = Request::post("messages")
            .with_content_type(ATOM_ENTRY_CONTENT_TYPE)?
            .json(message)?;
        let response = self.client.request(self.authorize(request)?).await?;

        tracing::info!(status = %response.status(), "message sent");
        Ok(response.status())
    }

    /// Read the message at the head of the queue.
    ///
    /// The body is returned whatever the status; an empty queue answers with
    /// a non-success status and no body.
    ///
    /// # Errors
    /// Returns an error if the exchange fails or the body cannot be read.
    pub async fn receive(&self) -> Result<Received> {
        let request = self.authorize(Request::post("messages/head"))?;
        let response = self.client.request(request).await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        tracing::info!(%status, bytes = bytes.len(), "message received");
        Ok(Received {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}
