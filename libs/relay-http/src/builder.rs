use std::sync::Arc;
use std::time::Duration;

use crate::client::HttpClient;
use crate::config::{ClientConfig, Credentials, ProxyConfig, TlsRootConfig, validate_base_uri};
use crate::credentials::CredentialsTransport;
use crate::error::HttpError;
use crate::oauth1::OAuth1Session;
use crate::oauth2::OAuth2Config;
use crate::pipeline::{Stage, Transport};
use crate::stages::{OAuth1Stage, OAuth2Stage, UserAgentStage};
use crate::transport::HyperTransport;

/// Builder for an [`HttpClient`]
///
/// Built-in stages are installed from the configuration ahead of the stages
/// added with [`stage`](Self::stage), in this order: user agent, OAuth1,
/// OAuth2. Configured [`credentials`](Self::credentials) wrap the transport
/// so a Basic challenge is answered below every stage.
pub struct HttpClientBuilder {
    base_uri: String,
    config: ClientConfig,
    stages: Vec<Arc<dyn Stage>>,
    transport: Option<Arc<dyn Transport>>,
}

impl HttpClientBuilder {
    /// Builder with default configuration
    #[must_use]
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self::with_config(base_uri, ClientConfig::default())
    }

    /// Builder with a specific configuration
    #[must_use]
    pub fn with_config(base_uri: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            base_uri: base_uri.into(),
            config,
            stages: Vec::new(),
            transport: None,
        }
    }

    /// Set the time allowed until response headers arrive
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum request body frame size (`0` selects the default)
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Deliver responses in submission order
    #[must_use]
    pub fn guarantee_order(mut self, enabled: bool) -> Self {
        self.config.guarantee_order = enabled;
        self
    }

    /// Verify server certificates (on by default)
    ///
    /// **WARNING**: disabling this exposes traffic to interception. Use only
    /// against test servers with self-signed certificates.
    #[must_use]
    pub fn validate_certificates(mut self, enabled: bool) -> Self {
        self.config.validate_certificates = enabled;
        self
    }

    /// Keep streamed request bodies in memory so they can be replayed
    #[must_use]
    pub fn buffer_request(mut self, enabled: bool) -> Self {
        self.config.buffer_request = enabled;
        self
    }

    /// Decompress gzip, brotli and deflate responses
    #[must_use]
    pub fn decompress_responses(mut self, enabled: bool) -> Self {
        self.config.decompress_responses = enabled;
        self
    }

    /// Answer `401` Basic challenges with `credentials`
    ///
    /// Cannot be combined with [`oauth1`](Self::oauth1) or
    /// [`oauth2`](Self::oauth2); [`build`](Self::build) rejects the mix.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Sign requests with `session` once it is authorized
    #[must_use]
    pub fn oauth1(mut self, session: OAuth1Session) -> Self {
        self.config.oauth1 = Some(session);
        self
    }

    #[must_use]
    pub fn oauth2(mut self, config: OAuth2Config) -> Self {
        self.config.oauth2 = Some(config);
        self
    }

    /// Set the default `User-Agent`; an empty string disables the header
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the maximum response body size read by the body helpers
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set the idle connection timeout (`None` keeps idle connections)
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per host
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Append a user stage after the built-in ones
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replace the network transport, e.g. with an in-process fake
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri`/`InvalidScheme` for an unusable base
    /// URI (`ws`/`wss` included), `HttpError::InvalidHeaderValue` for an
    /// invalid user agent, `HttpError::Config` when credentials are set
    /// together with OAuth1 or OAuth2 and `HttpError::Tls` if TLS
    /// initialization fails.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let base = validate_base_uri(&self.base_uri)?;
        if matches!(base.scheme(), "ws" | "wss") {
            return Err(HttpError::InvalidScheme {
                scheme: base.scheme().to_owned(),
                reason: "WebSocket transport is not supported by the HTTP client".to_owned(),
            });
        }

        if self.config.credentials.is_some()
            && (self.config.oauth1.is_some() || self.config.oauth2.is_some())
        {
            return Err(HttpError::Config(
                "credentials cannot be combined with OAuth1 or OAuth2 authorization".to_owned(),
            ));
        }

        let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(self.stages.len() + 3);
        if !self.config.user_agent.is_empty() {
            stages.push(Arc::new(UserAgentStage::try_new(&self.config.user_agent)?));
        }
        if let Some(session) = &self.config.oauth1 {
            stages.push(Arc::new(OAuth1Stage::new(session.clone())));
        }
        if let Some(oauth2) = &self.config.oauth2 {
            stages.push(Arc::new(OAuth2Stage::new(oauth2.clone())));
        }
        stages.extend(self.stages);

        let mut transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&self.config)?),
        };
        if let Some(credentials) = &self.config.credentials {
            transport = Arc::new(CredentialsTransport::new(transport, credentials.clone()));
        }

        tracing::debug!(
            base = %base,
            stages = stages.len(),
            guarantee_order = self.config.guarantee_order,
            "http client built"
        );
        Ok(HttpClient::from_parts(base, self.config, stages, transport))
    }
}

impl std::fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("base_uri", &self.base_uri)
            .field("config", &self.config)
            .field("stages", &self.stages.len())
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}
