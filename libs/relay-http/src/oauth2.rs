//! OAuth2 bearer token injection.

use async_trait::async_trait;
use http::HeaderValue;
use http::header::AUTHORIZATION;

use crate::error::HttpError;
use crate::pipeline::{Next, Stage};
use crate::request::Request;
use crate::response::Response;
use crate::secret::SecretString;

/// Bearer token configuration
#[derive(Clone, Debug)]
pub struct OAuth2Config {
    pub access_token: SecretString,
    /// Send the token as `Authorization: Bearer ...` (default). When false the
    /// token is appended to the query string under `access_token_key`.
    pub bearer_auth: bool,
    pub access_token_key: String,
}

impl OAuth2Config {
    #[must_use]
    pub fn new(access_token: impl Into<SecretString>) -> Self {
        Self {
            access_token: access_token.into(),
            bearer_auth: true,
            access_token_key: "access_token".to_owned(),
        }
    }

    /// Deliver the token as a query parameter named `key`
    #[must_use]
    pub fn with_query_parameter(mut self, key: impl Into<String>) -> Self {
        self.bearer_auth = false;
        self.access_token_key = key.into();
        self
    }
}

/// Adds the OAuth2 access token to every request when one is configured
#[derive(Clone, Debug)]
pub struct OAuth2Stage {
    config: OAuth2Config,
}

impl OAuth2Stage {
    #[must_use]
    pub fn new(config: OAuth2Config) -> Self {
        Self { config }
    }

    fn apply(&self, request: &mut Request) -> Result<(), HttpError> {
        let token = self.config.access_token.expose();
        if self.config.bearer_auth {
            let raw = zeroize::Zeroizing::new(format!("Bearer {token}"));
            let mut value = HeaderValue::from_str(&raw)?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        } else {
            let mut url = request.url()?;
            url.query_pairs_mut()
                .append_pair(&self.config.access_token_key, token);
            request.set_target(url.as_str());
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for OAuth2Stage {
    async fn propagate(&self, mut request: Request, next: Next<'_>) -> Result<Response, HttpError> {
        if !self.config.access_token.is_empty() {
            self.apply(&mut request)?;
        }
        next.propagate(request).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::pipeline::testing::{EchoTransport, run};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_bearer_header() {
        let transport = EchoTransport::default();
        let stage: Arc<dyn Stage> = Arc::new(OAuth2Stage::new(OAuth2Config::new("tok-123")));

        run(&[stage], &transport, Request::get("http://localhost/api"))
            .await
            .unwrap();

        let seen = transport.last_request().unwrap();
        let value = &seen.headers[AUTHORIZATION];
        assert_eq!(value, "Bearer tok-123");
        assert!(value.is_sensitive());
    }

    #[tokio::test]
    async fn test_query_parameter_delivery() {
        let transport = EchoTransport::default();
        let config = OAuth2Config::new("tok 123").with_query_parameter("access_token");
        let stage: Arc<dyn Stage> = Arc::new(OAuth2Stage::new(config));

        run(&[stage], &transport, Request::get("http://localhost/api?a=1"))
            .await
            .unwrap();

        let seen = transport.last_request().unwrap();
        assert_eq!(seen.target, "http://localhost/api?a=1&access_token=tok+123");
        assert!(seen.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_empty_token_leaves_request_untouched() {
        let transport = EchoTransport::default();
        let stage: Arc<dyn Stage> = Arc::new(OAuth2Stage::new(OAuth2Config::new("")));

        run(&[stage], &transport, Request::get("http://localhost/api"))
            .await
            .unwrap();

        assert!(transport.last_request().unwrap().headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = OAuth2Config::new("tok-123");
        assert!(!format!("{config:?}").contains("tok-123"));
    }
}
