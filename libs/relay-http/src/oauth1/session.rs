use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

use super::signature::sign_request;
use super::{OAuth1Config, OAuth1Error, OAuth1State, OAuth1Token};
use crate::builder::HttpClientBuilder;
use crate::config::ClientConfig;
use crate::error::{HttpError, InvalidUriKind};
use crate::request::Request;

/// Where a session is in the authorization flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthorized,
    /// A temporary token was obtained and the user is being sent to the
    /// authorization endpoint
    ObtainingToken,
    /// An access token is set; requests are signed with it
    Authorized,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unauthorized => "unauthorized",
            Self::ObtainingToken => "obtaining a token",
            Self::Authorized => "authorized",
        })
    }
}

#[derive(Default)]
struct Tokens {
    temporary: Option<OAuth1Token>,
    access: Option<OAuth1Token>,
}

struct Inner {
    config: OAuth1Config,
    client_config: ClientConfig,
    tokens: RwLock<Tokens>,
}

/// OAuth1 consumer configuration plus the current token.
///
/// Cheap to clone; clones share token state, so a session attached to a
/// client starts signing as soon as any clone becomes authorized.
///
/// Once an access token is held the session stays [`SessionState::Authorized`]
/// even while a new temporary token is being exchanged.
#[derive(Clone)]
pub struct OAuth1Session {
    inner: Arc<Inner>,
}

impl OAuth1Session {
    #[must_use]
    pub fn new(config: OAuth1Config) -> Self {
        Self::with_client_config(config, ClientConfig::default())
    }

    /// Session whose token endpoint requests use `client_config` (proxy,
    /// timeout, certificate validation). Authentication fields of
    /// `client_config` are ignored.
    #[must_use]
    pub fn with_client_config(config: OAuth1Config, client_config: ClientConfig) -> Self {
        let client_config = ClientConfig {
            credentials: None,
            oauth1: None,
            oauth2: None,
            ..client_config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                client_config,
                tokens: RwLock::new(Tokens::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OAuth1Config {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        let tokens = self.inner.tokens.read();
        if tokens.access.is_some() {
            SessionState::Authorized
        } else if tokens.temporary.is_some() {
            SessionState::ObtainingToken
        } else {
            SessionState::Unauthorized
        }
    }

    /// Access token, `None` until the session is authorized
    #[must_use]
    pub fn token(&self) -> Option<OAuth1Token> {
        self.inner.tokens.read().access.clone()
    }

    /// Set the access token directly, e.g. one persisted from an earlier flow.
    pub fn set_token(&self, token: OAuth1Token) {
        let mut tokens = self.inner.tokens.write();
        tokens.access = Some(token);
        tokens.temporary = None;
    }

    /// Consumer credentials and a complete access token are present
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.config.has_consumer()
            && self
                .inner
                .tokens
                .read()
                .access
                .as_ref()
                .is_some_and(OAuth1Token::is_valid)
    }

    /// Access token to sign with, when the session is enabled
    pub(crate) fn signing_token(&self) -> Option<OAuth1Token> {
        if !self.inner.config.has_consumer() {
            return None;
        }
        self.inner
            .tokens
            .read()
            .access
            .clone()
            .filter(OAuth1Token::is_valid)
    }

    fn temporary_token(&self, operation: &'static str) -> Result<OAuth1Token, OAuth1Error> {
        let temporary = self.inner.tokens.read().temporary.clone();
        temporary.ok_or_else(|| OAuth1Error::InvalidState {
            state: self.state(),
            operation,
        })
    }

    /// Obtain a temporary token and return the URI the resource owner must
    /// visit to authorize it.
    ///
    /// # Errors
    /// Fails on transport errors, a non-2xx answer, a response without
    /// `oauth_token`/`oauth_token_secret`, or when the callback is not
    /// confirmed.
    pub async fn build_authorization_uri(&self) -> Result<Url, HttpError> {
        let config = &self.inner.config;
        config.require_consumer()?;
        let mut authorize = parse_endpoint(&config.auth_endpoint)?;

        let state = OAuth1State::generate().with_extra("oauth_callback", config.callback_uri.clone());
        let mut params = self.request_token(&config.temp_endpoint, None, &state).await?;

        if params.get("oauth_callback_confirmed").map(String::as_str) != Some("true") {
            return Err(OAuth1Error::CallbackNotConfirmed.into());
        }
        let temporary = OAuth1Token::new(
            required(&mut params, "oauth_token")?,
            required(&mut params, "oauth_token_secret")?,
        );

        authorize
            .query_pairs_mut()
            .append_pair("oauth_token", &temporary.token);
        self.inner.tokens.write().temporary = Some(temporary);

        tracing::debug!(endpoint = %config.temp_endpoint, "obtained OAuth1 temporary token");
        Ok(authorize)
    }

    /// Complete the flow from the URI the provider redirected the user to.
    ///
    /// # Errors
    /// Fails when no temporary token is pending, when `oauth_token` or
    /// `oauth_verifier` is missing, when the token does not match, or as
    /// [`token_from_verifier`](Self::token_from_verifier) does.
    pub async fn token_from_redirected_uri(&self, redirected_uri: &str) -> Result<(), HttpError> {
        let url = Url::parse(redirected_uri).map_err(|e| HttpError::InvalidUri {
            url: redirected_uri.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;
        let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let token = required(&mut params, "oauth_token")?;
        let temporary = self.temporary_token("token_from_redirected_uri")?;
        if token != temporary.token {
            return Err(OAuth1Error::TokenMismatch.into());
        }
        let verifier = required(&mut params, "oauth_verifier")?;
        self.token_from_verifier(&verifier).await
    }

    /// Exchange the temporary token and `verifier` for an access token.
    ///
    /// # Errors
    /// Fails when no temporary token is pending, on transport errors, on a
    /// non-2xx answer, or when the response lacks the token parameters.
    pub async fn token_from_verifier(&self, verifier: &str) -> Result<(), HttpError> {
        let temporary = self.temporary_token("token_from_verifier")?;
        let config = &self.inner.config;

        let state = OAuth1State::generate().with_extra("oauth_verifier", verifier);
        let mut params = self
            .request_token(&config.token_endpoint, Some(&temporary), &state)
            .await?;
        let access = OAuth1Token::new(
            required(&mut params, "oauth_token")?,
            required(&mut params, "oauth_token_secret")?,
        );

        self.set_token(access);
        tracing::info!(endpoint = %config.token_endpoint, "OAuth1 session authorized");
        Ok(())
    }

    async fn request_token(
        &self,
        endpoint: &str,
        token: Option<&OAuth1Token>,
        state: &OAuth1State,
    ) -> Result<HashMap<String, String>, HttpError> {
        let url = parse_endpoint(endpoint)?;
        let mut request = Request::post(url.as_str());
        sign_request(&mut request, &self.inner.config, token, state)?;

        let client = HttpClientBuilder::with_config(url.as_str(), self.inner.client_config.clone())
            .build()?;
        let response = client.request(request).await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(OAuth1Error::EndpointStatus {
                status,
                body_preview: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }
        Ok(url::form_urlencoded::parse(&body).into_owned().collect())
    }
}

impl fmt::Debug for OAuth1Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth1Session")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, HttpError> {
    if endpoint.is_empty() {
        return Err(OAuth1Error::Config("endpoint is not configured".to_owned()).into());
    }
    Url::parse(endpoint).map_err(|e| HttpError::InvalidUri {
        url: endpoint.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })
}

fn required(params: &mut HashMap<String, String>, key: &'static str) -> Result<String, OAuth1Error> {
    params
        .remove(key)
        .ok_or(OAuth1Error::MissingParameter(key))
}
