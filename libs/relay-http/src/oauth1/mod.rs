//! OAuth 1.0a request signing and the three-legged token flow.
//!
//! [`OAuth1Session`] holds the consumer configuration and the current token.
//! Once it is authorized, [`OAuth1Stage`] signs every request passing through
//! the client pipeline.

mod config;
mod session;
pub mod signature;
mod stage;

use thiserror::Error;

pub use config::{OAuth1Config, OAuth1State, OAuth1Token, ParameterDelivery, SignatureMethod};
pub use session::{OAuth1Session, SessionState};
pub use stage::OAuth1Stage;

/// OAuth1 failures
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OAuth1Error {
    /// Consumer configuration is incomplete or invalid
    #[error("OAuth1 configuration error: {0}")]
    Config(String),

    /// A token endpoint response lacks a required parameter
    #[error("OAuth1 response is missing parameter '{0}'")]
    MissingParameter(&'static str),

    /// The temporary-credential endpoint did not confirm the callback
    #[error("OAuth1 callback was not confirmed by the server")]
    CallbackNotConfirmed,

    /// The redirect carried a token other than the temporary one
    #[error("OAuth1 redirect token does not match the temporary token")]
    TokenMismatch,

    /// The operation is not valid in the session's current state
    #[error("OAuth1 session is {state}; {operation} requires a temporary token")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    /// A token endpoint answered with a non-2xx status
    #[error("OAuth1 endpoint returned HTTP {status}: {body_preview}")]
    EndpointStatus {
        status: http::StatusCode,
        body_preview: String,
    },

    /// Unknown signature method name
    #[error("unsupported OAuth1 signature method '{0}'")]
    UnsupportedMethod(String),
}
