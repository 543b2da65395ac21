#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Asynchronous HTTP client with a stage pipeline
//!
//! An [`HttpClient`] binds a base URI and a [`ClientConfig`] to an ordered
//! list of [`Stage`]s that ends in a network [`Transport`]:
//! - Requests run on a process-wide [`worker_pool`]
//! - Responses are returned for every status; only transport failures,
//!   cancellation and stage failures are errors
//! - Optional submission-order delivery (`guarantee_order`)
//! - Built-in stages for `User-Agent`, OAuth1 signing and OAuth2 bearer
//!   tokens; Basic challenges answered by a transport wrapper
//! - Streamed request bodies, replayable when `buffer_request` is set
//! - TLS via rustls, HTTP/1.1 and HTTP/2, optional proxy tunnel
//!
//! # Example
//!
//! ```ignore
//! use relay_http::{HttpClient, Request};
//! use std::time::Duration;
//!
//! let client = HttpClient::builder("https://queue.example.com/orders")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let response = client
//!     .request(Request::post("messages").json(&serde_json::json!({ "id": 1 }))?)
//!     .await?
//!     .error_for_status()?;
//! ```

mod body;
mod builder;
mod client;
mod config;
mod credentials;
mod error;
pub mod oauth1;
mod oauth2;
mod order;
pub mod pipeline;
mod request;
mod response;
mod secret;
pub mod stages;
pub mod tls;
mod transport;
pub mod worker_pool;

pub use body::{BoxError, ByteStream, RequestBody};
pub use builder::HttpClientBuilder;
pub use client::{HttpClient, ResponseFuture};
pub use config::{
    ClientConfig, Credentials, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT,
    ProxyConfig, TlsRootConfig, validate_base_uri,
};
pub use credentials::CredentialsTransport;
pub use error::{HttpError, InvalidUriKind};
pub use oauth1::{OAuth1Config, OAuth1Error, OAuth1Session, OAuth1Token, SessionState};
pub use oauth2::OAuth2Config;
pub use pipeline::{Next, Pipeline, Stage, Transport};
pub use request::{Request, resolve_target};
pub use response::{ERROR_BODY_PREVIEW_LIMIT, LimitedBody, Response, ResponseBody};
pub use secret::SecretString;
pub use transport::HyperTransport;
