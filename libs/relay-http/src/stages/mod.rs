//! Built-in stages installed by [`HttpClientBuilder`](crate::HttpClientBuilder)
//! ahead of user stages, in this order: user agent, OAuth1, OAuth2.
//!
//! Basic challenges are answered below the stages by
//! [`CredentialsTransport`](crate::CredentialsTransport).

mod user_agent;

pub use user_agent::UserAgentStage;

pub use crate::oauth1::OAuth1Stage;
pub use crate::oauth2::OAuth2Stage;
