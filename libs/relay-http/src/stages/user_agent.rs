use async_trait::async_trait;
use http::HeaderValue;
use http::header::USER_AGENT;

use crate::error::HttpError;
use crate::pipeline::{Next, Stage};
use crate::request::Request;
use crate::response::Response;

/// Adds a `User-Agent` header to requests that carry none
#[derive(Clone, Debug)]
pub struct UserAgentStage {
    user_agent: HeaderValue,
}

impl UserAgentStage {
    /// Create a stage with the given user agent string
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if the string is not a valid
    /// header value
    pub fn try_new(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        let user_agent = HeaderValue::from_str(user_agent.as_ref())?;
        Ok(Self { user_agent })
    }
}

#[async_trait]
impl Stage for UserAgentStage {
    async fn propagate(&self, mut request: Request, next: Next<'_>) -> Result<Response, HttpError> {
        if !request.headers().contains_key(USER_AGENT) {
            request
                .headers_mut()
                .insert(USER_AGENT, self.user_agent.clone());
        }
        next.propagate(request).await
    }
}
