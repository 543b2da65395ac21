use async_trait::async_trait;

use super::signature::sign_request;
use super::{OAuth1Session, OAuth1State};
use crate::error::HttpError;
use crate::pipeline::{Next, Stage};
use crate::request::Request;
use crate::response::Response;

/// Signs every request with the session's access token.
///
/// Requests pass through unsigned while the session is not enabled.
#[derive(Clone, Debug)]
pub struct OAuth1Stage {
    session: OAuth1Session,
}

impl OAuth1Stage {
    #[must_use]
    pub fn new(session: OAuth1Session) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn session(&self) -> &OAuth1Session {
        &self.session
    }
}

#[async_trait]
impl Stage for OAuth1Stage {
    async fn propagate(&self, mut request: Request, next: Next<'_>) -> Result<Response, HttpError> {
        if let Some(token) = self.session.signing_token() {
            let state = OAuth1State::generate();
            sign_request(&mut request, self.session.config(), Some(&token), &state)?;
        }
        next.propagate(request).await
    }
}
