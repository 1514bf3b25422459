use std::{fmt, time::Duration};

use crate::FlowError;

/// Generous enough to cover a DUO push being approved on the slowest status request.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const MAX_REDIRECTS: usize = 10;

/// The HTTP context shared by every request of one login attempt.
///
/// ADFS and DUO both track the login through cookies, so every stage of an attempt must go through
/// the same `Session`. Clones share the underlying connection pool and cookie store. Independent
/// attempts (different users, or retries after a failure) should each use a fresh session.
#[derive(Clone)]
pub struct Session {
    client: reqwest::Client,
}

impl Session {
    /// Construct a session with a fresh cookie store and the default request timeout (20 seconds).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialised (e.g. the TLS backend
    /// fails to load).
    pub fn new() -> Result<Self, FlowError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Construct a session with a fresh cookie store and the given per-request timeout.
    ///
    /// The timeout bounds each individual request, not the whole login attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be initialised.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FlowError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::custom(|attempt| {
                if attempt.previous().len() > MAX_REDIRECTS {
                    attempt.error("too many redirects")
                } else {
                    attempt.follow()
                }
            }))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    ///
    /// The client must have a cookie store enabled, otherwise the identity provider will not
    /// recognise subsequent requests as part of the same login.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
