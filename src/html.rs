//! Loading pages for querying.

use select::document::Document;
use url::Url;

use crate::FlowError;

/// The body of a successful response, along with the URL it was finally served from.
///
/// The URL is the one after redirects, which is what relative form actions resolve against and
/// where DUO puts its session id.
pub(crate) struct Page {
    pub(crate) url: Url,
    pub(crate) body: String,
}

impl Page {
    pub(crate) async fn load(response: reqwest::Response) -> Result<Self, FlowError> {
        let url = response.url().clone();
        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        tracing::trace!(%url, length = body.len(), "loaded page");

        Ok(Self { url, body })
    }

    #[cfg(test)]
    pub(crate) fn new(url: &str, body: &str) -> Self {
        Self {
            url: url.parse().expect("test url"),
            body: body.to_string(),
        }
    }

    /// Parse the body.
    ///
    /// `Document` is not `Send`, so callers parse inside synchronous helpers and never hold the
    /// result across an `.await`.
    pub(crate) fn document(&self) -> Document {
        Document::from(self.body.as_str())
    }
}
