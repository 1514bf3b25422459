use std::fmt;

use futures::future::BoxFuture;
use reqwest::{header::CONTENT_TYPE, Method};
use select::{node::Node, predicate::Name};
use url::Url;

use crate::{FlowError, Session};

/// Something that can be submitted to yield the next page of the login.
///
/// A plain post-login [`Form`] and the synthetic form produced after a DUO approval both
/// implement this, so the SAML stage can be driven by either.
pub trait Submit: Send + Sync {
    /// Submit within the given session.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Transport`] if the request could not be completed. Implementations
    /// do not inspect the response status.
    fn submit<'a>(
        &'a self,
        session: &'a Session,
    ) -> BoxFuture<'a, Result<reqwest::Response, FlowError>>;
}

/// A submittable HTML form.
///
/// Field names are unique; setting an existing field replaces its value in place, so the
/// submission order matches the order fields first appeared in the markup.
#[derive(Clone)]
pub struct Form {
    method: Method,
    action: Url,
    fields: Vec<(String, String)>,
}

impl Form {
    /// An empty form.
    #[must_use]
    pub fn new(method: Method, action: Url) -> Self {
        Self {
            method,
            action,
            fields: Vec::new(),
        }
    }

    /// Build a form from a `<form>` node found on the page served from `page_url`.
    pub(crate) fn from_node(page_url: &Url, node: Node<'_>) -> Result<Self, FlowError> {
        let mut form = Self::new(Method::GET, page_url.clone());

        if let Some(action) = node.attr("action").filter(|action| !action.is_empty()) {
            form.action = page_url.join(action).map_err(|error| {
                FlowError::Parse(format!("cannot parse form action attribute {action}: {error}"))
            })?;
        }
        if let Some(method) = node.attr("method").filter(|method| !method.is_empty()) {
            form.method = Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|error| {
                FlowError::Parse(format!("cannot parse form method attribute {method}: {error}"))
            })?;
        }

        for input in node.find(Name("input")) {
            if let Some(name) = input.attr("name") {
                form.set(name, input.attr("value").unwrap_or_default());
            }
        }

        Ok(form)
    }

    /// The HTTP method the form is submitted with.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute URL the form is submitted to.
    #[must_use]
    pub fn action(&self) -> &Url {
        &self.action
    }

    /// The value of a field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set a field, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Field names in submission order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    fn encoded(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }
}

impl Submit for Form {
    fn submit<'a>(
        &'a self,
        session: &'a Session,
    ) -> BoxFuture<'a, Result<reqwest::Response, FlowError>> {
        Box::pin(async move {
            tracing::debug!(method = %self.method, action = %self.action, "submitting form");
            let response = session
                .client()
                .request(self.method.clone(), self.action.clone())
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(self.encoded())
                .send()
                .await?;
            Ok(response)
        })
    }
}

// Field values routinely hold passwords and assertions, so only names are shown.
impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Form")
            .field("method", &self.method)
            .field("action", &self.action.as_str())
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}
