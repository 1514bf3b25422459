use std::{convert::Infallible, fmt, time::Duration};

use crate::{
    login_url, session::DEFAULT_TIMEOUT, AdfsError, AdfsFlow, PollPolicy, ProfileSource, Session,
};
#[cfg(feature = "sts")]
use crate::Region;

/// Builder for [`AdfsFlow`].
///
/// This allows aspects of the login flow to be configured.
///
/// # Example
///
/// ```
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::time::Duration;
///
/// use adfs_duo_flow::{AdfsConfig, AdfsFlowBuilder, PollPolicy};
///
/// let flow = AdfsFlowBuilder::new("hunter2")
///     // use hard-coded configuration instead of loading from profile
///     .config(AdfsConfig {
///         adfs_host: "https://sso.example.com".to_string(),
///         username: "CORP\\bob".to_string(),
///     })
///     // give up on slow identity providers sooner
///     .timeout(Duration::from_secs(5))
///     // wait up to a minute for DUO approval
///     .poll_policy(PollPolicy::new(Duration::from_secs(2), 30))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct AdfsFlowBuilder<S = ProfileSource> {
    config_source: S,
    password: String,
    timeout: Duration,
    poll: PollPolicy,
    session: Option<Session>,
    #[cfg(feature = "sts")]
    region: Option<Region>,
}

impl AdfsFlowBuilder<ProfileSource> {
    /// Construct an [`AdfsFlow`] builder with default configuration that logs in with
    /// `password`.
    #[must_use]
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            config_source: ProfileSource::default(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            poll: PollPolicy::default(),
            session: None,
            #[cfg(feature = "sts")]
            region: None,
        }
    }
}

impl<S> AdfsFlowBuilder<S> {
    /// Set the ADFS configuration source.
    ///
    /// By default, configuration is sourced from AWS shared config (located with
    /// `AWS_CONFIG_FILE` and `AWS_PROFILE`).
    #[must_use]
    pub fn config<NewS>(self, config_source: NewS) -> AdfsFlowBuilder<NewS>
    where
        NewS: AdfsConfigSource,
    {
        AdfsFlowBuilder {
            config_source,
            password: self.password,
            timeout: self.timeout,
            poll: self.poll,
            session: self.session,
            #[cfg(feature = "sts")]
            region: self.region,
        }
    }

    /// Set the timeout for each HTTP request (default 20 seconds).
    ///
    /// This has no effect if a [`session`](Self::session) is given.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Set how DUO challenges are polled for approval.
    #[must_use]
    pub fn poll_policy(self, poll: PollPolicy) -> Self {
        Self { poll, ..self }
    }

    /// Use an existing session rather than constructing a new one.
    #[must_use]
    pub fn session(self, session: Session) -> Self {
        Self {
            session: Some(session),
            ..self
        }
    }

    /// Set the region that STS calls are made in.
    ///
    /// By default the region is resolved from the environment, falling back to `us-east-1`.
    #[cfg_attr(docsrs, doc(cfg(feature = "sts")))]
    #[cfg(feature = "sts")]
    #[must_use]
    pub fn region(self, region: Region) -> Self {
        Self {
            region: Some(region),
            ..self
        }
    }
}

impl<S> AdfsFlowBuilder<S>
where
    S: AdfsConfigSource,
{
    /// Build an [`AdfsFlow`] with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdfsError::Config`] with any error encountered when loading the
    /// [`AdfsConfigSource`], or [`AdfsError::Flow`] if the ADFS host is invalid or the HTTP client
    /// cannot be initialised.
    pub async fn build(self) -> Result<AdfsFlow, AdfsError<S::Error>> {
        let config = self.config_source.load().await.map_err(AdfsError::Config)?;

        let login_url = login_url(&config.adfs_host)?;
        let session = match self.session {
            Some(session) => session,
            None => Session::with_timeout(self.timeout)?,
        };
        tracing::debug!(%login_url, username = %config.username, "configured ADFS flow");

        Ok(AdfsFlow::build(
            session,
            login_url,
            config.username,
            self.password,
            self.poll,
            #[cfg(feature = "sts")]
            self.region,
        ))
    }
}

impl<S: fmt::Debug> fmt::Debug for AdfsFlowBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdfsFlowBuilder")
            .field("config_source", &self.config_source)
            .field("timeout", &self.timeout)
            .field("poll", &self.poll)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// A source of ADFS configuration.
///
/// This trait is more intended to facilitate precise error handling in
/// [`AdfsFlowBuilder::build`], but it could also be used to implement alternative configuration
/// sources.
pub trait AdfsConfigSource {
    /// The future returned by the config source.
    type Future: std::future::Future<Output = Result<AdfsConfig, Self::Error>>;

    /// The error that might occur when sourcing the configuration.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the ADFS configuration.
    fn load(self) -> Self::Future;
}

/// ADFS configuration.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdfsConfig {
    /// The ADFS host, including scheme (e.g. `https://sso.example.com`).
    pub adfs_host: String,

    /// The username to log in as, in whatever form the identity provider expects (e.g.
    /// `CORP\bob` or `bob@example.com`).
    pub username: String,
}

impl AdfsConfigSource for AdfsConfig {
    type Future = futures::future::Ready<Result<Self, Self::Error>>;

    type Error = Infallible;

    fn load(self) -> Self::Future {
        futures::future::ready(Ok(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowError;

    #[tokio::test]
    async fn builds_from_static_config() {
        let flow = AdfsFlowBuilder::new("hunter2")
            .config(AdfsConfig {
                adfs_host: "https://sso.test.com/".to_string(),
                username: "bob".to_string(),
            })
            .build()
            .await
            .expect("flow");

        let debug = format!("{flow:?}");
        assert!(debug.contains("https://sso.test.com/adfs/ls/idpinitiatedsignon.aspx"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn invalid_host_is_a_flow_error() {
        let error = AdfsFlowBuilder::new("hunter2")
            .config(AdfsConfig {
                adfs_host: "sso.test.com".to_string(),
                username: "bob".to_string(),
            })
            .build()
            .await
            .expect_err("host without scheme");

        assert!(matches!(error, AdfsError::Flow(FlowError::Parse(_))));
    }
}
