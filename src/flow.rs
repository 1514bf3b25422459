use std::fmt;

use url::Url;

use crate::{
    duo,
    html::Page,
    login::{self, DuoLogin, LoginResponse},
    saml, AdfsError, AdfsFlowBuilder, Devices, Form, PollPolicy, ProfileError, Roles, Session,
    Submit,
};
#[cfg(feature = "sts")]
use crate::{Region, Role, SessionCredentials};

/// A configured ADFS login flow.
///
/// Every call starts a fresh login against the identity provider, but all calls share the flow's
/// [`Session`] (and so its cookies). Use a new flow for each independent login attempt.
#[allow(clippy::module_name_repetitions)]
pub struct AdfsFlow {
    session: Session,
    login_url: Url,
    username: String,
    password: String,
    poll: PollPolicy,
    #[cfg(feature = "sts")]
    region: Option<Region>,
}

/// The outcome of submitting credentials to the identity provider.
#[derive(Debug)]
pub enum Authentication {
    /// No MFA was required; these are the roles the assertion granted.
    Roles(Roles),

    /// A DUO challenge is required. Pick a [`Factor`](crate::Factor) from one of the devices and
    /// call [`load_roles`](crate::Factor::load_roles) on it with [`AdfsFlow::session`].
    Duo(Devices),
}

impl AdfsFlow {
    /// Construct a builder for an ADFS flow that logs in with `password`.
    ///
    /// Use this to override the default flow configuration.
    #[must_use]
    pub fn builder(password: impl Into<String>) -> AdfsFlowBuilder {
        AdfsFlowBuilder::new(password)
    }

    /// Construct a default ADFS flow that logs in with `password`.
    ///
    /// The ADFS host and username are sourced from AWS shared config (located with
    /// `AWS_CONFIG_FILE` and `AWS_PROFILE`). For more flexible configuration see
    /// [`AdfsFlowBuilder`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// use adfs_duo_flow::{AdfsFlow, Authentication};
    ///
    /// let flow = AdfsFlow::new(std::env::var("ADFS_PASSWORD")?).await?;
    ///
    /// match flow.login().await? {
    ///     Authentication::Roles(roles) => {
    ///         for role in &roles {
    ///             println!("{role}");
    ///         }
    ///     }
    ///     Authentication::Duo(devices) => {
    ///         let factor = devices
    ///             .iter()
    ///             .find_map(|device| device.factor("Duo Push"))
    ///             .ok_or("no device supports push")?;
    ///         let roles = factor.load_roles(flow.session(), None).await?;
    ///         println!("{} roles", roles.len());
    ///     }
    /// }
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    ///
    /// An error is returned if a profile cannot be loaded, if it is missing ADFS configuration, or
    /// if the HTTP client cannot be initialised.
    pub async fn new(password: impl Into<String>) -> Result<Self, AdfsError<ProfileError>> {
        AdfsFlowBuilder::new(password).build().await
    }

    pub(crate) fn build(
        session: Session,
        login_url: Url,
        username: String,
        password: String,
        poll: PollPolicy,
        #[cfg(feature = "sts")] region: Option<Region>,
    ) -> Self {
        Self {
            session,
            login_url,
            username,
            password,
            poll,
            #[cfg(feature = "sts")]
            region,
        }
    }

    /// The session every request of this flow goes through.
    ///
    /// DUO factors returned by [`login`](Self::login) must be invoked with this session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Submit the user's credentials and find out whether a DUO challenge is required.
    ///
    /// If ADFS releases the SAML assertion straight away the decoded roles are returned. Otherwise
    /// the DUO challenge is initiated and the user's devices are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if any request fails or the identity provider replies with something that
    /// can't be understood. See [`FlowError`] for details.
    pub async fn login(&self) -> Result<Authentication, FlowError> {
        let page = self.submit_credentials().await?;

        match LoginResponse::parse(page)? {
            LoginResponse::Saml(page) => {
                let roles = saml::roles_from_page(&self.session, &page).await?;
                Ok(Authentication::Roles(roles))
            }
            LoginResponse::Duo(login) => {
                let devices = duo::initiate(&self.session, login, self.poll).await?;
                Ok(Authentication::Duo(devices))
            }
        }
    }

    /// Log in to an identity provider that doesn't require MFA, and load the user's roles.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] if the identity provider didn't release an assertion,
    /// which is the case if a DUO challenge is required. Other errors are as for
    /// [`login`](Self::login).
    pub async fn load_roles(&self) -> Result<Roles, FlowError> {
        let form = self.login_form().await?;
        saml::load_roles(&self.session, &form).await
    }

    /// Log in to an identity provider that requires DUO, and list the user's devices.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Protocol`] if the identity provider didn't present a DUO challenge.
    /// Other errors are as for [`login`](Self::login).
    pub async fn load_duo_devices(&self) -> Result<Devices, FlowError> {
        let page = self.submit_credentials().await?;
        let login = DuoLogin::parse(&page)?.ok_or_else(|| {
            FlowError::Protocol("login did not present a DUO challenge".to_string())
        })?;
        duo::initiate(&self.session, login, self.poll).await
    }

    /// Exchange `role` for temporary credentials with AWS STS.
    ///
    /// The STS region is the one configured on the builder, or else resolved from the
    /// environment, falling back to `us-east-1`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Sts`] if STS rejects the assertion or the call fails.
    #[cfg_attr(docsrs, doc(cfg(feature = "sts")))]
    #[cfg(feature = "sts")]
    pub async fn assume_role(&self, role: &Role) -> Result<SessionCredentials, FlowError> {
        role.login(self.region.clone()).await
    }

    async fn login_form(&self) -> Result<Form, FlowError> {
        login::load_login_form(
            &self.session,
            self.login_url.clone(),
            &self.username,
            &self.password,
        )
        .await
    }

    async fn submit_credentials(&self) -> Result<Page, FlowError> {
        let form = self.login_form().await?;
        let response = form.submit(&self.session).await?;
        Page::load(response).await
    }
}

impl fmt::Debug for AdfsFlow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdfsFlow")
            .field("session", &self.session)
            .field("login_url", &self.login_url.as_str())
            .field("username", &self.username)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

/// An error that occurred during the login flow.
///
/// Every variant is terminal for the login attempt. Retrying means starting over with a fresh
/// [`Session`].
#[derive(Debug, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum FlowError {
    /// An HTTP request could not be completed (connection failure, timeout, too many redirects).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A server answered with a non-success status.
    #[error("{url} responded with status {status}")]
    Status {
        /// The URL of the final response.
        url: Url,

        /// The HTTP status code.
        status: u16,
    },

    /// Expected markup was missing or malformed (no login form, an unparseable form action).
    #[error("cannot parse page: {0}")]
    Parse(String),

    /// A DUO exchange broke protocol (no `sid`, no `txid`, an error reply, a malformed signed
    /// transaction).
    #[error("DUO protocol error: {0}")]
    Protocol(String),

    /// The SAML assertion was missing or carried malformed roles.
    ///
    /// Every problem found while decoding is reported, not just the first.
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),

    /// The DUO challenge was not approved in time.
    #[error(
        "DUO challenge with {factor} on {device} was not approved after {attempts} status checks"
    )]
    MfaTimeout {
        /// The challenged device.
        device: String,

        /// The factor used.
        factor: String,

        /// The number of status checks made.
        attempts: u32,
    },

    /// A role lookup by ARN found nothing.
    #[error("role with {0} arn does not exist")]
    RoleNotFound(String),

    /// AWS STS rejected the role exchange.
    #[cfg_attr(docsrs, doc(cfg(feature = "sts")))]
    #[cfg(feature = "sts")]
    #[error("STS error: {0}")]
    Sts(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_joined() {
        let error = FlowError::Validation(vec!["first".to_string(), "second".to_string()]);

        assert_eq!(error.to_string(), "first, second");
    }

    #[test]
    fn timeout_names_device_and_factor() {
        let error = FlowError::MfaTimeout {
            device: "phone1".to_string(),
            factor: "Duo Push".to_string(),
            attempts: 20,
        };

        assert_eq!(
            error.to_string(),
            "DUO challenge with Duo Push on phone1 was not approved after 20 status checks"
        );
    }
}
