#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::pedantic)]

//! ADFS login flow with DUO MFA.
//!
//! Logs in to an ADFS identity provider the way a browser would, completes a DUO challenge if one
//! is presented, and decodes the resulting SAML assertion into the AWS roles the user may assume.
//!
//! See [`login`] for the main entrypoint to the crate.
//!
//! ```no_run
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use adfs_duo_flow::Authentication;
//!
//! match adfs_duo_flow::login(std::env::var("ADFS_PASSWORD")?).await? {
//!     Authentication::Roles(roles) => {
//!         for account in roles.accounts() {
//!             println!("{account}");
//!         }
//!     }
//!     Authentication::Duo(devices) => {
//!         for device in &devices {
//!             println!("{}: {} factors", device.name(), device.factors().len());
//!         }
//!     }
//! }
//! # Ok(()) }
//! ```

#[cfg_attr(docsrs, doc(cfg(feature = "aws-sdk")))]
#[cfg(feature = "aws-sdk")]
mod aws_sdk;
mod builder;
#[cfg(feature = "sts")]
mod credentials;
mod duo;
mod flow;
mod form;
mod html;
mod login;
mod profile;
#[cfg(feature = "sts")]
mod region;
mod role;
mod saml;
mod session;
#[cfg(feature = "sts")]
mod sts;

pub use crate::{
    builder::{AdfsConfig, AdfsConfigSource, AdfsFlowBuilder},
    duo::{Device, Devices, Factor, PollPolicy},
    flow::{AdfsFlow, Authentication, FlowError},
    form::{Form, Submit},
    login::login_url,
    profile::{ProfileError, ProfileSource},
    role::{Account, Role, Roles},
    session::Session,
};

#[cfg_attr(docsrs, doc(cfg(feature = "sts")))]
#[cfg(feature = "sts")]
pub use crate::{credentials::SessionCredentials, region::Region};

/// Perform a default ADFS login with the given `password`.
///
/// The ADFS host and username are sourced from AWS shared config (located with `AWS_CONFIG_FILE`
/// and `AWS_PROFILE`), from the `adfs_host` and `adfs_user` keys of the profile.
///
/// If a DUO challenge is required the user's devices are returned, and a factor must then be
/// invoked to obtain roles. Factors need the session the login was performed in, so use
/// [`AdfsFlow`] directly if MFA is expected.
///
/// For more flexible configuration see [`AdfsFlowBuilder`].
///
/// # Errors
///
/// An error is returned if a profile cannot be loaded, if it is missing ADFS configuration, or if
/// there's a failure during the login. You can separate configuration errors from login errors by
/// using [`AdfsFlow::new`] instead.
pub async fn login(password: impl Into<String>) -> Result<Authentication, AdfsError> {
    let authentication = AdfsFlow::new(password).await?.login().await?;
    Ok(authentication)
}

/// An error indicating either misconfiguration or a failure during login.
#[derive(Debug, thiserror::Error)]
pub enum AdfsError<C = ProfileError>
where
    C: std::error::Error + Send + Sync + 'static,
{
    /// ADFS configuration was missing or invalid.
    #[error(transparent)]
    Config(C),

    /// Failure during login.
    #[error(transparent)]
    Flow(#[from] FlowError),
}
