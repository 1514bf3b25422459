use aws_types_integration::{
    provider::{error::CredentialsError, future, ProvideCredentials},
    Credentials,
};

use crate::{Role, SessionCredentials};

const PROVIDER_NAME: &str = "AdfsFlow";

/// Provide credentials by assuming a decoded role.
///
/// Resolution always calls STS, in the region resolved from the environment. Roles carry the SAML
/// assertion they were granted by, so credentials can only be provided while the assertion is
/// still valid (usually 5 minutes). Failures are converted to
/// [`CredentialsError::ProviderError`], which stops resolution if the role is used as part of a
/// credentials chain.
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # use aws_types_integration as aws_credential_types;
/// use aws_credential_types::provider::ProvideCredentials;
///
/// let flow = adfs_duo_flow::AdfsFlow::new("hunter2").await?;
/// let roles = flow.load_roles().await?;
/// let role = roles.by_arn("arn:aws:iam::012345678910:role/Developer")?.clone();
///
/// let credentials = role.provide_credentials().await?;
/// # Ok(()) }
/// ```
impl ProvideCredentials for Role {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(async {
            let creds = self
                .login(None)
                .await
                .map(Into::into)
                .map_err(CredentialsError::provider_error)?;

            Ok(creds)
        })
    }
}

impl From<SessionCredentials> for Credentials {
    fn from(creds: SessionCredentials) -> Self {
        Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            Some(creds.session_token),
            Some(creds.expires_at.into()),
            PROVIDER_NAME,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn converts_session_credentials() {
        let expires_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let credentials = Credentials::from(SessionCredentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expires_at,
        });

        assert_eq!(credentials.access_key_id(), "ASIAEXAMPLE");
        assert_eq!(credentials.session_token(), Some("token"));
        assert_eq!(credentials.expiry(), Some(expires_at.into()));
    }
}
