//! Cleaned up AWS STS API.

use std::fmt;

use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_sdk_sts::{
    error::DisplayErrorContext, operation::assume_role_with_saml::AssumeRoleWithSamlOutput,
};
use chrono::{TimeZone, Utc};

use crate::{FlowError, Region, Role, SessionCredentials};

const FALLBACK_REGION: &str = "us-east-1";

pub(crate) struct Client {
    inner: aws_sdk_sts::Client,
}

impl Client {
    /// An unsigned client in `region`, or the region resolved from the environment.
    pub(crate) async fn new(region: Option<Region>) -> Self {
        let region = RegionProviderChain::first_try(region.map(|region| region.0))
            .or_default_provider()
            .or_else(FALLBACK_REGION);
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .no_credentials()
            .load()
            .await;

        Self {
            inner: aws_sdk_sts::Client::new(&config),
        }
    }

    pub(crate) async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest<'_>,
    ) -> Result<SessionCredentials, String> {
        self.inner
            .assume_role_with_saml()
            .role_arn(request.role_arn)
            .principal_arn(request.principal_arn)
            .saml_assertion(request.saml_assertion)
            .send()
            .await
            .map_err(|error| DisplayErrorContext(error).to_string())
            .and_then(TryInto::try_into)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

pub(crate) struct AssumeRoleWithSamlRequest<'a> {
    pub(crate) role_arn: &'a str,
    pub(crate) principal_arn: &'a str,
    pub(crate) saml_assertion: &'a str,
}

impl TryFrom<AssumeRoleWithSamlOutput> for SessionCredentials {
    type Error = String;

    fn try_from(res: AssumeRoleWithSamlOutput) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid AssumeRoleWithSAML response: ", $msg)
            };
        }

        let credentials = res
            .credentials
            .ok_or(invalid_res!("missing credentials"))?;
        let expires_at = Utc
            .timestamp_opt(
                credentials.expiration.secs(),
                credentials.expiration.subsec_nanos(),
            )
            .single()
            .ok_or(invalid_res!("expiration out of range"))?;

        Ok(Self {
            access_key_id: credentials.access_key_id,
            secret_access_key: credentials.secret_access_key,
            session_token: credentials.session_token,
            expires_at,
        })
    }
}

impl Role {
    /// Exchange this role for temporary credentials with AWS STS.
    ///
    /// The call is made in `region` if given, otherwise in the region resolved from the
    /// environment (`AWS_REGION`, then shared config), falling back to `us-east-1`. No AWS
    /// credentials are needed; the SAML assertion is the credential.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Sts`] if STS rejects the assertion or the call fails.
    #[cfg_attr(docsrs, doc(cfg(feature = "sts")))]
    pub async fn login(&self, region: Option<Region>) -> Result<SessionCredentials, FlowError> {
        tracing::debug!(role = %self.arn, "assuming role with SAML");

        Client::new(region)
            .await
            .assume_role_with_saml(AssumeRoleWithSamlRequest {
                role_arn: &self.arn,
                principal_arn: &self.principal_arn,
                saml_assertion: &self.saml_assertion,
            })
            .await
            .map_err(FlowError::Sts)
    }
}
