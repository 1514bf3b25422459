use std::fmt;

use crate::FlowError;

/// An AWS account that roles can be assumed in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Account {
    /// The account's numeric id.
    pub id: String,

    /// The account's display name, or the id if AWS didn't list a name.
    pub name: String,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id: {}, name: {}", self.id, self.name)
    }
}

/// A role granted by the SAML assertion.
///
/// Each role carries the assertion that granted it, so it can be exchanged for credentials on its
/// own (see `AdfsFlow::assume_role` with the `sts` feature).
#[derive(Clone, PartialEq, Eq)]
pub struct Role {
    /// The account the role belongs to.
    pub account: Account,

    /// The role's ARN (`arn:aws:iam::<account>:role/<name>`).
    pub arn: String,

    /// The role's name, without the `role/` prefix.
    pub name: String,

    /// The ARN of the identity provider that vouches for the assertion.
    pub principal_arn: String,

    /// The base64-encoded SAML assertion.
    pub saml_assertion: String,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account: {{{}}}, arn: {}, name: {}",
            self.account, self.arn, self.name
        )
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("account", &self.account)
            .field("arn", &self.arn)
            .field("name", &self.name)
            .field("principal_arn", &self.principal_arn)
            .finish_non_exhaustive()
    }
}

/// The roles decoded from one SAML assertion, in assertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Roles(Vec<Role>);

impl Roles {
    /// The roles in the account with the given id, sorted by role name.
    #[must_use]
    pub fn by_account_id(&self, account_id: &str) -> Vec<&Role> {
        let mut roles: Vec<&Role> = self
            .0
            .iter()
            .filter(|role| role.account.id == account_id)
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    /// The role with the given ARN.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::RoleNotFound`] if the assertion granted no such role.
    pub fn by_arn(&self, arn: &str) -> Result<&Role, FlowError> {
        self.0
            .iter()
            .find(|role| role.arn == arn)
            .ok_or_else(|| FlowError::RoleNotFound(arn.to_string()))
    }

    /// The distinct accounts roles were granted in, sorted by account name.
    #[must_use]
    pub fn accounts(&self) -> Vec<&Account> {
        let mut accounts: Vec<&Account> = Vec::new();
        for role in &self.0 {
            if !accounts.iter().any(|account| account.id == role.account.id) {
                accounts.push(&role.account);
            }
        }
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }

    /// Iterate over the roles.
    pub fn iter(&self) -> std::slice::Iter<'_, Role> {
        self.0.iter()
    }

    /// The number of roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the assertion granted no roles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Role> for Roles {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Roles {
    type Item = &'a Role;
    type IntoIter = std::slice::Iter<'a, Role>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Roles {
    type Item = Role;
    type IntoIter = std::vec::IntoIter<Role>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
