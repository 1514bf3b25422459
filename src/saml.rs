//! Decoding the SAML assertion into AWS roles.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::{events::Event, Reader};
use select::{
    document::Document,
    predicate::{Class, Name, Predicate},
};

use crate::{html::Page, Account, FlowError, Form, Role, Roles, Session, Submit};

const SAML_RESPONSE: &str = "SAMLResponse";
const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";
const ACCOUNT_LABEL_PREFIX: &str = "Account: ";

/// Submit `requester` and decode the roles from the assertion it yields.
///
/// The requester is either the filled-in login form (no MFA) or the form produced by a DUO
/// approval; either way its response is the page carrying the assertion form.
pub(crate) async fn load_roles<R>(session: &Session, requester: &R) -> Result<Roles, FlowError>
where
    R: Submit + ?Sized,
{
    let response = requester.submit(session).await?;
    let page = Page::load(response).await?;
    roles_from_page(session, &page).await
}

/// Decode the roles from a page carrying the assertion form.
///
/// The assertion doesn't name accounts, so the form is posted on to AWS to read the names from
/// the role selection page.
pub(crate) async fn roles_from_page(session: &Session, page: &Page) -> Result<Roles, FlowError> {
    let (form, assertion) = assertion_form(page)?;

    let response = form.submit(session).await?;
    let landing = Page::load(response).await?;
    let accounts = parse_accounts(&landing.document());
    tracing::debug!(accounts = accounts.len(), "loaded account names");

    let roles = parse_roles(&assertion, &accounts)?;
    tracing::debug!(roles = roles.len(), "decoded SAML assertion");
    Ok(roles)
}

fn assertion_form(page: &Page) -> Result<(Form, String), FlowError> {
    let document = page.document();
    let form = match document.find(Name("form")).next() {
        Some(node) => Form::from_node(&page.url, node)?,
        None => return Err(no_assertion()),
    };

    let assertion = form
        .get(SAML_RESPONSE)
        .filter(|assertion| !assertion.is_empty())
        .ok_or_else(no_assertion)?
        .to_string();
    Ok((form, assertion))
}

fn no_assertion() -> FlowError {
    FlowError::Validation(vec!["no SAML assertion present".to_string()])
}

/// Map account ids to names from the AWS role selection page.
///
/// Labels read `Account: <name> (<id>)`; accounts without a name are labelled with their bare id
/// and map to themselves.
pub(crate) fn parse_accounts(document: &Document) -> HashMap<String, String> {
    let accounts = Name("fieldset").child(Name("div").and(Class("saml-account")));

    document
        .find(accounts)
        .filter_map(|account| {
            account
                .find(Name("div").and(Class("saml-account-name")))
                .next()
        })
        .map(|label| parse_account_label(&label.text()))
        .collect()
}

fn parse_account_label(label: &str) -> (String, String) {
    let label = label.trim();
    let label = label.strip_prefix(ACCOUNT_LABEL_PREFIX).unwrap_or(label);

    match label.split('(').collect::<Vec<_>>()[..] {
        [name, id] => {
            let id = id.trim().strip_suffix(')').unwrap_or(id).trim();
            (id.to_string(), name.trim().to_string())
        }
        _ => (label.to_string(), label.to_string()),
    }
}

/// Decode the base64 assertion and build a role for every value of the role attribute.
///
/// Malformed values don't stop decoding; their errors are collected and reported together.
pub(crate) fn parse_roles(
    assertion: &str,
    accounts: &HashMap<String, String>,
) -> Result<Roles, FlowError> {
    // Identity providers may line-wrap the encoded assertion.
    let encoded: String = assertion
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let decoded = STANDARD.decode(encoded).map_err(|error| {
        FlowError::Validation(vec![format!("cannot decode SAML response: {error}")])
    })?;
    let xml = String::from_utf8(decoded).map_err(|error| {
        FlowError::Validation(vec![format!("cannot decode SAML response: {error}")])
    })?;
    let values = role_attribute_values(&xml).map_err(|error| {
        FlowError::Validation(vec![format!("cannot load SAML response: {error}")])
    })?;

    let mut roles = Vec::new();
    let mut errors = Vec::new();
    for value in &values {
        match parse_role(value, assertion, accounts) {
            Ok(role) => roles.push(role),
            Err(error) => errors.push(error),
        }
    }

    if errors.is_empty() {
        Ok(roles.into_iter().collect())
    } else {
        Err(FlowError::Validation(errors))
    }
}

/// The text of every `AttributeValue` of the role attribute, in document order.
fn role_attribute_values(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_role_attribute = false;
    let mut in_value = false;
    let mut values = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Attribute" => {
                    in_role_attribute = e.attributes().flatten().any(|attr| {
                        attr.key.local_name().as_ref() == b"Name"
                            && attr
                                .unescape_value()
                                .is_ok_and(|name| name == ROLE_ATTRIBUTE)
                    });
                }
                b"AttributeValue" if in_role_attribute => {
                    in_value = true;
                    values.push(String::new());
                }
                _ => {}
            },
            Event::Empty(e)
                if in_role_attribute && e.local_name().as_ref() == b"AttributeValue" =>
            {
                values.push(String::new());
            }
            Event::Text(e) if in_value => {
                if let Some(value) = values.last_mut() {
                    value.push_str(&e.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Attribute" => in_role_attribute = false,
                b"AttributeValue" => in_value = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(values)
}

fn parse_role(
    value: &str,
    assertion: &str,
    accounts: &HashMap<String, String>,
) -> Result<Role, String> {
    let (role_arn, principal_arn) = split_role_value(value)?;

    let fields: Vec<&str> = role_arn.split(':').collect();
    let account_id = fields[4];
    let name = fields[5].strip_prefix("role/").unwrap_or(fields[5]);
    let account_name = accounts
        .get(account_id)
        .map_or(account_id, String::as_str);

    Ok(Role {
        account: Account {
            id: account_id.to_string(),
            name: account_name.to_string(),
        },
        arn: role_arn.to_string(),
        name: name.to_string(),
        principal_arn: principal_arn.to_string(),
        saml_assertion: assertion.to_string(),
    })
}

/// Split a role attribute value into `(role_arn, principal_arn)`, whichever order they're in.
fn split_role_value(value: &str) -> Result<(&str, &str), String> {
    let arns: Vec<&str> = value.split(',').map(str::trim).collect();
    let [first, second] = arns[..] else {
        return Err(format!(
            "expected 2 values in SAML role attribute {value}, but got {}",
            arns.len()
        ));
    };

    let first_fields: Vec<&str> = first.split(':').collect();
    let second_fields: Vec<&str> = second.split(':').collect();
    if first_fields.len() != 6 || second_fields.len() != 6 {
        return Err(format!(
            "expected 6 fields in SAML role attribute ARNs, but got {} and {}",
            first_fields.len(),
            second_fields.len()
        ));
    }

    match (
        first_fields[5].starts_with("role/"),
        second_fields[5].starts_with("role/"),
    ) {
        (true, false) => Ok((first, second)),
        (false, true) => Ok((second, first)),
        (false, false) => Err(format!("no role ARN found in SAML role attribute {value}")),
        (true, true) => Err(format!(
            "cannot tell role from principal in SAML role attribute {value}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const ASSERTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1" Version="2.0" IssueInstant="2018-08-06T09:34:49.660Z" Destination="https://signin.aws.amazon.com/saml">
   <Issuer xmlns="urn:oasis:names:tc:SAML:2.0:assertion">http://sso.test.biz/adfs/services/trust</Issuer>
   <samlp:Status>
      <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success" />
   </samlp:Status>
   <Assertion xmlns="urn:oasis:names:tc:SAML:2.0:assertion" ID="_2" IssueInstant="2018-08-06T09:34:49.660Z" Version="2.0">
      <Issuer>http://sso.test.biz/adfs/services/trust</Issuer>
      <Subject>
         <NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:persistent">SEA\dicktracy</NameID>
      </Subject>
      <AttributeStatement>
         <Attribute Name="https://aws.amazon.com/SAML/Attributes/RoleSessionName">
            <AttributeValue>dicktracy@test.com</AttributeValue>
         </Attribute>
         <Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">
            <AttributeValue>arn:aws:iam::123456789:saml-provider/ADFS,arn:aws:iam::123456789:role/ADFS-User</AttributeValue>
            <AttributeValue>arn:aws:iam::123456789:role/ADFS-Admin,arn:aws:iam::123456789:saml-provider/ADFS</AttributeValue>
            <AttributeValue>arn:aws:iam::98765431:saml-provider/ADFS,arn:aws:iam::98765431:role/ADFS-SuperUser</AttributeValue>
         </Attribute>
         <Attribute Name="https://redshift.amazon.com/SAML/Attributes/DbGroups">
            <AttributeValue>Domain Users</AttributeValue>
         </Attribute>
      </AttributeStatement>
   </Assertion>
</samlp:Response>"#;

    const ACCOUNTS_PAGE: &str = r#"<!DOCTYPE html>
<html><body>
<form id="saml_form" name="saml_form" action="/saml" method="post">
  <fieldset>
    <div class="saml-account"> <div onClick="expandCollapse(0);">
      <div class="saml-account-name">Account: eps-lab (123)</div>
      </div>
      <div id="0" class="saml-account">
        <div class="saml-role">
          <input type="radio" name="roleIndex" value="arn:aws:iam::123:role/ADFS-Developers" class="saml-radio" />
          <label class="saml-role-description">ADFS-Developers</label>
        </div>
      </div>
    </div>
    <div class="saml-account"> <div onClick="expandCollapse(1);">
      <div class="saml-account-name">Account: eps-prod (456)</div>
      </div>
      <div id="1" class="saml-account">
        <div class="saml-role">
          <input type="radio" name="roleIndex" value="arn:aws:iam::456:role/User" class="saml-radio" />
        </div>
      </div>
    </div>
    <div class="saml-account"> <div onClick="expandCollapse(2);">
      <!-- account with no name -->
      <div class="saml-account-name">Account: 789</div>
      </div>
      <div id="11" class="saml-account">
        <div class="saml-role">
          <input type="radio" name="roleIndex" value="arn:aws:iam::789:role/User" class="saml-radio" />
        </div>
  </fieldset>
</form>
</body></html>"#;

    fn encoded_assertion() -> String {
        STANDARD.encode(ASSERTION)
    }

    #[test]
    fn parses_account_names() {
        let accounts = parse_accounts(&Document::from(ACCOUNTS_PAGE));

        assert_eq!(accounts.len(), 3);
        assert_eq!(accounts["123"], "eps-lab");
        assert_eq!(accounts["456"], "eps-prod");
        assert_eq!(accounts["789"], "789");
    }

    #[test]
    fn account_labels() {
        assert_eq!(
            parse_account_label("Account: eps-lab (123)"),
            ("123".to_string(), "eps-lab".to_string())
        );
        assert_eq!(
            parse_account_label("  Account: my account (000000000001) \n"),
            ("000000000001".to_string(), "my account".to_string())
        );
        assert_eq!(
            parse_account_label("Account: 789"),
            ("789".to_string(), "789".to_string())
        );
    }

    #[test]
    fn decodes_roles_in_either_arn_order() {
        let assertion = encoded_assertion();
        let accounts = HashMap::from([
            ("123456789".to_string(), "test account 1".to_string()),
            ("98765431".to_string(), "test account 2".to_string()),
        ]);

        let roles = parse_roles(&assertion, &accounts).expect("roles");

        assert_eq!(roles.len(), 3);
        let admin = roles
            .by_arn("arn:aws:iam::123456789:role/ADFS-Admin")
            .expect("admin role");
        assert_eq!(admin.principal_arn, "arn:aws:iam::123456789:saml-provider/ADFS");
        assert_eq!(admin.name, "ADFS-Admin");
        assert_eq!(admin.account.name, "test account 1");
        assert_eq!(admin.saml_assertion, assertion);

        let super_user = roles.by_account_id("98765431");
        assert_eq!(super_user.len(), 1);
        assert_eq!(super_user[0].arn, "arn:aws:iam::98765431:role/ADFS-SuperUser");
        assert_eq!(super_user[0].name, "ADFS-SuperUser");
        assert_eq!(super_user[0].account.id, "98765431");
    }

    #[test]
    fn unresolved_account_names_default_to_the_id() {
        let roles = parse_roles(&encoded_assertion(), &HashMap::new()).expect("roles");

        for role in &roles {
            assert_eq!(role.account.name, role.account.id);
        }
    }

    #[test]
    fn account_id_and_name_come_from_the_role_arn() {
        for (id, name) in [("111122223333", "Admin"), ("1", "a-b_c"), ("0", "x")] {
            let value =
                format!("arn:aws:iam::{id}:saml-provider/ADFS,arn:aws:iam::{id}:role/{name}");
            let (role, principal) = split_role_value(&value).expect("split");
            assert_eq!(principal, format!("arn:aws:iam::{id}:saml-provider/ADFS"));

            let role = parse_role(
                &format!("{role},{principal}"),
                "assertion",
                &HashMap::new(),
            )
            .expect("role");
            assert_eq!(role.account.id, id);
            assert_eq!(role.name, name);
        }
    }

    #[test]
    fn malformed_values_are_collected() {
        let xml = ASSERTION
            .replace(
                "arn:aws:iam::123456789:saml-provider/ADFS,arn:aws:iam::123456789:role/ADFS-User",
                "arn:aws:iam::123456789:role/ADFS-User",
            )
            .replace(
                "arn:aws:iam::98765431:saml-provider/ADFS,arn:aws:iam::98765431:role/ADFS-SuperUser",
                "arn:aws:iam::98765431:saml-provider/ADFS,arn:aws:iam::98765431:user/bob",
            );

        let error = parse_roles(&STANDARD.encode(xml), &HashMap::new()).expect_err("invalid");

        let FlowError::Validation(errors) = &error else {
            panic!("expected validation error, got {error}");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("expected 2 values"), "{}", errors[0]);
        assert!(errors[1].starts_with("no role ARN found"), "{}", errors[1]);
    }

    #[test]
    fn two_role_arns_are_ambiguous() {
        let error = split_role_value("arn:aws:iam::1:role/a,arn:aws:iam::1:role/b")
            .expect_err("ambiguous");

        assert!(error.starts_with("cannot tell role from principal"), "{error}");
    }

    #[test]
    fn rejects_arns_with_the_wrong_number_of_fields() {
        assert!(split_role_value("arn:aws:iam::1:role/a,arn:aws:iam:saml-provider/ADFS").is_err());
    }

    #[test]
    fn line_wrapped_assertions_decode() {
        let encoded = encoded_assertion();
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).expect("base64 is ascii"))
            .collect::<Vec<_>>()
            .join("\r\n");

        let roles = parse_roles(&wrapped, &HashMap::new()).expect("roles");

        assert_eq!(roles.len(), 3);
        for role in &roles {
            assert_eq!(role.saml_assertion, wrapped);
        }
    }

    #[test]
    fn invalid_base64_is_a_validation_error() {
        assert!(matches!(
            parse_roles("not base64!", &HashMap::new()),
            Err(FlowError::Validation(_))
        ));
    }

    #[test]
    fn page_without_assertion_is_a_validation_error() {
        let page = Page::new(
            "https://sso.test.com/adfs/ls/",
            r#"<form method="post"><input name="UserName"><input name="Password"></form>"#,
        );

        let error = assertion_form(&page).expect_err("login page again");

        assert_eq!(error.to_string(), no_assertion().to_string());
    }

    #[test]
    fn assertion_form_posts_to_its_action() {
        let page = Page::new(
            "https://sso.test.com/adfs/ls/",
            &format!(
                r#"<form method="post" name="hiddenform" action="https://signin.aws.amazon.com:443/saml">
                     <input type="hidden" name="SAMLResponse" value="{}" />
                   </form>"#,
                encoded_assertion()
            ),
        );

        let (form, assertion) = assertion_form(&page).expect("assertion form");

        assert_eq!(form.action().as_str(), "https://signin.aws.amazon.com/saml");
        assert_eq!(assertion, encoded_assertion());
    }
}
