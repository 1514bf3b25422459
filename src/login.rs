//! The identity provider's side of the login: the credential form and the DUO bootstrap page.

use std::fmt;

use select::{
    document::Document,
    node::Node,
    predicate::{Attr, Name, Predicate},
};
use url::Url;

use crate::{duo::SignedRequest, html::Page, FlowError, Form, Session};

const LOGIN_PATH: &str = "/adfs/ls/idpinitiatedsignon.aspx?loginToRp=urn:amazon:webservices";

/// The IdP-initiated sign-on URL for AWS on the given ADFS host (e.g. `https://sso.example.com`).
///
/// # Errors
///
/// Returns [`FlowError::Parse`] if the host does not form a valid URL.
pub fn login_url(adfs_host: &str) -> Result<Url, FlowError> {
    let host = adfs_host.strip_suffix('/').unwrap_or(adfs_host);
    format!("{host}{LOGIN_PATH}")
        .parse()
        .map_err(|error| FlowError::Parse(format!("invalid ADFS host {adfs_host}: {error}")))
}

/// Load the identity provider's login page and fill in its credential form.
///
/// The form is returned rather than submitted, so that callers can hand it to the next stage.
pub(crate) async fn load_login_form(
    session: &Session,
    url: Url,
    username: &str,
    password: &str,
) -> Result<Form, FlowError> {
    tracing::debug!(%url, "loading login page");
    let response = session.client().get(url).send().await?;
    let page = Page::load(response).await?;
    login_form(&page, username, password)
}

fn login_form(page: &Page, username: &str, password: &str) -> Result<Form, FlowError> {
    let document = page.document();
    let node = select_login_form(&document)
        .ok_or_else(|| FlowError::Parse("no login form found".to_string()))?;

    let mut form = Form::from_node(&page.url, node)?;
    fill_credentials(&mut form, username, password);

    tracing::debug!(action = %form.action(), "found login form");
    Ok(form)
}

/// The first form with an input whose name looks like a password field.
fn select_login_form(document: &Document) -> Option<Node<'_>> {
    document.find(Name("form")).find(|form| {
        form.find(Name("input")).any(|input| {
            input
                .attr("name")
                .is_some_and(|name| name.to_lowercase().contains("pass"))
        })
    })
}

fn fill_credentials(form: &mut Form, username: &str, password: &str) {
    let names: Vec<String> = form.field_names().map(str::to_string).collect();

    for name in names {
        let lower = name.to_lowercase();
        if lower.contains("user") || lower.contains("email") {
            form.set(name.clone(), username);
        }
        if lower.contains("pass") {
            form.set(name, password);
        }
    }
}

/// What the identity provider answered to the credential form.
pub(crate) enum LoginResponse {
    /// A DUO challenge must be completed before the assertion is released.
    Duo(DuoLogin),

    /// No MFA; the page itself carries the SAML assertion form.
    Saml(Page),
}

impl LoginResponse {
    pub(crate) fn parse(page: Page) -> Result<Self, FlowError> {
        match DuoLogin::parse(&page)? {
            Some(duo) => Ok(Self::Duo(duo)),
            None => Ok(Self::Saml(page)),
        }
    }
}

/// The bootstrap state ADFS hands to the DUO iframe.
///
/// This is carried through the whole challenge, since the final post back to ADFS needs the
/// original `Context` and `AuthMethod`.
#[derive(Clone)]
pub(crate) struct DuoLogin {
    pub(crate) duo_host: String,
    pub(crate) signed_request: SignedRequest,
    pub(crate) options_url: Url,
    pub(crate) auth_method: String,
    pub(crate) context: String,
}

impl DuoLogin {
    /// Read the DUO bootstrap from a post-login page, or `None` if the page has no DUO challenge.
    pub(crate) fn parse(page: &Page) -> Result<Option<Self>, FlowError> {
        let document = page.document();

        let Some(duo_form) = document
            .find(Name("form").and(Attr("id", "duo_form")))
            .next()
        else {
            return Ok(None);
        };

        let mut auth_method = String::new();
        let mut context = String::new();
        for input in duo_form.find(Name("input")) {
            let value = input.attr("value").unwrap_or_default();
            match input.attr("name") {
                Some("Context") => context = value.to_string(),
                Some("AuthMethod") => auth_method = value.to_string(),
                _ => {}
            }
        }

        // The iframe bootstrap sits next to the form rather than inside it.
        let mut duo_host = None;
        let mut signed_request = None;
        if let Some(parent) = duo_form.parent() {
            for input in parent.find(Name("input")) {
                let value = input.attr("value").map(str::to_string);
                match input.attr("name") {
                    Some("duo_host") => duo_host = value,
                    Some("duo_sig_request") => signed_request = value.map(SignedRequest::new),
                    _ => {}
                }
            }
        }

        let (Some(duo_host), Some(signed_request)) = (duo_host, signed_request) else {
            return Ok(None);
        };

        let action = document
            .find(Name("form").and(Attr("id", "options")))
            .find_map(|form| form.attr("action"))
            .ok_or_else(|| {
                FlowError::Parse("cannot find action attribute of form#options".to_string())
            })?;
        let options_url = page.url.join(action).map_err(|error| {
            FlowError::Parse(format!(
                "cannot parse action attribute of form#options {action}: {error}"
            ))
        })?;

        tracing::debug!(%duo_host, %options_url, "login requires DUO challenge");
        Ok(Some(Self {
            duo_host,
            signed_request,
            options_url,
            auth_method,
            context,
        }))
    }
}

impl fmt::Debug for DuoLogin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DuoLogin")
            .field("duo_host", &self.duo_host)
            .field("options_url", &self.options_url.as_str())
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) const SIGNED_REQUEST: &str = "TX|ZGVjYWZccHJlaXNpbmdlcnxE|f68c38f2d38662f3dad7d916a257b:APP|ZGVjYWZccHJlaXNpbmdlcnxESVBFSV|7be95a3671b67964fe1";

    pub(crate) fn duo_page(duo_host: &str, options_action: &str) -> String {
        format!(
            r#"<html><body>
            <div id="authArea">
              <div class='groupMargin'>
                <input type='hidden' name='duo_host' id='duo_host' value='{duo_host}' />
                <input type='hidden' name='duo_sig_request' id='duo_sig_request' value='{SIGNED_REQUEST}' />
                <form method='POST' id='duo_form'>
                  <input id='context' type='hidden' name='Context' value='encrypted data'/>
                  <input id='authMethod' type='hidden' name='AuthMethod' value='DuoAdfsAdapter' />
                </form>
                <iframe id="duo_iframe" frameborder="0"></iframe>
              </div>
              <div id="authOptions">
                <form id="options" method="post" action="{options_action}">
                  <input id="optionSelection" type="hidden" name="AuthMethod" />
                </form>
              </div>
            </div>
            </body></html>"#
        )
    }

    #[test]
    fn login_url_appends_sign_on_path() {
        assert_eq!(
            login_url("https://sso.test.com/").expect("url").as_str(),
            "https://sso.test.com/adfs/ls/idpinitiatedsignon.aspx?loginToRp=urn:amazon:webservices"
        );
        assert!(matches!(login_url("not a host"), Err(FlowError::Parse(_))));
    }

    #[test]
    fn selects_the_form_with_a_password_input() {
        let page = Page::new(
            "https://sso.test.com/adfs/ls/",
            r#"<html><body>
              <form id="search" action="/search"><input name="query"></form>
              <form id="login" method="post" action="/adfs/ls/login">
                <input name="UserName"><input name="Password"><input name="Kmsi" value="true">
              </form>
            </body></html>"#,
        );

        let form = login_form(&page, "corp\\bob", "hunter2").expect("login form");

        assert_eq!(form.action().as_str(), "https://sso.test.com/adfs/ls/login");
        assert_eq!(form.get("UserName"), Some("corp\\bob"));
        assert_eq!(form.get("Password"), Some("hunter2"));
        assert_eq!(form.get("Kmsi"), Some("true"));
        assert_eq!(form.get("query"), None);
    }

    #[test]
    fn fills_email_fields_and_prefers_password_when_both_match() {
        let page = Page::new(
            "https://sso.test.com/",
            r#"<form><input name="Email"><input name="UserPassword"></form>"#,
        );

        let form = login_form(&page, "bob@test.com", "hunter2").expect("login form");

        assert_eq!(form.get("Email"), Some("bob@test.com"));
        assert_eq!(form.get("UserPassword"), Some("hunter2"));
    }

    #[test]
    fn form_without_action_posts_back_to_the_page() {
        let page = Page::new(
            "https://sso.test.com/adfs/ls/?client-request-id=1",
            r#"<form method="post"><input name="Password"></form>"#,
        );

        let form = login_form(&page, "bob", "pw").expect("login form");

        assert_eq!(form.action(), &page.url);
    }

    #[test]
    fn missing_login_form_is_a_parse_error() {
        let page = Page::new(
            "https://sso.test.com/",
            r#"<form><input name="query"></form>"#,
        );

        let error = login_form(&page, "bob", "pw").expect_err("no password input");

        assert!(matches!(error, FlowError::Parse(message) if message == "no login form found"));
    }

    #[test]
    fn parses_duo_bootstrap() {
        let page = Page::new(
            "https://test.com",
            &duo_page(
                "api-f4ec.duosecurity.com",
                "https://sso.test.com:443/saml/ls/IdpInitiatedSignOn.aspx?loginToRp=urn:amazon:webservices",
            ),
        );

        let duo = DuoLogin::parse(&page).expect("parse").expect("duo challenge");

        assert_eq!(duo.duo_host, "api-f4ec.duosecurity.com");
        assert_eq!(duo.signed_request.as_str(), SIGNED_REQUEST);
        assert_eq!(duo.context, "encrypted data");
        assert_eq!(duo.auth_method, "DuoAdfsAdapter");
        // the default port is normalised away
        assert_eq!(
            duo.options_url.as_str(),
            "https://sso.test.com/saml/ls/IdpInitiatedSignOn.aspx?loginToRp=urn:amazon:webservices"
        );
    }

    #[test]
    fn resolves_relative_options_action() {
        let page = Page::new(
            "https://sso.test.com/adfs/ls/",
            &duo_page(
                "api.duo.test",
                "/saml/ls/IdpInitiatedSignOn.aspx?loginToRp=urn:amazon:webservices",
            ),
        );

        let duo = DuoLogin::parse(&page).expect("parse").expect("duo challenge");

        assert_eq!(
            duo.options_url.as_str(),
            "https://sso.test.com/saml/ls/IdpInitiatedSignOn.aspx?loginToRp=urn:amazon:webservices"
        );
    }

    #[test]
    fn page_without_duo_fields_is_the_saml_page() {
        let page = Page::new(
            "https://sso.test.com/",
            r#"<form method="post" action="https://signin.aws.amazon.com/saml">
                 <input type="hidden" name="SAMLResponse" value="PHNhbWw+">
               </form>"#,
        );

        assert!(matches!(
            LoginResponse::parse(page).expect("parse"),
            LoginResponse::Saml(_)
        ));
    }

    #[test]
    fn duo_page_without_options_action_is_a_parse_error() {
        let page = Page::new(
            "https://sso.test.com/",
            &duo_page("api.duo.test", "x").replace(r#"action="x""#, ""),
        );

        assert!(matches!(DuoLogin::parse(&page), Err(FlowError::Parse(_))));
    }
}
