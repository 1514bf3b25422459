//! The DUO out-of-band challenge.
//!
//! ADFS hands the browser a DUO iframe bootstrap ([`DuoLogin`]). Initiating the challenge lists
//! the user's [`Devices`], each with the [`Factor`]s it supports. Invoking a factor prompts the
//! user, waits for approval, and posts DUO's signed result back to ADFS, which releases the SAML
//! assertion.

mod frame;
mod poll;
mod signed_request;

use std::{fmt, sync::Arc};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use select::{
    document::Document,
    predicate::{Attr, Name, Predicate},
};
use tracing::Instrument;
use url::Url;

pub use self::poll::PollPolicy;
pub(crate) use self::signed_request::SignedRequest;
use self::frame::Frame;
use crate::{html::Page, login::DuoLogin, saml, FlowError, Roles, Session};

const AUTH_PATH: &str = "frame/web/v1/auth";
const FRAME_VERSION: &str = "2.3";

// DUO renders its device picker for whatever the parent page claims to support.
const SCREEN_WIDTH: &str = "1280";
const SCREEN_HEIGHT: &str = "800";
const COLOR_DEPTH: &str = "24";
const FLASH_VERSION: &str = "22.0.0.209";

/// State shared by every factor of one challenge.
pub(crate) struct Challenge {
    /// Where the frame was served from after redirects; all frame requests go here.
    origin: Url,
    sid: String,
    login: DuoLogin,
    poll: PollPolicy,
}

/// Start the DUO challenge and list the user's devices.
pub(crate) async fn initiate(
    session: &Session,
    login: DuoLogin,
    poll: PollPolicy,
) -> Result<Devices, FlowError> {
    let tx = login.signed_request.tx()?;
    let parent = format!(
        "{}&java_version=&flash_version=&screen_resolution_width={SCREEN_WIDTH}\
         &screen_resolution_height={SCREEN_HEIGHT}&color_depth={COLOR_DEPTH}",
        login.options_url
    );

    let mut url = duo_host_url(&login.duo_host)?.join(AUTH_PATH).map_err(|error| {
        FlowError::Parse(format!("invalid DUO host {}: {error}", login.duo_host))
    })?;
    url.query_pairs_mut()
        .append_pair("tx", tx)
        .append_pair("parent", &parent)
        .append_pair("v", FRAME_VERSION);

    tracing::debug!(duo_host = %login.duo_host, "initiating DUO authentication");
    let response = session
        .client()
        .post(url)
        .headers(browser_headers())
        .form(&[
            ("parent", parent.as_str()),
            ("java_version", ""),
            ("flash_version", FLASH_VERSION),
            ("screen_resolution_width", SCREEN_WIDTH),
            ("screen_resolution_height", SCREEN_HEIGHT),
            ("color_depth", COLOR_DEPTH),
        ])
        .send()
        .await?;
    let page = Page::load(response).await?;

    parse_devices(&page, login, poll)
}

fn parse_devices(page: &Page, login: DuoLogin, poll: PollPolicy) -> Result<Devices, FlowError> {
    let sid = page
        .url
        .query_pairs()
        .find(|(name, _)| name == "sid")
        .map(|(_, sid)| sid.into_owned())
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| {
            FlowError::Protocol("no sid found in DUO authentication URL".to_string())
        })?;

    let mut origin = page.url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);

    let challenge = Arc::new(Challenge {
        origin,
        sid,
        login,
        poll,
    });
    let devices = Devices::parse(&page.document(), &challenge);

    tracing::debug!(
        devices = ?devices.iter().map(Device::name).collect::<Vec<_>>(),
        "found DUO devices"
    );
    Ok(devices)
}

/// Hosts are normally bare (`api-xxxxxxxx.duosecurity.com`), but a full origin is accepted.
fn duo_host_url(duo_host: &str) -> Result<Url, FlowError> {
    let url = if duo_host.contains("://") {
        Url::parse(duo_host)
    } else {
        Url::parse(&format!("https://{duo_host}"))
    };
    url.map_err(|error| FlowError::Parse(format!("invalid DUO host {duo_host}: {error}")))
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.12; rv:52.0) Gecko/20100101 Firefox/52.0",
        ),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert("DNT", HeaderValue::from_static("1"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}

/// The devices registered for DUO, in the order DUO lists them.
#[derive(Clone, Debug, Default)]
pub struct Devices(Vec<Device>);

impl Devices {
    fn parse(document: &Document, challenge: &Arc<Challenge>) -> Self {
        let mut devices: Vec<Device> = Vec::new();

        let options = document.find(
            Name("select")
                .and(Attr("name", "device"))
                .descendant(Name("option")),
        );
        for name in options.filter_map(|option| option.attr("value")) {
            if devices.iter().all(|device| device.name != name) {
                devices.push(Device {
                    name: name.to_string(),
                    factors: Vec::new(),
                });
            }
        }

        for device in &mut devices {
            let inputs = Name("fieldset")
                .and(Attr("data-device-index", device.name.as_str()))
                .descendant(Name("input").and(Attr("name", "factor")));
            let names: Vec<&str> = document
                .find(inputs)
                .filter_map(|input| input.attr("value"))
                .filter(|name| !name.is_empty())
                .collect();

            for name in names {
                if device.factor(name).is_none() {
                    device.factors.push(Factor {
                        device: device.name.clone(),
                        name: name.to_string(),
                        challenge: Arc::clone(challenge),
                    });
                }
            }
        }

        Self(devices)
    }

    /// The device with the given name (e.g. `phone1`).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Device> {
        self.0.iter().find(|device| device.name == name)
    }

    /// Iterate over the devices.
    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.0.iter()
    }

    /// The number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether DUO listed no devices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Devices {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Devices {
    type Item = Device;
    type IntoIter = std::vec::IntoIter<Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A device registered for DUO, such as a phone.
///
/// A device may have no usable factors, in which case [`factors`](Self::factors) is empty.
#[derive(Clone, Debug)]
pub struct Device {
    name: String,
    factors: Vec<Factor>,
}

impl Device {
    /// DUO's identifier for the device (e.g. `phone1`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The factors the device supports, in the order DUO lists them.
    #[must_use]
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// The factor with the given name (e.g. `Duo Push`, `Phone Call`, `Passcode`).
    #[must_use]
    pub fn factor(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|factor| factor.name == name)
    }
}

/// One way of completing the challenge on a device.
///
/// Factors are bound to the challenge they were listed by, and only make sense within the
/// [`Session`] that started it.
#[derive(Clone)]
pub struct Factor {
    device: String,
    name: String,
    challenge: Arc<Challenge>,
}

impl Factor {
    /// The device this factor belongs to.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// The factor's name (e.g. `Duo Push`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Challenge the user with this factor and, once approved, load their AWS roles.
    ///
    /// `passcode` is only required for the `Passcode` factor. The status of the challenge is
    /// polled according to the flow's [`PollPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MfaTimeout`] if the challenge is not approved within the poll policy,
    /// in which case the whole login has to be retried. Other variants indicate that DUO or ADFS
    /// rejected a request or replied with something unexpected.
    pub async fn load_roles(
        &self,
        session: &Session,
        passcode: Option<&str>,
    ) -> Result<Roles, FlowError> {
        let span = tracing::debug_span!("duo_factor", device = %self.device, factor = %self.name);
        async {
            let challenge = &*self.challenge;
            let prompted = Frame::new(challenge)
                .submit_prompt(session, &self.device, &self.name, passcode)
                .await?;

            let allowed = challenge
                .poll
                .wait(session, &prompted)
                .await?
                .ok_or_else(|| FlowError::MfaTimeout {
                    device: self.device.clone(),
                    factor: self.name.clone(),
                    attempts: challenge.poll.max_attempts,
                })?;

            let form = allowed.saml_login_form(session).await?;
            saml::load_roles(session, &form).await
        }
        .instrument(span)
        .await
    }
}

impl fmt::Debug for Factor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Factor")
            .field("device", &self.device)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
