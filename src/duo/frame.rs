//! One DUO challenge, from prompt to result.
//!
//! The frame moves strictly forward: a [`Frame`] submits the prompt and becomes a
//! [`PromptedFrame`], which polls until it becomes an [`AllowedFrame`], which fetches the result.
//! Polling before prompting, or fetching a result before approval, is not expressible.

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT},
    Method,
};
use serde::Deserialize;

use super::Challenge;
use crate::{FlowError, Form, Session};

const ALLOW: &str = "allow";

pub(crate) struct Frame<'c> {
    challenge: &'c Challenge,
}

impl<'c> Frame<'c> {
    pub(crate) fn new(challenge: &'c Challenge) -> Self {
        Self { challenge }
    }

    /// Ask DUO to challenge `device` with `factor`; `passcode` is only needed for passcodes.
    pub(crate) async fn submit_prompt(
        self,
        session: &Session,
        device: &str,
        factor: &str,
        passcode: Option<&str>,
    ) -> Result<PromptedFrame<'c>, FlowError> {
        let mut data = vec![
            ("sid", self.challenge.sid.as_str()),
            ("device", device),
            ("factor", factor),
            ("out_of_date", ""),
        ];
        if let Some(passcode) = passcode.filter(|passcode| !passcode.is_empty()) {
            data.push(("passcode", passcode));
        }

        let reply = send(session, self.challenge, "prompt", &data).await?;
        let txid = reply
            .txid
            .filter(|txid| !txid.is_empty())
            .ok_or_else(|| FlowError::Protocol("prompt reply carried no txid".to_string()))?;

        tracing::debug!(%txid, "DUO prompt submitted");
        Ok(PromptedFrame {
            challenge: self.challenge,
            txid,
        })
    }
}

pub(crate) struct PromptedFrame<'c> {
    challenge: &'c Challenge,
    txid: String,
}

impl<'c> PromptedFrame<'c> {
    /// Check the challenge status once, returning the allowed frame if the user approved it.
    pub(crate) async fn poll(
        &self,
        session: &Session,
    ) -> Result<Option<AllowedFrame<'c>>, FlowError> {
        let data = [
            ("sid", self.challenge.sid.as_str()),
            ("txid", self.txid.as_str()),
        ];
        let reply = send(session, self.challenge, "status", &data).await?;

        if reply.status_code.as_deref() != Some(ALLOW) {
            tracing::trace!(status = ?reply.status_code, "DUO challenge not yet allowed");
            return Ok(None);
        }

        let result_url = reply
            .result_url
            .map(|url| url.strip_prefix("/frame/").map(str::to_string).unwrap_or(url))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                FlowError::Protocol("allowed status reply carried no result_url".to_string())
            })?;

        Ok(Some(AllowedFrame {
            challenge: self.challenge,
            txid: self.txid.clone(),
            result_url,
        }))
    }
}

pub(crate) struct AllowedFrame<'c> {
    challenge: &'c Challenge,
    txid: String,
    result_url: String,
}

impl AllowedFrame<'_> {
    /// Fetch the signed result and build the form that posts it back to ADFS.
    pub(crate) async fn saml_login_form(self, session: &Session) -> Result<Form, FlowError> {
        let data = [
            ("sid", self.challenge.sid.as_str()),
            ("txid", self.txid.as_str()),
        ];
        let reply = send(session, self.challenge, &self.result_url, &data).await?;
        let cookie = reply
            .cookie
            .ok_or_else(|| FlowError::Protocol("result reply carried no cookie".to_string()))?;

        let login = &self.challenge.login;
        let app = login.signed_request.app()?;

        let mut form = Form::new(Method::POST, login.options_url.clone());
        form.set("AuthMethod", login.auth_method.as_str());
        form.set("Context", login.context.as_str());
        form.set("sig_response", format!("{cookie}:{app}"));
        Ok(form)
    }
}

#[derive(Deserialize)]
struct Envelope {
    stat: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Reply {
    txid: Option<String>,
    status_code: Option<String>,
    result_url: Option<String>,
    cookie: Option<String>,
}

impl Reply {
    fn parse(body: &[u8]) -> Result<Self, FlowError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|error| FlowError::Protocol(format!("invalid frame reply: {error}")))?;

        if envelope.stat != "OK" {
            return Err(FlowError::Protocol(format!(
                "frame reply {}: {}",
                envelope.stat,
                envelope.message.unwrap_or_default()
            )));
        }

        match envelope.response {
            Some(response) if !response.is_null() => serde_json::from_value(response)
                .map_err(|error| FlowError::Protocol(format!("invalid frame reply: {error}"))),
            _ => Ok(Self::default()),
        }
    }
}

async fn send(
    session: &Session,
    challenge: &Challenge,
    action: &str,
    data: &[(&str, &str)],
) -> Result<Reply, FlowError> {
    let url = challenge
        .origin
        .join(&format!("frame/{action}"))
        .map_err(|error| FlowError::Parse(format!("invalid frame action {action}: {error}")))?;

    tracing::debug!(%url, "sending frame request");
    let response = session
        .client()
        .post(url.clone())
        .headers(frame_headers())
        .form(data)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FlowError::Status {
            url,
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await?;
    Reply::parse(&body)
}

fn frame_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 6.1; WOW64; Trident/7.0; rv:11.0) like Gecko",
        ),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("text/plain, */*; q=0.01"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_requires_ok_stat() {
        let error = Reply::parse(br#"{"stat": "FAIL", "code": 40002, "message": "Invalid request."}"#)
            .expect_err("fail stat");

        assert!(
            matches!(&error, FlowError::Protocol(message) if message == "frame reply FAIL: Invalid request."),
            "{error}"
        );
    }

    #[test]
    fn reply_fields_are_optional() {
        let reply = Reply::parse(
            br#"{"stat": "OK", "response": {"status_code": "pushed", "status": "Pushed a login request", "status_enum": 13}}"#,
        )
        .expect("reply");

        assert_eq!(reply.status_code.as_deref(), Some("pushed"));
        assert!(reply.txid.is_none());

        let reply = Reply::parse(br#"{"stat": "OK"}"#).expect("reply");
        assert!(reply.cookie.is_none());
    }

    #[test]
    fn reply_must_be_json() {
        assert!(matches!(
            Reply::parse(b"<html>"),
            Err(FlowError::Protocol(_))
        ));
    }
}
