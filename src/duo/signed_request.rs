use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::FlowError;

static TX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(TX\|[^:]+):APP\|").expect("TX pattern is valid"));
static APP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*(APP\|[^:]+)").expect("APP pattern is valid"));

/// The signed request ADFS passes to DUO, of the form `TX|...:APP|...`.
///
/// The `TX` half is sent when initiating the challenge; the `APP` half is appended to DUO's
/// response cookie when posting the result back to ADFS.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SignedRequest(String);

impl SignedRequest {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[cfg(test)]
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn tx(&self) -> Result<&str, FlowError> {
        self.capture(&TX, "TX")
    }

    pub(crate) fn app(&self) -> Result<&str, FlowError> {
        self.capture(&APP, "APP")
    }

    fn capture(&self, pattern: &Regex, component: &str) -> Result<&str, FlowError> {
        pattern
            .captures(&self.0)
            .and_then(|captures| captures.get(1))
            .map(|capture| capture.as_str())
            .ok_or_else(|| {
                FlowError::Protocol(format!(
                    "malformed signed transaction: no {component} component"
                ))
            })
    }
}

impl fmt::Debug for SignedRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SignedRequest(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::tests::SIGNED_REQUEST;

    #[test]
    fn splits_tx_and_app() {
        let request = SignedRequest::new(SIGNED_REQUEST);

        assert_eq!(
            request.tx().expect("tx"),
            "TX|ZGVjYWZccHJlaXNpbmdlcnxE|f68c38f2d38662f3dad7d916a257b"
        );
        assert_eq!(
            request.app().expect("app"),
            "APP|ZGVjYWZccHJlaXNpbmdlcnxESVBFSV|7be95a3671b67964fe1"
        );
    }

    #[test]
    fn components_are_found_for_any_payload() {
        for (tx, app) in [("TX|a", "APP|b"), ("TX|x|y|z", "APP|1|2"), ("TX||", "APP||")] {
            let request = SignedRequest::new(format!("{tx}:{app}"));

            assert_eq!(request.tx().expect("tx"), tx);
            assert_eq!(request.app().expect("app"), app);
        }
    }

    #[test]
    fn malformed_requests_are_protocol_errors() {
        for value in [
            "",
            "TX|abc",
            "APP|abc",
            "TX|abc:APP",
            "TX|abc:APPLE",
            "ERR|Something went wrong",
        ] {
            let request = SignedRequest::new(value);

            assert!(
                matches!(request.tx(), Err(FlowError::Protocol(_))),
                "{value} should have no tx"
            );
        }
        assert!(matches!(
            SignedRequest::new("TX|abc:").app(),
            Err(FlowError::Protocol(_))
        ));
    }
}
