use std::time::Duration;

use super::frame::{AllowedFrame, PromptedFrame};
use crate::{FlowError, Session};

/// How long to wait for the user to approve a DUO challenge.
///
/// The challenge status is checked up to `max_attempts` times, `interval` apart. The default of 20
/// checks one second apart matches the time DUO gives a push notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// The delay between consecutive status checks.
    pub interval: Duration,

    /// The maximum number of status checks.
    pub max_attempts: u32,
}

impl PollPolicy {
    /// A policy with the given interval and attempt ceiling.
    #[must_use]
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Poll `frame` until allowed, or return `None` once the attempts are exhausted.
    pub(crate) async fn wait<'c>(
        &self,
        session: &Session,
        frame: &PromptedFrame<'c>,
    ) -> Result<Option<AllowedFrame<'c>>, FlowError> {
        for attempt in 1..=self.max_attempts {
            if let Some(allowed) = frame.poll(session).await? {
                tracing::debug!(attempt, "DUO challenge allowed");
                return Ok(Some(allowed));
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Ok(None)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 20)
    }
}
