//! Trust decisions for presented host keys.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::compute::InstanceHandle;

use super::{ConfirmationChannel, ConfirmationPrompt, HostKey, StdioConfirmation};

/// How long an operator has to answer a confirmation prompt by default.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors raised while configuring a trust policy.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PolicyError {
    /// The policy name is not one of `ACCEPT`, `REJECT` or `CONFIRM`.
    #[error("unknown first connection policy {name:?}; expected ACCEPT, REJECT or CONFIRM")]
    Unknown {
        /// Rejected name.
        name: String,
    },
}

/// What to do with a host key seen for the first time.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FirstContactPolicy {
    /// Trust the key without asking.
    Accept,
    /// Refuse the connection.
    Reject,
    /// Ask the operator.
    #[default]
    Confirm,
}

impl FirstContactPolicy {
    /// Configuration name of the policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::Confirm => "CONFIRM",
        }
    }
}

impl fmt::Display for FirstContactPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FirstContactPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(Self::Accept),
            "REJECT" => Ok(Self::Reject),
            "CONFIRM" => Ok(Self::Confirm),
            _ => Err(PolicyError::Unknown { name: s.to_owned() }),
        }
    }
}

/// Decides whether a presented host key may be trusted.
///
/// A known key is compared for equality. An unknown key is handled by the
/// configured [`FirstContactPolicy`]. The evaluator never remembers a
/// decision; pinning accepted keys is up to the caller.
#[derive(Clone)]
pub struct TrustPolicyEvaluator {
    policy: FirstContactPolicy,
    channel: Arc<dyn ConfirmationChannel>,
    timeout: Duration,
}

impl fmt::Debug for TrustPolicyEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustPolicyEvaluator")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TrustPolicyEvaluator {
    /// Creates an evaluator that confirms on the process terminal.
    #[must_use]
    pub fn new(policy: FirstContactPolicy) -> Self {
        Self {
            policy,
            channel: Arc::new(StdioConfirmation),
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    /// Replaces the confirmation channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn ConfirmationChannel>) -> Self {
        self.channel = channel;
        self
    }

    /// Replaces the confirmation timeout; an expired prompt is a rejection.
    ///
    /// Expiry abandons the channel's blocking call rather than interrupting
    /// it. See [`StdioConfirmation`](super::StdioConfirmation) for what that
    /// means for terminal prompts.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured first-contact policy.
    #[must_use]
    pub const fn policy(&self) -> FirstContactPolicy {
        self.policy
    }

    /// Returns whether `presented` may be trusted for `instance` at `address`.
    ///
    /// With an `existing` key the answer is plain equality. Without one the
    /// first-contact policy applies.
    pub async fn decide(
        &self,
        instance: &InstanceHandle,
        address: SocketAddr,
        presented: &HostKey,
        existing: Option<&HostKey>,
    ) -> bool {
        if let Some(trusted) = existing {
            let matches = trusted == presented;
            if !matches {
                tracing::warn!(
                    instance_id = %instance.id,
                    %address,
                    expected = %trusted.fingerprint(),
                    presented = %presented.fingerprint(),
                    "host key does not match the trusted key"
                );
            }
            return matches;
        }

        match self.policy {
            FirstContactPolicy::Accept => {
                tracing::info!(
                    instance_id = %instance.id,
                    %address,
                    fingerprint = %presented.fingerprint(),
                    "accepting host key on first contact"
                );
                true
            }
            FirstContactPolicy::Reject => {
                tracing::warn!(
                    instance_id = %instance.id,
                    %address,
                    fingerprint = %presented.fingerprint(),
                    "rejecting unknown host key"
                );
                false
            }
            FirstContactPolicy::Confirm => self.confirm(instance, address, presented).await,
        }
    }

    async fn confirm(
        &self,
        instance: &InstanceHandle,
        address: SocketAddr,
        presented: &HostKey,
    ) -> bool {
        let prompt = ConfirmationPrompt {
            instance_id: instance.id.clone(),
            instance_name: instance.name.clone(),
            address,
            fingerprint: presented.fingerprint(),
        };
        let channel = Arc::clone(&self.channel);
        let asking = tokio::task::spawn_blocking(move || channel.confirm(&prompt));

        match tokio::time::timeout(self.timeout, asking).await {
            Ok(Ok(Ok(accepted))) => {
                tracing::info!(instance_id = %instance.id, accepted, "operator answered host key prompt");
                accepted
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(instance_id = %instance.id, error = %err, "host key prompt failed");
                false
            }
            Ok(Err(err)) => {
                tracing::warn!(instance_id = %instance.id, error = %err, "host key prompt aborted");
                false
            }
            Err(_) => {
                tracing::warn!(
                    instance_id = %instance.id,
                    timeout_secs = self.timeout.as_secs(),
                    "host key prompt timed out"
                );
                false
            }
        }
    }
}
