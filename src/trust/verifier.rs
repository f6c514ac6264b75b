//! Host-key check used by the session layer before authenticating.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::compute::InstanceHandle;

use super::{HostKey, PinOutcome, TrustPolicyEvaluator, TrustStore, TrustStoreError};

/// Why a host key was not accepted.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The presented key differs from the pinned one.
    #[error(
        "host key for {instance_id} changed: expected {expected_fingerprint}, got {presented_fingerprint}"
    )]
    Mismatch {
        /// Resource being contacted.
        instance_id: String,
        /// Fingerprint of the pinned key.
        expected_fingerprint: String,
        /// Fingerprint of the presented key.
        presented_fingerprint: String,
    },
    /// The first-contact policy or the operator refused the key.
    #[error("host key {fingerprint} for {instance_id} was not trusted")]
    Rejected {
        /// Resource being contacted.
        instance_id: String,
        /// Fingerprint of the presented key.
        fingerprint: String,
    },
    /// The store has no credentials for the resource or could not pin the key.
    #[error(transparent)]
    Store(#[from] TrustStoreError),
}

/// Checks presented host keys against the trust store and pins accepted
/// first-contact keys.
#[derive(Clone, Debug)]
pub struct HostKeyVerifier {
    store: Arc<TrustStore>,
    evaluator: Arc<TrustPolicyEvaluator>,
}

impl HostKeyVerifier {
    /// Creates a verifier over `store` using `evaluator` for decisions.
    #[must_use]
    pub const fn new(store: Arc<TrustStore>, evaluator: Arc<TrustPolicyEvaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Store consulted and updated by the verifier.
    #[must_use]
    pub const fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    /// Verifies `presented` for `instance` reached at `address`.
    ///
    /// On a first-contact acceptance the key is pinned in the store, which is
    /// then dirty. If another caller pinned a different key in the meantime,
    /// that key is kept and this call fails with a mismatch. A rejection
    /// leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Mismatch`] when a pinned key differs,
    /// [`VerifyError::Rejected`] when the policy refuses a new key, and
    /// [`VerifyError::Store`] when no credentials exist for the instance.
    pub async fn verify(
        &self,
        instance: &InstanceHandle,
        address: SocketAddr,
        presented: &HostKey,
    ) -> Result<(), VerifyError> {
        let record = self.store.resolve(&instance.id)?;
        let existing = record.trusted_host_key();

        if !self
            .evaluator
            .decide(instance, address, presented, existing)
            .await
        {
            return Err(existing.map_or_else(
                || VerifyError::Rejected {
                    instance_id: instance.id.clone(),
                    fingerprint: presented.fingerprint(),
                },
                |expected| VerifyError::Mismatch {
                    instance_id: instance.id.clone(),
                    expected_fingerprint: expected.fingerprint(),
                    presented_fingerprint: presented.fingerprint(),
                },
            ));
        }

        if existing.is_some() {
            return Ok(());
        }
        match self.store.trust_host_key(&instance.id, presented.clone())? {
            PinOutcome::Pinned => {
                tracing::info!(
                    instance_id = %instance.id,
                    fingerprint = %presented.fingerprint(),
                    "pinned host key"
                );
                Ok(())
            }
            PinOutcome::AlreadyPinned => Ok(()),
            PinOutcome::Conflict { pinned } => {
                tracing::warn!(
                    instance_id = %instance.id,
                    expected = %pinned.fingerprint(),
                    presented = %presented.fingerprint(),
                    "another host key was pinned concurrently"
                );
                Err(VerifyError::Mismatch {
                    instance_id: instance.id.clone(),
                    expected_fingerprint: pinned.fingerprint(),
                    presented_fingerprint: presented.fingerprint(),
                })
            }
        }
    }
}
