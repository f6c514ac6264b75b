//! Boundary to the cloud provider's compute API.
//!
//! The provider SDK itself lives outside this crate. Implementations of
//! [`ComputeApi`] wrap it; everything else talks to the trait so calls can be
//! retried, watched, and replaced with scripted doubles in tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::retry::ErrorAction;

mod inventory;
mod state;

pub use inventory::{InstanceInventory, InventoryError};
pub use state::{InstanceAction, LifecycleState, ParseNameError};

/// Identifies a compute instance owned by a provider account.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstanceHandle {
    /// Immutable provider identifier.
    pub id: String,
    /// Display name; not unique.
    pub name: String,
    /// Account (tenancy) the instance belongs to.
    pub account: String,
}

impl InstanceHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            account: account.into(),
        }
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Errors raised by compute API implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// The provider rejected or failed the request.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
    /// The instance does not exist or is not visible to the account.
    #[error("instance {instance_id} not found")]
    NotFound {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// The request was interrupted by a shutdown or cancellation.
    #[error("request cancelled")]
    Cancelled,
}

impl ComputeError {
    /// Returns `true` when the error signals cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Retry classification for compute errors: cancellation stops immediately,
/// missing instances are not worth retrying, everything else is transient.
#[must_use]
pub const fn classify_compute_error(error: &ComputeError) -> ErrorAction {
    match error {
        ComputeError::Cancelled => ErrorAction::Cancel,
        ComputeError::NotFound { .. } => ErrorAction::Stop,
        ComputeError::Provider { .. } => ErrorAction::Retry,
    }
}

/// Future returned by compute API operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Operations this crate consumes from the provider.
pub trait ComputeApi: Send + Sync {
    /// Lists the instances owned by `account`.
    fn list_instances<'a>(&'a self, account: &'a str) -> ComputeFuture<'a, Vec<InstanceHandle>>;

    /// Returns the current lifecycle state of `instance`.
    fn instance_state<'a>(
        &'a self,
        instance: &'a InstanceHandle,
    ) -> ComputeFuture<'a, LifecycleState>;

    /// Requests `action` and returns the state reported right after.
    fn perform_action<'a>(
        &'a self,
        instance: &'a InstanceHandle,
        action: InstanceAction,
    ) -> ComputeFuture<'a, LifecycleState>;
}
