//! Discovery of the instances owned by the configured accounts.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::retry::{DelayStrategy, RetryError, Retryer};

use super::{ComputeApi, ComputeError, InstanceAction, InstanceHandle, LifecycleState};

/// Errors raised while discovering instances or acting on them.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Listing an account's instances failed after retries.
    #[error("failed to list instances of account {account}: {source}")]
    Lookup {
        /// Account whose listing failed.
        account: String,
        /// Retry outcome carrying the last provider error.
        #[source]
        source: RetryError<ComputeError>,
    },
    /// A lifecycle action failed after retries.
    #[error("failed to {action} instance {instance_id}: {source}")]
    Action {
        /// Action that was requested.
        action: InstanceAction,
        /// Target instance.
        instance_id: String,
        /// Retry outcome carrying the last provider error.
        #[source]
        source: RetryError<ComputeError>,
    },
}

/// Instances known to the process, keyed by immutable id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceInventory {
    instances: BTreeMap<String, InstanceHandle>,
}

impl InstanceInventory {
    /// Builds an inventory from already-known instances.
    #[must_use]
    pub fn from_instances(instances: impl IntoIterator<Item = InstanceHandle>) -> Self {
        Self {
            instances: instances
                .into_iter()
                .map(|instance| (instance.id.clone(), instance))
                .collect(),
        }
    }

    /// Lists the instances of every account, retrying each listing up to
    /// `retries` times.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Lookup`] for the first account whose listing
    /// could not be completed.
    pub async fn discover<D>(
        api: &Arc<dyn ComputeApi>,
        accounts: &[String],
        retries: u32,
        delay: D,
    ) -> Result<Self, InventoryError>
    where
        D: DelayStrategy + Clone + 'static,
    {
        let mut inventory = Self::default();
        for account in accounts {
            let task_api = Arc::clone(api);
            let task_account = account.clone();
            let listed = Retryer::builder(move || {
                let api = Arc::clone(&task_api);
                let account = task_account.clone();
                async move { api.list_instances(&account).await }
            })
            .retries(retries)
            .delay(delay.clone())
            .classify(super::classify_compute_error)
            .build()
            .run()
            .await
            .map_err(|source| InventoryError::Lookup {
                account: account.clone(),
                source,
            })?;

            tracing::info!(account = %account, count = listed.len(), "discovered instances");
            inventory.extend(listed);
        }
        Ok(inventory)
    }

    /// Requests `action` on `instance`, retrying transient provider errors.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Action`] once retries are exhausted, the
    /// instance is gone, or the request is cancelled.
    pub async fn perform<D>(
        api: &Arc<dyn ComputeApi>,
        instance: &InstanceHandle,
        action: InstanceAction,
        retries: u32,
        delay: D,
    ) -> Result<LifecycleState, InventoryError>
    where
        D: DelayStrategy + 'static,
    {
        let task_api = Arc::clone(api);
        let task_instance = instance.clone();
        Retryer::builder(move || {
            let api = Arc::clone(&task_api);
            let instance = task_instance.clone();
            async move { api.perform_action(&instance, action).await }
        })
        .retries(retries)
        .delay(delay)
        .classify(super::classify_compute_error)
        .build()
        .run()
        .await
        .map_err(|source| InventoryError::Action {
            action,
            instance_id: instance.id.clone(),
            source,
        })
    }

    /// Adds or replaces instances.
    pub fn extend(&mut self, instances: impl IntoIterator<Item = InstanceHandle>) {
        self.instances.extend(
            instances
                .into_iter()
                .map(|instance| (instance.id.clone(), instance)),
        );
    }

    /// Looks up an instance by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&InstanceHandle> {
        self.instances.get(id)
    }

    /// Iterates over instance ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    /// Iterates over every known instance.
    pub fn instances(&self) -> impl Iterator<Item = &InstanceHandle> {
        self.instances.values()
    }

    /// Number of known instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` when no instance is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
