//! Trust-on-first-use credentials and host keys.
//!
//! [`TrustStore`] keeps one [`CredentialRecord`] per resource, plus an
//! optional default, in a JSON file. [`HostKeyVerifier`] is the hook the
//! session layer calls with the key a server presents: known keys must match,
//! unknown keys go through the [`FirstContactPolicy`] and are pinned when
//! accepted. [`AutoSave`] writes dirty stores back in the background.

mod autosave;
mod confirm;
pub mod document;
mod host_key;
mod policy;
mod record;
mod store;
mod verifier;

pub use autosave::{AutoSave, AutoSaveSchedule};
pub use confirm::{
    ConfirmationChannel, ConfirmationPrompt, LineConfirmation, StdioConfirmation, is_affirmative,
};
pub use document::SkippedRecord;
pub use host_key::{HostKey, HostKeyError};
pub use policy::{
    DEFAULT_CONFIRMATION_TIMEOUT, FirstContactPolicy, PolicyError, TrustPolicyEvaluator,
};
pub use record::{AuthKind, Authentication, CredentialRecord, UnknownAuthKind};
pub use store::{DEFAULT_RECORD_KEY, LoadReport, PinOutcome, TrustStore, TrustStoreError};
pub use verifier::{HostKeyVerifier, VerifyError};
