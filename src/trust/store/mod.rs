//! Durable per-resource credential and host-key mapping.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use uuid::Uuid;

use crate::compute::InstanceInventory;

use super::document::{self, SkippedRecord};
use super::{CredentialRecord, HostKey};

/// Key of the record used when a resource has none of its own.
pub const DEFAULT_RECORD_KEY: &str = "@default";

/// Errors raised by the trust store.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the trust file is not a JSON object.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// Raised when records cannot be rendered.
    #[error("failed to encode credential records: {message}")]
    Encode {
        /// Serializer message.
        message: String,
    },
    /// Raised when the backing path has no file name.
    #[error("trust store path {path} is missing a file name")]
    InvalidPath {
        /// Configured path.
        path: Utf8PathBuf,
    },
    /// Raised when a record key is not a well-formed resource id.
    #[error("invalid resource id: {resource_id:?}")]
    InvalidResourceId {
        /// Rejected key.
        resource_id: String,
    },
    /// Raised when neither the resource nor the default has a record.
    #[error("no credentials configured for {resource_id} and no default record")]
    NoCredentials {
        /// Resource that was looked up.
        resource_id: String,
    },
}

/// Outcome of [`TrustStore::trust_host_key`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum PinOutcome {
    /// The key was pinned and the store is dirty.
    Pinned,
    /// The same key was already pinned; nothing changed.
    AlreadyPinned,
    /// Another key is already pinned and was kept.
    Conflict {
        /// Key that stays pinned.
        pinned: HostKey,
    },
}

/// Summary of a [`TrustStore::load`] call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadReport {
    /// Whether the backing file existed.
    pub file_found: bool,
    /// Number of records added to the store.
    pub loaded: usize,
    /// Records that were skipped.
    pub skipped: Vec<SkippedRecord>,
}

/// Credential records keyed by resource id, persisted as a JSON file.
///
/// Reads and writes of the mapping are guarded by a mutex that is never held
/// across I/O. Mutations set a dirty flag; the owner decides when to flush,
/// usually through [`AutoSave`](super::AutoSave).
#[derive(Debug)]
pub struct TrustStore {
    path: Utf8PathBuf,
    records: Mutex<HashMap<String, CredentialRecord>>,
    dirty: AtomicBool,
    save_lock: Mutex<()>,
}

impl TrustStore {
    /// Creates an empty store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, CredentialRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the backing file into the store.
    ///
    /// A missing file leaves the store untouched. Records that fail to decode
    /// are skipped and listed in the report. Loaded records replace in-memory
    /// records with the same id and do not mark the store dirty.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::Io`] when the file exists but cannot be
    /// read, or [`TrustStoreError::Parse`] when it is not a JSON object.
    pub fn load(&self) -> Result<LoadReport, TrustStoreError> {
        let Some(contents) = self.read_file()? else {
            tracing::warn!(path = %self.path, "trust file not found; starting with no credentials");
            return Ok(LoadReport::default());
        };

        let decoded = document::decode(&contents).map_err(|err| TrustStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        let loaded = decoded.records.len();
        self.records().extend(decoded.records);
        tracing::info!(path = %self.path, loaded, skipped = decoded.skipped.len(), "loaded credentials");

        Ok(LoadReport {
            file_found: true,
            loaded,
            skipped: decoded.skipped,
        })
    }

    /// Loads the backing file, then warns about instances in `inventory`
    /// that have no record of their own.
    ///
    /// # Errors
    ///
    /// Propagates [`TrustStore::load`] errors.
    pub fn load_with_inventory(
        &self,
        inventory: &InstanceInventory,
    ) -> Result<LoadReport, TrustStoreError> {
        let report = self.load()?;
        let missing = self.missing_records(inventory.ids());
        if !missing.is_empty() {
            let ids = missing.into_iter().collect::<Vec<_>>().join(", ");
            tracing::warn!(instances = %ids, "instances have no dedicated credentials");
        }
        Ok(report)
    }

    /// Returns the ids among `ids` that have no record of their own.
    #[must_use]
    pub fn missing_records<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let records = self.records();
        ids.into_iter()
            .filter(|id| !records.contains_key(*id))
            .map(str::to_owned)
            .collect()
    }

    /// Writes every record to the backing file, replacing it atomically.
    ///
    /// The records are rendered to a temporary sibling file, synced, and
    /// renamed over the target. Concurrent calls are serialised.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError`] when rendering or any file operation
    /// fails; the previous file is left in place.
    pub fn save(&self) -> Result<(), TrustStoreError> {
        let _saving = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot();
        let rendered = document::encode(&snapshot).map_err(|err| TrustStoreError::Encode {
            message: err.to_string(),
        })?;
        self.replace_file(rendered.as_bytes())?;
        tracing::info!(path = %self.path, records = snapshot.len(), "saved credentials");
        Ok(())
    }

    /// Saves when the store is dirty, clearing the flag first.
    ///
    /// A failed save leaves the flag cleared; the next mutation schedules
    /// another attempt. Returns whether a save was attempted.
    ///
    /// # Errors
    ///
    /// Propagates [`TrustStore::save`] errors.
    pub fn flush_if_dirty(&self) -> Result<bool, TrustStoreError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        self.save().map(|()| true)
    }

    /// Returns a copy of the record stored for `resource_id`.
    #[must_use]
    pub fn get(&self, resource_id: &str) -> Option<CredentialRecord> {
        self.records().get(resource_id).cloned()
    }

    /// Returns a copy of the default record.
    #[must_use]
    pub fn get_default(&self) -> Option<CredentialRecord> {
        self.get(DEFAULT_RECORD_KEY)
    }

    /// Returns the record for `resource_id`, falling back to the default.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::NoCredentials`] when neither exists.
    pub fn resolve(&self, resource_id: &str) -> Result<CredentialRecord, TrustStoreError> {
        let records = self.records();
        records
            .get(resource_id)
            .or_else(|| records.get(DEFAULT_RECORD_KEY))
            .cloned()
            .ok_or_else(|| TrustStoreError::NoCredentials {
                resource_id: resource_id.to_owned(),
            })
    }

    /// Inserts or replaces the record for `resource_id` and marks the store
    /// dirty.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::InvalidResourceId`] for malformed ids.
    pub fn put(&self, resource_id: &str, record: CredentialRecord) -> Result<(), TrustStoreError> {
        if !document::is_valid_resource_id(resource_id) {
            return Err(TrustStoreError::InvalidResourceId {
                resource_id: resource_id.to_owned(),
            });
        }
        self.records().insert(resource_id.to_owned(), record);
        self.mark_dirty();
        Ok(())
    }

    /// Replaces the default record.
    pub fn set_default(&self, record: CredentialRecord) {
        self.records()
            .insert(String::from(DEFAULT_RECORD_KEY), record);
        self.mark_dirty();
    }

    /// Pins `key` as the trusted host key of `resource_id` unless a key is
    /// already pinned.
    ///
    /// The check and the write happen under one lock, so a record's key goes
    /// from absent to present at most once until it is revoked. A resource
    /// served by the default record gets its own copy of that record carrying
    /// the key, so the default stays unpinned.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::NoCredentials`] when the resource has no
    /// record and there is no default, or
    /// [`TrustStoreError::InvalidResourceId`] for malformed ids.
    pub fn trust_host_key(
        &self,
        resource_id: &str,
        key: HostKey,
    ) -> Result<PinOutcome, TrustStoreError> {
        if !document::is_valid_resource_id(resource_id) {
            return Err(TrustStoreError::InvalidResourceId {
                resource_id: resource_id.to_owned(),
            });
        }
        {
            let mut records = self.records();
            let mut record = records
                .get(resource_id)
                .or_else(|| records.get(DEFAULT_RECORD_KEY))
                .cloned()
                .ok_or_else(|| TrustStoreError::NoCredentials {
                    resource_id: resource_id.to_owned(),
                })?;
            if let Some(pinned) = record.trusted_host_key() {
                return Ok(if *pinned == key {
                    PinOutcome::AlreadyPinned
                } else {
                    PinOutcome::Conflict {
                        pinned: pinned.clone(),
                    }
                });
            }
            record.set_trusted_host_key(Some(key));
            records.insert(resource_id.to_owned(), record);
        }
        self.mark_dirty();
        Ok(PinOutcome::Pinned)
    }

    /// Clears the pinned host key of `resource_id`. Returns whether a key was
    /// removed.
    pub fn revoke_host_key(&self, resource_id: &str) -> bool {
        let revoked = self
            .records()
            .get_mut(resource_id)
            .and_then(|record| {
                let previous = record.trusted_host_key().cloned();
                record.set_trusted_host_key(None);
                previous
            })
            .is_some();
        if revoked {
            tracing::info!(resource_id, "revoked trusted host key");
            self.mark_dirty();
        }
        revoked
    }

    /// Flags unsaved changes.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns `true` when there are unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Copies every record, sorted by resource id.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, CredentialRecord> {
        self.records()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Number of records, the default included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns `true` when the store holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn split_path(&self) -> Result<(&Utf8Path, &str), TrustStoreError> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| TrustStoreError::InvalidPath {
                path: self.path.clone(),
            })?;
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok((parent, file_name))
    }

    fn io_error(path: &Utf8Path, err: &io::Error) -> TrustStoreError {
        TrustStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    fn read_file(&self) -> Result<Option<String>, TrustStoreError> {
        let (parent, file_name) = self.split_path()?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_error(parent, &err)),
        };
        match dir.read_to_string(file_name) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(&self.path, &err)),
        }
    }

    fn replace_file(&self, contents: &[u8]) -> Result<(), TrustStoreError> {
        let (parent, file_name) = self.split_path()?;
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| Self::io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| Self::io_error(parent, &err))?;

        let temp_name = format!(".{file_name}.{}.tmp", Uuid::new_v4().simple());
        let written = dir.create(&temp_name).and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|()| dir.rename(&temp_name, &dir, file_name)) {
            dir.remove_file(&temp_name).ok();
            return Err(Self::io_error(&self.path, &err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
