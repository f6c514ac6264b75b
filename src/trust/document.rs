//! JSON representation of the trust file.
//!
//! The file is an object keyed by resource id. Each value carries
//! `authType`, `username`, the fields of its authentication kind, and
//! `serverKey` (an OpenSSH public-key line or `null`). Decoding is lenient
//! per record: a broken record is skipped and reported, never fatal to the
//! rest of the file.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use super::{AuthKind, Authentication, CredentialRecord, HostKey};

/// Longest resource id accepted as a record key.
pub const MAX_RESOURCE_ID_LEN: usize = 255;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordDocument {
    auth_type: String,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_password: Option<String>,
    #[serde(default)]
    server_key: Option<String>,
}

impl From<&CredentialRecord> for RecordDocument {
    fn from(record: &CredentialRecord) -> Self {
        let (password, private_key_path, key_password) = match record.authentication() {
            Authentication::Password { password } => (Some(password.clone()), None, None),
            Authentication::PublicKey {
                key_path,
                key_passphrase,
            } => (None, Some(key_path.to_string()), key_passphrase.clone()),
        };
        Self {
            auth_type: record.auth_kind().as_str().to_owned(),
            username: record.username().to_owned(),
            password,
            private_key_path,
            key_password,
            server_key: record.trusted_host_key().map(HostKey::to_openssh),
        }
    }
}

/// A record left out of a decoded document, with the reason.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedRecord {
    /// Key the record was stored under.
    pub id: String,
    /// Why the record could not be used.
    pub reason: String,
}

/// Outcome of decoding a trust file.
#[derive(Debug, Default)]
pub struct DecodedDocument {
    /// Records that decoded cleanly, keyed by resource id.
    pub records: BTreeMap<String, CredentialRecord>,
    /// Records that were skipped.
    pub skipped: Vec<SkippedRecord>,
}

/// Returns `true` when `id` can be used as a record key: non-empty, at most
/// [`MAX_RESOURCE_ID_LEN`] bytes, and free of whitespace and control
/// characters.
#[must_use]
pub fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_RESOURCE_ID_LEN
        && !id
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control())
}

/// Renders records as a pretty-printed JSON object with sorted keys.
///
/// # Errors
///
/// Returns the serializer error; with string-only fields this does not
/// happen in practice.
pub fn encode<'a>(
    records: impl IntoIterator<Item = (&'a String, &'a CredentialRecord)>,
) -> Result<String, serde_json::Error> {
    let documents: BTreeMap<&str, RecordDocument> = records
        .into_iter()
        .map(|(id, record)| (id.as_str(), RecordDocument::from(record)))
        .collect();
    serde_json::to_string_pretty(&documents)
}

/// Parses a trust file.
///
/// An empty file or a JSON `null` yields no records.
///
/// # Errors
///
/// Returns the parser error when the content is not a JSON object. Problems
/// confined to a single record are reported in
/// [`DecodedDocument::skipped`] instead.
pub fn decode(contents: &str) -> Result<DecodedDocument, serde_json::Error> {
    if contents.trim().is_empty() {
        return Ok(DecodedDocument::default());
    }
    let raw: Option<BTreeMap<String, serde_json::Value>> = serde_json::from_str(contents)?;
    let mut decoded = DecodedDocument::default();
    for (id, value) in raw.unwrap_or_default() {
        match decode_record(&id, value) {
            Ok(record) => {
                decoded.records.insert(id, record);
            }
            Err(reason) => {
                tracing::warn!(resource_id = %id, %reason, "skipping credential record");
                decoded.skipped.push(SkippedRecord { id, reason });
            }
        }
    }
    Ok(decoded)
}

fn decode_record(id: &str, value: serde_json::Value) -> Result<CredentialRecord, String> {
    if !is_valid_resource_id(id) {
        return Err(String::from("invalid resource id"));
    }
    let document: RecordDocument =
        serde_json::from_value(value).map_err(|err| format!("malformed record: {err}"))?;
    let kind: AuthKind = document
        .auth_type
        .parse()
        .map_err(|err: super::UnknownAuthKind| err.to_string())?;

    let authentication = match kind {
        AuthKind::Password => Authentication::Password {
            password: document
                .password
                .ok_or_else(|| String::from("password record without `password`"))?,
        },
        AuthKind::PublicKey => Authentication::PublicKey {
            key_path: document
                .private_key_path
                .map(Utf8PathBuf::from)
                .ok_or_else(|| String::from("public-key record without `privateKeyPath`"))?,
            key_passphrase: document.key_password,
        },
    };

    let mut record = CredentialRecord::new(document.username, authentication);
    if let Some(line) = document.server_key {
        match HostKey::from_openssh(&line) {
            Ok(key) => record.set_trusted_host_key(Some(key)),
            Err(err) => {
                tracing::warn!(
                    resource_id = %id,
                    error = %err,
                    "ignoring unparseable server key; the resource is treated as untrusted"
                );
            }
        }
    }
    Ok(record)
}
