//! Server host keys in OpenSSH public-key form.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while parsing a host key.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostKeyError {
    /// The line does not have the `<algorithm> <base64> [comment]` shape.
    #[error("malformed host key line: expected `<algorithm> <base64-key> [comment]`")]
    Malformed,
    /// The key material is not valid base64.
    #[error("host key material is not valid base64: {message}")]
    Encoding {
        /// Decoder message.
        message: String,
    },
    /// The wire blob does not start with a well-formed algorithm name.
    #[error("host key blob is truncated or malformed")]
    Truncated,
    /// The declared algorithm differs from the one inside the blob.
    #[error("host key declares {declared} but its material is {embedded}")]
    AlgorithmMismatch {
        /// Algorithm written in front of the key material.
        declared: String,
        /// Algorithm encoded at the start of the blob.
        embedded: String,
    },
}

/// A server public key as presented during the SSH handshake.
///
/// Equality compares the algorithm and key material only; the comment is
/// informational.
#[derive(Clone, Debug)]
pub struct HostKey {
    algorithm: String,
    blob: Vec<u8>,
    comment: Option<String>,
}

impl HostKey {
    /// Builds a key from its SSH wire encoding, reading the algorithm name
    /// from the blob.
    ///
    /// # Errors
    ///
    /// Returns [`HostKeyError::Truncated`] when the blob does not start with a
    /// length-prefixed algorithm name.
    pub fn from_wire(blob: Vec<u8>) -> Result<Self, HostKeyError> {
        let algorithm = embedded_algorithm(&blob)?;
        Ok(Self {
            algorithm,
            blob,
            comment: None,
        })
    }

    /// Parses an OpenSSH public-key line such as `ssh-ed25519 AAAA... host`.
    ///
    /// # Errors
    ///
    /// Returns [`HostKeyError`] when the line is malformed, the material is
    /// not base64, or the declared algorithm disagrees with the blob.
    pub fn from_openssh(line: &str) -> Result<Self, HostKeyError> {
        let (algorithm, after_algorithm) = line
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(HostKeyError::Malformed)?;
        let remainder = after_algorithm.trim_start();
        let (material, comment) = remainder
            .split_once(char::is_whitespace)
            .map_or((remainder, None), |(material, comment)| {
                (material, Some(comment))
            });
        if material.is_empty() {
            return Err(HostKeyError::Malformed);
        }

        let blob = STANDARD
            .decode(material)
            .map_err(|err| HostKeyError::Encoding {
                message: err.to_string(),
            })?;
        let embedded = embedded_algorithm(&blob)?;
        if embedded != algorithm {
            return Err(HostKeyError::AlgorithmMismatch {
                declared: algorithm.to_owned(),
                embedded,
            });
        }

        Ok(Self {
            algorithm: embedded,
            blob,
            comment: comment
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_owned),
        })
    }

    /// Key algorithm, for example `ssh-ed25519`.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// SSH wire encoding of the key.
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Trailing comment of the OpenSSH line, when present.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Returns a copy carrying `comment`.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// OpenSSH-style fingerprint: `SHA256:` followed by the unpadded base64
    /// digest of the wire blob.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        format!("SHA256:{}", STANDARD_NO_PAD.encode(digest.as_slice()))
    }

    /// Renders the key as an OpenSSH public-key line.
    #[must_use]
    pub fn to_openssh(&self) -> String {
        let material = STANDARD.encode(&self.blob);
        match &self.comment {
            Some(comment) => format!("{} {material} {comment}", self.algorithm),
            None => format!("{} {material}", self.algorithm),
        }
    }
}

impl PartialEq for HostKey {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.blob == other.blob
    }
}

impl Eq for HostKey {}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_openssh())
    }
}

impl FromStr for HostKey {
    type Err = HostKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_openssh(s)
    }
}

fn embedded_algorithm(blob: &[u8]) -> Result<String, HostKeyError> {
    let prefix = blob.get(..4).ok_or(HostKeyError::Truncated)?;
    let len = prefix
        .iter()
        .fold(0_usize, |acc, byte| (acc << 8) | usize::from(*byte));
    let end = len.checked_add(4).ok_or(HostKeyError::Truncated)?;
    let name = blob
        .get(4..end)
        .filter(|name| !name.is_empty())
        .ok_or(HostKeyError::Truncated)?;
    String::from_utf8(name.to_vec()).map_err(|_| HostKeyError::Truncated)
}
