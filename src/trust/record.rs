//! Credentials kept per compute resource.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use super::HostKey;

/// Authentication method of a credential record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthKind {
    /// Username and password.
    Password,
    /// Username and private key file.
    PublicKey,
}

impl AuthKind {
    /// Name stored in the trust file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "PASSWORD",
            Self::PublicKey => "PUBLIC_KEY",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an authentication kind name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown authentication type: {value}")]
pub struct UnknownAuthKind {
    /// Rejected input.
    pub value: String,
}

impl FromStr for AuthKind {
    type Err = UnknownAuthKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PASSWORD" => Ok(Self::Password),
            "PUBLIC_KEY" | "PUBLICKEY" => Ok(Self::PublicKey),
            _ => Err(UnknownAuthKind {
                value: s.to_owned(),
            }),
        }
    }
}

/// Secret material used to authenticate against a resource.
#[derive(Clone, Eq, PartialEq)]
pub enum Authentication {
    /// Password authentication.
    Password {
        /// Login password.
        password: String,
    },
    /// Public-key authentication.
    PublicKey {
        /// Location of the private key file.
        key_path: Utf8PathBuf,
        /// Passphrase protecting the key, if any.
        key_passphrase: Option<String>,
    },
}

impl Authentication {
    /// Kind of this authentication.
    #[must_use]
    pub const fn kind(&self) -> AuthKind {
        match self {
            Self::Password { .. } => AuthKind::Password,
            Self::PublicKey { .. } => AuthKind::PublicKey,
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            Self::PublicKey {
                key_path,
                key_passphrase,
            } => f
                .debug_struct("PublicKey")
                .field("key_path", key_path)
                .field(
                    "key_passphrase",
                    &key_passphrase.as_ref().map(|_| "<redacted>"),
                )
                .finish(),
        }
    }
}

/// Login credentials for one resource plus the host key trusted for it.
///
/// The authentication kind is fixed at construction; only the trusted key
/// changes afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialRecord {
    username: String,
    authentication: Authentication,
    trusted_host_key: Option<HostKey>,
}

impl CredentialRecord {
    /// Creates a password record.
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(
            username,
            Authentication::Password {
                password: password.into(),
            },
        )
    }

    /// Creates a public-key record.
    #[must_use]
    pub fn public_key(
        username: impl Into<String>,
        key_path: impl Into<Utf8PathBuf>,
        key_passphrase: Option<String>,
    ) -> Self {
        Self::new(
            username,
            Authentication::PublicKey {
                key_path: key_path.into(),
                key_passphrase,
            },
        )
    }

    /// Creates a record from explicit authentication material.
    #[must_use]
    pub fn new(username: impl Into<String>, authentication: Authentication) -> Self {
        Self {
            username: username.into(),
            authentication,
            trusted_host_key: None,
        }
    }

    /// Returns the record with `key` pinned as the trusted host key.
    #[must_use]
    pub fn with_trusted_host_key(mut self, key: HostKey) -> Self {
        self.trusted_host_key = Some(key);
        self
    }

    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Authentication material.
    #[must_use]
    pub const fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// Authentication kind.
    #[must_use]
    pub const fn auth_kind(&self) -> AuthKind {
        self.authentication.kind()
    }

    /// Private key location for public-key records.
    #[must_use]
    pub fn key_path(&self) -> Option<&Utf8Path> {
        match &self.authentication {
            Authentication::PublicKey { key_path, .. } => Some(key_path.as_path()),
            Authentication::Password { .. } => None,
        }
    }

    /// Host key pinned for the resource, when one has been trusted.
    #[must_use]
    pub const fn trusted_host_key(&self) -> Option<&HostKey> {
        self.trusted_host_key.as_ref()
    }

    pub(crate) fn set_trusted_host_key(&mut self, key: Option<HostKey>) {
        self.trusted_host_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("PASSWORD", AuthKind::Password)]
    #[case("password", AuthKind::Password)]
    #[case("PUBLIC_KEY", AuthKind::PublicKey)]
    #[case("public-key", AuthKind::PublicKey)]
    fn parses_auth_kind_names(#[case] input: &str, #[case] expected: AuthKind) {
        assert_eq!(input.parse::<AuthKind>(), Ok(expected));
    }

    #[test]
    fn rejects_unknown_auth_kind() {
        assert_eq!(
            "KERBEROS".parse::<AuthKind>(),
            Err(UnknownAuthKind {
                value: String::from("KERBEROS"),
            })
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let record = CredentialRecord::password("opc", "hunter2");
        let keyed = CredentialRecord::public_key("opc", "/keys/id", Some(String::from("s3cret")));

        let rendered = format!("{record:?} {keyed:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("/keys/id"));
    }

    #[test]
    fn auth_kind_follows_material() {
        assert_eq!(
            CredentialRecord::password("opc", "pw").auth_kind(),
            AuthKind::Password
        );
        let keyed = CredentialRecord::public_key("opc", "/keys/id", None);
        assert_eq!(keyed.auth_kind(), AuthKind::PublicKey);
        assert_eq!(keyed.key_path(), Some(Utf8Path::new("/keys/id")));
    }
}
