//! Command-line interface definitions for the `warden` binary.
//!
//! The parser structures live here so the build script can render the
//! manual page from the same definitions the binary parses.

use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `warden` binary.
#[derive(Debug, Parser)]
#[command(
    name = "warden",
    about = "Manage trusted host keys and credentials for compute instances",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Trust store file to use instead of the configured one.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) store: Option<String>,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Command groups.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Inspect and change trusted host keys.
    #[command(subcommand)]
    Trust(TrustCommand),
}

/// Subcommands of `warden trust`.
#[derive(Debug, Subcommand)]
pub(crate) enum TrustCommand {
    /// List credential records and their pinned host key fingerprints.
    #[command(name = "list")]
    List,
    /// Forget the pinned host key of an instance.
    #[command(name = "revoke")]
    Revoke {
        /// Instance whose host key is forgotten.
        #[arg(value_name = "INSTANCE_ID")]
        instance_id: String,
    },
    /// Print the SHA-256 fingerprint of an OpenSSH public key line.
    #[command(name = "fingerprint")]
    Fingerprint {
        /// Key line such as `ssh-ed25519 AAAA... comment`.
        #[arg(required = true, num_args = 1.., value_name = "KEY")]
        key: Vec<String>,
    },
    /// Check a presented host key against the store, applying the
    /// first-contact policy to unknown keys.
    #[command(name = "verify")]
    Verify(VerifyCommand),
}

/// Arguments for `warden trust verify`.
#[derive(Debug, Args)]
pub(crate) struct VerifyCommand {
    /// Instance presenting the key.
    #[arg(value_name = "INSTANCE_ID")]
    pub(crate) instance_id: String,
    /// Address the key was presented on, such as `10.0.0.5:22`.
    #[arg(value_name = "ADDRESS")]
    pub(crate) address: SocketAddr,
    /// Presented key as an OpenSSH public key line.
    #[arg(required = true, num_args = 1.., value_name = "KEY")]
    pub(crate) key: Vec<String>,
    /// Display name shown in the confirmation prompt.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Override the first-contact policy: ACCEPT, REJECT or CONFIRM.
    #[arg(long, value_name = "POLICY")]
    pub(crate) policy: Option<String>,
}
