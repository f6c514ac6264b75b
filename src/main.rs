//! Binary entry point for the Warden CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use warden::compute::InstanceHandle;
use warden::config::{ConfigError, WardenConfig};
use warden::logging::{self, DEFAULT_FILTER};
use warden::trust::{
    FirstContactPolicy, HostKey, HostKeyError, HostKeyVerifier, PolicyError, TrustPolicyEvaluator,
    TrustStore, TrustStoreError, VerifyError,
};

mod cli;

use cli::{Cli, Command, TrustCommand, VerifyCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid policy override: {0}")]
    Policy(#[from] PolicyError),
    #[error("invalid host key: {0}")]
    HostKey(#[from] HostKeyError),
    #[error("trust store error: {0}")]
    Store(#[from] TrustStoreError),
    #[error("host key verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(DEFAULT_FILTER) {
        report_error(&err);
    }

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Trust(TrustCommand::Fingerprint { key }) => fingerprint(&key, io::stdout()),
        Command::Trust(command) => {
            let config = WardenConfig::load_without_cli_args()?;
            config.validate()?;
            let store = Arc::new(TrustStore::new(
                cli.store.unwrap_or_else(|| config.trust_store_path().into_string()),
            ));
            store.load()?;
            run_trust(command, &config, store).await
        }
    }
}

async fn run_trust(
    command: TrustCommand,
    config: &WardenConfig,
    store: Arc<TrustStore>,
) -> Result<(), CliError> {
    match command {
        TrustCommand::List => list(&store, io::stdout()),
        TrustCommand::Revoke { instance_id } => {
            if store.revoke_host_key(&instance_id) {
                store.save()?;
                tracing::info!(%instance_id, "revoked host key");
            } else {
                tracing::warn!(%instance_id, "no pinned host key to revoke");
            }
            Ok(())
        }
        TrustCommand::Fingerprint { key } => fingerprint(&key, io::stdout()),
        TrustCommand::Verify(args) => verify(args, config, store).await,
    }
}

async fn verify(
    args: VerifyCommand,
    config: &WardenConfig,
    store: Arc<TrustStore>,
) -> Result<(), CliError> {
    let policy = match args.policy.as_deref() {
        Some(name) => name.parse::<FirstContactPolicy>()?,
        None => config.policy()?,
    };
    let presented = parse_key(&args.key)?;
    let instance = InstanceHandle::new(
        args.instance_id.clone(),
        args.name.unwrap_or_else(|| args.instance_id.clone()),
        String::new(),
    );
    let evaluator =
        TrustPolicyEvaluator::new(policy).with_timeout(config.confirmation_timeout());
    let verifier = HostKeyVerifier::new(Arc::clone(&store), Arc::new(evaluator));

    verifier.verify(&instance, args.address, &presented).await?;
    store.flush_if_dirty()?;
    writeln!(io::stdout(), "{}", presented.fingerprint())?;
    Ok(())
}

fn list(store: &TrustStore, mut out: impl Write) -> Result<(), CliError> {
    for (resource_id, record) in store.snapshot() {
        let fingerprint = record
            .trusted_host_key()
            .map_or_else(|| String::from("-"), HostKey::fingerprint);
        writeln!(
            out,
            "{resource_id}\t{}\t{}\t{fingerprint}",
            record.username(),
            record.auth_kind().as_str()
        )?;
    }
    Ok(())
}

fn fingerprint(key: &[String], mut out: impl Write) -> Result<(), CliError> {
    writeln!(out, "{}", parse_key(key)?.fingerprint())?;
    Ok(())
}

fn parse_key(parts: &[String]) -> Result<HostKey, HostKeyError> {
    HostKey::from_openssh(&parts.join(" "))
}

fn report_error(err: &dyn std::error::Error) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &dyn std::error::Error) {
    writeln!(target, "{err}").ok();
}
