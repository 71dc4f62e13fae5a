use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use farsign_common::config::{DEFAULT_AUTHORITY_URL, DEFAULT_NAMESPACE};
use farsign_common::{
    AppMnemonic, AuthorityConfig, ClientName, CredentialStore, FileStore, HttpAuthority, PollConfig,
    Provisioner,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// CLI that provisions a Farcaster signer for a client and waits for approval.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Client identity the signer is provisioned for.
    #[clap(long, env = "FARSIGN_CLIENT_NAME", default_value = "Example")]
    client_name: String,

    /// FID of the application account that authorizes the signer.
    #[clap(long, env = "APP_FID")]
    app_fid: NonZeroU64,

    /// Seed phrase of the application's custody account.
    #[clap(long, env = "APP_MNEMONIC", hide_env_values = true)]
    app_mnemonic: String,

    /// Base URL of the signed key request authority.
    #[clap(long, env = "FARSIGN_AUTHORITY_URL", default_value = DEFAULT_AUTHORITY_URL)]
    authority_url: Url,

    /// Directory holding persisted credentials.
    #[clap(long, env = "FARSIGN_STORE_DIR", default_value = ".farsign")]
    store_dir: PathBuf,

    /// Prefix of every persisted key.
    #[clap(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Seconds between status requests.
    #[clap(long, default_value_t = 3)]
    poll_interval: u64,

    /// Seconds to wait for approval; 0 waits until Ctrl-C.
    #[clap(long, default_value_t = 600)]
    timeout: u64,

    /// Forget any persisted credential and stale flow lease for the client first.
    #[clap(long)]
    reset: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    // Load environment variables if present
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }

    let args = Args::parse();
    let client_name = ClientName::new(args.client_name)?;

    let store = CredentialStore::with_namespace(Arc::new(FileStore::open(&args.store_dir)?), args.namespace);
    if args.reset {
        warn!(client = %client_name, "forgetting persisted credential");
        store.remove(&client_name)?;
        store.break_lease(&client_name)?;
    }

    let authority = HttpAuthority::new(&AuthorityConfig::new(args.authority_url))?;
    let provisioner = Provisioner::new(
        Arc::new(authority),
        Arc::new(store),
        args.app_fid,
        AppMnemonic::new(args.app_mnemonic),
    )
    .with_poll_config(PollConfig {
        interval: Duration::from_secs(args.poll_interval),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
    });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let record = provisioner
        .provision(&client_name, &cancel, |pending| {
            println!("Approve the signer for {}:", pending.client_name());
            println!("  {}", pending.deep_link_url());
            println!("Public key: {}", pending.public_key());
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
