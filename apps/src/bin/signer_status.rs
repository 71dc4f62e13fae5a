use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use farsign_common::config::DEFAULT_NAMESPACE;
use farsign_common::{ClientName, CredentialStore, FileStore, KeyVault};
use tracing::debug;

/// CLI that reports whether a client has a provisioned signer.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Client identity to inspect.
    #[clap(long, env = "FARSIGN_CLIENT_NAME", default_value = "Example")]
    client_name: String,

    /// Directory holding persisted credentials.
    #[clap(long, env = "FARSIGN_STORE_DIR", default_value = ".farsign")]
    store_dir: PathBuf,

    /// Prefix of every persisted key.
    #[clap(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }

    let args = Args::parse();
    let client_name = ClientName::new(args.client_name)?;
    let store = CredentialStore::with_namespace(Arc::new(FileStore::open(&args.store_dir)?), args.namespace);

    // Strict read so a corrupt record is reported rather than hidden.
    let record = store.load(&client_name)?;
    let public_key = store
        .load_private_key(&client_name)?
        .map(|secret| KeyVault.derive_public_key(&secret));

    match record {
        Some(record) => {
            println!("Client: {client_name} (provisioned)");
            if let Some(fid) = record.user_fid() {
                println!("User FID: {fid}");
            }
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => {
            println!("Client: {client_name} (not provisioned)");
        }
    }
    if let Some(public_key) = public_key {
        println!("Signer key: {public_key}");
    }
    Ok(())
}
