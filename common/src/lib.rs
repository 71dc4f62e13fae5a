//! Provisioning of Farcaster signer credentials.
//!
//! A fresh Ed25519 key is authorized by the application's custody account
//! through an EIP-712 `SignedKeyRequest`, submitted to the signed key request
//! authority, and becomes usable once the user approves it out of band.

pub mod authorization;
pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod provisioner;
pub mod signing;
pub mod store;
pub mod typed_data;
pub mod vault;
pub mod wire;

pub use authorization::{AppMnemonic, Authorization, AuthorizationParameters, AuthorizationSigner};
pub use client::{Authority, HttpAuthority, ProvisioningClient};
pub use config::{AuthorityConfig, PollConfig};
pub use error::{Error, FlowError, Result, Stage};
pub use poller::{ApprovalPoller, PollState};
pub use provisioner::{PendingSigner, ProvisionedSigner, Provisioner, Provisioning};
pub use store::{ClientName, CredentialStore, FileStore, FlowLease, KeyValueStore, MemoryStore};
pub use vault::{KeyVault, Keypair, PublicKey, SecretKey};
pub use wire::{ProvisioningToken, SignerRecord, SignerState, SignerUser};
