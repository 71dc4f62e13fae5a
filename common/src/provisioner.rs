//! Entry points for UI collaborators: start a flow, wait for approval, check
//! whether a client is provisioned, and use the approved signer.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signature, Signer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::authorization::{unix_now, AppMnemonic, AuthorizationParameters, AuthorizationSigner};
use crate::client::{Authority, ProvisioningClient};
use crate::config::{PollConfig, DEFAULT_DEADLINE_SECS};
use crate::error::{Error, FlowError, Stage, WithStage};
use crate::poller::ApprovalPoller;
use crate::store::{ClientName, CredentialStore, FlowLease};
use crate::vault::{KeyVault, Keypair, PublicKey};
use crate::wire::{ProvisioningToken, SignerRecord};

/// A submitted request awaiting user approval. Holds the client's flow lease
/// until it is consumed by [`Provisioner::await_approval`] or dropped.
pub struct PendingSigner {
    token: ProvisioningToken,
    public_key: PublicKey,
    lease: FlowLease,
}

impl PendingSigner {
    pub fn client_name(&self) -> &ClientName {
        self.lease.client_name()
    }

    pub fn token(&self) -> &ProvisioningToken {
        &self.token
    }

    pub fn deep_link_url(&self) -> &str {
        &self.token.deep_link_url
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

impl fmt::Debug for PendingSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSigner")
            .field("client_name", self.client_name())
            .field("token", &self.token)
            .field("public_key", &self.public_key)
            .finish()
    }
}

#[derive(Debug)]
pub enum Provisioning {
    /// Already provisioned; nothing was sent.
    Completed(SignerRecord),
    Pending(PendingSigner),
}

/// Approved Ed25519 signer, ready to sign protocol messages.
pub struct ProvisionedSigner {
    signing_key: ed25519_dalek::SigningKey,
    public_key: PublicKey,
    record: SignerRecord,
}

impl ProvisionedSigner {
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn record(&self) -> &SignerRecord {
        &self.record
    }

    pub fn user_fid(&self) -> Option<u64> {
        self.record.user_fid()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for ProvisionedSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedSigner")
            .field("public_key", &self.public_key)
            .field("user_fid", &self.user_fid())
            .finish_non_exhaustive()
    }
}

pub struct Provisioner {
    authority: Arc<dyn Authority>,
    store: Arc<CredentialStore>,
    app_fid: NonZeroU64,
    app_mnemonic: AppMnemonic,
    poll: PollConfig,
    deadline_window: Duration,
}

impl Provisioner {
    pub fn new(
        authority: Arc<dyn Authority>,
        store: Arc<CredentialStore>,
        app_fid: NonZeroU64,
        app_mnemonic: AppMnemonic,
    ) -> Self {
        Self {
            authority,
            store,
            app_fid,
            app_mnemonic,
            poll: PollConfig::default(),
            deadline_window: Duration::from_secs(DEFAULT_DEADLINE_SECS),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// How long each authorization stays valid.
    pub fn with_deadline_window(mut self, window: Duration) -> Self {
        self.deadline_window = window;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn is_provisioned(&self, client_name: &ClientName) -> bool {
        self.store.is_provisioned(client_name)
    }

    /// The persisted key for `client_name`, or a fresh one that is persisted
    /// before anything leaves the process.
    fn keypair(&self, client_name: &ClientName) -> Result<Keypair, FlowError> {
        match self.store.load_private_key(client_name) {
            Ok(Some(secret)) => {
                info!(client = %client_name, "resuming with persisted signer key");
                return Ok(KeyVault.restore(secret));
            }
            Ok(None) => {}
            Err(e @ Error::CorruptPersistedState { .. }) => {
                error!(client = %client_name, "replacing unreadable signer key: {e}");
            }
            Err(e) => return Err(e).at(client_name, Stage::Load),
        }
        let pair = KeyVault.generate();
        self.store
            .put_private_key(client_name, &pair.secret)
            .at(client_name, Stage::Key)?;
        Ok(pair)
    }

    /// Starts provisioning, or returns the persisted record when the client is
    /// already provisioned. At most one flow per client runs at a time across
    /// every provisioner sharing the store's backend.
    pub async fn start_provisioning(&self, client_name: &ClientName) -> Result<Provisioning, FlowError> {
        if let Some(record) = self.store.get(client_name) {
            return Ok(Provisioning::Completed(record));
        }

        let Some(lease) = self.store.claim(client_name).at(client_name, Stage::Load)? else {
            return Err(Error::AlreadyInProgress).at(client_name, Stage::Load);
        };
        // A flow that finished while we were claiming wins.
        if let Some(record) = self.store.get(client_name) {
            return Ok(Provisioning::Completed(record));
        }

        let pair = self.keypair(client_name)?;
        let params = AuthorizationParameters::new(self.app_fid, self.app_mnemonic.clone(), client_name.as_str())
            .with_deadline(unix_now() + self.deadline_window.as_secs());
        let authorization = AuthorizationSigner
            .sign(&params, &pair.public)
            .at(client_name, Stage::Authorize)?;

        let token = ProvisioningClient::new(self.authority.as_ref())
            .submit(client_name.as_str(), &authorization)
            .await
            .at(client_name, Stage::Submit)?;

        Ok(Provisioning::Pending(PendingSigner {
            token,
            public_key: pair.public,
            lease,
        }))
    }

    /// Polls until the user approves, then persists the record. Nothing is
    /// written when the wait is cancelled or times out.
    pub async fn await_approval(
        &self,
        pending: PendingSigner,
        cancel: &CancellationToken,
    ) -> Result<SignerRecord, FlowError> {
        let client_name = pending.client_name().clone();
        let mut poller = ApprovalPoller::new(self.poll);
        let record = poller
            .wait(self.authority.as_ref(), &pending.token, cancel)
            .await
            .at(&client_name, Stage::Approval)?;

        let approved = PublicKey::from_hex(&record.key).ok();
        if approved != Some(pending.public_key) {
            warn!(client = %client_name, approved = %record.key, "approved key differs from submitted key");
            return Err(Error::rejected(format!(
                "approved key {} does not match submitted key {}",
                record.key, pending.public_key
            )))
            .at(&client_name, Stage::Approval);
        }

        self.store
            .put_completed(&client_name, &record)
            .at(&client_name, Stage::Persist)?;
        info!(client = %client_name, user_fid = ?record.user_fid(), "signer provisioned");
        Ok(record)
    }

    /// Full flow. `on_pending` receives the request before polling starts,
    /// e.g. to show its deep link.
    pub async fn provision(
        &self,
        client_name: &ClientName,
        cancel: &CancellationToken,
        on_pending: impl FnOnce(&PendingSigner),
    ) -> Result<SignerRecord, FlowError> {
        match self.start_provisioning(client_name).await? {
            Provisioning::Completed(record) => Ok(record),
            Provisioning::Pending(pending) => {
                on_pending(&pending);
                self.await_approval(pending, cancel).await
            }
        }
    }

    /// The approved signer for `client_name`, once provisioning completed.
    pub fn signer(&self, client_name: &ClientName) -> Option<ProvisionedSigner> {
        let record = self.store.get(client_name)?;
        let secret = self.store.private_key(client_name)?;
        let public_key = KeyVault.derive_public_key(&secret);
        if PublicKey::from_hex(&record.key).ok() != Some(public_key) {
            error!(client = %client_name, "persisted key does not match the approved signer");
            return None;
        }
        Some(ProvisionedSigner {
            signing_key: secret.signing_key(),
            public_key,
            record,
        })
    }
}
