//! Durable per-client credential state.
//!
//! Two logical entries per client, over any [`KeyValueStore`]:
//! - `<namespace>-privateKey-<client>`: the signer private key, hex
//! - `<namespace>-<client>`: the completed [`SignerRecord`], JSON
//!
//! A completed record is the single source of truth for "already provisioned".
//! A running flow additionally holds a lease on `<namespace>-<client>` in the
//! backend, so every [`CredentialStore`] over the same backend sees it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::hex;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::config::DEFAULT_NAMESPACE;
use crate::error::{Error, Result};
use crate::vault::SecretKey;
use crate::wire::SignerRecord;

const PRIVATE_KEY_INFIX: &str = "privateKey-";
const MAX_CLIENT_NAME_LEN: usize = 64;

/// Identity of the application a signer is provisioned for.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ClientName(String);

impl ClientName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| Error::InvalidClientName(format!("{name:?} {reason}"));
        if name.trim().is_empty() {
            return Err(invalid("is empty"));
        }
        if name.len() > MAX_CLIENT_NAME_LEN {
            return Err(invalid("is too long"));
        }
        if name.starts_with(PRIVATE_KEY_INFIX) {
            return Err(invalid("collides with the private key namespace"));
        }
        if name.chars().any(char::is_control) {
            return Err(invalid("contains control characters"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// String key-value backend. Each call must be atomic for its key.
///
/// Leases live beside the entries and never show up in `get`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Takes the lease on `key`. `false` if someone already holds it.
    fn try_lease(&self, key: &str) -> Result<bool>;
    fn release_lease(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    leases: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn try_lease(&self, key: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(leases.insert(key.to_string()))
    }

    fn release_lease(&self, key: &str) -> Result<()> {
        let mut leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        leases.remove(key);
        Ok(())
    }
}

/// One file per key in a directory. Writes go to a temp file that is renamed
/// over the target, so readers never see a partial value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_name(key: &str) -> String {
        let mut file = String::with_capacity(key.len());
        for b in key.bytes() {
            match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => file.push(b as char),
                _ => file.push_str(&format!("%{b:02x}")),
            }
        }
        file
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    fn lease_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.lease", Self::file_name(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let target = self.path(key);
        let tmp = self.dir.join(format!(".{}.tmp", Self::file_name(key)));
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Lease files are created with `create_new`, so only one process wins.
    /// A crashed holder leaves its file behind; `provision --reset` clears it.
    fn try_lease(&self, key: &str) -> Result<bool> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lease_path(key))
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn release_lease(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.lease_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Exclusive right to run a provisioning flow for one client. Released on drop.
pub struct FlowLease {
    client_name: ClientName,
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl FlowLease {
    pub fn client_name(&self) -> &ClientName {
        &self.client_name
    }
}

impl fmt::Debug for FlowLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowLease").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Drop for FlowLease {
    fn drop(&mut self) {
        if let Err(e) = self.backend.release_lease(&self.key) {
            warn!(client = %self.client_name, "failed to release flow lease: {e}");
        }
    }
}

/// Storage edge of [`SecretKey`]: always writes hex.
fn encode_secret(secret: &SecretKey) -> Zeroizing<String> {
    Zeroizing::new(hex::encode(secret.expose()))
}

/// Reads hex, with or without `0x`, or the legacy comma-separated decimal bytes.
fn decode_secret(stored: &str) -> Result<SecretKey> {
    let stored = stored.trim();
    let bytes = if stored.contains(',') {
        stored
            .split(',')
            .map(|b| b.trim().parse::<u8>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidKeyMaterial(format!("bad byte in private key list: {e}")))?
    } else {
        hex::decode(stored)
            .map_err(|e| Error::InvalidKeyMaterial(format!("private key is not hex: {e}")))?
    };
    let bytes = Zeroizing::new(bytes);
    SecretKey::from_slice(&bytes)
}

pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
    namespace: String,
    lock: Mutex<()>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_namespace(backend, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(backend: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_key(&self, client: &ClientName) -> String {
        format!("{}-{}", self.namespace, client)
    }

    fn private_key_key(&self, client: &ClientName) -> String {
        format!("{}-{PRIVATE_KEY_INFIX}{}", self.namespace, client)
    }

    /// Strict read of the completed record.
    pub fn load(&self, client: &ClientName) -> Result<Option<SignerRecord>> {
        let key = self.record_key(client);
        let Some(raw) = ({
            let _guard = self.guard();
            self.backend.get(&key)?
        }) else {
            return Ok(None);
        };
        let record: SignerRecord = serde_json::from_str(&raw).map_err(|e| Error::CorruptPersistedState {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        if !record.is_completed() {
            return Err(Error::CorruptPersistedState {
                key,
                reason: format!("stored record has state {:?}", record.state),
            });
        }
        Ok(Some(record))
    }

    /// The completed record, if any. Unreadable state counts as absent.
    pub fn get(&self, client: &ClientName) -> Option<SignerRecord> {
        match self.load(client) {
            Ok(record) => record,
            Err(e) => {
                error!(client = %client, "ignoring persisted signer record: {e}");
                None
            }
        }
    }

    pub fn is_provisioned(&self, client: &ClientName) -> bool {
        self.get(client).is_some()
    }

    pub fn load_private_key(&self, client: &ClientName) -> Result<Option<SecretKey>> {
        let key = self.private_key_key(client);
        let raw = {
            let _guard = self.guard();
            self.backend.get(&key)?.map(Zeroizing::new)
        };
        raw.map(|raw| {
            decode_secret(&raw).map_err(|e| Error::CorruptPersistedState {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    /// The persisted private key, if any. Unreadable keys count as absent.
    pub fn private_key(&self, client: &ClientName) -> Option<SecretKey> {
        match self.load_private_key(client) {
            Ok(secret) => secret,
            Err(e) => {
                error!(client = %client, "ignoring persisted private key: {e}");
                None
            }
        }
    }

    pub fn put_private_key(&self, client: &ClientName, secret: &SecretKey) -> Result<()> {
        let encoded = encode_secret(secret);
        let _guard = self.guard();
        self.backend.set(&self.private_key_key(client), &encoded)?;
        debug!(client = %client, "private key persisted");
        Ok(())
    }

    pub fn put_completed(&self, client: &ClientName, record: &SignerRecord) -> Result<()> {
        let key = self.record_key(client);
        if !record.is_completed() {
            return Err(Error::CorruptPersistedState {
                key,
                reason: format!("refusing to persist a record in state {:?}", record.state),
            });
        }
        let json = serde_json::to_string(record).map_err(|e| Error::CorruptPersistedState {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let _guard = self.guard();
        self.backend.set(&key, &json)?;
        debug!(client = %client, "signer record persisted");
        Ok(())
    }

    /// Claims the client's flow lease. `None` while another flow, in this or
    /// any other process sharing the backend, holds it.
    pub fn claim(&self, client: &ClientName) -> Result<Option<FlowLease>> {
        let key = self.record_key(client);
        if !self.backend.try_lease(&key)? {
            return Ok(None);
        }
        Ok(Some(FlowLease {
            client_name: client.clone(),
            backend: self.backend.clone(),
            key,
        }))
    }

    /// Drops a lease left behind by a holder that never released it.
    pub fn break_lease(&self, client: &ClientName) -> Result<()> {
        self.backend.release_lease(&self.record_key(client))
    }

    /// Forgets the client: record first, then the key it depends on.
    pub fn remove(&self, client: &ClientName) -> Result<()> {
        let _guard = self.guard();
        self.backend.remove(&self.record_key(client))?;
        self.backend.remove(&self.private_key_key(client))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::KeyVault;
    use crate::wire::SignerState;

    fn client() -> ClientName {
        ClientName::new("Example").unwrap()
    }

    fn record(state: SignerState) -> SignerRecord {
        SignerRecord {
            token: "tok1".into(),
            deeplink_url: "farcaster://tok1".into(),
            key: "0xab".into(),
            request_fid: 10626,
            state,
            user_fid: Some(42),
            signer_user: None,
        }
    }

    #[test]
    fn client_name_validation() {
        assert!(ClientName::new("Example").is_ok());
        assert!(matches!(
            ClientName::new(""),
            Err(Error::InvalidClientName(_))
        ));
        assert!(ClientName::new("  ").is_err());
        assert!(ClientName::new("privateKey-Example").is_err());
        assert!(ClientName::new("a\nb").is_err());
        assert!(ClientName::new("x".repeat(65)).is_err());
    }

    #[test]
    fn keys_follow_namespace_layout() {
        let backend = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(backend.clone());
        let pair = KeyVault.generate();
        store.put_private_key(&client(), &pair.secret).unwrap();
        store.put_completed(&client(), &record(SignerState::Completed)).unwrap();

        let stored = backend.get("farsign-privateKey-Example").unwrap().unwrap();
        assert_eq!(stored, hex::encode(pair.secret.expose()));
        assert!(backend.get("farsign-Example").unwrap().unwrap().contains("\"state\":\"completed\""));
    }

    #[test]
    fn private_key_round_trips_and_reads_legacy_list() {
        let backend = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(backend.clone());
        let pair = KeyVault.generate();
        store.put_private_key(&client(), &pair.secret).unwrap();
        let loaded = store.private_key(&client()).unwrap();
        assert_eq!(KeyVault.derive_public_key(&loaded), pair.public);

        let legacy = pair
            .secret
            .expose()
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",");
        backend.set("farsign-privateKey-Example", &legacy).unwrap();
        let loaded = store.private_key(&client()).unwrap();
        assert_eq!(KeyVault.derive_public_key(&loaded), pair.public);
    }

    #[test]
    fn completed_record_marks_provisioned() {
        let store = CredentialStore::in_memory();
        assert!(!store.is_provisioned(&client()));
        store.put_completed(&client(), &record(SignerState::Completed)).unwrap();
        assert!(store.is_provisioned(&client()));
        assert_eq!(store.get(&client()).unwrap(), record(SignerState::Completed));
    }

    #[test]
    fn pending_record_is_refused() {
        let store = CredentialStore::in_memory();
        let err = store.put_completed(&client(), &record(SignerState::Pending)).unwrap_err();
        assert!(matches!(err, Error::CorruptPersistedState { .. }));
        assert!(store.get(&client()).is_none());
    }

    #[test]
    fn corrupt_state_degrades_to_absent() {
        let backend = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(backend.clone());
        backend.set("farsign-Example", "{not json").unwrap();
        backend.set("farsign-privateKey-Example", "zz").unwrap();

        assert!(matches!(
            store.load(&client()),
            Err(Error::CorruptPersistedState { .. })
        ));
        assert!(store.get(&client()).is_none());
        assert!(!store.is_provisioned(&client()));
        assert!(store.private_key(&client()).is_none());
    }

    #[test]
    fn remove_forgets_both_entries() {
        let store = CredentialStore::in_memory();
        store.put_private_key(&client(), &KeyVault.generate().secret).unwrap();
        store.put_completed(&client(), &record(SignerState::Completed)).unwrap();
        store.remove(&client()).unwrap();
        assert!(store.get(&client()).is_none());
        assert!(store.private_key(&client()).is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let pair = KeyVault.generate();
        {
            let store = CredentialStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            store.put_private_key(&client(), &pair.secret).unwrap();
            store.put_completed(&client(), &record(SignerState::Completed)).unwrap();
        }
        let store = CredentialStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        assert!(store.is_provisioned(&client()));
        let secret = store.private_key(&client()).unwrap();
        assert_eq!(KeyVault.derive_public_key(&secret), pair.public);

        store.remove(&client()).unwrap();
        store.remove(&client()).unwrap();
        assert!(!store.is_provisioned(&client()));
    }

    #[test]
    fn lease_is_shared_by_stores_over_one_backend() {
        let backend = Arc::new(MemoryStore::new());
        let a = CredentialStore::new(backend.clone());
        let b = CredentialStore::new(backend.clone());

        let lease = a.claim(&client()).unwrap().unwrap();
        assert!(b.claim(&client()).unwrap().is_none());
        assert!(b.claim(&ClientName::new("Other").unwrap()).unwrap().is_some());
        assert!(backend.get("farsign-Example").unwrap().is_none());

        drop(lease);
        assert!(b.claim(&client()).unwrap().is_some());
    }

    #[test]
    fn file_lease_excludes_other_processes() {
        let dir = tempfile::tempdir().unwrap();
        let a = CredentialStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        let b = CredentialStore::new(Arc::new(FileStore::open(dir.path()).unwrap()));

        let lease = a.claim(&client()).unwrap().unwrap();
        assert!(dir.path().join(".farsign-Example.lease").exists());
        assert!(b.claim(&client()).unwrap().is_none());
        assert!(!b.is_provisioned(&client()));
        drop(lease);
        assert!(!dir.path().join(".farsign-Example.lease").exists());

        let stale = b.claim(&client()).unwrap().unwrap();
        std::mem::forget(stale);
        assert!(a.claim(&client()).unwrap().is_none());
        a.break_lease(&client()).unwrap();
        assert!(a.claim(&client()).unwrap().is_some());
    }

    #[test]
    fn file_store_escapes_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("farsign-My App/1", "v").unwrap();
        assert!(dir.path().join("farsign-My%20App%2f1").exists());
        assert_eq!(store.get("farsign-My App/1").unwrap().as_deref(), Some("v"));
    }
}
