//! EIP-712 authorization of a signer key by the application's custody account.
//!
//! The application proves it controls `requestFid` by signing a
//! `SignedKeyRequest` under the Farcaster validator domain. The domain fields
//! are fixed; any difference makes the authority reject the signature.

use std::fmt;
use std::num::NonZeroU64;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{address, hex, Address, Bytes, Signature, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use alloy_sol_types::{eip712_domain, sol, Eip712Domain, SolStruct};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::DEFAULT_DEADLINE_SECS;
use crate::error::{Error, Result};
use crate::signing::verify_prehash;
use crate::vault::PublicKey;

sol! {
    /// Authorizes `key` to sign on behalf of `requestFid` until `deadline`.
    #[derive(Debug, PartialEq, Eq)]
    struct SignedKeyRequest {
        uint256 requestFid;
        bytes key;
        uint256 deadline;
    }
}

/// `SignedKeyRequestValidator` on OP mainnet.
pub const SIGNED_KEY_REQUEST_VALIDATOR: Address =
    address!("00000000fc700472606ed4fa22623acf62c60553");

pub const SIGNED_KEY_REQUEST_CHAIN_ID: u64 = 10;

pub const SIGNED_KEY_REQUEST_DOMAIN: Eip712Domain = eip712_domain! {
    name: "Farcaster SignedKeyRequestValidator",
    version: "1",
    chain_id: SIGNED_KEY_REQUEST_CHAIN_ID,
    verifying_contract: SIGNED_KEY_REQUEST_VALIDATOR,
};

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Seed phrase of the application's custody account. Never logged or persisted.
#[derive(Clone)]
pub struct AppMnemonic(Zeroizing<String>);

impl AppMnemonic {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(phrase.into()))
    }

    fn account(&self) -> Result<PrivateKeySigner> {
        MnemonicBuilder::<English>::default()
            .phrase(self.0.as_str())
            .build()
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))
    }

    /// Custody address derived at `m/44'/60'/0'/0/0`.
    pub fn address(&self) -> Result<Address> {
        Ok(self.account()?.address())
    }
}

impl fmt::Debug for AppMnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppMnemonic(..)")
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationParameters {
    pub app_fid: NonZeroU64,
    pub app_mnemonic: AppMnemonic,
    /// Unix seconds.
    pub deadline: u64,
    pub client_name: String,
}

impl AuthorizationParameters {
    /// Parameters with the default deadline of one day from now.
    pub fn new(app_fid: NonZeroU64, app_mnemonic: AppMnemonic, client_name: impl Into<String>) -> Self {
        Self {
            app_fid,
            app_mnemonic,
            deadline: unix_now() + DEFAULT_DEADLINE_SECS,
            client_name: client_name.into(),
        }
    }

    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn request(&self, public_key: &PublicKey) -> SignedKeyRequest {
        SignedKeyRequest {
            requestFid: U256::from(self.app_fid.get()),
            key: Bytes::copy_from_slice(public_key.as_bytes()),
            deadline: U256::from(self.deadline),
        }
    }
}

/// A signed `SignedKeyRequest`, ready to submit.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub request_fid: u64,
    pub key: PublicKey,
    pub deadline: u64,
    pub custody: Address,
    pub signature: Signature,
}

impl Authorization {
    /// 65-byte `r || s || v` as `0x` hex.
    pub fn signature_hex(&self) -> String {
        hex::encode_prefixed(self.signature.as_bytes())
    }
}

pub fn signing_hash(request: &SignedKeyRequest) -> B256 {
    request.eip712_signing_hash(&SIGNED_KEY_REQUEST_DOMAIN)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationSigner;

impl AuthorizationSigner {
    pub fn sign(&self, params: &AuthorizationParameters, public_key: &PublicKey) -> Result<Authorization> {
        if params.deadline <= unix_now() {
            return Err(Error::DeadlineExpired {
                deadline: params.deadline,
            });
        }

        let account = params.app_mnemonic.account()?;
        let custody = account.address();
        let request = params.request(public_key);
        let prehash = signing_hash(&request);

        let signature = account
            .sign_hash_sync(&prehash)
            .map_err(|e| Error::InvalidKeyMaterial(format!("custody signing failed: {e}")))?;
        verify_prehash(prehash, &signature, custody)?;

        debug!(
            request_fid = params.app_fid.get(),
            key = %public_key,
            deadline = params.deadline,
            custody = %custody,
            "signed key request authorized"
        );

        Ok(Authorization {
            request_fid: params.app_fid.get(),
            key: *public_key,
            deadline: params.deadline,
            custody,
            signature,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::typed_data::signed_key_request_digest;
    use crate::vault::KeyVault;

    pub(crate) const TEST_MNEMONIC: &str =
        "test test test test test test test test test test test junk";

    pub(crate) fn params(deadline: u64) -> AuthorizationParameters {
        AuthorizationParameters::new(
            NonZeroU64::new(10626).unwrap(),
            AppMnemonic::new(TEST_MNEMONIC),
            "Example",
        )
        .with_deadline(deadline)
    }

    #[test]
    fn mnemonic_derives_known_account() {
        let address = AppMnemonic::new(TEST_MNEMONIC).address().unwrap();
        assert_eq!(
            address,
            address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266")
        );
    }

    #[test]
    fn invalid_mnemonic_is_rejected() {
        let err = AppMnemonic::new("not a real phrase").address().unwrap_err();
        assert!(matches!(err, Error::InvalidMnemonic(_)));
    }

    #[test]
    fn signature_recovers_custody_address() {
        let pair = KeyVault.generate();
        let params = params(unix_now() + 86_400);
        let auth = AuthorizationSigner.sign(&params, &pair.public).unwrap();

        assert_eq!(auth.signature.as_bytes().len(), 65);
        assert_eq!(auth.signature_hex().len(), 2 + 130);
        assert_eq!(auth.custody, params.app_mnemonic.address().unwrap());

        let prehash = signing_hash(&params.request(&pair.public));
        let recovered = auth.signature.recover_address_from_prehash(&prehash).unwrap();
        assert_eq!(recovered, auth.custody);
    }

    #[test]
    fn signature_matches_independent_typed_data_digest() {
        let pair = KeyVault.generate();
        let deadline = unix_now() + 86_400;
        let auth = AuthorizationSigner.sign(&params(deadline), &pair.public).unwrap();

        let digest = signed_key_request_digest(10626, &pair.public, deadline).unwrap();
        assert_eq!(digest, signing_hash(&params(deadline).request(&pair.public)));
        verify_prehash(digest, &auth.signature, auth.custody).unwrap();
    }

    #[test]
    fn changing_any_field_invalidates_signature() {
        let pair = KeyVault.generate();
        let other = KeyVault.generate();
        let deadline = unix_now() + 86_400;
        let auth = AuthorizationSigner.sign(&params(deadline), &pair.public).unwrap();

        let tampered = [
            signed_key_request_digest(10627, &pair.public, deadline).unwrap(),
            signed_key_request_digest(10626, &other.public, deadline).unwrap(),
            signed_key_request_digest(10626, &pair.public, deadline + 1).unwrap(),
        ];
        for digest in tampered {
            assert!(verify_prehash(digest, &auth.signature, auth.custody).is_err());
        }
    }

    #[test]
    fn expired_deadline_is_refused_locally() {
        let pair = KeyVault.generate();
        let err = AuthorizationSigner
            .sign(&params(unix_now() - 1), &pair.public)
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExpired { .. }));
    }

    #[test]
    fn mnemonic_debug_is_redacted() {
        let rendered = format!("{:?}", params(0));
        assert!(!rendered.contains("junk"));
        assert!(rendered.contains("AppMnemonic(..)"));
    }
}
