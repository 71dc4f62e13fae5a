//! Independent EIP-712 reconstruction of a `SignedKeyRequest` from its JSON
//! typed-data form, the shape wallets and the authority work with.

use alloy_dyn_abi::TypedData;
use alloy_primitives::B256;
use serde_json::{json, Value};

use crate::authorization::{SIGNED_KEY_REQUEST_CHAIN_ID, SIGNED_KEY_REQUEST_VALIDATOR};
use crate::error::{Error, Result};
use crate::vault::PublicKey;

/// Compute a generic EIP-712 digest for any compliant typed-data JSON.
/// Input is a JSON string with `types`, `primaryType`, `domain`, and `message`.
/// Returns the bytes32 digest: keccak256("\x19\x01" || domainSeparator || hashStruct(message)).
pub fn typed_data_digest(typed_data_json: &str) -> Result<B256> {
    let typed: TypedData = serde_json::from_str(typed_data_json)
        .map_err(|e| Error::TypedData(format!("invalid JSON: {e}")))?;
    typed
        .eip712_signing_hash()
        .map_err(|e| Error::TypedData(format!("failed computing digest: {e}")))
}

/// Typed-data JSON for a signed key request.
pub fn signed_key_request_typed_data(request_fid: u64, key: &PublicKey, deadline: u64) -> Value {
    json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "SignedKeyRequest": [
                { "name": "requestFid", "type": "uint256" },
                { "name": "key", "type": "bytes" },
                { "name": "deadline", "type": "uint256" }
            ]
        },
        "primaryType": "SignedKeyRequest",
        "domain": {
            "name": "Farcaster SignedKeyRequestValidator",
            "version": "1",
            "chainId": SIGNED_KEY_REQUEST_CHAIN_ID,
            "verifyingContract": format!("{SIGNED_KEY_REQUEST_VALIDATOR:#x}")
        },
        "message": {
            "requestFid": request_fid.to_string(),
            "key": key.to_hex(),
            "deadline": deadline.to_string()
        }
    })
}

pub fn signed_key_request_digest(request_fid: u64, key: &PublicKey, deadline: u64) -> Result<B256> {
    typed_data_digest(&signed_key_request_typed_data(request_fid, key, deadline).to_string())
}
