use alloy_primitives::{Address, Signature, B256};

use crate::error::{Error, Result};

/// Verify an Ethereum ECDSA signature over a 32-byte prehash against an expected signer.
/// - `prehash`: the digest that was signed, e.g. an EIP-712 signing hash
/// - `signature`: 65-byte r||s||v signature (v = 27/28 or 0/1)
/// - `expected`: the address you expect as the signer
pub fn verify_prehash(prehash: B256, signature: &Signature, expected: Address) -> Result<()> {
    let recovered = signature
        .recover_address_from_prehash(&prehash)
        .map_err(|e| Error::InvalidKeyMaterial(format!("signature recovery failed: {e}")))?;

    if recovered != expected {
        return Err(Error::InvalidKeyMaterial(format!(
            "recovered address {recovered:#x} does not match expected address {expected:#x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn accepts_matching_signer() {
        let signer = PrivateKeySigner::random();
        let prehash = keccak256(b"signer request");
        let signature = signer.sign_hash_sync(&prehash).unwrap();
        verify_prehash(prehash, &signature, signer.address()).unwrap();
    }

    #[test]
    fn rejects_other_signer() {
        let signer = PrivateKeySigner::random();
        let prehash = keccak256(b"signer request");
        let signature = signer.sign_hash_sync(&prehash).unwrap();
        let err = verify_prehash(prehash, &signature, Address::ZERO).unwrap_err();
        assert!(format!("{err}").contains("does not match expected address"));
    }
}
