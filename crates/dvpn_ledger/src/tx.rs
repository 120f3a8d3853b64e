//! Transaction construction, signing and encoding.

use base64::prelude::{BASE64_STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{
    error::LedgerError,
    types::{Coin, Message},
};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    pub gas_limit: u64,
}

impl Fee {
    /// Fee paying `gas_price` per unit of gas, rounded up.
    #[must_use]
    pub fn from_gas(gas_limit: u64, gas_price: f64, denom: &str) -> Self {
        let amount = (gas_limit as f64 * gas_price).ceil() as u64;
        Self {
            amount: vec![Coin {
                denom: denom.into(),
                amount,
            }],
            gas_limit,
        }
    }
}

/// Everything covered by the transaction signature.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SignDoc {
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
    pub fee: Fee,
    pub memo: String,
    pub messages: Vec<Message>,
}

impl SignDoc {
    pub fn sign(self, key: &SigningKey) -> Result<SignedTx, LedgerError> {
        let bytes = serde_json::to_vec(&self)?;
        let signature = key.sign(&bytes);
        Ok(SignedTx {
            sign_doc: self,
            public_key: BASE64_STANDARD.encode(key.verifying_key().as_bytes()),
            signature: BASE64_STANDARD.encode(signature.to_bytes()),
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SignedTx {
    pub sign_doc: SignDoc,
    pub public_key: String,
    pub signature: String,
}

impl SignedTx {
    /// Bytes submitted to the ledger.
    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LedgerError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Checks the signature against the embedded public key.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec(&self.sign_doc)?;
        let signature = BASE64_STANDARD
            .decode(&self.signature)
            .map_err(|err| LedgerError::InvalidSignature(err.to_string()))?;
        verify_signature(&self.public_key, &bytes, &signature)
    }
}

/// Parses a base64 encoded 32 byte ed25519 seed.
pub fn signing_key_from_base64(seed: &str) -> Result<SigningKey, LedgerError> {
    let bytes = BASE64_STANDARD
        .decode(seed.trim())
        .map_err(|err| LedgerError::InvalidKey(err.to_string()))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LedgerError::InvalidKey("expected 32 byte seed".into()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Ledger address derived from a public key: `prefix` followed by the first 20 bytes of its
/// SHA-256 digest in hex.
#[must_use]
pub fn address_from_public_key(prefix: &str, key: &VerifyingKey) -> String {
    let digest = sha256::digest(key.as_bytes().as_slice());
    format!("{prefix}{}", &digest[..40])
}

/// Verifies an ed25519 `signature` of `message` made by a base64 encoded public key.
pub fn verify_signature(
    public_key: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), LedgerError> {
    let key_bytes: [u8; 32] = BASE64_STANDARD
        .decode(public_key)
        .map_err(|err| LedgerError::InvalidKey(err.to_string()))?
        .try_into()
        .map_err(|_| LedgerError::InvalidKey("expected 32 byte public key".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|err| LedgerError::InvalidKey(err.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|err| LedgerError::InvalidSignature(err.to_string()))?;
    key.verify(message, &signature)
        .map_err(|err| LedgerError::InvalidSignature(err.to_string()))
}
