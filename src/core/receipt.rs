use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use crate::common::{GateError, Result};
use crate::core::matcher::FaceComparisonResult;

type HmacSha256 = Hmac<Sha256>;

const MIN_KEY_LEN: usize = 16;

/// Verification decision bound to the caller's challenge, so the vote
/// submitter can check it came from this gate and was not replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibilityReceipt {
    pub user_id: String,
    pub is_match: bool,
    pub similarity: f32,
    pub threshold: f32,
    pub challenge: Vec<u8>,
    /// Unix seconds.
    pub issued_at: i64,
    pub signature: Vec<u8>,
}

impl EligibilityReceipt {
    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signature)
    }

    pub fn challenge_hex(&self) -> String {
        hex::encode(&self.challenge)
    }

    fn signed_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64 + self.user_id.len() + self.challenge.len());
        payload.extend_from_slice(&(self.user_id.len() as u32).to_le_bytes());
        payload.extend_from_slice(self.user_id.as_bytes());
        payload.push(self.is_match as u8);
        payload.extend_from_slice(&self.similarity.to_le_bytes());
        payload.extend_from_slice(&self.threshold.to_le_bytes());
        payload.extend_from_slice(&(self.challenge.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.challenge);
        payload.extend_from_slice(&self.issued_at.to_le_bytes());
        payload
    }
}

pub struct ReceiptSigner {
    key: Vec<u8>,
}

impl ReceiptSigner {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() < MIN_KEY_LEN {
            return Err(GateError::Config(format!(
                "Receipt signing key must be at least {} bytes, got {}", MIN_KEY_LEN, key.len()
            )));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Signer with a fresh key that lives only as long as this process.
    pub fn random() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    pub fn sign(&self, user_id: &str, comparison: &FaceComparisonResult, challenge: &[u8]) -> Result<EligibilityReceipt> {
        let mut receipt = EligibilityReceipt {
            user_id: user_id.to_string(),
            is_match: comparison.is_match,
            similarity: comparison.similarity,
            threshold: comparison.threshold,
            challenge: challenge.to_vec(),
            issued_at: Utc::now().timestamp(),
            signature: Vec::new(),
        };
        let mut mac = self.mac()?;
        mac.update(&receipt.signed_payload());
        receipt.signature = mac.finalize().into_bytes().to_vec();
        Ok(receipt)
    }

    /// Constant-time check of the receipt signature.
    pub fn verify(&self, receipt: &EligibilityReceipt) -> bool {
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(&receipt.signed_payload());
        mac.verify_slice(&receipt.signature).is_ok()
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| GateError::Config(format!("Invalid signing key: {}", e)))
    }
}
