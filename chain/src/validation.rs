use std::time::{SystemTime, UNIX_EPOCH};

use containers::BlockHeader;
use k256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use thiserror::Error;

use crate::config::{ChainConfig, MAX_EXTRA_DATA_LEN, MAX_FUTURE_DRIFT_SECS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("extra data too long: {len} > {max}")]
    ExtraDataTooLong { len: usize, max: usize },
    #[error("timestamp {timestamp} is ahead of local clock {now}")]
    FutureTimestamp { timestamp: u64, now: u64 },
    #[error("malformed signing public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match mine hash")]
    BadSignature,
}

/// Accepts or rejects a single header received from a peer.
pub trait HeaderValidator: Send + Sync {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError>;
}

/// One independent check applied by [`BlockHeaderValidator`].
pub trait HeaderRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, header: &BlockHeader) -> Result<(), HeaderError>;
}

pub struct ExtraDataRule {
    pub max_len: usize,
}

impl HeaderRule for ExtraDataRule {
    fn name(&self) -> &'static str {
        "extra_data"
    }

    fn check(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        let len = header.extra_data.len();
        if len > self.max_len {
            return Err(HeaderError::ExtraDataTooLong { len, max: self.max_len });
        }
        Ok(())
    }
}

pub struct FutureTimestampRule {
    pub max_drift_secs: u64,
}

impl HeaderRule for FutureTimestampRule {
    fn name(&self) -> &'static str {
        "future_timestamp"
    }

    fn check(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if header.timestamp > now.saturating_add(self.max_drift_secs) {
            return Err(HeaderError::FutureTimestamp { timestamp: header.timestamp, now });
        }
        Ok(())
    }
}

/// Verifies the producer's secp256k1 signature over the header's mine hash.
pub struct SignatureRule;

impl HeaderRule for SignatureRule {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn check(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        let key = VerifyingKey::from_sec1_bytes(&header.signing_public_key)
            .map_err(|_| HeaderError::MalformedPublicKey)?;
        let signature =
            Signature::from_slice(&header.signature).map_err(|_| HeaderError::MalformedSignature)?;
        key.verify(header.mine_hash().as_slice(), &signature)
            .map_err(|_| HeaderError::BadSignature)
    }
}

/// Runs every rule in order and stops at the first failure.
pub struct BlockHeaderValidator {
    rules: Vec<Box<dyn HeaderRule>>,
}

impl BlockHeaderValidator {
    pub fn new(rules: Vec<Box<dyn HeaderRule>>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self::new(vec![
            Box::new(ExtraDataRule { max_len: config.max_extra_data_len }),
            Box::new(FutureTimestampRule { max_drift_secs: config.max_future_drift_secs }),
            Box::new(SignatureRule),
        ])
    }
}

impl Default for BlockHeaderValidator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ExtraDataRule { max_len: MAX_EXTRA_DATA_LEN }),
            Box::new(FutureTimestampRule { max_drift_secs: MAX_FUTURE_DRIFT_SECS }),
            Box::new(SignatureRule),
        ])
    }
}

impl HeaderValidator for BlockHeaderValidator {
    fn validate(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        for rule in &self.rules {
            if let Err(err) = rule.check(header) {
                tracing::debug!(rule = rule.name(), number = header.number, %err, "header rejected");
                return Err(err);
            }
        }
        Ok(())
    }
}
