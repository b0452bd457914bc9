//! Consensus-chain collaborator seam.
//!
//! The checkpointing chain is only ever read as snapshots
//! ([`RawCheckpointWithMeta`]) and written to through [`ConsensusClient`].

pub mod codec;
mod http;
#[cfg(test)]
pub mod mock;
mod poller;

pub use codec::{CheckpointCodec, CheckpointEncoder, CodecError, SubmitterId};
pub use http::HttpConsensusClient;
pub use poller::CheckpointPoller;

use async_trait::async_trait;
use bitcoin::block::Header;
use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};

use crate::types::BlockHeight;

// ==============================================================================
// Checkpoints
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Accumulating,
    Sealed,
    Submitted,
    Confirmed,
    Finalized,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accumulating => write!(f, "accumulating"),
            Self::Sealed => write!(f, "sealed"),
            Self::Submitted => write!(f, "submitted"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// The signed content of an epoch's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCheckpoint {
    pub epoch_num: u64,
    #[serde(with = "hex_bytes")]
    pub last_commit_hash: [u8; 32],
    /// Which validators signed, one bit per validator.
    #[serde(with = "hex_bytes")]
    pub bitmap: Vec<u8>,
    /// Aggregate BLS signature over the checkpoint.
    #[serde(with = "hex_bytes")]
    pub bls_multi_sig: Vec<u8>,
}

/// A checkpoint snapshot together with its lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCheckpointWithMeta {
    pub ckpt: RawCheckpoint,
    pub status: CheckpointStatus,
    #[serde(default)]
    pub power_sum: u64,
}

impl RawCheckpointWithMeta {
    pub fn epoch(&self) -> u64 {
        self.ckpt.epoch_num
    }
}

/// Where one half of a checkpoint was found on the base chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub block_hash: BlockHash,
    pub height: BlockHeight,
    pub txid: Txid,
}

/// A checkpoint reassembled from both halves found on the base chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCheckpoint {
    pub ckpt: RawCheckpoint,
    pub submitter: SubmitterId,
    pub first: ChunkLocation,
    pub second: ChunkLocation,
}

// ==============================================================================
// Client
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("consensus chain transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("consensus chain returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid consensus chain response: {0}")]
    InvalidResponse(String),
}

/// Submission and query surface of the consensus chain. Submissions are
/// fire-and-forget from the relayer's point of view.
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn submit_headers(&self, headers: &[Header]) -> Result<(), ConsensusError>;

    async fn submit_checkpoint(&self, ckpt: &ExtractedCheckpoint) -> Result<(), ConsensusError>;

    /// Checkpoints for epochs `>= epoch`, in ascending epoch order.
    async fn raw_checkpoints_since(
        &self,
        epoch: u64,
    ) -> Result<Vec<RawCheckpointWithMeta>, ConsensusError>;
}

// ==============================================================================
// Hex Serde
// ==============================================================================

pub(crate) mod hex_bytes {
    use bitcoin::hex::{DisplayHex, FromHex};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&bytes.as_ref().to_lower_hex_string())
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromHex,
    {
        let s = String::deserialize(deserializer)?;
        T::from_hex(&s).map_err(|e| serde::de::Error::custom(format!("invalid hex: {e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_with_meta_json_uses_hex_fields() {
        let json = serde_json::json!({
            "ckpt": {
                "epoch_num": 12,
                "last_commit_hash": "11".repeat(32),
                "bitmap": "ff00",
                "bls_multi_sig": "abcd",
            },
            "status": "SEALED",
        });

        let parsed: RawCheckpointWithMeta =
            serde_json::from_value(json).expect("checkpoint json should parse");
        assert_eq!(parsed.epoch(), 12);
        assert_eq!(parsed.status, CheckpointStatus::Sealed);
        assert_eq!(parsed.ckpt.last_commit_hash, [0x11; 32]);
        assert_eq!(parsed.ckpt.bitmap, vec![0xff, 0x00]);
        assert_eq!(parsed.power_sum, 0);

        let back = serde_json::to_value(&parsed).expect("checkpoint should serialize");
        assert_eq!(back["ckpt"]["bls_multi_sig"], "abcd");
    }

    #[test]
    fn short_commit_hash_is_rejected() {
        let json = serde_json::json!({
            "epoch_num": 1,
            "last_commit_hash": "1111",
            "bitmap": "",
            "bls_multi_sig": "",
        });
        assert!(serde_json::from_value::<RawCheckpoint>(json).is_err());
    }
}
