//! Two-part checkpoint payload codec.
//!
//! A checkpoint does not fit a single null-data output, so it is split in
//! two chunks, each prefixed by a 6-byte header (`tag | version | part`):
//!
//! ```text
//! part 0: epoch u64be | last_commit_hash [32] | bitmap_len u8 | bitmap | submitter [20]
//! part 1: sig_len u8 | bls_multi_sig | sha256(part 0)[..10]
//! ```
//!
//! The digest in part 1 binds the halves together; the extractor pairs
//! them by it.

use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::hex::{DisplayHex, FromHex};
use serde::{Deserialize, Serialize};

use super::RawCheckpoint;

pub const TAG_LEN: usize = 4;
pub const HEADER_LEN: usize = TAG_LEN + 2;
pub const DIGEST_LEN: usize = 10;
pub const SUBMITTER_LEN: usize = 20;
/// Largest payload a standard null-data output relays.
pub const MAX_CHUNK_LEN: usize = 80;

pub const CURRENT_VERSION: u8 = 0;

/// Truncated sha256 of an encoded first chunk.
pub type ChunkDigest = [u8; DIGEST_LEN];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("chunk does not carry the expected tag")]
    BadTag,

    #[error("unsupported checkpoint encoding version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown chunk part index {0}")]
    BadPart(u8),

    #[error("chunk is truncated")]
    Truncated,

    #[error("chunk has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("{field} is {len} bytes, at most 255 can be encoded")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("chunk {part} is {len} bytes, null-data outputs carry at most {MAX_CHUNK_LEN}")]
    ChunkTooLarge { part: u8, len: usize },

    #[error("second chunk does not belong to the first")]
    DigestMismatch,
}

// ==============================================================================
// Submitter Identity
// ==============================================================================

/// Consensus-chain account of the relayer that submitted a checkpoint,
/// recorded in the first chunk so the submitter can be rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmitterId(#[serde(with = "super::hex_bytes")] pub [u8; SUBMITTER_LEN]);

impl std::fmt::Display for SubmitterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0[..].as_hex())
    }
}

impl FromStr for SubmitterId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <[u8; SUBMITTER_LEN]>::from_hex(s)
            .map(Self)
            .map_err(|e| format!("submitter must be {SUBMITTER_LEN} hex-encoded bytes: {e}"))
    }
}

// ==============================================================================
// Encoder
// ==============================================================================

/// Turns a checkpoint into the two payloads embedded in the checkpoint
/// transaction pair.
pub trait CheckpointEncoder: Send + Sync {
    fn encode(
        &self,
        ckpt: &RawCheckpoint,
        submitter: &SubmitterId,
    ) -> Result<(Vec<u8>, Vec<u8>), CodecError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointCodec {
    tag: [u8; TAG_LEN],
    version: u8,
}

/// One decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointChunk {
    First(FirstHalf),
    Second(SecondHalf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstHalf {
    pub epoch_num: u64,
    pub last_commit_hash: [u8; 32],
    pub bitmap: Vec<u8>,
    pub submitter: SubmitterId,
    /// Digest of the encoded chunk, matched against [`SecondHalf::first_digest`].
    pub digest: ChunkDigest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondHalf {
    pub bls_multi_sig: Vec<u8>,
    pub first_digest: ChunkDigest,
}

impl CheckpointCodec {
    pub fn new(tag: [u8; TAG_LEN], version: u8) -> Self {
        Self { tag, version }
    }

    pub fn tag(&self) -> [u8; TAG_LEN] {
        self.tag
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    fn header(&self, part: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.tag);
        out.push(self.version);
        out.push(part);
        out
    }

    /// Decode a single null-data payload. Payloads not carrying this codec's
    /// tag fail with [`CodecError::BadTag`].
    pub fn decode(&self, data: &[u8]) -> Result<CheckpointChunk, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::Truncated);
        }
        if data[..TAG_LEN] != self.tag {
            return Err(CodecError::BadTag);
        }
        let version = data[TAG_LEN];
        if version != self.version {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let mut reader = Reader::new(&data[HEADER_LEN..]);
        let chunk = match data[TAG_LEN + 1] {
            0 => {
                let epoch_num = u64::from_be_bytes(reader.array()?);
                let last_commit_hash = reader.array()?;
                let bitmap = reader.prefixed()?.to_vec();
                let submitter = SubmitterId(reader.array()?);
                CheckpointChunk::First(FirstHalf {
                    epoch_num,
                    last_commit_hash,
                    bitmap,
                    submitter,
                    digest: digest(data),
                })
            }
            1 => {
                let bls_multi_sig = reader.prefixed()?.to_vec();
                let first_digest = reader.array()?;
                CheckpointChunk::Second(SecondHalf {
                    bls_multi_sig,
                    first_digest,
                })
            }
            other => return Err(CodecError::BadPart(other)),
        };
        reader.finish()?;
        Ok(chunk)
    }
}

impl CheckpointEncoder for CheckpointCodec {
    fn encode(
        &self,
        ckpt: &RawCheckpoint,
        submitter: &SubmitterId,
    ) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
        let mut first = self.header(0);
        first.extend_from_slice(&ckpt.epoch_num.to_be_bytes());
        first.extend_from_slice(&ckpt.last_commit_hash);
        push_prefixed(&mut first, "bitmap", &ckpt.bitmap)?;
        first.extend_from_slice(&submitter.0);

        let mut second = self.header(1);
        push_prefixed(&mut second, "bls_multi_sig", &ckpt.bls_multi_sig)?;
        second.extend_from_slice(&digest(&first));

        check_chunk_len(0, &first)?;
        check_chunk_len(1, &second)?;
        Ok((first, second))
    }
}

/// Rebuild the checkpoint from a matching pair of halves.
pub fn assemble(
    first: &FirstHalf,
    second: &SecondHalf,
) -> Result<(RawCheckpoint, SubmitterId), CodecError> {
    if first.digest != second.first_digest {
        return Err(CodecError::DigestMismatch);
    }
    let ckpt = RawCheckpoint {
        epoch_num: first.epoch_num,
        last_commit_hash: first.last_commit_hash,
        bitmap: first.bitmap.clone(),
        bls_multi_sig: second.bls_multi_sig.clone(),
    };
    Ok((ckpt, first.submitter))
}

/// Reject a payload too large for a standard null-data output.
pub fn check_chunk_len(part: u8, chunk: &[u8]) -> Result<(), CodecError> {
    if chunk.len() > MAX_CHUNK_LEN {
        return Err(CodecError::ChunkTooLarge {
            part,
            len: chunk.len(),
        });
    }
    Ok(())
}

fn digest(chunk: &[u8]) -> ChunkDigest {
    let hash = sha256::Hash::hash(chunk).to_byte_array();
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hash[..DIGEST_LEN]);
    out
}

fn push_prefixed(out: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u8::try_from(bytes.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    out.push(len);
    out.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let [len] = self.array::<1>()?;
        self.take(usize::from(len))
    }

    fn finish(self) -> Result<(), CodecError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
