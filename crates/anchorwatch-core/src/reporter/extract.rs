use bitcoin::script::Instruction;
use bitcoin::Script;
use quick_cache::sync::Cache;
use tracing::{debug, trace, warn};

use crate::consensus::codec::{
    assemble, CheckpointChunk, ChunkDigest, CodecError, FirstHalf, SecondHalf,
};
use crate::consensus::{CheckpointCodec, ChunkLocation, ExtractedCheckpoint};
use crate::types::IndexedBlock;

/// Pulls checkpoint halves out of null-data outputs and pairs them up.
///
/// The two halves of a checkpoint are independent transactions, so they may
/// land in either order and in different blocks. Whichever half arrives
/// first waits in a bounded pending map keyed by the first half's digest.
pub struct CheckpointExtractor {
    codec: CheckpointCodec,
    pending_first: Cache<ChunkDigest, (FirstHalf, ChunkLocation)>,
    pending_second: Cache<ChunkDigest, (SecondHalf, ChunkLocation)>,
}

impl CheckpointExtractor {
    pub fn new(codec: CheckpointCodec, pending_capacity: usize) -> Self {
        Self {
            codec,
            pending_first: Cache::new(pending_capacity),
            pending_second: Cache::new(pending_capacity),
        }
    }

    /// Scan every output of `block` and return the checkpoints completed by it.
    pub fn scan(&self, block: &IndexedBlock) -> Vec<ExtractedCheckpoint> {
        let mut firsts = Vec::new();
        let mut seconds = Vec::new();
        for tx in &block.txs {
            let location = ChunkLocation {
                block_hash: block.hash(),
                height: block.height,
                txid: tx.compute_txid(),
            };
            for output in &tx.output {
                let Some(payload) = null_data_payload(&output.script_pubkey) else {
                    continue;
                };
                match self.codec.decode(&payload) {
                    Ok(CheckpointChunk::First(half)) => firsts.push((half, location)),
                    Ok(CheckpointChunk::Second(half)) => seconds.push((half, location)),
                    Err(CodecError::BadTag) => {}
                    Err(e) => {
                        debug!(txid = %location.txid, error = %e, "ignoring malformed checkpoint chunk")
                    }
                }
            }
        }

        let mut found = Vec::new();
        for (half, location) in firsts {
            match self.pending_second.remove(&half.digest) {
                Some((_, (second, second_loc))) => {
                    found.extend(self.pair(&half, location, &second, second_loc));
                }
                None => self.pending_first.insert(half.digest, (half, location)),
            }
        }
        for (half, location) in seconds {
            match self.pending_first.remove(&half.first_digest) {
                Some((_, (first, first_loc))) => {
                    found.extend(self.pair(&first, first_loc, &half, location));
                }
                None => self.pending_second.insert(half.first_digest, (half, location)),
            }
        }
        found
    }

    fn pair(
        &self,
        first: &FirstHalf,
        first_loc: ChunkLocation,
        second: &SecondHalf,
        second_loc: ChunkLocation,
    ) -> Option<ExtractedCheckpoint> {
        match assemble(first, second) {
            Ok((ckpt, submitter)) => {
                trace!(epoch = ckpt.epoch_num, "paired checkpoint halves");
                Some(ExtractedCheckpoint {
                    ckpt,
                    submitter,
                    first: first_loc,
                    second: second_loc,
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to assemble checkpoint");
                None
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending_first.len() + self.pending_second.len()
    }
}

/// Concatenated pushes of an `OP_RETURN` output, or `None` for any other
/// script.
pub(crate) fn null_data_payload(script: &Script) -> Option<Vec<u8>> {
    if !script.is_op_return() {
        return None;
    }
    let mut payload = Vec::new();
    for instruction in script.instructions().skip(1) {
        match instruction.ok()? {
            Instruction::PushBytes(bytes) => payload.extend_from_slice(bytes.as_bytes()),
            Instruction::Op(_) => return None,
        }
    }
    Some(payload)
}
