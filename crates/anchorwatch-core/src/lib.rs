pub mod cache;
pub mod consensus;
pub mod error;
pub mod reporter;
pub mod retry;
pub mod rpc;
pub mod submitter;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod test_util;

pub use cache::BlockCache;
pub use error::CoreError;
pub use retry::RetryPolicy;
pub use types::{BlockEvent, BlockEventType, BlockHeight, IndexedBlock, Point, SequenceNotice};
