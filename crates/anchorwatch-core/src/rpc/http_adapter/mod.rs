//! Native JSON-RPC clients for Bitcoin Core compatible node and wallet
//! endpoints.
//!
//! Implements [`BtcRpc`](super::BtcRpc) and
//! [`WalletBackend`](super::WalletBackend) over JSON-RPC using `reqwest`, with
//! optional request rate limiting, single and batched calls, basic or cookie
//! auth, and an LRU block-height cache.

mod client;
mod connection;
mod parsing;
mod protocol;
mod wallet;

pub use client::HttpRpcClient;
pub use wallet::HttpWallet;
