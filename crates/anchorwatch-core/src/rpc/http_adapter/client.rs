use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{BlockHash, Transaction, Txid};
use futures::future::try_join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use lru::LruCache;
use reqwest::header;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{CacheError, CoreError, RpcError};
use crate::types::{BlockHeight, IndexedBlock, TxNode, TxOutput};

use super::super::types::ChainInfo;
use super::super::BtcRpc;
use super::connection::{parse_connection, resolve_auth};
use super::parsing::{
    parse_block_hash, parse_block_hex, parse_gettxout_result, parse_integer_optional,
    parse_integer_required, parse_opt_block_hash, parse_txid, parse_vout,
};
use super::protocol::{
    is_not_found_error, parse_batch_id, parse_jsonrpc_error, JsonRpcRequest,
    JsonRpcRequestOwned, JsonRpcResponse, JsonRpcResponseOwned,
};

/// Maximum number of block-hash → height entries cached in memory.
const BLOCK_HEIGHT_CACHE_CAP: usize = 10_000;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bitcoin Core JSON-RPC client over HTTP(S).
///
/// Supports both single and batched RPC calls. Maintains an LRU cache of
/// block-hash-to-height mappings so that fetching a block by hash usually
/// costs a single `getblock` round trip.
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    batch_chunk_size: usize,
    next_id: AtomicU64,
    /// A hash always maps to the same height, even for stale blocks, so
    /// entries never need invalidation on reorg, only eviction.
    block_height_cache: RwLock<LruCache<BlockHash, BlockHeight>>,
}

impl HttpRpcClient {
    /// Create a new client for an HTTP URL.
    ///
    /// Authentication precedence:
    /// 1. explicit `user` + `pass`
    /// 2. cookie file (`username:password`) from `cookie_file`
    /// 3. no auth
    ///
    /// If `requests_per_second` is set, calls are rate-limited per outbound
    /// HTTP request (batched calls count as one request).
    pub fn new(
        connection: &str,
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
        requests_per_second: Option<u32>,
        batch_chunk_size: usize,
    ) -> Result<Self, CoreError> {
        if batch_chunk_size == 0 {
            return Err(CoreError::InvalidData(
                "rpc batch chunk size must be at least 1".to_owned(),
            ));
        }
        let auth = resolve_auth(user, pass, cookie_file)?;
        let url = parse_connection(connection)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .map_err(RpcError::Transport)?;

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidData("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            url,
            auth,
            limiter,
            batch_chunk_size,
            next_id: AtomicU64::new(initial_request_id()),
            block_height_cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(BLOCK_HEIGHT_CACHE_CAP).unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub(super) async fn rpc_call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.wait_for_rate_limit().await;
        let id = self.reserve_request_ids(1);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&req);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();

        let body = response.text().await.map_err(RpcError::Transport)?;
        debug!(rpc.id = id, rpc.method = method, %status, body_len = body.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %body, "rpc response body");

        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;

        if let Some(err) = decoded.error {
            return Err(parse_jsonrpc_error(err));
        }

        Ok(decoded.result.unwrap_or(serde_json::Value::Null))
    }

    async fn rpc_batch(
        &self,
        calls: &[(String, Vec<serde_json::Value>)],
    ) -> Result<Vec<serde_json::Value>, CoreError> {
        self.wait_for_rate_limit().await;
        let start_id = self.reserve_request_ids(calls.len() as u64);
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            "rpc batch call"
        );
        let requests: Vec<JsonRpcRequestOwned> = calls
            .iter()
            .enumerate()
            .map(|(offset, (method, params))| JsonRpcRequestOwned {
                jsonrpc: "2.0",
                id: start_id + offset as u64,
                method: method.clone(),
                params: params.clone(),
            })
            .collect();

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&requests);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();

        let body = response.text().await.map_err(RpcError::Transport)?;
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            %status,
            body_len = body.len(),
            "rpc batch response"
        );

        let decoded: Vec<JsonRpcResponseOwned> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}; body={body}"))
        })?;

        let mut by_id: HashMap<u64, JsonRpcResponseOwned> = HashMap::with_capacity(decoded.len());
        for item in decoded {
            let id = parse_batch_id(&item.id)?;
            by_id.insert(id, item);
        }

        let mut ordered = Vec::with_capacity(calls.len());
        for id in start_id..(start_id + calls.len() as u64) {
            let item = by_id.remove(&id).ok_or(RpcError::MissingBatchItem { id })?;

            if let Some(err) = item.error {
                return Err(parse_jsonrpc_error(err));
            }
            ordered.push(item.result.unwrap_or(serde_json::Value::Null));
        }

        Ok(ordered)
    }

    async fn rpc_batch_chunked(
        &self,
        calls: &[(String, Vec<serde_json::Value>)],
    ) -> Result<Vec<serde_json::Value>, CoreError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Keep each payload small enough for node/proxy limits while still
        // issuing chunks concurrently to avoid serial round-trip latency.
        let chunk_futures: Vec<_> = calls
            .chunks(self.batch_chunk_size)
            .map(|chunk| self.rpc_batch(chunk))
            .collect();
        let chunked = try_join_all(chunk_futures).await?;
        Ok(chunked.into_iter().flatten().collect())
    }

    async fn get_block_height(&self, block_hash: &BlockHash) -> Result<BlockHeight, CoreError> {
        // The LRU cache requires a write lock for `get` (it updates recency),
        // but the lookup is fast so the write lock is acceptable.
        if let Some(height) = self
            .block_height_cache
            .write()
            .await
            .get(block_hash)
            .copied()
        {
            return Ok(height);
        }

        let raw = self
            .rpc_call(
                "getblockheader",
                vec![
                    serde_json::json!(block_hash.to_string()),
                    serde_json::json!(true),
                ],
            )
            .await
            .map_err(|err| normalize_block_error(block_hash, err))?;
        let height =
            BlockHeight(parse_integer_required::<u32, false>(raw.get("height"), "height")?);
        self.remember_height(*block_hash, height).await;
        Ok(height)
    }

    async fn remember_height(&self, block_hash: BlockHash, height: BlockHeight) {
        self.block_height_cache
            .write()
            .await
            .put(block_hash, height);
    }

    async fn fetch_block(
        &self,
        block_hash: &BlockHash,
        height: BlockHeight,
    ) -> Result<IndexedBlock, CoreError> {
        let raw = self
            .rpc_call(
                "getblock",
                vec![
                    serde_json::json!(block_hash.to_string()),
                    serde_json::json!(false),
                ],
            )
            .await
            .map_err(|err| normalize_block_error(block_hash, err))?;
        let block = parse_block_hex(&raw)?;
        if block.block_hash() != *block_hash {
            return Err(CoreError::InvalidData(format!(
                "node returned block {} for requested hash {block_hash}",
                block.block_hash()
            )));
        }
        Ok(IndexedBlock::new(height, block))
    }
}

#[async_trait]
impl BtcRpc for HttpRpcClient {
    async fn get_blockchain_info(&self) -> Result<ChainInfo, CoreError> {
        let raw = self.rpc_call("getblockchaininfo", Vec::new()).await?;
        let info: ChainInfo = serde_json::from_value(raw).map_err(|e| {
            CoreError::InvalidData(format!("invalid getblockchaininfo result: {e}"))
        })?;
        Ok(info)
    }

    async fn get_block_by_hash(&self, hash: &BlockHash) -> Result<IndexedBlock, CoreError> {
        let height = self.get_block_height(hash).await?;
        self.fetch_block(hash, height).await
    }

    async fn get_block_by_height(&self, height: BlockHeight) -> Result<IndexedBlock, CoreError> {
        let raw = self
            .rpc_call("getblockhash", vec![serde_json::json!(height.0)])
            .await?;
        let hash = parse_block_hash(&raw)?;
        self.remember_height(hash, height).await;
        self.fetch_block(&hash, height).await
    }

    /// Batched variant: one chunked batch of `getblockhash` followed by one
    /// chunked batch of `getblock`.
    async fn find_tail_blocks_by_height(
        &self,
        base_height: BlockHeight,
    ) -> Result<Vec<IndexedBlock>, CoreError> {
        let best = self.get_best_block().await?;
        if base_height > best.height {
            return Err(CoreError::InvalidData(format!(
                "base height {base_height} is above best height {}",
                best.height
            )));
        }

        let heights: Vec<BlockHeight> = (base_height.0..=best.height.0).map(BlockHeight).collect();
        let hash_calls: Vec<(String, Vec<serde_json::Value>)> = heights
            .iter()
            .map(|h| ("getblockhash".to_owned(), vec![serde_json::json!(h.0)]))
            .collect();
        let hashes = self
            .rpc_batch_chunked(&hash_calls)
            .await?
            .iter()
            .map(parse_block_hash)
            .collect::<Result<Vec<_>, _>>()?;

        let block_calls: Vec<(String, Vec<serde_json::Value>)> = hashes
            .iter()
            .map(|hash| {
                (
                    "getblock".to_owned(),
                    vec![serde_json::json!(hash.to_string()), serde_json::json!(false)],
                )
            })
            .collect();
        let raw_blocks = match self.rpc_batch_chunked(&block_calls).await {
            Ok(raw) => raw,
            Err(batch_error) => {
                warn!(
                    block_count = hashes.len(),
                    error = %batch_error,
                    "batch getblock failed; falling back to sequential requests"
                );
                let mut sequential = Vec::with_capacity(hashes.len());
                for (hash, height) in hashes.iter().zip(&heights) {
                    sequential.push(self.fetch_block(hash, *height).await?);
                }
                return ensure_contiguous(sequential);
            }
        };

        let mut blocks = Vec::with_capacity(raw_blocks.len());
        for ((raw, hash), height) in raw_blocks.iter().zip(&hashes).zip(&heights) {
            let block = parse_block_hex(raw)?;
            if block.block_hash() != *hash {
                return Err(CoreError::InvalidData(format!(
                    "node returned block {} for requested hash {hash}",
                    block.block_hash()
                )));
            }
            self.remember_height(*hash, *height).await;
            blocks.push(IndexedBlock::new(*height, block));
        }
        ensure_contiguous(blocks)
    }

    async fn send_raw_transaction(
        &self,
        tx: &Transaction,
        allow_high_fees: bool,
    ) -> Result<Txid, CoreError> {
        let mut params = vec![serde_json::json!(serialize_hex(tx))];
        if allow_high_fees {
            // A max fee rate of zero disables the node's absurd-fee check.
            params.push(serde_json::json!(0));
        }
        let raw = self.rpc_call("sendrawtransaction", params).await?;
        parse_txid(Some(&raw), "sendrawtransaction result")
    }

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> Result<TxNode, CoreError> {
        let raw = self
            .rpc_call(
                "getrawtransaction",
                vec![serde_json::json!(txid.to_string()), serde_json::json!(true)],
            )
            .await?;

        let vout = raw
            .get("vout")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| CoreError::InvalidData("missing vout array".into()))?;

        Ok(TxNode {
            txid: parse_txid(raw.get("txid"), "txid")?,
            block_hash: parse_opt_block_hash(raw.get("blockhash"))?,
            confirmations: parse_integer_optional::<u64, false>(raw.get("confirmations")),
            outputs: parse_vout(vout)?,
        })
    }

    async fn get_tx_out(
        &self,
        txid: &Txid,
        vout: u32,
        include_mempool: bool,
    ) -> Result<Option<TxOutput>, CoreError> {
        let raw = self
            .rpc_call(
                "gettxout",
                vec![
                    serde_json::json!(txid.to_string()),
                    serde_json::json!(vout),
                    serde_json::json!(include_mempool),
                ],
            )
            .await?;

        parse_gettxout_result(raw)
    }
}

fn ensure_contiguous(blocks: Vec<IndexedBlock>) -> Result<Vec<IndexedBlock>, CoreError> {
    for pair in blocks.windows(2) {
        if pair[1].prev_hash() != pair[0].hash() {
            return Err(CacheError::InvalidChain {
                expected: pair[0].hash(),
                found: pair[1].prev_hash(),
            }
            .into());
        }
    }
    Ok(blocks)
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

// ==============================================================================
// RPC Error Normalization
// ==============================================================================

/// Convert "block not found" JSON-RPC responses into `BlockNotFound`.
fn normalize_block_error(block_hash: &BlockHash, err: CoreError) -> CoreError {
    match err {
        CoreError::Rpc(RpcError::ServerError { code, ref message })
            if is_not_found_error(code, message) =>
        {
            CoreError::BlockNotFound(*block_hash)
        }
        other => other,
    }
}
