use std::path::PathBuf;
use std::time::Duration;

use anchorwatch_core::consensus::SubmitterId;
use clap::{Parser, ValueEnum};

/// anchorwatch: relays Bitcoin headers and checkpoints to a checkpointing
/// chain and writes its sealed checkpoints back to Bitcoin.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Bitcoin Core RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:8332", env = "ANCHORWATCH_RPC_URL")]
    pub rpc_url: String,

    /// RPC username (optional; not needed for token-in-URL providers).
    #[arg(long, env = "ANCHORWATCH_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password (optional; not needed for token-in-URL providers).
    #[arg(long, env = "ANCHORWATCH_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Path to bitcoind's `.cookie` file, used when no user/pass is given.
    #[arg(long, env = "ANCHORWATCH_RPC_COOKIE_FILE")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Maximum RPC requests per second (unlimited when unset).
    #[arg(long, env = "ANCHORWATCH_RPC_REQUESTS_PER_SECOND")]
    pub rpc_requests_per_second: Option<u32>,

    /// Maximum number of calls in one JSON-RPC batch request.
    #[arg(long, default_value = "50", env = "ANCHORWATCH_RPC_BATCH_CHUNK_SIZE")]
    pub rpc_batch_chunk_size: usize,

    /// Wallet RPC URL. Defaults to the node RPC URL.
    #[arg(long, env = "ANCHORWATCH_WALLET_RPC_URL")]
    pub wallet_rpc_url: Option<String>,

    /// Name of the loaded bitcoind wallet to fund checkpoints from.
    #[arg(long, env = "ANCHORWATCH_WALLET_NAME")]
    pub wallet_name: Option<String>,

    /// Wallet account change addresses are drawn from.
    #[arg(long, default_value = "", env = "ANCHORWATCH_WALLET_ACCOUNT")]
    pub wallet_account: String,

    /// Passphrase unlocking the wallet key store.
    #[arg(long, env = "ANCHORWATCH_WALLET_PASSWORD", hide_env_values = true)]
    pub wallet_password: String,

    /// Seconds the wallet stays unlocked after each signing.
    #[arg(long, default_value = "10", env = "ANCHORWATCH_WALLET_LOCK_TIME")]
    pub wallet_lock_time: u64,

    /// Flat fee paid by each checkpoint transaction, in satoshis.
    #[arg(long, default_value = "10000", env = "ANCHORWATCH_FEE_PER_TX")]
    pub fee_per_tx: u64,

    /// Number of recent blocks kept in the block cache.
    #[arg(long, default_value = "100", env = "ANCHORWATCH_CACHE_CAPACITY")]
    pub cache_capacity: usize,

    /// How often to poll the node for a new best block.
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration, env = "ANCHORWATCH_POLL_INTERVAL")]
    pub poll_interval: Duration,

    /// What the block watcher hands the dispatcher: full block events, or
    /// hash-only notices the dispatcher resolves itself.
    #[arg(long, value_enum, default_value_t = EventSource::Events, env = "ANCHORWATCH_EVENT_SOURCE")]
    pub event_source: EventSource,

    /// How often to log the block cache window.
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration, env = "ANCHORWATCH_STATUS_INTERVAL")]
    pub status_interval: Duration,

    /// Consensus-chain REST base URL.
    #[arg(long, default_value = "http://127.0.0.1:1317", env = "ANCHORWATCH_CONSENSUS_URL")]
    pub consensus_url: String,

    /// How often to poll the consensus chain for checkpoints.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration, env = "ANCHORWATCH_CHECKPOINT_POLL_INTERVAL")]
    pub checkpoint_poll_interval: Duration,

    /// How long a checkpoint may stay sealed before it is submitted again.
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration, env = "ANCHORWATCH_RESEND_AFTER")]
    pub resend_after: Duration,

    /// First epoch to fetch checkpoints from.
    #[arg(long, default_value = "0", env = "ANCHORWATCH_START_EPOCH")]
    pub start_epoch: u64,

    /// Four-byte protocol tag marking checkpoint data outputs.
    #[arg(long, default_value = "anc0", value_parser = parse_tag, env = "ANCHORWATCH_CHECKPOINT_TAG")]
    pub checkpoint_tag: [u8; 4],

    /// Checkpoint encoding version.
    #[arg(long, default_value = "0", env = "ANCHORWATCH_CHECKPOINT_VERSION")]
    pub checkpoint_version: u8,

    /// Consensus-chain account credited with submissions (20 bytes, hex).
    #[arg(long, env = "ANCHORWATCH_SUBMITTER")]
    pub submitter: SubmitterId,

    /// Maximum first halves held while waiting for their second half.
    #[arg(long, default_value = "1000", env = "ANCHORWATCH_PENDING_CHECKPOINTS")]
    pub pending_checkpoints: usize,

    /// Capacity of the channels between workers.
    #[arg(long, default_value = "64", env = "ANCHORWATCH_QUEUE_SIZE")]
    pub queue_size: usize,

    /// Report the headers of a rebuilt cache window to the consensus chain.
    #[arg(long, env = "ANCHORWATCH_REPORT_ON_BOOTSTRAP")]
    pub report_on_bootstrap: bool,

    /// Attempts to rebuild the block cache before giving up.
    #[arg(long, default_value = "20", env = "ANCHORWATCH_BOOTSTRAP_RETRIES")]
    pub bootstrap_retries: usize,

    /// Initial delay between cache rebuild attempts.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration, env = "ANCHORWATCH_BOOTSTRAP_BACKOFF")]
    pub bootstrap_backoff: Duration,

    /// Longest delay between cache rebuild attempts.
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration, env = "ANCHORWATCH_BOOTSTRAP_MAX_BACKOFF")]
    pub bootstrap_max_backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventSource {
    Events,
    Notices,
}

fn parse_tag(s: &str) -> Result<[u8; 4], String> {
    <[u8; 4]>::try_from(s.as_bytes())
        .map_err(|_| format!("checkpoint tag must be exactly 4 bytes, got {}", s.len()))
}
