mod cli;
mod shutdown;
mod status;

use std::sync::Arc;

use anchorwatch_core::consensus::{
    CheckpointCodec, CheckpointPoller, ConsensusClient, HttpConsensusClient,
};
use anchorwatch_core::reporter::{CheckpointExtractor, Dispatcher, Reporter};
use anchorwatch_core::rpc::{BtcRpc, HttpRpcClient, HttpWallet, WalletConfig};
use anchorwatch_core::submitter::{SealedCheckpointConsumer, Submitter};
use anchorwatch_core::watcher::PollingWatcher;
use anchorwatch_core::{BlockCache, BlockEvent, RetryPolicy, SequenceNotice};
use bitcoin::{Amount, Network};
use clap::Parser;
use eyre::{ensure, eyre, WrapErr};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    ensure!(args.queue_size > 0, "--queue-size must be at least 1");
    ensure!(!args.poll_interval.is_zero(), "--poll-interval must be positive");
    ensure!(!args.status_interval.is_zero(), "--status-interval must be positive");

    // Connect to the node and verify the connection succeeds before any
    // worker starts.
    let rpc: Arc<dyn BtcRpc> = Arc::new(
        HttpRpcClient::new(
            &args.rpc_url,
            args.rpc_user.as_deref(),
            args.rpc_pass.as_deref(),
            args.rpc_cookie_file.as_deref(),
            args.rpc_requests_per_second,
            args.rpc_batch_chunk_size,
        )
        .wrap_err("configure Bitcoin Core RPC client")?,
    );

    let chain_info = rpc.get_blockchain_info().await.map_err(|err| {
        let message = format_rpc_connect_error(&args.rpc_url, &err.to_string());
        eyre!(message).wrap_err("while attempting to connect to Bitcoin Core RPC")
    })?;
    tracing::info!(
        chain = %chain_info.chain,
        blocks = chain_info.blocks,
        "connected to Bitcoin Core"
    );
    if chain_info.pruned {
        tracing::warn!("node is pruned, blocks below the prune height cannot be cached");
    }
    let network = map_chain_to_network(&chain_info.chain)?;

    let wallet = HttpWallet::new(
        args.wallet_rpc_url.as_deref().unwrap_or(&args.rpc_url),
        args.wallet_name.as_deref(),
        args.rpc_user.as_deref(),
        args.rpc_pass.as_deref(),
        args.rpc_cookie_file.as_deref(),
        WalletConfig {
            fee_per_tx: Amount::from_sat(args.fee_per_tx),
            wallet_password: args.wallet_password.clone(),
            wallet_lock_time: args.wallet_lock_time,
        },
        network,
    )
    .wrap_err("configure wallet RPC client")?;

    let consensus: Arc<dyn ConsensusClient> = Arc::new(
        HttpConsensusClient::new(&args.consensus_url).wrap_err("configure consensus client")?,
    );

    let codec = CheckpointCodec::new(args.checkpoint_tag, args.checkpoint_version);
    let reporter = Arc::new(Reporter::new(
        consensus.clone(),
        CheckpointExtractor::new(codec, args.pending_checkpoints),
        args.report_on_bootstrap,
    ));
    let cache = BlockCache::new(args.cache_capacity).wrap_err("create block cache")?;
    let retry = RetryPolicy {
        max_retries: args.bootstrap_retries,
        backoff_unit: args.bootstrap_backoff,
        max_backoff: args.bootstrap_max_backoff,
        ..RetryPolicy::default()
    };

    let (checkpoint_tx, checkpoint_rx) = mpsc::channel(args.queue_size);

    let watcher = PollingWatcher::new(rpc.clone(), args.poll_interval, args.cache_capacity);
    let (dispatcher, cache_handle) = Dispatcher::new(rpc.clone(), reporter, cache, retry);
    let poller = CheckpointPoller::new(
        consensus,
        args.start_epoch,
        args.checkpoint_poll_interval,
        args.resend_after,
    );
    let submitter = Submitter::new(rpc, Arc::new(wallet), Box::new(codec), args.submitter)
        .with_change_account(args.wallet_account.clone());
    let consumer = SealedCheckpointConsumer::new(submitter);

    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());

    let mut workers: JoinSet<(&'static str, eyre::Result<()>)> = JoinSet::new();
    let token = cancel.clone();
    let dispatcher = match args.event_source {
        cli::EventSource::Events => {
            let (event_tx, event_rx) = mpsc::channel::<BlockEvent>(args.queue_size);
            workers.spawn(async move {
                watcher.run(event_tx, token).await;
                ("block watcher", Ok(()))
            });
            dispatcher.with_block_events(event_rx)
        }
        cli::EventSource::Notices => {
            let (notice_tx, notice_rx) = mpsc::channel::<SequenceNotice>(args.queue_size);
            workers.spawn(async move {
                watcher.run(notice_tx, token).await;
                ("block watcher", Ok(()))
            });
            dispatcher.with_sequence_notices(notice_rx)
        }
    };
    let token = cancel.clone();
    workers.spawn(async move {
        let res = dispatcher.run(token).await;
        ("block dispatcher", res.wrap_err("block dispatcher failed"))
    });
    let token = cancel.clone();
    let status_interval = args.status_interval;
    workers.spawn(async move {
        status::log_cache_window(cache_handle, status_interval, token).await;
        ("cache status", Ok(()))
    });
    let token = cancel.clone();
    workers.spawn(async move {
        poller.run(checkpoint_tx, token).await;
        ("checkpoint poller", Ok(()))
    });
    let token = cancel.clone();
    workers.spawn(async move {
        let res = consumer.run(checkpoint_rx, token).await;
        ("checkpoint submitter", res.wrap_err("checkpoint submitter failed"))
    });

    tracing::info!(
        network = %network,
        event_source = ?args.event_source,
        consensus = %args.consensus_url,
        submitter = %args.submitter,
        "anchorwatch running"
    );

    // The first worker to stop takes the others down with it.
    let mut failed = false;
    while let Some(joined) = workers.join_next().await {
        cancel.cancel();
        match joined {
            Ok((worker, Ok(()))) => tracing::info!(worker, "worker stopped"),
            Ok((worker, Err(err))) => {
                tracing::error!(worker, error = ?err, "worker failed");
                failed = true;
            }
            Err(err) => {
                tracing::error!(error = %err, "worker panicked");
                failed = true;
            }
        }
    }

    if failed {
        return Err(eyre!("anchorwatch stopped after a worker failure"));
    }
    tracing::info!("anchorwatch stopped");
    Ok(())
}

fn format_rpc_connect_error(rpc_url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not connect to RPC endpoint `{rpc_url}`"),
        format!("RPC error: {source_error}"),
    ];

    if source_error.contains("Could not resolve host") || source_error.contains("dns error") {
        lines.push(
            "hint: hostname resolution failed; verify the endpoint hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("401") || source_error.contains("403") {
        lines.push(
            "hint: authentication failed; verify --rpc-user/--rpc-pass or --rpc-cookie-file"
                .into(),
        );
    } else if source_error.contains("cookie") {
        lines.push("hint: the cookie file could not be read; is bitcoind running?".into());
    } else if source_error.contains("error sending request for url") {
        lines.push(
            "hint: request could not be sent; verify the URL and that bitcoind is listening"
                .into(),
        );
    }

    lines.join("\n")
}

fn map_chain_to_network(chain: &str) -> eyre::Result<Network> {
    match chain {
        "main" => Ok(Network::Bitcoin),
        "test" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        _ => Err(eyre!("unrecognized chain name `{chain}` from getblockchaininfo")),
    }
}
