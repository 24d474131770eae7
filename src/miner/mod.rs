pub mod client;

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::blockchain::block::{HashInput, meets_difficulty};
use crate::blockchain::{Block, MiningInfo};
use crate::config::MinerConfig;
use crate::transaction::{BlockTransaction, CoinbaseTx};
use crate::util::now_millis;

pub use client::{MinerError, PoolClient};

/// How often a running search asks whether the pool has moved past it.
pub const PREEMPT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

const HASH_RATE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    Mined(Block),
    /// Another block reached the template's height first.
    Preempted,
}

/// Next block on top of the pool head: coinbase to `miner_address`, then the
/// pool's selected transfers.
pub fn build_template(info: &MiningInfo, miner_address: &str, now_ms: u64) -> Block {
    let head = &info.latest_block;
    let mut transactions = Vec::with_capacity(info.pending_transactions.len() + 1);
    transactions.push(BlockTransaction::Coinbase(CoinbaseTx::new(
        miner_address,
        info.coinbase_amount,
    )));
    transactions.extend(
        info.pending_transactions
            .iter()
            .cloned()
            .map(BlockTransaction::Transfer),
    );

    Block::new(
        head.index + 1,
        now_ms.max(head.timestamp),
        head.hash.clone(),
        transactions,
        info.blockchain.difficulty,
    )
}

/// Search nonces until the hash is below the template's difficulty.
/// `latest_height` is polled every [`PREEMPT_CHECK_INTERVAL`].
pub fn mine_block(template: Block, latest_height: impl FnMut() -> Option<u64>) -> MineOutcome {
    search(template, latest_height, PREEMPT_CHECK_INTERVAL)
}

fn search(
    mut block: Block,
    mut latest_height: impl FnMut() -> Option<u64>,
    check_every: Duration,
) -> MineOutcome {
    let input = HashInput::of(&block);
    let mut hash = input.hash(block.nonce);

    let mut last_check = Instant::now();
    let mut rate_start = Instant::now();
    let mut hashes: u64 = 0;

    while !meets_difficulty(&hash, block.difficulty) {
        block.nonce = block.nonce.wrapping_add(1);
        hash = input.hash(block.nonce);
        hashes += 1;

        if rate_start.elapsed() >= HASH_RATE_INTERVAL {
            info!(
                "hashing #{} at {} H/s",
                block.index,
                hashes * 1000 / rate_start.elapsed().as_millis().max(1) as u64
            );
            hashes = 0;
            rate_start = Instant::now();
        }

        if last_check.elapsed() >= check_every {
            if latest_height().is_some_and(|height| height >= block.index) {
                info!("block #{} already mined by another miner", block.index);
                return MineOutcome::Preempted;
            }
            last_check = Instant::now();
        }
    }

    block.hash = hash;
    MineOutcome::Mined(block)
}

/// Fetch a template, mine it off the async runtime and submit the result, forever.
pub async fn run(config: MinerConfig) {
    let client = PoolClient::new(&config.pool_url, config.retry_delay, config.max_retries);
    info!(
        "mining for {} against {}",
        config.miner_address, config.pool_url
    );

    loop {
        if let Err(e) = mine_once(&client, &config.miner_address).await {
            warn!("mining round failed: {e}; retrying in {:?}", config.retry_delay);
            tokio::time::sleep(config.retry_delay).await;
        }
    }
}

async fn mine_once(client: &PoolClient, miner_address: &str) -> Result<(), MinerError> {
    let info = client.mining_info().await?;
    let template = build_template(&info, miner_address, now_millis());
    debug!(
        "template #{} with {} transfers, difficulty {}",
        template.index,
        template.transactions.len() - 1,
        template.difficulty
    );

    let height = Arc::new(AtomicU64::new(info.latest_block.index));
    let poller = tokio::spawn(poll_height(client.clone(), height.clone()));

    let outcome = tokio::task::spawn_blocking(move || {
        mine_block(template, move || Some(height.load(Ordering::Relaxed)))
    })
    .await;
    poller.abort();

    let block = match outcome? {
        MineOutcome::Mined(block) => block,
        MineOutcome::Preempted => return Ok(()),
    };

    match client.submit_block(&block).await {
        Ok(accepted) => {
            info!(
                "block #{} accepted hash={} stateRoot={}",
                accepted.index, accepted.hash, accepted.state_root
            );
            Ok(())
        }
        Err(MinerError::Rejected(reason)) => {
            warn!("block #{} rejected: {reason}", block.index);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn poll_height(client: PoolClient, height: Arc<AtomicU64>) {
    loop {
        tokio::time::sleep(PREEMPT_CHECK_INTERVAL).await;
        match client.mining_info().await {
            Ok(info) => height.store(info.latest_block.index, Ordering::Relaxed),
            Err(e) => debug!("height poll failed: {e}"),
        }
    }
}
