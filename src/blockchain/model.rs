use log::{debug, error, info, warn};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::block::meets_difficulty;
use super::difficulty::{average_mine_time, retarget};
use super::{
    Block, CHAIN_NAME, ChainError, ConsensusError, INITIAL_DIFFICULTY, MAX_TXS_PER_BLOCK,
    MINING_REWARD, MutationClass, RETARGET_PERIOD, SubmissionGate, TARGET_MINE_TIME_MS,
};
use crate::state::{Account, AccountState, InsufficientFunds, account_key};
use crate::store::{
    BLOCKCHAIN, BLOCKS, DocumentStore, Filter, StoreError, Update, find_one_as, to_document,
};
use crate::transaction::{CoinbaseTx, Opcode, Transaction};
use crate::util::{now_millis, u256_dec};
use crate::vm::{self, Admission, TxError, Vm};
use crate::wallet::is_valid_address;

/// Singleton chain parameters; only retargeting changes `difficulty`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainParams {
    pub name: String,
    #[serde(with = "u256_dec")]
    pub mining_reward: U256,
    /// Milliseconds.
    pub target_mine_time: u64,
    #[serde(with = "u256_dec")]
    pub difficulty: U256,
    /// Index of the current head.
    pub height: u64,
}

/// What a fresh deployment starts from.
#[derive(Debug, Clone)]
pub struct GenesisConfig {
    pub name: String,
    pub mining_reward: U256,
    pub target_mine_time: u64,
    pub difficulty: U256,
    pub accounts: Vec<Account>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            name: CHAIN_NAME.to_string(),
            mining_reward: MINING_REWARD,
            target_mine_time: TARGET_MINE_TIME_MS,
            difficulty: INITIAL_DIFFICULTY,
            accounts: Vec::new(),
        }
    }
}

/// Everything a miner needs to build the next template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MiningInfo {
    pub blockchain: ChainParams,
    pub latest_block: Block,
    /// Pending transfers that can be applied in this order on top of the head.
    pub pending_transactions: Vec<Transaction>,
    #[serde(with = "u256_dec")]
    pub coinbase_amount: U256,
    /// Number of known accounts.
    pub accounts_size: usize,
}

/// The chain ledger: validates and accepts blocks, admits transactions, and
/// serializes every mutation through its gate.
pub struct Blockchain {
    store: Arc<dyn DocumentStore>,
    vm: Vm,
    gate: SubmissionGate,
}

impl Blockchain {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            vm: Vm::new(store.clone()),
            store,
            gate: SubmissionGate::new(),
        }
    }

    pub fn accounts(&self) -> &AccountState {
        self.vm.accounts()
    }

    /// Write parameters, seed accounts and the genesis block when no block exists.
    /// Returns false when the chain was already initialized.
    pub async fn init(&self, genesis: &GenesisConfig) -> Result<bool, StoreError> {
        let _guard = self.gate.lock(MutationClass::SubmitBlock).await;
        if !self.store.find(BLOCKS, &Filter::all()).await?.is_empty() {
            return Ok(false);
        }

        let params = ChainParams {
            name: genesis.name.clone(),
            mining_reward: genesis.mining_reward,
            target_mine_time: genesis.target_mine_time,
            difficulty: genesis.difficulty,
            height: 0,
        };
        self.store.delete(BLOCKCHAIN, &Filter::all()).await?;
        self.store.insert(BLOCKCHAIN, vec![to_document(&params)?]).await?;

        self.accounts().init_genesis_accounts(&genesis.accounts).await?;

        let mut block = Block::genesis(genesis.difficulty);
        block.state_root = self.accounts().compute_state_root().await?;
        self.store.insert(BLOCKS, vec![to_document(&block)?]).await?;

        info!(
            "genesis block {} created with {} seeded accounts",
            block.hash,
            genesis.accounts.len()
        );
        Ok(true)
    }

    pub async fn params(&self) -> Result<ChainParams, ChainError> {
        find_one_as(self.store.as_ref(), BLOCKCHAIN, &Filter::all())
            .await?
            .ok_or(ChainError::NotInitialized)
    }

    pub async fn block_by_height(&self, index: u64) -> Result<Option<Block>, StoreError> {
        find_one_as(self.store.as_ref(), BLOCKS, &Filter::eq("index", index)).await
    }

    pub async fn latest_block(&self) -> Result<Block, ChainError> {
        let params = self.params().await?;
        self.block_by_height(params.height)
            .await?
            .ok_or(ChainError::NotInitialized)
    }

    pub async fn get_balance(&self, address: &str) -> Result<Account, StoreError> {
        self.accounts().get_balance(address).await
    }

    pub async fn pending_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        self.vm.pending().await
    }

    pub async fn add_transaction(&self, tx: &Transaction) -> Result<Admission, TxError> {
        let _guard = self.gate.lock(MutationClass::AddTransaction).await;
        self.vm.admit(tx).await.inspect_err(|e| {
            warn!("tx {} rejected: {}", tx.hash, e);
        })
    }

    /// Consensus rules, checked in a fixed order; the first failure is returned.
    pub async fn is_valid_block(&self, candidate: &Block) -> Result<(), ChainError> {
        if candidate.compute_hash() != candidate.hash {
            return Err(ConsensusError::HashMismatch.into());
        }

        let params = self.params().await?;
        let head = self.latest_block().await?;

        if candidate.timestamp < head.timestamp && candidate.timestamp < now_millis() {
            return Err(ConsensusError::BadTimestamp {
                timestamp: candidate.timestamp,
                head: head.timestamp,
            }
            .into());
        }

        if candidate.index != head.index + 1 {
            return Err(ConsensusError::BadHeight {
                expected: head.index + 1,
                got: candidate.index,
            }
            .into());
        }

        if candidate.difficulty != params.difficulty {
            return Err(ConsensusError::DifficultyMismatch {
                expected: params.difficulty,
                got: candidate.difficulty,
            }
            .into());
        }

        if !meets_difficulty(&candidate.hash, candidate.difficulty) {
            return Err(ConsensusError::InsufficientWork.into());
        }

        if candidate.previous_hash != head.hash {
            return Err(ConsensusError::ForkMismatch.into());
        }

        if candidate.transactions.is_empty() {
            return Err(ConsensusError::EmptyBlock.into());
        }

        check_coinbase(candidate.coinbase(), params.mining_reward)?;
        Ok(())
    }

    /// Validate and apply a mined block. Holds the submit gate for the whole
    /// sequence; nothing is written unless every transaction can be applied.
    pub async fn submit_block(&self, mut block: Block) -> Result<Block, ChainError> {
        let _guard = self.gate.lock(MutationClass::SubmitBlock).await;

        if let Err(e) = self.is_valid_block(&block).await {
            warn!("block #{} rejected: {}", block.index, e);
            return Err(e);
        }
        let coinbase = block
            .coinbase()
            .cloned()
            .ok_or_else(|| ConsensusError::BadCoinbase("missing".into()))?;
        let transfers = collect_transfers(&block)?;

        if let Err(e) = self.dry_run(&coinbase, &transfers).await {
            warn!("block #{} rejected: {}", block.index, e);
            return Err(e);
        }

        self.vm.coinbase_mint(&coinbase.from, coinbase.amount).await.map_err(|source| {
            ChainError::Transaction {
                position: 0,
                source,
            }
        })?;
        for (i, tx) in transfers.iter().enumerate() {
            self.vm
                .apply(tx)
                .await
                .map_err(|source| ChainError::Transaction {
                    position: i + 1,
                    source,
                })?;
        }

        block.state_root = self.accounts().compute_state_root().await?;
        self.store.insert(BLOCKS, vec![to_document(&block)?]).await?;
        self.store
            .update(BLOCKCHAIN, &Filter::all(), &Update::set("height", block.index))
            .await?;

        info!(
            "block #{} accepted hash={} coinbase={} txs={} stateRoot={}",
            block.index,
            block.hash,
            coinbase.from,
            transfers.len(),
            block.state_root
        );

        // The block is already appended; a failed retarget must not report it as rejected.
        if block.index % RETARGET_PERIOD == 0 {
            if let Err(e) = self.adjust_difficulty().await {
                error!("retarget after block #{} failed: {}", block.index, e);
            }
        }
        Ok(block)
    }

    /// Replays the block's effects on an in-memory copy of the touched accounts.
    async fn dry_run(
        &self,
        coinbase: &CoinbaseTx,
        transfers: &[Transaction],
    ) -> Result<(), ChainError> {
        let mut overlay: HashMap<String, Account> = HashMap::new();

        let miner = self.load_into(&mut overlay, &coinbase.from).await?;
        miner.balance = miner.balance.saturating_add(coinbase.amount);

        for (i, tx) in transfers.iter().enumerate() {
            let reject = |source: TxError| ChainError::Transaction {
                position: i + 1,
                source,
            };

            vm::verify(tx).map_err(reject)?;

            let sender = self.load_into(&mut overlay, &tx.from).await?;
            if sender.nonce != tx.index {
                return Err(reject(TxError::NonceMismatch {
                    expected: sender.nonce,
                    got: tx.index,
                }));
            }
            let Some(remaining) = sender.balance.checked_sub(tx.amount) else {
                return Err(reject(TxError::InsufficientFunds(InsufficientFunds {
                    address: sender.address.clone(),
                    balance: sender.balance,
                    needed: tx.amount,
                })));
            };
            sender.balance = remaining;
            sender.nonce += 1;

            let recipient = self.load_into(&mut overlay, &tx.to).await?;
            let Some(credited) = recipient.balance.checked_add(tx.amount) else {
                return Err(reject(TxError::Overflow(recipient.address.clone())));
            };
            recipient.balance = credited;
        }
        Ok(())
    }

    async fn load_into<'a>(
        &self,
        overlay: &'a mut HashMap<String, Account>,
        address: &str,
    ) -> Result<&'a mut Account, StoreError> {
        let key = account_key(address);
        if !overlay.contains_key(&key) {
            let account = self.accounts().get_balance(&key).await?;
            overlay.insert(key.clone(), account);
        }
        Ok(overlay.entry(key).or_insert_with_key(|k| Account::empty(k.clone())))
    }

    async fn adjust_difficulty(&self) -> Result<(), ChainError> {
        let params = self.params().await?;
        let first = params.height.saturating_sub(RETARGET_PERIOD - 1);

        let mut window = Vec::with_capacity(RETARGET_PERIOD as usize);
        for index in first..=params.height {
            if let Some(block) = self.block_by_height(index).await? {
                window.push(block);
            }
        }

        let average = average_mine_time(&window, now_millis());
        let next = retarget(params.difficulty, average, params.target_mine_time);
        info!(
            "retarget at #{}: avg mine time {} ms (target {} ms), difficulty {} -> {}",
            params.height, average, params.target_mine_time, params.difficulty, next
        );

        self.store
            .update(
                BLOCKCHAIN,
                &Filter::all(),
                &Update::set("difficulty", next.to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn mining_info(&self) -> Result<MiningInfo, ChainError> {
        let params = self.params().await?;
        let latest_block = self.latest_block().await?;
        let pending_transactions = self.select_transactions().await?;
        let accounts_size = self.accounts().accounts().await?.len();
        debug!(
            "mining info: head #{} with {} selectable txs",
            latest_block.index,
            pending_transactions.len()
        );
        Ok(MiningInfo {
            coinbase_amount: params.mining_reward,
            blockchain: params,
            latest_block,
            pending_transactions,
            accounts_size,
        })
    }

    /// Per sender, takes pending transfers whose indices run on from the
    /// account nonce without gaps while the balance still covers them.
    async fn select_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        let mut by_sender: BTreeMap<String, Vec<Transaction>> = BTreeMap::new();
        for tx in self.vm.pending().await? {
            by_sender.entry(account_key(&tx.from)).or_default().push(tx);
        }

        let mut picked = Vec::new();
        'senders: for (sender, mut txs) in by_sender {
            txs.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.hash.cmp(&b.hash)));
            let account = self.accounts().get_balance(&sender).await?;
            let (mut next_index, mut balance) = (account.nonce, account.balance);

            for tx in txs {
                if picked.len() >= MAX_TXS_PER_BLOCK {
                    break 'senders;
                }
                if tx.index < next_index {
                    continue;
                }
                if tx.index > next_index || balance < tx.amount {
                    break;
                }
                balance -= tx.amount;
                next_index += 1;
                picked.push(tx);
            }
        }
        Ok(picked)
    }
}

fn check_coinbase(coinbase: Option<&CoinbaseTx>, reward: U256) -> Result<(), ConsensusError> {
    let cb = coinbase
        .ok_or_else(|| ConsensusError::BadCoinbase("first transaction is not a coinbase".into()))?;
    if cb.opcode != Opcode::Coinbase {
        return Err(ConsensusError::BadCoinbase(format!(
            "opcode is {:?}",
            cb.opcode
        )));
    }
    if !is_valid_address(&cb.from) {
        return Err(ConsensusError::BadCoinbase(format!(
            "address `{}` is invalid",
            cb.from
        )));
    }
    if cb.amount != reward {
        return Err(ConsensusError::BadCoinbase(format!(
            "amount {} differs from reward {}",
            cb.amount, reward
        )));
    }
    Ok(())
}

fn collect_transfers(block: &Block) -> Result<Vec<Transaction>, ChainError> {
    block
        .transfers()
        .enumerate()
        .map(|(i, entry)| {
            entry.cloned().ok_or(ChainError::Transaction {
                position: i + 1,
                source: TxError::UnsupportedOpcode(Opcode::Coinbase),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::meets_difficulty;
    use crate::store::{Document, MemoryStore};
    use crate::transaction::BlockTransaction;
    use crate::wallet::generate_keypair;

    const MINER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const BOB: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    fn easy() -> U256 {
        U256::MAX / 2
    }

    async fn chain_with(accounts: Vec<Account>) -> Blockchain {
        let chain = Blockchain::new(Arc::new(MemoryStore::new()));
        let genesis = GenesisConfig {
            difficulty: easy(),
            accounts,
            ..GenesisConfig::default()
        };
        assert!(chain.init(&genesis).await.unwrap());
        chain
    }

    async fn funded_chain(balance: u64) -> (Blockchain, String, String) {
        let (sk, _pk, addr) = generate_keypair();
        let chain = chain_with(vec![Account {
            address: addr.clone(),
            balance: U256::from(balance),
            nonce: 0,
        }])
        .await;
        (chain, sk, addr)
    }

    fn mine(mut block: Block) -> Block {
        while !meets_difficulty(&block.hash, block.difficulty) {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        block
    }

    async fn template(chain: &Blockchain, miner: &str, txs: Vec<Transaction>) -> Block {
        let params = chain.params().await.unwrap();
        let head = chain.latest_block().await.unwrap();
        let mut entries = vec![BlockTransaction::Coinbase(CoinbaseTx::new(
            miner,
            params.mining_reward,
        ))];
        entries.extend(txs.into_iter().map(BlockTransaction::Transfer));
        Block::new(
            head.index + 1,
            now_millis().max(head.timestamp),
            head.hash,
            entries,
            params.difficulty,
        )
    }

    fn consensus(result: Result<Block, ChainError>) -> ConsensusError {
        match result {
            Err(ChainError::Consensus(e)) => e,
            other => panic!("expected consensus error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn genesis_is_created_once() {
        let (chain, _, addr) = funded_chain(100).await;

        let genesis = chain.latest_block().await.unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.hash, genesis.compute_hash());
        assert_eq!(
            genesis.state_root,
            chain.accounts().compute_state_root().await.unwrap()
        );

        let again = GenesisConfig {
            accounts: vec![Account::empty(BOB.to_string())],
            ..GenesisConfig::default()
        };
        assert!(!chain.init(&again).await.unwrap());
        assert_eq!(chain.params().await.unwrap().difficulty, easy());
        assert_eq!(chain.accounts().accounts().await.unwrap().len(), 1);
        assert_eq!(chain.get_balance(&addr).await.unwrap().balance, U256::from(100));
    }

    #[tokio::test]
    async fn uninitialized_chain_has_no_head() {
        let chain = Blockchain::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            chain.latest_block().await,
            Err(ChainError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn block_must_extend_the_head() {
        let chain = chain_with(Vec::new()).await;

        let mut block = template(&chain, MINER, Vec::new()).await;
        block.index = 2;
        let block = mine(Block::new(
            block.index,
            block.timestamp,
            block.previous_hash,
            block.transactions,
            block.difficulty,
        ));
        assert_eq!(
            consensus(chain.submit_block(block).await),
            ConsensusError::BadHeight { expected: 1, got: 2 }
        );

        let block = template(&chain, MINER, Vec::new()).await;
        let block = mine(Block::new(
            1,
            block.timestamp,
            "ab".repeat(32),
            block.transactions,
            block.difficulty,
        ));
        assert_eq!(
            consensus(chain.submit_block(block).await),
            ConsensusError::ForkMismatch
        );
        assert_eq!(chain.params().await.unwrap().height, 0);
    }

    #[tokio::test]
    async fn consensus_checks_run_in_order() {
        let chain = chain_with(Vec::new()).await;

        let mut block = mine(template(&chain, MINER, Vec::new()).await);
        block.nonce += 1;
        assert_eq!(
            consensus(chain.submit_block(block).await),
            ConsensusError::HashMismatch
        );

        let block = template(&chain, MINER, Vec::new()).await;
        let block = mine(Block::new(
            1,
            block.timestamp,
            block.previous_hash,
            block.transactions,
            U256::MAX,
        ));
        assert!(matches!(
            consensus(chain.submit_block(block).await),
            ConsensusError::DifficultyMismatch { .. }
        ));

        let mut block = template(&chain, MINER, Vec::new()).await;
        block.transactions.clear();
        let block = mine(Block::new(
            1,
            block.timestamp,
            block.previous_hash,
            block.transactions,
            block.difficulty,
        ));
        assert_eq!(
            consensus(chain.submit_block(block).await),
            ConsensusError::EmptyBlock
        );
    }

    #[tokio::test]
    async fn insufficient_work_is_rejected() {
        let chain = chain_with(Vec::new()).await;
        let mut block = template(&chain, MINER, Vec::new()).await;
        while meets_difficulty(&block.hash, block.difficulty) {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        assert_eq!(
            consensus(chain.submit_block(block).await),
            ConsensusError::InsufficientWork
        );
    }

    #[tokio::test]
    async fn bad_coinbase_changes_nothing() {
        let chain = chain_with(Vec::new()).await;
        let root = chain.accounts().compute_state_root().await.unwrap();

        let block = template(&chain, MINER, Vec::new()).await;
        let block = mine(Block::new(
            1,
            block.timestamp,
            block.previous_hash,
            vec![BlockTransaction::Coinbase(CoinbaseTx::new(MINER, U256::from(1)))],
            block.difficulty,
        ));
        assert!(matches!(
            consensus(chain.submit_block(block).await),
            ConsensusError::BadCoinbase(_)
        ));

        let block = template(&chain, &MINER.to_lowercase(), Vec::new()).await;
        assert!(matches!(
            consensus(chain.submit_block(mine(block)).await),
            ConsensusError::BadCoinbase(_)
        ));

        assert_eq!(chain.params().await.unwrap().height, 0);
        assert_eq!(chain.accounts().compute_state_root().await.unwrap(), root);
    }

    #[tokio::test]
    async fn accepted_block_moves_funds() {
        let (chain, sk, addr) = funded_chain(100).await;
        let tx = Transaction::signed(&sk, BOB, U256::from(30), 0).unwrap();
        chain.add_transaction(&tx).await.unwrap();

        let block = mine(template(&chain, MINER, vec![tx]).await);
        let accepted = chain.submit_block(block.clone()).await.unwrap();

        assert_eq!(accepted.hash, block.hash);
        assert_eq!(accepted.hash, accepted.compute_hash());
        assert_eq!(
            accepted.state_root,
            chain.accounts().compute_state_root().await.unwrap()
        );
        assert_eq!(chain.latest_block().await.unwrap(), accepted);
        assert_eq!(chain.params().await.unwrap().height, 1);

        let sender = chain.get_balance(&addr).await.unwrap();
        assert_eq!((sender.balance, sender.nonce), (U256::from(70), 1));
        assert_eq!(chain.get_balance(BOB).await.unwrap().balance, U256::from(30));
        assert_eq!(chain.get_balance(MINER).await.unwrap().balance, MINING_REWARD);
        assert!(chain.pending_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn block_with_bad_transfer_is_rejected_whole() {
        let (chain, sk, addr) = funded_chain(100).await;
        let good = Transaction::signed(&sk, BOB, U256::from(60), 0).unwrap();
        let overdraft = Transaction::signed(&sk, BOB, U256::from(60), 1).unwrap();
        let root = chain.accounts().compute_state_root().await.unwrap();

        let block = mine(template(&chain, MINER, vec![good, overdraft]).await);
        match chain.submit_block(block).await {
            Err(ChainError::Transaction { position, source }) => {
                assert_eq!(position, 2);
                assert!(matches!(source, TxError::InsufficientFunds(_)));
            }
            other => panic!("expected transaction rejection, got {other:?}"),
        }

        assert_eq!(chain.params().await.unwrap().height, 0);
        assert_eq!(chain.accounts().compute_state_root().await.unwrap(), root);
        assert_eq!(chain.get_balance(&addr).await.unwrap().nonce, 0);
        assert!(!chain.accounts().exists(MINER).await.unwrap());
    }

    #[tokio::test]
    async fn replayed_index_is_rejected() {
        let (chain, sk, _) = funded_chain(100).await;
        let tx = Transaction::signed(&sk, BOB, U256::from(10), 0).unwrap();
        let block = mine(template(&chain, MINER, vec![tx.clone()]).await);
        chain.submit_block(block).await.unwrap();

        let block = mine(template(&chain, MINER, vec![tx]).await);
        match chain.submit_block(block).await {
            Err(ChainError::Transaction { source, .. }) => assert!(matches!(
                source,
                TxError::NonceMismatch { expected: 1, got: 0 }
            )),
            other => panic!("expected nonce mismatch, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_of_two_competing_blocks_wins() {
        let chain = Arc::new(chain_with(Vec::new()).await);
        let first = mine(template(&chain, MINER, Vec::new()).await);
        let mut second = template(&chain, BOB, Vec::new()).await;
        second.timestamp = first.timestamp;
        let second = mine(Block::new(
            second.index,
            second.timestamp,
            second.previous_hash,
            second.transactions,
            second.difficulty,
        ));

        let (a, b) = tokio::join!(
            tokio::spawn({
                let chain = chain.clone();
                async move { chain.submit_block(first).await }
            }),
            tokio::spawn({
                let chain = chain.clone();
                async move { chain.submit_block(second).await }
            }),
        );
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.into_iter().find(|r| r.is_err()).unwrap();
        assert_eq!(
            consensus(loser),
            ConsensusError::BadHeight { expected: 2, got: 1 }
        );
        assert_eq!(chain.params().await.unwrap().height, 1);
    }

    #[tokio::test]
    async fn fast_blocks_raise_the_work() {
        let chain = chain_with(Vec::new()).await;
        for _ in 0..RETARGET_PERIOD {
            let block = mine(template(&chain, MINER, Vec::new()).await);
            chain.submit_block(block).await.unwrap();
        }
        let params = chain.params().await.unwrap();
        assert_eq!(params.height, RETARGET_PERIOD);
        assert_eq!(params.difficulty, easy() - easy() / 10);

        // the next block must carry the new target
        let block = mine(template(&chain, MINER, Vec::new()).await);
        assert_eq!(block.difficulty, params.difficulty);
        chain.submit_block(block).await.unwrap();
    }

    #[tokio::test]
    async fn mining_info_selects_contiguous_affordable_transfers() {
        let (chain, sk, _) = funded_chain(100).await;
        for (index, amount) in [(0, 40), (1, 40), (3, 1)] {
            let tx = Transaction::signed(&sk, BOB, U256::from(amount), index).unwrap();
            chain.add_transaction(&tx).await.unwrap();
        }
        let over = Transaction::signed(&sk, BOB, U256::from(30), 2).unwrap();
        chain.add_transaction(&over).await.unwrap();

        let info = chain.mining_info().await.unwrap();
        assert_eq!(info.coinbase_amount, MINING_REWARD);
        assert_eq!(info.latest_block.index, 0);
        let indices: Vec<u64> = info.pending_transactions.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(chain.pending_transactions().await.unwrap().len(), 4);

        let json = serde_json::to_value(&info).unwrap();
        assert!(json["blockchain"]["targetMineTime"].is_u64());
        assert!(json["coinbaseAmount"].is_string());
        assert_eq!(json["accountsSize"], 1);
    }

    #[tokio::test]
    async fn accepted_block_clears_rival_transfers_at_same_index() {
        let (chain, sk, addr) = funded_chain(100).await;
        let chosen = Transaction::signed(&sk, BOB, U256::from(10), 0).unwrap();
        let rival = Transaction::signed(&sk, BOB, U256::from(20), 0).unwrap();
        chain.add_transaction(&chosen).await.unwrap();
        chain.add_transaction(&rival).await.unwrap();
        assert_eq!(chain.pending_transactions().await.unwrap().len(), 2);

        let block = mine(template(&chain, MINER, vec![chosen]).await);
        chain.submit_block(block).await.unwrap();

        assert!(chain.pending_transactions().await.unwrap().is_empty());
        assert_eq!(chain.get_balance(&addr).await.unwrap().balance, U256::from(90));
    }

    #[tokio::test]
    async fn block_older_than_head_and_now_is_rejected() {
        let chain = chain_with(Vec::new()).await;
        let first = mine(template(&chain, MINER, Vec::new()).await);
        let head = chain.submit_block(first).await.unwrap();

        let next = template(&chain, MINER, Vec::new()).await;
        let stale = mine(Block::new(
            next.index,
            head.timestamp - 1,
            next.previous_hash,
            next.transactions,
            next.difficulty,
        ));
        assert_eq!(
            consensus(chain.submit_block(stale).await),
            ConsensusError::BadTimestamp {
                timestamp: head.timestamp - 1,
                head: head.timestamp,
            }
        );
        assert_eq!(chain.params().await.unwrap().height, 1);
    }

    #[tokio::test]
    async fn block_older_than_head_but_in_the_future_is_accepted() {
        let chain = chain_with(Vec::new()).await;
        let ahead = now_millis() + 600_000;

        let first = template(&chain, MINER, Vec::new()).await;
        let first = mine(Block::new(
            first.index,
            ahead,
            first.previous_hash,
            first.transactions,
            first.difficulty,
        ));
        chain.submit_block(first).await.unwrap();

        let next = template(&chain, MINER, Vec::new()).await;
        let behind_head = mine(Block::new(
            next.index,
            ahead - 1,
            next.previous_hash,
            next.transactions,
            next.difficulty,
        ));
        chain.submit_block(behind_head).await.unwrap();
        assert_eq!(chain.params().await.unwrap().height, 2);
    }

    /// Memory store that refuses to change the chain difficulty.
    struct FrozenDifficulty(MemoryStore);

    #[async_trait::async_trait]
    impl DocumentStore for FrozenDifficulty {
        async fn find(
            &self,
            collection: &str,
            filter: &Filter,
        ) -> Result<Vec<Document>, StoreError> {
            self.0.find(collection, filter).await
        }

        async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<(), StoreError> {
            self.0.insert(collection, docs).await
        }

        async fn update(
            &self,
            collection: &str,
            filter: &Filter,
            update: &Update,
        ) -> Result<usize, StoreError> {
            if let Update::Set(fields) = update {
                if collection == BLOCKCHAIN && fields.contains_key("difficulty") {
                    return Err(StoreError::Corrupt {
                        collection: collection.to_string(),
                        reason: "difficulty is frozen".into(),
                    });
                }
            }
            self.0.update(collection, filter, update).await
        }

        async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
            self.0.delete(collection, filter).await
        }
    }

    #[tokio::test]
    async fn failed_retarget_still_reports_the_block_accepted() {
        let chain = Blockchain::new(Arc::new(FrozenDifficulty(MemoryStore::new())));
        chain
            .init(&GenesisConfig {
                difficulty: easy(),
                ..GenesisConfig::default()
            })
            .await
            .unwrap();

        for _ in 0..RETARGET_PERIOD {
            let block = mine(template(&chain, MINER, Vec::new()).await);
            chain.submit_block(block).await.unwrap();
        }
        let params = chain.params().await.unwrap();
        assert_eq!(params.height, RETARGET_PERIOD);
        assert_eq!(params.difficulty, easy());
    }

    #[test]
    fn rejections_are_distinguished_from_node_faults() {
        assert!(ChainError::from(ConsensusError::EmptyBlock).is_rejection());
        assert!(!ChainError::NotInitialized.is_rejection());
    }
}
