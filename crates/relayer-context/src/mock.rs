// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! In-memory chain clients for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use artemis_relayer_types::message::{HeaderId, ParachainMessage};
use artemis_relayer_utils::{Error, Result};
use ethers::core::types::transaction::eip2718::TypedTransaction;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
    Address, Block, Filter, Log, Signature, TransactionReceipt, ValueOrArray,
    H256, U256, U64,
};
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use crate::substrate::{ExtrinsicProgress, ExtrinsicStatus};
use crate::{EthereumClient, ParachainClient, RelaychainClient};

/// A well known development key.
pub const DEV_KEY: [u8; 32] = [
    0x80, 0x75, 0x99, 0x1c, 0xe8, 0x70, 0xb9, 0x3a, 0x88, 0x70, 0xec, 0xa0,
    0xc0, 0xf9, 0x19, 0x13, 0xd1, 0x2f, 0x47, 0x94, 0x8c, 0xa0, 0xfd, 0x25,
    0xb4, 0x9c, 0x6f, 0xa7, 0xcd, 0xbe, 0xee, 0x8b,
];

/// State of a [`MockEthereumClient`].
#[derive(Debug, Default)]
pub struct MockEthereumState {
    pub block_number: u64,
    pub blocks: HashMap<u64, Block<H256>>,
    pub logs: Vec<Log>,
    pub pending_nonce: U256,
    pub gas_price: U256,
    pub sent: Vec<TypedTransaction>,
    pub receipts: HashMap<H256, TransactionReceipt>,
    /// Number of upcoming sends that fail.
    pub failing_sends: usize,
    /// Contracts whose logs cannot be subscribed to.
    pub refused_subscriptions: Vec<Address>,
    subscribers: Vec<(Filter, mpsc::UnboundedSender<Log>)>,
}

/// An Ethereum node kept in memory.
#[derive(Clone)]
pub struct MockEthereumClient {
    wallet: LocalWallet,
    pub state: Arc<Mutex<MockEthereumState>>,
}

impl Default for MockEthereumClient {
    fn default() -> Self {
        Self::with_key(&DEV_KEY)
    }
}

fn matches_address(filter: &Filter, address: Address) -> bool {
    match &filter.address {
        None => true,
        Some(ValueOrArray::Value(a)) => *a == address,
        Some(ValueOrArray::Array(list)) => list.contains(&address),
    }
}

impl MockEthereumClient {
    /// A client signing with `key`.
    pub fn with_key(key: &[u8; 32]) -> Self {
        let wallet = LocalWallet::from_bytes(key)
            .unwrap_or_else(|_| unreachable!("valid dev key"))
            .with_chain_id(1u64);
        Self {
            wallet,
            state: Default::default(),
        }
    }

    /// The signing wallet.
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// Delivers `log` to the matching subscriptions and keeps it for
    /// `logs` queries.
    pub fn push_log(&self, log: Log) {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|(_, tx)| !tx.is_closed());
        for (filter, tx) in &state.subscribers {
            if matches_address(filter, log.address) {
                let _ = tx.unbounded_send(log.clone());
            }
        }
        state.logs.push(log);
    }

    /// Number of live log subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    /// Sets the head and creates the blocks up to it.
    pub fn set_block_number(&self, number: u64) {
        let mut state = self.state.lock();
        for n in state.block_number..=number {
            state.blocks.entry(n).or_insert_with(|| Block {
                number: Some(U64::from(n)),
                hash: Some(H256::from_low_u64_be(n)),
                parent_hash: H256::from_low_u64_be(n.saturating_sub(1)),
                ..Default::default()
            });
        }
        state.block_number = number;
    }

    /// The transactions sent so far.
    pub fn sent(&self) -> Vec<TypedTransaction> {
        self.state.lock().sent.clone()
    }
}

#[async_trait::async_trait]
impl EthereumClient for MockEthereumClient {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn sign_hash(&self, hash: H256) -> Result<Signature> {
        Ok(self.wallet.sign_hash(hash)?)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().block_number)
    }

    async fn block(&self, number: u64) -> Result<Option<Block<H256>>> {
        Ok(self.state.lock().blocks.get(&number).cloned())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
        let to = filter
            .get_to_block()
            .map(|b| b.as_u64())
            .unwrap_or(u64::MAX);
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .filter(|log| matches_address(filter, log.address))
            .filter(|log| {
                let n = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
                from <= n && n <= to
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(
        &self,
        filter: &Filter,
    ) -> Result<BoxStream<'_, Log>> {
        let mut state = self.state.lock();
        if state
            .refused_subscriptions
            .iter()
            .any(|a| matches_address(filter, *a))
        {
            return Err(Error::Generic("subscription refused"));
        }
        let (tx, rx) = mpsc::unbounded();
        state.subscribers.push((filter.clone(), tx));
        Ok(rx.boxed())
    }

    async fn pending_nonce(&self) -> Result<U256> {
        Ok(self.state.lock().pending_nonce)
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.state.lock().gas_price)
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256> {
        let mut state = self.state.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(Error::Transient("nonce too low".into()));
        }
        state.sent.push(tx);
        state.pending_nonce += U256::one();
        Ok(H256::from_low_u64_be(state.sent.len() as u64))
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }
}

/// State of a [`MockParachainClient`].
#[derive(Debug, Default)]
pub struct MockParachainState {
    pub finalized: u64,
    /// `Other` digest items per block; blocks missing here are unknown.
    pub digests: HashMap<u64, Vec<Vec<u8>>>,
    pub offchain: HashMap<Vec<u8>, Vec<u8>>,
    pub nonce: u64,
    pub finalized_ethereum_header: Option<HeaderId>,
    pub submitted: Vec<(ParachainMessage, u64)>,
    /// Number of upcoming submissions that fail.
    pub failing_submits: usize,
    /// Number of upcoming submissions the pool refuses for good.
    pub rejected_submits: usize,
    /// Number of finalized head queries served so far.
    pub finalized_queries: usize,
}

/// A parachain collator kept in memory.
#[derive(Clone, Default)]
pub struct MockParachainClient {
    pub state: Arc<Mutex<MockParachainState>>,
}

impl MockParachainClient {
    /// Finalizes blocks up to `number`, creating the missing ones empty.
    pub fn finalize(&self, number: u64) {
        let mut state = self.state.lock();
        for n in 0..=number {
            state.digests.entry(n).or_default();
        }
        state.finalized = number;
    }

    /// The extrinsics submitted so far with their nonces.
    pub fn submitted(&self) -> Vec<(ParachainMessage, u64)> {
        self.state.lock().submitted.clone()
    }
}

#[async_trait::async_trait]
impl ParachainClient for MockParachainClient {
    async fn finalized_block_number(&self) -> Result<u64> {
        let mut state = self.state.lock();
        state.finalized_queries += 1;
        Ok(state.finalized)
    }

    async fn auxiliary_digest_items(&self, number: u64) -> Result<Vec<Vec<u8>>> {
        self.state
            .lock()
            .digests
            .get(&number)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block #{number}")))
    }

    async fn offchain_storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().offchain.get(key).cloned())
    }

    async fn account_nonce(&self) -> Result<u64> {
        Ok(self.state.lock().nonce)
    }

    async fn finalized_ethereum_header(&self) -> Result<Option<HeaderId>> {
        Ok(self.state.lock().finalized_ethereum_header)
    }

    async fn submit_extrinsic(
        &self,
        message: &ParachainMessage,
        nonce: u64,
    ) -> Result<ExtrinsicProgress> {
        let mut state = self.state.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(Error::Transient("pool is full".into()));
        }
        if state.rejected_submits > 0 {
            state.rejected_submits -= 1;
            return Err(Error::SubxtError(subxt::Error::Other(
                "Invalid Transaction: Transaction call is not expected".into(),
            )));
        }
        state.submitted.push((message.clone(), nonce));
        let block_hash = H256::from_low_u64_be(nonce);
        Ok(stream::iter(vec![
            Ok(ExtrinsicStatus::Validated),
            Ok(ExtrinsicStatus::InBestBlock { block_hash }),
            Ok(ExtrinsicStatus::InFinalizedBlock { block_hash }),
        ])
        .boxed())
    }
}

/// A relaychain node kept in memory.
#[derive(Clone)]
pub struct MockRelaychainClient {
    /// Authority sets keyed by the first block they are active at.
    pub authorities: Arc<Mutex<BTreeMap<u64, Vec<[u8; 33]>>>>,
    justifications: Arc<Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>>,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl Default for MockRelaychainClient {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self {
            authorities: Default::default(),
            justifications: Arc::new(Mutex::new(Some(receiver))),
            sender,
        }
    }
}

impl MockRelaychainClient {
    /// Emits a SCALE encoded signed commitment on the subscription.
    pub fn push_justification(&self, encoded: Vec<u8>) {
        let _ = self.sender.unbounded_send(encoded);
    }

    /// Makes `keys` the authority set from block `from` on.
    pub fn set_authorities(&self, from: u64, keys: Vec<[u8; 33]>) {
        self.authorities.lock().insert(from, keys);
    }
}

#[async_trait::async_trait]
impl RelaychainClient for MockRelaychainClient {
    async fn subscribe_justifications(
        &self,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let receiver = self
            .justifications
            .lock()
            .take()
            .ok_or(Error::Generic("justifications already subscribed"))?;
        Ok(receiver.map(Ok).boxed())
    }

    async fn beefy_authorities(&self, at: u64) -> Result<Vec<[u8; 33]>> {
        Ok(self
            .authorities
            .lock()
            .range(..=at)
            .next_back()
            .map(|(_, keys)| keys.clone())
            .unwrap_or_default())
    }
}
