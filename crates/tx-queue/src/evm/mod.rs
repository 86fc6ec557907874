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


use std::sync::Arc;

use artemis_relayer_context::EthereumClient;
use artemis_relayer_utils::{probe, Result};
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use tokio::sync::Mutex;

/// A contract call to send from the relayer account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthereumCall {
    /// The contract.
    pub to: Address,
    /// ABI encoded call data.
    pub data: Bytes,
    /// Gas limit.
    pub gas: U256,
}

/// Sends the transactions of the relayer account one at a time.
///
/// Every writer on Ethereum shares one queue, so the pending nonce read
/// from the node is never handed to two transactions.
pub struct EthereumTxQueue<C> {
    client: Arc<C>,
    lock: Arc<Mutex<()>>,
}

impl<C> Clone for EthereumTxQueue<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            lock: self.lock.clone(),
        }
    }
}

impl<C: EthereumClient> EthereumTxQueue<C> {
    /// Creates a queue sending through `client`.
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The client transactions are sent through.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Sends `call` with the pending nonce and the suggested gas price.
    ///
    /// Returns the transaction hash once the node accepted it.
    #[tracing::instrument(skip(self, call), fields(to = ?call.to))]
    pub async fn send(&self, call: EthereumCall) -> Result<H256> {
        let _guard = self.lock.lock().await;
        let nonce = self.client.pending_nonce().await?;
        let gas_price = self.client.gas_price().await?;
        let tx = TransactionRequest::new()
            .from(self.client.address())
            .to(call.to)
            .data(call.data)
            .gas(call.gas)
            .gas_price(gas_price)
            .nonce(nonce);
        let tx_hash = self.client.send_transaction(tx.into()).await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            ty = "EVM",
            %nonce,
            ?tx_hash,
            sent = true,
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artemis_relayer_context::mock::MockEthereumClient;

    fn call(to: u8) -> EthereumCall {
        EthereumCall {
            to: Address::repeat_byte(to),
            data: Bytes::from(vec![0xde, 0xad]),
            gas: U256::from(500_000u64),
        }
    }

    #[tokio::test]
    async fn uses_the_pending_nonce_of_the_node() {
        let client = Arc::new(MockEthereumClient::default());
        {
            let mut state = client.state.lock();
            state.pending_nonce = U256::from(7u64);
            state.gas_price = U256::from(42u64);
        }
        let queue = EthereumTxQueue::new(client.clone());
        queue.send(call(0xaa)).await.unwrap();
        queue.send(call(0xbb)).await.unwrap();

        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].nonce(), Some(&U256::from(7u64)));
        assert_eq!(sent[1].nonce(), Some(&U256::from(8u64)));
        assert_eq!(sent[0].to_addr(), Some(&Address::repeat_byte(0xaa)));
        assert_eq!(sent[0].gas_price(), Some(U256::from(42u64)));
        assert_eq!(sent[0].from(), Some(&client.address()));
    }

    #[tokio::test]
    async fn concurrent_sends_never_share_a_nonce() {
        let client = Arc::new(MockEthereumClient::default());
        let queue = EthereumTxQueue::new(client.clone());
        let sends = (0..8u8).map(|i| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.send(call(i)).await })
        });
        for handle in sends.collect::<Vec<_>>() {
            handle.await.unwrap().unwrap();
        }
        let mut nonces = client
            .sent()
            .iter()
            .filter_map(|tx| tx.nonce().copied())
            .collect::<Vec<_>>();
        nonces.sort();
        nonces.dedup();
        assert_eq!(nonces.len(), 8);
    }
}
