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


//! The Ethereum side of the chain RPC boundary.

use std::sync::Arc;

use artemis_relayer_types::private_key::PrivateKey;
use artemis_relayer_types::rpc_url::RpcUrl;
use artemis_relayer_utils::{EthereumSignerClient, Result};
use ethers::core::types::transaction::eip2718::TypedTransaction;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
    Address, Block, Filter, Log, Signature, TransactionReceipt, H256, U256,
};
use futures::stream::{BoxStream, StreamExt};

/// What the relayer needs from an Ethereum node.
#[async_trait::async_trait]
pub trait EthereumClient: Send + Sync + 'static {
    /// The relayer account.
    fn address(&self) -> Address;

    /// Signs `hash` with the relayer key.
    fn sign_hash(&self, hash: H256) -> Result<Signature>;

    /// The latest block number.
    async fn block_number(&self) -> Result<u64>;

    /// The block at `number`, `None` if the node does not know it yet.
    async fn block(&self, number: u64) -> Result<Option<Block<H256>>>;

    /// Logs matching `filter` in the range the filter names.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// New logs matching `filter`, as they are produced.
    async fn subscribe_logs(
        &self,
        filter: &Filter,
    ) -> Result<BoxStream<'_, Log>>;

    /// The next nonce of the relayer account, pending transactions included.
    async fn pending_nonce(&self) -> Result<U256>;

    /// The gas price suggested by the node.
    async fn gas_price(&self) -> Result<U256>;

    /// Signs and broadcasts `tx`, returning its hash once accepted by the node.
    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256>;

    /// The receipt of a mined transaction.
    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>>;
}

/// An Ethereum connection over websocket, signing with a local key.
#[derive(Clone, Debug)]
pub struct EthersClient {
    client: Arc<EthereumSignerClient>,
}

impl EthersClient {
    /// Connects to `endpoint` and sets up the signer for `private_key`.
    ///
    /// The chain id is queried from the node when it is not given.
    #[tracing::instrument(skip(private_key), fields(endpoint = %endpoint))]
    pub async fn connect(
        endpoint: &RpcUrl,
        private_key: &PrivateKey,
        chain_id: Option<u64>,
    ) -> Result<Self> {
        let provider = Provider::<Ws>::connect(endpoint.as_str()).await?;
        let chain_id = match chain_id {
            Some(id) => id,
            None => provider.get_chainid().await?.as_u64(),
        };
        let wallet: LocalWallet = private_key.wallet(chain_id)?;
        tracing::debug!(
            chain_id,
            address = ?wallet.address(),
            "Connected to Ethereum"
        );
        let client = SignerMiddleware::new(provider, wallet);
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn provider(&self) -> &Provider<Ws> {
        self.client.inner()
    }
}

#[async_trait::async_trait]
impl EthereumClient for EthersClient {
    fn address(&self) -> Address {
        self.client.address()
    }

    fn sign_hash(&self, hash: H256) -> Result<Signature> {
        Ok(self.client.signer().sign_hash(hash)?)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider().get_block_number().await?.as_u64())
    }

    async fn block(&self, number: u64) -> Result<Option<Block<H256>>> {
        Ok(self.provider().get_block(number).await?)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        Ok(self.provider().get_logs(filter).await?)
    }

    async fn subscribe_logs(
        &self,
        filter: &Filter,
    ) -> Result<BoxStream<'_, Log>> {
        let stream = self.provider().subscribe_logs(filter).await?;
        Ok(stream.boxed())
    }

    async fn pending_nonce(&self) -> Result<U256> {
        let nonce = self
            .provider()
            .get_transaction_count(
                self.address(),
                Some(ethers::types::BlockNumber::Pending.into()),
            )
            .await?;
        Ok(nonce)
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.provider().get_gas_price().await?)
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256> {
        let pending = self.client.send_transaction(tx, None).await?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>> {
        Ok(self.provider().get_transaction_receipt(hash).await?)
    }
}
