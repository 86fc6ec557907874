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


//! The parachain and relaychain side of the chain RPC boundary.

use artemis_relayer_types::message::{HeaderId, ParachainMessage};
use artemis_relayer_types::rpc_url::RpcUrl;
use artemis_relayer_types::suri::Suri;
use artemis_relayer_utils::{Error, Result};
use codec::Decode;
use ethers::types::H256;
use futures::stream::{BoxStream, StreamExt};
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::config::substrate::DigestItem;
use subxt::config::DefaultExtrinsicParamsBuilder;
use subxt::tx::TxStatus;
use subxt::{rpc_params, OnlineClient, PolkadotConfig};
use subxt_signer::sr25519::Keypair;

/// The runtime config of the parachain and the relaychain.
pub type ArtemisRuntimeConfig = PolkadotConfig;

/// Off-chain storage kind the commitments pallet indexes into.
const OFFCHAIN_STORAGE_KIND: &str = "PERSISTENT";

/// Progress of a submitted extrinsic, as reported by the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtrinsicStatus {
    /// Passed the pool validation.
    Validated,
    /// Gossiped to peers.
    Broadcasted {
        /// Number of peers it was sent to.
        num_peers: u32,
    },
    /// The best block that included it was retracted.
    NoLongerInBestBlock,
    /// Included in a best block.
    InBestBlock {
        /// The including block.
        block_hash: H256,
    },
    /// Included in a finalized block.
    InFinalizedBlock {
        /// The including block.
        block_hash: H256,
    },
    /// The node hit an error while following the extrinsic.
    Error {
        /// Reason given by the node.
        message: String,
    },
    /// The extrinsic is invalid.
    Invalid {
        /// Reason given by the node.
        message: String,
    },
    /// The extrinsic was dropped from the pool.
    Dropped {
        /// Reason given by the node.
        message: String,
    },
}

impl ExtrinsicStatus {
    /// No further status follows this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InFinalizedBlock { .. }
                | Self::Error { .. }
                | Self::Invalid { .. }
                | Self::Dropped { .. }
        )
    }

    /// Short name of the status for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validated => "Validated",
            Self::Broadcasted { .. } => "Broadcasted",
            Self::NoLongerInBestBlock => "NoLongerInBestBlock",
            Self::InBestBlock { .. } => "InBestBlock",
            Self::InFinalizedBlock { .. } => "InFinalizedBlock",
            Self::Error { .. } => "Error",
            Self::Invalid { .. } => "Invalid",
            Self::Dropped { .. } => "Dropped",
        }
    }
}

/// The stream of statuses of one submitted extrinsic.
pub type ExtrinsicProgress = BoxStream<'static, Result<ExtrinsicStatus>>;

/// What the relayer needs from a parachain collator.
#[async_trait::async_trait]
pub trait ParachainClient: Send + Sync + 'static {
    /// Number of the latest finalized block.
    async fn finalized_block_number(&self) -> Result<u64>;

    /// The payloads of the `Other` digest items of block `number`.
    ///
    /// Fails with `NotFound` when the node does not know the block yet.
    async fn auxiliary_digest_items(&self, number: u64) -> Result<Vec<Vec<u8>>>;

    /// Reads the persistent off-chain storage at `key`.
    async fn offchain_storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// The next nonce of the relayer account.
    async fn account_nonce(&self) -> Result<u64>;

    /// The latest Ethereum header finalized by the verifier light client.
    async fn finalized_ethereum_header(&self) -> Result<Option<HeaderId>>;

    /// Signs `message` with `nonce` and submits it.
    async fn submit_extrinsic(
        &self,
        message: &ParachainMessage,
        nonce: u64,
    ) -> Result<ExtrinsicProgress>;
}

/// What the relayer needs from a relaychain node.
#[async_trait::async_trait]
pub trait RelaychainClient: Send + Sync + 'static {
    /// SCALE encoded BEEFY signed commitments, as they are finalized.
    async fn subscribe_justifications(
        &self,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    /// The compressed secp256k1 keys of the BEEFY authority set active at
    /// block `at`.
    async fn beefy_authorities(&self, at: u64) -> Result<Vec<[u8; 33]>>;
}

/// A subxt connection to a substrate node.
#[derive(Clone)]
pub struct SubxtClient {
    api: OnlineClient<ArtemisRuntimeConfig>,
    rpc_client: RpcClient,
    rpc: LegacyRpcMethods<ArtemisRuntimeConfig>,
    signer: Option<Keypair>,
    mortality_period: u64,
}

impl std::fmt::Debug for SubxtClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubxtClient")
            .field("mortality_period", &self.mortality_period)
            .finish()
    }
}

impl SubxtClient {
    /// Connects to `endpoint`, reading the runtime metadata.
    #[tracing::instrument(fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &RpcUrl) -> Result<Self> {
        let rpc_client = RpcClient::from_url(endpoint.as_str()).await?;
        let api =
            OnlineClient::<ArtemisRuntimeConfig>::from_rpc_client(rpc_client.clone())
                .await?;
        let rpc = LegacyRpcMethods::<ArtemisRuntimeConfig>::new(rpc_client.clone());
        tracing::debug!(
            spec_version = api.runtime_version().spec_version,
            genesis_hash = ?api.genesis_hash(),
            "Connected to substrate node"
        );
        Ok(Self {
            api,
            rpc_client,
            rpc,
            signer: None,
            mortality_period: 64,
        })
    }

    /// Signs extrinsics with `suri`, valid for `mortality_period` blocks.
    pub fn with_signer(mut self, suri: &Suri, mortality_period: u64) -> Self {
        self.signer = Some(suri.0.clone());
        self.mortality_period = mortality_period;
        self
    }

    fn signer(&self) -> Result<&Keypair> {
        self.signer.as_ref().ok_or(Error::MissingConfig("parachain.suri"))
    }

    async fn block_hash(&self, number: u64) -> Result<H256> {
        let hash = self
            .rpc
            .chain_get_block_hash(Some(number.into()))
            .await?
            .ok_or_else(|| Error::NotFound(format!("block #{number}")))?;
        Ok(H256(hash.0))
    }

    /// Reads a plain storage value, at the latest block when `at` is `None`.
    async fn fetch_storage(
        &self,
        pallet: &str,
        entry: &str,
        at: Option<H256>,
    ) -> Result<Option<Vec<u8>>> {
        let address = subxt::dynamic::storage(
            pallet,
            entry,
            Vec::<subxt::dynamic::Value>::new(),
        );
        let storage = match at {
            Some(hash) => self.api.storage().at(subxt::utils::H256(hash.0)),
            None => self.api.storage().at_latest().await?,
        };
        let value = storage.fetch(&address).await?;
        Ok(value.map(|v| v.encoded().to_vec()))
    }
}

fn status_from(
    status: TxStatus<ArtemisRuntimeConfig, OnlineClient<ArtemisRuntimeConfig>>,
) -> ExtrinsicStatus {
    match status {
        TxStatus::Validated => ExtrinsicStatus::Validated,
        TxStatus::Broadcasted { num_peers } => {
            ExtrinsicStatus::Broadcasted { num_peers }
        }
        TxStatus::NoLongerInBestBlock => ExtrinsicStatus::NoLongerInBestBlock,
        TxStatus::InBestBlock(block) => ExtrinsicStatus::InBestBlock {
            block_hash: H256(block.block_hash().0),
        },
        TxStatus::InFinalizedBlock(block) => {
            ExtrinsicStatus::InFinalizedBlock {
                block_hash: H256(block.block_hash().0),
            }
        }
        TxStatus::Error { message } => ExtrinsicStatus::Error { message },
        TxStatus::Invalid { message } => ExtrinsicStatus::Invalid { message },
        TxStatus::Dropped { message } => ExtrinsicStatus::Dropped { message },
    }
}

#[async_trait::async_trait]
impl ParachainClient for SubxtClient {
    async fn finalized_block_number(&self) -> Result<u64> {
        let hash = self.rpc.chain_get_finalized_head().await?;
        let header = self
            .rpc
            .chain_get_header(Some(hash))
            .await?
            .ok_or_else(|| Error::NotFound(format!("header {hash:?}")))?;
        Ok(u64::from(header.number))
    }

    async fn auxiliary_digest_items(&self, number: u64) -> Result<Vec<Vec<u8>>> {
        let hash = self.block_hash(number).await?;
        let header = self
            .rpc
            .chain_get_header(Some(subxt::utils::H256(hash.0)))
            .await?
            .ok_or_else(|| Error::NotFound(format!("header #{number}")))?;
        let items = header
            .digest
            .logs
            .into_iter()
            .filter_map(|item| match item {
                DigestItem::Other(data) => Some(data),
                _ => None,
            })
            .collect();
        Ok(items)
    }

    async fn offchain_storage(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value: Option<String> = self
            .rpc_client
            .request(
                "offchain_localStorageGet",
                rpc_params![
                    OFFCHAIN_STORAGE_KIND,
                    format!("0x{}", hex::encode(key))
                ],
            )
            .await?;
        value
            .map(|v| hex::decode(v.trim_start_matches("0x")).map_err(Error::from))
            .transpose()
    }

    async fn account_nonce(&self) -> Result<u64> {
        let account_id = self.signer()?.public_key().to_account_id();
        Ok(self.api.tx().account_nonce(&account_id).await?)
    }

    async fn finalized_ethereum_header(&self) -> Result<Option<HeaderId>> {
        self.fetch_storage("VerifierLightclient", "FinalizedBlock", None)
            .await?
            .map(|bytes| HeaderId::decode(&mut bytes.as_slice()).map_err(Error::from))
            .transpose()
    }

    async fn submit_extrinsic(
        &self,
        message: &ParachainMessage,
        nonce: u64,
    ) -> Result<ExtrinsicProgress> {
        let signer = self.signer()?;
        let latest = self.api.blocks().at_latest().await?;
        let params = DefaultExtrinsicParamsBuilder::<ArtemisRuntimeConfig>::new()
            .mortal(latest.header(), self.mortality_period)
            .build();
        let extrinsic = self
            .api
            .tx()
            .create_signed_with_nonce(message, signer, nonce, params)?;
        let progress = extrinsic.submit_and_watch().await?;
        Ok(progress
            .map(|status| status.map(status_from).map_err(Error::from))
            .boxed())
    }
}

#[async_trait::async_trait]
impl RelaychainClient for SubxtClient {
    async fn subscribe_justifications(
        &self,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let subscription = self
            .rpc_client
            .subscribe::<String>(
                "beefy_subscribeJustifications",
                rpc_params![],
                "beefy_unsubscribeJustifications",
            )
            .await?;
        Ok(subscription
            .map(|item| -> Result<Vec<u8>> {
                let hex_str = item?;
                Ok(hex::decode(hex_str.trim_start_matches("0x"))?)
            })
            .boxed())
    }

    async fn beefy_authorities(&self, at: u64) -> Result<Vec<[u8; 33]>> {
        let hash = self.block_hash(at).await?;
        let bytes = self
            .fetch_storage("Beefy", "Authorities", Some(hash))
            .await?
            .ok_or_else(|| Error::NotFound("Beefy.Authorities".into()))?;
        Ok(Vec::<[u8; 33]>::decode(&mut bytes.as_slice())?)
    }
}
