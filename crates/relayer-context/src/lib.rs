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


#![warn(missing_docs)]
//! # Relayer Context Module 🕸️
//!
//! A module for managing the context of the relayer: its configuration,
//! its store, the root cancellation scope and the chain connections.

use artemis_relayer_config::ArtemisRelayerConfig;
use artemis_relayer_store::SledStore;
use artemis_relayer_utils::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Ethereum client trait and its ethers implementation.
pub mod ethereum;
/// In-memory chain clients.
#[cfg(any(test, feature = "mocks"))]
#[allow(missing_docs)]
pub mod mock;
/// Parachain and relaychain client traits and their subxt implementation.
pub mod substrate;

pub use ethereum::{EthereumClient, EthersClient};
pub use substrate::{
    ExtrinsicProgress, ExtrinsicStatus, ParachainClient, RelaychainClient,
    SubxtClient,
};

/// RelayerContext contains Relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: ArtemisRelayerConfig,
    /// The root cancellation scope.
    ///
    /// Every task of the relayer runs under a child of this token, cancelling
    /// it shuts the whole relayer down.
    shutdown: CancellationToken,
    store: SledStore,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(config: ArtemisRelayerConfig, store: SledStore) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            store,
        }
    }

    /// Returns the root cancellation token.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels every task of the relayer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns [Sled](https://sled.rs)-based database store
    pub fn store(&self) -> &SledStore {
        &self.store
    }

    /// Connects to the Ethereum node with the relayer key.
    pub async fn ethereum_client(&self) -> Result<EthersClient> {
        let config = self
            .config
            .ethereum
            .as_ref()
            .ok_or(Error::MissingConfig("ethereum"))?;
        EthersClient::connect(
            &config.endpoint,
            &config.private_key,
            config.chain_id,
        )
        .await
    }

    /// Connects to the parachain collator with the relayer key.
    pub async fn parachain_client(&self) -> Result<SubxtClient> {
        let config = self
            .config
            .parachain
            .as_ref()
            .ok_or(Error::MissingConfig("parachain"))?;
        let client = SubxtClient::connect(&config.endpoint).await?;
        Ok(client.with_signer(&config.suri, config.mortality_period))
    }

    /// Connects to the relaychain node.
    pub async fn relaychain_client(&self) -> Result<SubxtClient> {
        let config = self
            .config
            .relaychain
            .as_ref()
            .ok_or(Error::MissingConfig("relaychain"))?;
        SubxtClient::connect(&config.endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_child_scopes() {
        let store = SledStore::temporary().unwrap();
        let ctx = RelayerContext::new(ArtemisRelayerConfig::default(), store);
        let child = ctx.shutdown_signal().child_token();
        assert!(!child.is_cancelled());
        ctx.shutdown();
        child.cancelled().await;
    }

    #[tokio::test]
    async fn missing_chain_config_is_reported() {
        let store = SledStore::temporary().unwrap();
        let ctx = RelayerContext::new(ArtemisRelayerConfig::default(), store);
        assert!(matches!(
            ctx.relaychain_client().await,
            Err(Error::MissingConfig("relaychain"))
        ));
    }
}
