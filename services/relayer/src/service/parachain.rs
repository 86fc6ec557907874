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

use artemis_parachain_watcher::CommitmentListener;
use artemis_relayer_config::evm::EthereumConfig;
use artemis_relayer_config::relay::RelayConfig;
use artemis_relayer_config::substrate::ParachainConfig;
use artemis_relayer_context::ParachainClient;
use artemis_relayer_store::RelayerStore;
use artemis_relayer_utils::task_group::TaskGroup;
use artemis_relayer_utils::{Error, Result};
use artemis_tx_relay::substrate::ParachainWriter;
use tokio::sync::oneshot;

use crate::chain::{Chain, Init, Receivers, Senders};

const NAME: &str = "parachain";

/// The parachain side of the bridge.
///
/// Produces the commitments of the parachain for Ethereum and dispatches
/// Ethereum messages and headers as extrinsics.
pub struct ParachainChain<C, S> {
    client: Arc<C>,
    store: S,
    config: ParachainConfig,
    /// Apps and trusted signers the writer checks messages against.
    ethereum: Option<EthereumConfig>,
    relay: RelayConfig,
    senders: Option<Senders>,
    receivers: Option<Receivers>,
}

impl<C, S> ParachainChain<C, S>
where
    C: ParachainClient,
    S: RelayerStore,
{
    /// Creates the chain on top of a collator connection.
    pub fn new(
        client: Arc<C>,
        store: S,
        config: ParachainConfig,
        ethereum: Option<EthereumConfig>,
        relay: RelayConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
            ethereum,
            relay,
            senders: None,
            receivers: None,
        }
    }

    /// Sends the last Ethereum header finalized by the light client.
    async fn send_init(
        &self,
        init_out: oneshot::Sender<Init>,
        group: &TaskGroup,
    ) -> Result<()> {
        let finalized = self
            .relay
            .retry
            .policy()
            .retry(&group.token(), "finalized ethereum header", || {
                self.client.finalized_ethereum_header()
            })
            .await?;
        match finalized {
            Some(header) => {
                tracing::debug!(
                    block_number = header.number,
                    "Sending init params to Ethereum",
                );
                if init_out.send(header).is_err() {
                    tracing::debug!("Ethereum is not relayed, init params dropped");
                }
            }
            None => {
                tracing::debug!("No Ethereum header finalized on the parachain yet");
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C, S> Chain for ParachainChain<C, S>
where
    C: ParachainClient,
    S: RelayerStore,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_sender(&mut self, senders: Senders) -> Result<()> {
        self.senders = Some(senders);
        Ok(())
    }

    fn set_receiver(&mut self, receivers: Receivers) -> Result<()> {
        self.receivers = Some(receivers);
        Ok(())
    }

    async fn start(
        &mut self,
        group: &TaskGroup,
        init_out: oneshot::Sender<Init>,
        _init_in: oneshot::Receiver<Init>,
    ) -> Result<()> {
        if self.senders.is_none() && self.receivers.is_none() {
            return Err(Error::MissingSender(NAME));
        }
        self.send_init(init_out, group).await?;

        let cancel = group.token();
        let policy = self.relay.retry.policy();
        let messages = self.senders.take().and_then(|s| s.messages);
        if let Some(messages) = messages {
            let listener = CommitmentListener::new(
                self.client.clone(),
                self.store.clone(),
                policy,
            );
            group.spawn(
                "parachain-commitment-listener",
                listener.run(messages, cancel.clone()),
            );
        }

        let Receivers { messages, headers } =
            self.receivers.take().unwrap_or_default();
        match (messages, headers) {
            (Some(messages), Some(headers)) => {
                let ethereum = self
                    .ethereum
                    .as_ref()
                    .ok_or(Error::MissingConfig("ethereum"))?;
                let writer = ParachainWriter::new(
                    self.client.clone(),
                    &self.config,
                    ethereum,
                    policy,
                    cancel.clone(),
                )
                .await?;
                group.spawn("parachain-writer", writer.run(messages, headers, cancel));
            }
            (None, None) => {}
            _ => return Err(Error::MissingSender(NAME)),
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.senders = None;
        self.receivers = None;
        tracing::debug!(chain = NAME, "Stopped");
    }
}
