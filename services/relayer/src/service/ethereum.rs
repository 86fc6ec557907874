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
use std::time::Duration;

use artemis_ethereum_watcher::{
    AppListener, BeefyRelayScheduler, HeaderListener, StartPoint,
};
use artemis_relayer_config::evm::EthereumConfig;
use artemis_relayer_config::relay::RelayConfig;
use artemis_relayer_context::EthereumClient;
use artemis_relayer_store::RelayerStore;
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::task_group::TaskGroup;
use artemis_relayer_utils::{Error, Result};
use artemis_tx_queue::evm::EthereumTxQueue;
use artemis_tx_relay::evm::{BeefyEthereumWriter, EthereumWriter};
use ethers::types::H256;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::chain::{Chain, Init, Receivers, Senders};

const NAME: &str = "ethereum";

/// The Ethereum side of the bridge.
///
/// Produces application messages and headers for the parachain, writes
/// parachain commitments to the inbound channels and, when a BEEFY light
/// client is configured, relays the witnessed BEEFY commitments to it.
pub struct EthereumChain<C, S> {
    client: Arc<C>,
    store: S,
    config: EthereumConfig,
    relay: RelayConfig,
    senders: Option<Senders>,
    receivers: Option<Receivers>,
}

impl<C, S> EthereumChain<C, S>
where
    C: EthereumClient,
    S: RelayerStore,
{
    /// Creates the chain on top of an Ethereum connection.
    pub fn new(
        client: Arc<C>,
        store: S,
        config: EthereumConfig,
        relay: RelayConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
            relay,
            senders: None,
            receivers: None,
        }
    }
}

#[async_trait::async_trait]
impl<C, S> Chain for EthereumChain<C, S>
where
    C: EthereumClient,
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
        init_in: oneshot::Receiver<Init>,
    ) -> Result<()> {
        if self.senders.is_none() && self.receivers.is_none() {
            return Err(Error::MissingSender(NAME));
        }
        // the parachain needs nothing from us.
        drop(init_out);
        let tasks = Tasks {
            client: self.client.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            relay: self.relay.clone(),
            senders: self.senders.take().unwrap_or_default(),
            receivers: self.receivers.take().unwrap_or_default(),
        };
        let spawner = group.clone();
        let cancel = group.token();
        group.spawn("ethereum-init", async move {
            let init = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                init = init_in => init,
            };
            let start = start_block(
                tasks.client.as_ref(),
                &tasks.config,
                &tasks.relay,
                init.ok(),
                &cancel,
            )
            .await?;
            tasks.spawn(&spawner, start, cancel);
            Ok::<_, Error>(())
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.senders = None;
        self.receivers = None;
        tracing::debug!(chain = NAME, "Stopped");
    }
}

/// Everything the tasks of the chain need once the init params arrived.
struct Tasks<C, S> {
    client: Arc<C>,
    store: S,
    config: EthereumConfig,
    relay: RelayConfig,
    senders: Senders,
    receivers: Receivers,
}

impl<C, S> Tasks<C, S>
where
    C: EthereumClient,
    S: RelayerStore,
{
    fn spawn(
        self,
        group: &TaskGroup,
        start: StartPoint,
        cancel: CancellationToken,
    ) {
        let policy = self.relay.retry.policy();
        let Senders {
            messages,
            headers,
            database,
        } = self.senders;
        let queue = EthereumTxQueue::new(self.client.clone());

        if let Some(messages) = messages {
            let listener = AppListener::new(
                self.client.clone(),
                self.store.clone(),
                self.config.apps.clone(),
                policy,
            );
            group.spawn(
                "ethereum-app-listener",
                listener.run(messages, cancel.clone()),
            );
        }
        if let Some(headers) = headers {
            let poll = RetryPolicy::new(
                Duration::from_millis(self.config.poll_interval_ms),
                None,
            );
            let listener = HeaderListener::new(
                self.client.clone(),
                self.store.clone(),
                self.config.descendants_until_final,
                poll,
                policy,
            );
            group.spawn(
                "ethereum-header-listener",
                listener.run(start, headers, cancel.clone()),
            );
        }
        if let Some(messages) = self.receivers.messages {
            let writer = EthereumWriter::new(queue.clone(), &self.config);
            group.spawn("ethereum-writer", writer.run(messages, cancel.clone()));
        }
        match (self.config.beefy_light_client, database) {
            (Some(light_client), Some(database)) => {
                let (records_tx, records_rx) =
                    mpsc::channel(self.relay.channel_capacity);
                let writer = BeefyEthereumWriter::new(
                    queue,
                    self.store.clone(),
                    light_client,
                    self.config.gas_limits,
                    self.relay.beefy.validator_selection,
                    database.clone(),
                );
                group.spawn(
                    "beefy-ethereum-writer",
                    writer.run(records_rx, cancel.clone()),
                );
                let scheduler = BeefyRelayScheduler::new(
                    self.client,
                    self.store,
                    light_client,
                    self.config.beefy_block_delay,
                    self.relay.beefy,
                    policy,
                );
                group.spawn(
                    "beefy-relay-scheduler",
                    scheduler.run(records_tx, database, cancel),
                );
            }
            (None, Some(_)) => {
                tracing::debug!("No BEEFY light client configured, not relaying BEEFY commitments");
            }
            _ => {}
        }
    }
}

/// Where the header relay starts.
///
/// The header the parachain finalized last wins over the saved cursor.
/// Without init params the saved cursor is used, falling back to the
/// configured start block, or the current head.
async fn start_block<C: EthereumClient>(
    client: &C,
    config: &EthereumConfig,
    relay: &RelayConfig,
    init: Option<Init>,
    cancel: &CancellationToken,
) -> Result<StartPoint> {
    if let Some(header) = init {
        tracing::debug!(
            block_number = header.number,
            block_hash = ?H256(header.hash),
            "Received init params for Ethereum from the parachain",
        );
        return Ok(StartPoint::After(header.number));
    }
    if let Some(start) = config.start_block {
        tracing::debug!(block_number = start, "Starting from the configured block");
        return Ok(StartPoint::Block(start));
    }
    let head = relay
        .retry
        .policy()
        .retry(cancel, "block number", || client.block_number())
        .await?;
    tracing::debug!(block_number = head, "Starting from the current head");
    Ok(StartPoint::Block(head))
}
