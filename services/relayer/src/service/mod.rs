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


//! # Relayer Service Module 🕸️
//!
//! Connects to the configured chains and runs them.
//!
//! ## Overview
//!
//! Ethereum and the parachain exchange messages in both directions and
//! Ethereum headers flow to the parachain light client. The relaychain
//! feeds witnessed BEEFY commitments into the commitment store, from
//! where the Ethereum side relays them to the BEEFY light client.
//!
//! | channel | producer | consumer |
//! |---|---|---|
//! | Ethereum messages, headers | Ethereum listeners | parachain writer |
//! | parachain messages | parachain listener | Ethereum writer |
//! | database commands | relaychain listener, BEEFY writer and scheduler | commitment store |
//!
//! Each channel is closed by its producer when it returns. Messages and
//! headers travel as deliveries: the listener cursor behind a delivery
//! only moves once the consuming writer handled it.

use std::sync::Arc;

use artemis_relayer_config::relay::RelayConfig;
use artemis_relayer_context::RelayerContext;
use artemis_relayer_store::commands::process_commands;
use artemis_relayer_store::RelayerStore;
use artemis_relayer_utils::task_group::TaskGroup;
use artemis_relayer_utils::Result;
use tokio::sync::{mpsc, oneshot};

use crate::chain::{Chain, Receivers, Senders};

mod ethereum;
mod parachain;
mod relaychain;

pub use ethereum::EthereumChain;
pub use parachain::ParachainChain;
pub use relaychain::RelaychainChain;

/// The chains of one relayer, each of them optional.
#[derive(Default)]
pub struct Chains {
    /// The Ethereum chain.
    pub ethereum: Option<Box<dyn Chain>>,
    /// The parachain.
    pub parachain: Option<Box<dyn Chain>>,
    /// The relaychain.
    pub relaychain: Option<Box<dyn Chain>>,
}

/// Starts all background services for all chains configured in the config file.
///
/// Returns the started chains once their tasks are spawned into `group`.
///
/// # Arguments
///
/// * `ctx` - RelayContext reference that holds the configuration
/// * `group` - the task group every task of the relayer runs in
pub async fn ignite(
    ctx: &RelayerContext,
    group: &TaskGroup,
) -> Result<Vec<Box<dyn Chain>>> {
    let store = ctx.store().clone();
    let relay = ctx.config.relay.clone();
    let mut chains = Chains::default();
    if let Some(config) = &ctx.config.ethereum {
        tracing::debug!("Starting Background Services for Ethereum");
        let client = Arc::new(ctx.ethereum_client().await?);
        chains.ethereum = Some(Box::new(EthereumChain::new(
            client,
            store.clone(),
            config.clone(),
            relay.clone(),
        )));
    }
    if let Some(config) = &ctx.config.parachain {
        tracing::debug!("Starting Background Services for the parachain");
        let client = Arc::new(ctx.parachain_client().await?);
        chains.parachain = Some(Box::new(ParachainChain::new(
            client,
            store.clone(),
            config.clone(),
            ctx.config.ethereum.clone(),
            relay.clone(),
        )));
    }
    if ctx.config.relaychain.is_some() {
        tracing::debug!("Starting Background Services for the relaychain");
        let client = Arc::new(ctx.relaychain_client().await?);
        chains.relaychain =
            Some(Box::new(RelaychainChain::new(client, relay.clone())));
    }
    start(chains, store, &relay, group).await
}

/// Wires `chains` together and starts them inside `group`.
///
/// The commitment store processor is started first. On error the group is
/// cancelled, so the tasks already spawned wind down.
pub async fn start<S: RelayerStore>(
    chains: Chains,
    store: S,
    relay: &RelayConfig,
    group: &TaskGroup,
) -> Result<Vec<Box<dyn Chain>>> {
    let started = wire_and_start(chains, store, relay, group).await;
    if let Err(e) = &started {
        tracing::error!(error = %e, "Failed to start the relayer");
        group.cancel();
    }
    started
}

async fn wire_and_start<S: RelayerStore>(
    chains: Chains,
    store: S,
    relay: &RelayConfig,
    group: &TaskGroup,
) -> Result<Vec<Box<dyn Chain>>> {
    let Chains {
        mut ethereum,
        mut parachain,
        mut relaychain,
    } = chains;
    let capacity = relay.channel_capacity;

    let (database_tx, database_rx) = mpsc::channel(capacity);
    group.spawn(
        "commitment-store",
        process_commands(store, database_rx, group.token()),
    );

    let bridged = ethereum.is_some() && parachain.is_some();
    let mut ethereum_senders = Senders {
        database: Some(database_tx.clone()),
        ..Default::default()
    };
    let mut ethereum_receivers = Receivers::default();
    let mut parachain_senders = Senders::default();
    let mut parachain_receivers = Receivers::default();
    if bridged {
        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        let (headers_tx, headers_rx) = mpsc::channel(capacity);
        ethereum_senders.messages = Some(messages_tx);
        ethereum_senders.headers = Some(headers_tx);
        parachain_receivers.messages = Some(messages_rx);
        parachain_receivers.headers = Some(headers_rx);

        let (messages_tx, messages_rx) = mpsc::channel(capacity);
        parachain_senders.messages = Some(messages_tx);
        ethereum_receivers.messages = Some(messages_rx);
    }
    if let Some(chain) = ethereum.as_mut() {
        chain.set_sender(ethereum_senders)?;
        chain.set_receiver(ethereum_receivers)?;
    }
    if let Some(chain) = parachain.as_mut() {
        chain.set_sender(parachain_senders)?;
        chain.set_receiver(parachain_receivers)?;
    }
    if let Some(chain) = relaychain.as_mut() {
        chain.set_sender(Senders {
            database: Some(database_tx),
            ..Default::default()
        })?;
        chain.set_receiver(Receivers::default())?;
    }

    // the parachain hands the Ethereum start point over; Ethereum has
    // nothing for the parachain and the relaychain needs nothing at all.
    let (parachain_out, ethereum_in) = oneshot::channel();
    let (ethereum_out, parachain_in) = oneshot::channel();
    let (relaychain_out, relaychain_in) = oneshot::channel();
    let plan = [
        (ethereum, ethereum_out, ethereum_in),
        (parachain, parachain_out, parachain_in),
        (relaychain, relaychain_out, relaychain_in),
    ];
    let mut started = Vec::new();
    for (chain, init_out, init_in) in plan {
        let Some(mut chain) = chain else { continue };
        chain.start(group, init_out, init_in).await?;
        tracing::info!(chain = chain.name(), "Chain started");
        started.push(chain);
    }
    Ok(started)
}
