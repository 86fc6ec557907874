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


use artemis_relayer_store::{DatabaseCmdSender, Delivery};
use artemis_relayer_types::{Header, HeaderId, Message};
use artemis_relayer_utils::task_group::TaskGroup;
use artemis_relayer_utils::Result;
use tokio::sync::{mpsc, oneshot};

/// Parameters one chain hands to its peer before starting.
///
/// The parachain sends the last Ethereum header its light client
/// finalized; Ethereum resumes the header relay right after it.
pub type Init = HeaderId;

/// A batch of messages together with the cursor move of its listener.
pub type MessageBatch = Delivery<Vec<Message>>;

/// The channels a chain produces into.
///
/// A chain drops the senders it has no use for, which closes them.
/// Consumers commit the checkpoint of every delivery they handled.
#[derive(Debug, Default)]
pub struct Senders {
    /// Batches of messages for the peer chain.
    pub messages: Option<mpsc::Sender<MessageBatch>>,
    /// Headers for the light client of the peer chain.
    pub headers: Option<mpsc::Sender<Delivery<Header>>>,
    /// Commands for the commitment store.
    pub database: Option<DatabaseCmdSender>,
}

/// The channels a chain consumes from.
#[derive(Debug, Default)]
pub struct Receivers {
    /// Batches of messages from the peer chain.
    pub messages: Option<mpsc::Receiver<MessageBatch>>,
    /// Headers from the peer chain.
    pub headers: Option<mpsc::Receiver<Delivery<Header>>>,
}

/// A chain the relayer listens to and writes to.
///
/// The orchestrator sets the channels of every chain first, then starts
/// them one after the other. `start` spawns the listeners and writers of
/// the chain into the group and returns; it must not wait on a peer.
#[async_trait::async_trait]
pub trait Chain: Send {
    /// Name of the chain, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Sets the channels this chain produces into.
    fn set_sender(&mut self, senders: Senders) -> Result<()>;

    /// Sets the channels this chain consumes from.
    fn set_receiver(&mut self, receivers: Receivers) -> Result<()>;

    /// Spawns the tasks of this chain into `group`.
    ///
    /// `init_out` goes to the peer chain: a chain with nothing to hand over
    /// drops it right away. `init_in` comes from the peer; it resolves with
    /// an error when the peer had nothing to send.
    ///
    /// Fails with `MissingSender` when neither senders nor receivers were
    /// set.
    async fn start(
        &mut self,
        group: &TaskGroup,
        init_out: oneshot::Sender<Init>,
        init_in: oneshot::Receiver<Init>,
    ) -> Result<()>;

    /// Releases the channels the chain still holds.
    fn stop(&mut self);
}
