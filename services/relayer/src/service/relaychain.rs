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

use artemis_relayer_config::relay::RelayConfig;
use artemis_relayer_context::RelaychainClient;
use artemis_relayer_utils::task_group::TaskGroup;
use artemis_relayer_utils::{Error, Result};
use artemis_relaychain_watcher::JustificationListener;
use tokio::sync::oneshot;

use crate::chain::{Chain, Init, Receivers, Senders};

const NAME: &str = "relaychain";

/// The relaychain, a source of BEEFY commitments only.
pub struct RelaychainChain<C> {
    client: Arc<C>,
    relay: RelayConfig,
    senders: Option<Senders>,
}

impl<C: RelaychainClient> RelaychainChain<C> {
    /// Creates the chain on top of a relaychain connection.
    pub fn new(client: Arc<C>, relay: RelayConfig) -> Self {
        Self {
            client,
            relay,
            senders: None,
        }
    }
}

#[async_trait::async_trait]
impl<C: RelaychainClient> Chain for RelaychainChain<C> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set_sender(&mut self, senders: Senders) -> Result<()> {
        self.senders = Some(senders);
        Ok(())
    }

    fn set_receiver(&mut self, _receivers: Receivers) -> Result<()> {
        Ok(())
    }

    async fn start(
        &mut self,
        group: &TaskGroup,
        _init_out: oneshot::Sender<Init>,
        _init_in: oneshot::Receiver<Init>,
    ) -> Result<()> {
        let database = self
            .senders
            .take()
            .and_then(|s| s.database)
            .ok_or(Error::MissingSender(NAME))?;
        let listener =
            JustificationListener::new(self.client.clone(), self.relay.retry.policy());
        group.spawn(
            "relaychain-justification-listener",
            listener.run(database, group.token()),
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.senders = None;
        tracing::debug!(chain = NAME, "Stopped");
    }
}
