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


//! # Relaychain BEEFY Listener
//!
//! Subscribes to the BEEFY justifications of the relaychain. Each signed
//! commitment is paired with the authority set active at its block and
//! handed to the
//! commitment store as a new `Witnessed` record; the store ignores
//! commitments it already knows.

use std::sync::Arc;

use artemis_relayer_context::RelaychainClient;
use artemis_relayer_store::{DatabaseCmd, DatabaseCmdSender};
use artemis_relayer_types::beefy::{
    authority_address, BeefyRelayInfo, SignedCommitment,
};
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::{probe, Error, Result};
use codec::Decode;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Turns BEEFY justifications into `Witnessed` relay records.
pub struct JustificationListener<C> {
    client: Arc<C>,
    policy: RetryPolicy,
}

impl<C: RelaychainClient> JustificationListener<C> {
    /// Reads from `client`, retrying failed calls with `policy`.
    pub fn new(client: Arc<C>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Builds the record of one SCALE encoded justification.
    ///
    /// The validator addresses come from the authority set at the block
    /// the commitment was signed for.
    pub async fn witness(
        &self,
        encoded: &[u8],
        cancel: &CancellationToken,
    ) -> Result<BeefyRelayInfo> {
        let signed = SignedCommitment::decode(&mut &encoded[..])
            .map_err(|e| Error::Decode(format!("justification: {e}")))?;
        let at = signed.commitment.block_number;
        let authorities = self
            .policy
            .retry(cancel, "beefy authorities", || {
                self.client.beefy_authorities(at)
            })
            .await?;
        let addresses = authorities
            .iter()
            .map(authority_address)
            .collect::<Result<Vec<_>>>()?;
        Ok(BeefyRelayInfo::witnessed(&signed, addresses))
    }

    /// Follows the justifications until `cancel` fires.
    ///
    /// The subscription is opened again when the node ends it.
    #[tracing::instrument(skip_all, name = "relaychain_listener")]
    pub async fn run(
        self,
        database: DatabaseCmdSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self.listen(&database, &cancel).await {
            Err(Error::Cancelled) => {
                tracing::info!("Shutting down relaychain listener");
                Ok(())
            }
            other => other,
        }
    }

    async fn listen(
        &self,
        database: &DatabaseCmdSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let mut justifications = self
                .policy
                .retry(cancel, "subscribe justifications", || {
                    self.client.subscribe_justifications()
                })
                .await?;
            tracing::info!("Subscribed to BEEFY justifications");
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    next = justifications.next() => next,
                };
                let encoded = match next {
                    Some(Ok(encoded)) => encoded,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Justification subscription error");
                        continue;
                    }
                    None => break,
                };
                let info = match self.witness(&encoded, cancel).await {
                    Ok(info) => info,
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        tracing::error!(error = %e, "Dropping justification");
                        continue;
                    }
                };
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Listener,
                    chain = "relaychain",
                    block_number = info.block_number(),
                    commitment = ?info.commitment_hash,
                    witnessed = true,
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    sent = database.send(DatabaseCmd::create(info)) => {
                        sent.map_err(|_| Error::ChannelClosed("database commands"))?;
                    }
                }
            }
            tracing::warn!("Justification subscription ended, subscribing again");
            self.policy.sleep(cancel).await?;
        }
    }
}
