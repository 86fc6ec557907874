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


use std::collections::HashMap;
use std::sync::Arc;

use artemis_relayer_config::evm::EthereumConfig;
use artemis_relayer_config::substrate::ParachainConfig;
use artemis_relayer_context::ParachainClient;
use artemis_relayer_store::Delivery;
use artemis_relayer_types::message::{
    CallName, EthereumMessage, Header, Message, ParachainMessage,
};
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::{probe, Error, Result};
use artemis_tx_queue::substrate::ExtrinsicPool;
use artemis_tx_queue::NonceSequencer;
use codec::Encode;
use ethers::types::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::drain;

/// The call importing an Ethereum header into the parachain light client.
pub const IMPORT_HEADER: (&str, &str) = ("VerifierLightclient", "import_header");

/// Dispatches Ethereum messages and headers on the parachain.
///
/// Every extrinsic is signed with the next nonce of the relayer account and
/// handed to the [`ExtrinsicPool`]; the nonce moves forward by one for each
/// extrinsic the node accepted.
pub struct ParachainWriter<C> {
    client: Arc<C>,
    pool: ExtrinsicPool,
    nonce: NonceSequencer,
    apps: HashMap<Address, CallName>,
    trusted_signers: Vec<Address>,
    policy: RetryPolicy,
}

impl<C: ParachainClient> ParachainWriter<C> {
    /// Reads the account nonce and prepares the writer.
    pub async fn new(
        client: Arc<C>,
        parachain: &ParachainConfig,
        ethereum: &EthereumConfig,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let nonce = client.account_nonce().await?;
        tracing::info!(nonce, "Parachain writer ready");
        let apps = ethereum
            .apps
            .iter()
            .map(|app| (app.address, app.call_name()))
            .collect();
        Ok(Self {
            client,
            pool: ExtrinsicPool::new(parachain.max_watched_extrinsics, cancel),
            nonce: NonceSequencer::new(nonce),
            apps,
            trusted_signers: ethereum.trusted_signers.clone(),
            policy,
        })
    }

    /// The nonce the next extrinsic is signed with.
    pub async fn next_nonce(&self) -> u64 {
        self.nonce.current().await
    }

    /// Turns an Ethereum application message into the call of its app.
    ///
    /// The proof must recover to one of the trusted signers.
    pub fn ethereum_call(
        &self,
        message: &EthereumMessage,
    ) -> Result<ParachainMessage> {
        let signer = message.recover_signer()?;
        if !self.trusted_signers.contains(&signer) {
            return Err(Error::UntrustedSigner(signer));
        }
        let call = self.apps.get(&message.app_id).ok_or_else(|| {
            Error::ContractNotFound(format!("{:?}", message.app_id))
        })?;
        Ok(ParachainMessage {
            call: call.clone(),
            args: (&message.data, &message.signature).encode(),
        })
    }

    /// Submits one message.
    pub async fn write(
        &self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = match message {
            Message::Parachain(call) => call,
            Message::Ethereum(message) => self.ethereum_call(&message)?,
            other => {
                return Err(Error::UnsupportedMessage {
                    writer: "parachain",
                    kind: other.kind(),
                })
            }
        };
        self.submit(call, cancel).await
    }

    /// Submits an `import_header` call for `header`.
    pub async fn write_header(
        &self,
        header: Header,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let number = header.number;
        let mut args = header.header_data;
        args.extend_from_slice(&header.proof_data);
        let call = ParachainMessage {
            call: CallName::new(IMPORT_HEADER.0, IMPORT_HEADER.1),
            args,
        };
        self.submit(call, cancel).await?;
        tracing::info!(block_number = number, "Submitted header to the parachain");
        Ok(())
    }

    async fn submit(
        &self,
        call: ParachainMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let name = call.call.to_string();
        let nonce = self
            .policy
            .retry(cancel, "submit extrinsic", || {
                self.nonce.submit(|nonce| {
                    let call = &call;
                    async move {
                        self.pool
                            .submit(nonce, || {
                                self.client.submit_extrinsic(call, nonce)
                            })
                            .await?;
                        Ok(nonce)
                    }
                })
            })
            .await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Writer,
            ty = "SUBSTRATE",
            call = %name,
            nonce,
            submitted = true,
        );
        Ok(())
    }

    /// Submits every message of `batch`.
    ///
    /// A message that cannot be written is logged and dropped. Fails only
    /// with `Cancelled`, leaving the rest of the batch unwritten.
    pub async fn write_batch(
        &self,
        batch: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let count = batch.len();
        for message in batch {
            let kind = message.kind();
            match self.write(message, cancel).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => tracing::error!(
                    kind,
                    error = %e,
                    "Failed to submit message to the parachain",
                ),
            }
        }
        tracing::info!(count, "Submitted messages to the parachain");
        Ok(())
    }

    /// Writes what the listeners send until `cancel` fires or a channel
    /// closes, then drains the other channel and waits for the followed
    /// extrinsics.
    ///
    /// The checkpoint of a delivery is committed once all of it was
    /// handled; a delivery cut short by `cancel` or drained keeps its
    /// listener's cursor in place.
    #[tracing::instrument(skip_all, name = "parachain_writer")]
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<Delivery<Vec<Message>>>,
        mut headers: mpsc::Receiver<Delivery<Header>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let outcome = loop {
            let handled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                delivery = messages.recv() => {
                    let Some(delivery) = delivery else { break Ok(()) };
                    let (batch, checkpoint) = delivery.into_parts();
                    self.write_batch(batch, &cancel).await.map(|()| checkpoint)
                }
                delivery = headers.recv() => {
                    let Some(delivery) = delivery else { break Ok(()) };
                    let (header, checkpoint) = delivery.into_parts();
                    let number = header.number;
                    match self.write_header(header, &cancel).await {
                        Err(Error::Cancelled) => Err(Error::Cancelled),
                        Err(e) => {
                            tracing::error!(
                                block_number = number,
                                error = %e,
                                "Failed to submit header to the parachain",
                            );
                            Ok(checkpoint)
                        }
                        Ok(()) => Ok(checkpoint),
                    }
                }
            };
            match handled.and_then(|checkpoint| checkpoint.commit()) {
                Ok(()) => {}
                Err(Error::Cancelled) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        tracing::info!("Shutting down parachain writer");
        drain(&mut messages, "messages").await;
        drain(&mut headers, "headers").await;
        self.pool.close().await;
        outcome
    }
}
