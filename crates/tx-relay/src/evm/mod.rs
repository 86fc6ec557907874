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


use std::collections::{HashMap, HashSet};

use artemis_relayer_config::evm::{EthereumConfig, GasLimits};
use artemis_relayer_context::EthereumClient;
use artemis_relayer_store::Delivery;
use artemis_relayer_types::message::{ChannelId, Message};
use artemis_relayer_utils::{probe, Error, Result};
use artemis_tx_queue::evm::{EthereumCall, EthereumTxQueue};
use ethers::types::{Address, H256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::drain;

mod beefy;
/// Calldata builders.
pub mod calls;

pub use beefy::BeefyEthereumWriter;

/// Delivers application messages and parachain commitments to Ethereum.
pub struct EthereumWriter<C> {
    queue: EthereumTxQueue<C>,
    apps: HashSet<Address>,
    inbound_channels: HashMap<ChannelId, Address>,
    gas_limits: GasLimits,
}

impl<C: EthereumClient> EthereumWriter<C> {
    /// A writer sending through `queue` to the contracts of `config`.
    pub fn new(queue: EthereumTxQueue<C>, config: &EthereumConfig) -> Self {
        Self {
            queue,
            apps: config.apps.iter().map(|app| app.address).collect(),
            inbound_channels: config
                .inbound_channels
                .iter()
                .map(|channel| (channel.id, channel.address))
                .collect(),
            gas_limits: config.gas_limits,
        }
    }

    /// Builds the contract call for `message`.
    pub fn call(&self, message: &Message) -> Result<EthereumCall> {
        match message {
            Message::Ethereum(message) => {
                if !self.apps.contains(&message.app_id) {
                    return Err(Error::ContractNotFound(format!(
                        "{:?}",
                        message.app_id
                    )));
                }
                Ok(EthereumCall {
                    to: message.app_id,
                    data: calls::app_submit(message),
                    gas: self.gas_limits.app_submit.into(),
                })
            }
            Message::Commitment(commitment) => {
                let to = *self
                    .inbound_channels
                    .get(&commitment.channel_id)
                    .ok_or_else(|| {
                        Error::ContractNotFound(format!(
                            "inbound channel {}",
                            commitment.channel_id
                        ))
                    })?;
                Ok(EthereumCall {
                    to,
                    data: calls::inbound_submit(commitment),
                    gas: self.gas_limits.inbound_channel.into(),
                })
            }
            Message::Parachain(_) => Err(Error::UnsupportedMessage {
                writer: "ethereum",
                kind: message.kind(),
            }),
        }
    }

    /// Sends the transaction for `message` and returns its hash.
    pub async fn write(&self, message: &Message) -> Result<H256> {
        let call = self.call(message)?;
        let to = call.to;
        let tx_hash = self.queue.send(call).await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Writer,
            ty = "EVM",
            message = message.kind(),
            ?to,
            ?tx_hash,
        );
        Ok(tx_hash)
    }

    /// Writes the batches of `messages` until `cancel` fires or the channel
    /// closes.
    ///
    /// A message that cannot be written is logged and dropped. The
    /// checkpoint of a batch is committed once every message of it was
    /// handled.
    #[tracing::instrument(skip_all, name = "ethereum_writer")]
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<Delivery<Vec<Message>>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let outcome = loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                delivery = messages.recv() => delivery,
            };
            let Some(delivery) = delivery else { break Ok(()) };
            let (batch, checkpoint) = delivery.into_parts();
            for message in &batch {
                if let Err(e) = self.write(message).await {
                    tracing::error!(
                        kind = message.kind(),
                        error = %e,
                        "Failed to submit message to Ethereum",
                    );
                }
            }
            if let Err(e) = checkpoint.commit() {
                break Err(e);
            }
        };
        tracing::info!("Shutting down Ethereum writer");
        drain(&mut messages, "messages").await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use artemis_relayer_context::mock::MockEthereumClient;
    use artemis_relayer_store::{Cursor, HistoryStoreKey, InMemoryStore};
    use artemis_relayer_types::message::{
        CommitmentMessage, EthereumMessage, ParachainMessage,
        SubstrateCommitment,
    };
    use ethers::signers::Signer;
    use ethers::types::{Bytes, Log, U256, U64};

    use super::*;
    use crate::test_utils::ethereum_config;

    fn writer(client: &Arc<MockEthereumClient>) -> EthereumWriter<MockEthereumClient> {
        EthereumWriter::new(
            EthereumTxQueue::new(client.clone()),
            &ethereum_config(client.address()),
        )
    }

    #[tokio::test]
    async fn app_log_becomes_one_transaction_with_the_pending_nonce() {
        let client = Arc::new(MockEthereumClient::default());
        client.state.lock().pending_nonce = U256::from(21u64);
        let app = Address::repeat_byte(0xaa);
        let log = Log {
            address: app,
            topics: vec![H256::repeat_byte(1)],
            data: Bytes::from(vec![5, 6, 7]),
            block_number: Some(U64::from(100)),
            ..Default::default()
        };
        let data = EthereumMessage::encode_log(&log);
        let signature = client
            .sign_hash(H256(ethers::utils::keccak256(&data)))
            .unwrap();
        let message = Message::Ethereum(EthereumMessage {
            app_id: app,
            block_number: 100,
            data,
            signature: signature.to_vec(),
        });

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(writer(&client).run(rx, cancel.clone()));
        tx.send(Delivery::detached(vec![message.clone()])).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_addr(), Some(&app));
        assert_eq!(sent[0].nonce(), Some(&U256::from(21u64)));
        let Message::Ethereum(message) = message else { unreachable!() };
        assert_eq!(sent[0].data(), Some(&calls::app_submit(&message)));
    }

    #[tokio::test]
    async fn commitments_go_to_their_inbound_channel() {
        let client = Arc::new(MockEthereumClient::default());
        let writer = writer(&client);
        let mut commitment = SubstrateCommitment {
            channel_id: ChannelId::BASIC,
            commitment_hash: H256::repeat_byte(2),
            block_number: 9,
            messages: vec![CommitmentMessage {
                target: [0x42; 20],
                nonce: 1,
                payload: vec![0xff],
            }],
        };
        writer
            .write(&Message::Commitment(commitment.clone()))
            .await
            .unwrap();
        assert_eq!(
            client.sent()[0].to_addr(),
            Some(&Address::repeat_byte(0xcc))
        );

        commitment.channel_id = ChannelId::INCENTIVIZED;
        let res = writer.write(&Message::Commitment(commitment)).await;
        assert!(matches!(res, Err(Error::ContractNotFound(_))));
        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn parachain_calls_are_rejected() {
        let client = Arc::new(MockEthereumClient::default());
        let message = Message::Parachain(ParachainMessage {
            call: artemis_relayer_types::message::CallName::new("A", "b"),
            args: vec![],
        });
        let res = writer(&client).write(&message).await;
        assert!(matches!(
            res,
            Err(Error::UnsupportedMessage {
                writer: "ethereum",
                kind: "parachain"
            })
        ));
    }

    #[tokio::test]
    async fn send_failures_are_logged_and_skipped() {
        let client = Arc::new(MockEthereumClient::default());
        client.state.lock().failing_sends = 1;
        let commitment = SubstrateCommitment {
            channel_id: ChannelId::BASIC,
            commitment_hash: H256::zero(),
            block_number: 1,
            messages: vec![],
        };
        let store = InMemoryStore::default();
        let cursor = Cursor::new(store, HistoryStoreKey::ParachainCommitments);
        let (tx, rx) = mpsc::channel(2);
        let batch = vec![
            Message::Commitment(commitment.clone()),
            Message::Commitment(commitment),
        ];
        tx.send(Delivery::new(batch, cursor.checkpoint(2)))
            .await
            .unwrap();
        drop(tx);
        writer(&client)
            .run(rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.sent().len(), 1);
        assert_eq!(cursor.get(0).unwrap(), 2);
    }

    #[tokio::test]
    async fn batches_left_on_cancel_keep_the_cursor() {
        let client = Arc::new(MockEthereumClient::default());
        let cursor = Cursor::new(
            InMemoryStore::default(),
            HistoryStoreKey::ParachainCommitments,
        );
        cursor.reset(5).unwrap();
        let commitment = SubstrateCommitment {
            channel_id: ChannelId::BASIC,
            commitment_hash: H256::zero(),
            block_number: 5,
            messages: vec![],
        };
        let (tx, rx) = mpsc::channel(2);
        tx.send(Delivery::new(
            vec![Message::Commitment(commitment)],
            cursor.checkpoint(6),
        ))
        .await
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        writer(&client).run(rx, cancel).await.unwrap();
        assert!(client.sent().is_empty());
        assert!(tx.is_closed());
        assert_eq!(cursor.get(0).unwrap(), 5);
    }
}
