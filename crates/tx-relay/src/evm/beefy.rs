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

use artemis_relayer_context::EthereumClient;
use artemis_relayer_store::commands::{DatabaseCmd, DatabaseCmdSender};
use artemis_relayer_store::CommitmentStore;
use artemis_relayer_types::beefy::{
    BeefyRelayInfo, RelayInfoChanges, RelayStatus, ValidatorSelection,
};
use artemis_relayer_utils::{probe, Error, Result};
use artemis_tx_queue::evm::{EthereumCall, EthereumTxQueue};
use ethers::types::{Address, H256, U256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::calls;
use crate::drain;

/// Sends the two transactions of the BEEFY light client.
///
/// The writer only reacts to `Witnessed` and `ReadyToComplete` records.
/// After the node accepted a transaction it reports the hash to the
/// commitment store, which moves the record one step forward. When a
/// transaction fails the record keeps its status and is dispatched again
/// later by the scheduler.
///
/// Before sending, the record is read back from the store: a record that
/// moved on, or whose transaction was sent and not yet reported back to the
/// store, is skipped.
pub struct BeefyEthereumWriter<C, S> {
    queue: EthereumTxQueue<C>,
    store: S,
    light_client: Address,
    initial_gas: U256,
    complete_gas: U256,
    selection: ValidatorSelection,
    database: DatabaseCmdSender,
    /// Status each record had when its last transaction was sent.
    sent: HashMap<H256, RelayStatus>,
}

impl<C, S> BeefyEthereumWriter<C, S>
where
    C: EthereumClient,
    S: CommitmentStore,
{
    /// A writer sending to the light client at `light_client`, reading the
    /// records from `store` and reporting to `database`.
    pub fn new(
        queue: EthereumTxQueue<C>,
        store: S,
        light_client: Address,
        gas_limits: artemis_relayer_config::evm::GasLimits,
        selection: ValidatorSelection,
        database: DatabaseCmdSender,
    ) -> Self {
        Self {
            queue,
            store,
            light_client,
            initial_gas: gas_limits.initial_signature_commitment.into(),
            complete_gas: gas_limits.complete_signature_commitment.into(),
            selection,
            database,
            sent: HashMap::new(),
        }
    }

    /// Whether the transaction for the status of `info` is still to be
    /// sent.
    fn is_due(&mut self, info: &BeefyRelayInfo) -> Result<bool> {
        let store = &self.store;
        // forget what the store has caught up with
        self.sent.retain(|hash, status| {
            matches!(store.get_relay_info(*hash), Ok(Some(r)) if r.status == *status)
        });
        let Some(stored) = self.store.get_relay_info(info.commitment_hash)? else {
            return Ok(false);
        };
        Ok(stored.status == info.status
            && !self.sent.contains_key(&info.commitment_hash))
    }

    /// Submits the initial signature commitment of `info`.
    pub async fn write_initial(&self, info: &BeefyRelayInfo) -> Result<H256> {
        let (chosen, signed) = info.select_validator(self.selection)?;
        let data = calls::submit_initial(info, &chosen, &signed)?;
        let tx_hash = self
            .queue
            .send(EthereumCall {
                to: self.light_client,
                data,
                gas: self.initial_gas,
            })
            .await?;
        tracing::info!(
            commitment = ?info.commitment_hash,
            validator = chosen.position,
            ?tx_hash,
            "Initial signature commitment submitted",
        );
        Ok(tx_hash)
    }

    /// Submits the complete signature commitment of `info`.
    pub async fn write_complete(&self, info: &BeefyRelayInfo) -> Result<H256> {
        let validation_id = info.validation_id.ok_or(Error::Generic(
            "record ready to complete without a validation id",
        ))?;
        let signed = info.verified_signatures()?;
        let data = calls::submit_complete(info, validation_id, &signed)?;
        let tx_hash = self
            .queue
            .send(EthereumCall {
                to: self.light_client,
                data,
                gas: self.complete_gas,
            })
            .await?;
        tracing::info!(
            commitment = ?info.commitment_hash,
            %validation_id,
            ?tx_hash,
            "Complete signature commitment submitted",
        );
        Ok(tx_hash)
    }

    /// Handles one record. Returns the command reporting the progress, if
    /// any transaction was sent.
    pub async fn write(
        &self,
        info: &BeefyRelayInfo,
    ) -> Result<Option<DatabaseCmd>> {
        let changes = match info.status {
            RelayStatus::Witnessed => RelayInfoChanges::initial_verification_sent(
                self.write_initial(info).await?,
            ),
            RelayStatus::ReadyToComplete => {
                RelayInfoChanges::complete_verification_sent(
                    self.write_complete(info).await?,
                )
            }
            status => {
                tracing::trace!(%status, "Nothing to send for this status");
                return Ok(None);
            }
        };
        Ok(Some(DatabaseCmd::update(info.commitment_hash, changes)))
    }

    /// Writes the records sent by the scheduler until `cancel` fires or the
    /// channel closes.
    #[tracing::instrument(skip_all, name = "beefy_ethereum_writer")]
    pub async fn run(
        mut self,
        mut records: mpsc::Receiver<BeefyRelayInfo>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let outcome = loop {
            let info = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                info = records.recv() => info,
            };
            let Some(info) = info else { break Ok(()) };
            match self.is_due(&info) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        commitment = ?info.commitment_hash,
                        status = %info.status,
                        "Record already handled, skipping",
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        commitment = ?info.commitment_hash,
                        error = %e,
                        "Failed to read back BEEFY record",
                    );
                    continue;
                }
            }
            match self.write(&info).await {
                Ok(Some(cmd)) => {
                    self.sent.insert(info.commitment_hash, info.status);
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %probe::Kind::BeefyRelay,
                        commitment = ?info.commitment_hash,
                        from = %info.status,
                        sent = true,
                    );
                    if self.database.send(cmd).await.is_err() {
                        break Err(Error::ChannelClosed("database commands"));
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(
                    commitment = ?info.commitment_hash,
                    status = %info.status,
                    error = %e,
                    "Failed to submit BEEFY transaction to Ethereum",
                ),
            }
        };
        tracing::info!("Shutting down BEEFY writer");
        drain(&mut records, "BEEFY records").await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use artemis_relayer_config::evm::GasLimits;
    use artemis_relayer_context::mock::MockEthereumClient;
    use artemis_relayer_store::commands::process_commands;
    use artemis_relayer_store::mem::InMemoryStore;
    use artemis_relayer_store::CommitmentStore;
    use artemis_relayer_types::beefy::{Commitment, SignedCommitment};
    use ethers::abi::{decode, ParamType, Token};
    use ethers::signers::{LocalWallet, Signer};

    use super::*;

    fn witnessed(signers: &[usize], validators: usize) -> BeefyRelayInfo {
        let wallets = (1..=validators)
            .map(|i| {
                let mut key = [0u8; 32];
                key[31] = i as u8;
                LocalWallet::from_bytes(&key).unwrap()
            })
            .collect::<Vec<_>>();
        let commitment = Commitment {
            payload: [7u8; 32],
            block_number: 30,
            validator_set_id: 2,
        };
        let hash = commitment.hash();
        let signatures = wallets
            .iter()
            .enumerate()
            .map(|(i, w)| {
                signers.contains(&i).then(|| {
                    let mut raw = [0u8; 65];
                    raw.copy_from_slice(&w.sign_hash(hash).unwrap().to_vec());
                    raw
                })
            })
            .collect();
        let signed = SignedCommitment {
            commitment,
            signatures,
        };
        BeefyRelayInfo::witnessed(
            &signed,
            wallets.iter().map(|w| w.address()).collect(),
        )
    }

    type Writer = BeefyEthereumWriter<MockEthereumClient, InMemoryStore>;

    fn writer_with_store(
        client: &Arc<MockEthereumClient>,
        store: &InMemoryStore,
    ) -> (Writer, mpsc::Receiver<DatabaseCmd>) {
        let (tx, rx) = mpsc::channel(8);
        let writer = BeefyEthereumWriter::new(
            EthereumTxQueue::new(client.clone()),
            store.clone(),
            Address::repeat_byte(0xbb),
            GasLimits::default(),
            ValidatorSelection::FirstValid,
            tx,
        );
        (writer, rx)
    }

    fn writer(
        client: &Arc<MockEthereumClient>,
    ) -> (Writer, mpsc::Receiver<DatabaseCmd>) {
        writer_with_store(client, &InMemoryStore::default())
    }

    #[tokio::test]
    async fn witnessed_record_yields_one_initial_update() {
        let client = Arc::new(MockEthereumClient::default());
        let store = InMemoryStore::default();
        let (writer, mut commands) = writer_with_store(&client, &store);
        let info = witnessed(&[1, 2], 4);
        store.insert_relay_info(&info).unwrap();

        let (records_tx, records_rx) = mpsc::channel(2);
        records_tx.send(info.clone()).await.unwrap();
        drop(records_tx);
        writer.run(records_rx, CancellationToken::new()).await.unwrap();

        let cmd = commands.recv().await.unwrap();
        let DatabaseCmd::Update {
            commitment_hash,
            changes,
        } = cmd
        else {
            panic!("expected an update")
        };
        assert_eq!(commitment_hash, info.commitment_hash);
        assert_eq!(changes.status, Some(RelayStatus::InitialVerificationTxSent));
        assert!(changes.initial_verification_tx_hash.is_some());
        assert!(commands.recv().await.is_none());

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_addr(), Some(&Address::repeat_byte(0xbb)));
        let data = sent[0].data().unwrap();
        assert_eq!(&data[..4], &ethers::utils::id(calls::SUBMIT_INITIAL)[..]);
        let tokens = decode(
            &[
                ParamType::FixedBytes(32),
                ParamType::Array(Box::new(ParamType::Uint(256))),
                ParamType::Bytes,
                ParamType::Uint(256),
                ParamType::Address,
                ParamType::Array(Box::new(ParamType::FixedBytes(32))),
            ],
            &data[4..],
        )
        .unwrap();
        // validators 1 and 2 signed, the first one is proven
        assert_eq!(tokens[1], Token::Array(vec![Token::Uint(U256::from(0b110))]));
        assert_eq!(tokens[3], Token::Uint(U256::one()));
        assert_eq!(tokens[4], Token::Address(info.validator_addresses[1]));
    }

    #[tokio::test]
    async fn failed_submission_does_not_advance_the_record() {
        let client = Arc::new(MockEthereumClient::default());
        client.state.lock().failing_sends = 1;
        let store = InMemoryStore::default();
        let (writer, mut commands) = writer_with_store(&client, &store);
        let info = witnessed(&[0], 2);
        store.insert_relay_info(&info).unwrap();
        let (records_tx, records_rx) = mpsc::channel(2);
        records_tx.send(info).await.unwrap();
        drop(records_tx);
        writer.run(records_rx, CancellationToken::new()).await.unwrap();
        assert!(commands.recv().await.is_none());
    }

    #[tokio::test]
    async fn record_dispatched_twice_is_sent_once() {
        let client = Arc::new(MockEthereumClient::default());
        let store = InMemoryStore::default();
        let (writer, mut commands) = writer_with_store(&client, &store);
        let info = witnessed(&[0], 2);
        store.insert_relay_info(&info).unwrap();

        // the update of the first send has not reached the store yet
        let (records_tx, records_rx) = mpsc::channel(2);
        records_tx.send(info.clone()).await.unwrap();
        records_tx.send(info.clone()).await.unwrap();
        drop(records_tx);
        writer.run(records_rx, CancellationToken::new()).await.unwrap();

        assert_eq!(client.sent().len(), 1);
        assert!(commands.recv().await.is_some());
        assert!(commands.recv().await.is_none());
    }

    #[tokio::test]
    async fn record_that_moved_on_is_not_sent() {
        let client = Arc::new(MockEthereumClient::default());
        let store = InMemoryStore::default();
        let (writer, mut commands) = writer_with_store(&client, &store);
        let info = witnessed(&[0], 2);
        store.insert_relay_info(&info).unwrap();
        store
            .update_relay_info(
                info.commitment_hash,
                &RelayInfoChanges::initial_verification_sent(H256::repeat_byte(1)),
            )
            .unwrap();

        // a stale copy still says witnessed
        let (records_tx, records_rx) = mpsc::channel(2);
        records_tx.send(info).await.unwrap();
        drop(records_tx);
        writer.run(records_rx, CancellationToken::new()).await.unwrap();

        assert!(client.sent().is_empty());
        assert!(commands.recv().await.is_none());
    }

    #[tokio::test]
    async fn records_without_a_valid_signature_are_not_sent() {
        let client = Arc::new(MockEthereumClient::default());
        let (writer, _commands) = writer(&client);
        let mut info = witnessed(&[0], 2);
        // position 0 now claims a different validator
        info.validator_addresses.swap(0, 1);
        let res = writer.write(&info).await;
        assert!(matches!(res, Err(Error::InvalidSignature(_))));
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn other_statuses_are_ignored() {
        let client = Arc::new(MockEthereumClient::default());
        let (writer, _commands) = writer(&client);
        let info = witnessed(&[0], 1)
            .apply(&RelayInfoChanges::initial_verification_sent(H256::zero()))
            .unwrap();
        assert_eq!(writer.write(&info).await.unwrap(), None);
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn full_relay_through_the_store() {
        let client = Arc::new(MockEthereumClient::default());
        let (writer, commands_rx) = writer(&client);
        let store = InMemoryStore::default();
        let cancel = CancellationToken::new();
        let processor = tokio::spawn(process_commands(
            store.clone(),
            commands_rx,
            cancel.clone(),
        ));

        let info = witnessed(&[0, 1, 2], 3);
        let hash = info.commitment_hash;
        store.insert_relay_info(&info).unwrap();
        let cmd = writer.write(&info).await.unwrap().unwrap();
        writer.database.send(cmd).await.unwrap();
        writer
            .database
            .send(DatabaseCmd::update(
                hash,
                RelayInfoChanges::ready_to_complete(40, U256::from(5)),
            ))
            .await
            .unwrap();

        // wait for the processor to catch up
        let ready = loop {
            let record = store.get_relay_info(hash).unwrap().unwrap();
            if record.status == RelayStatus::ReadyToComplete {
                break record;
            }
            tokio::task::yield_now().await;
        };
        let cmd = writer.write(&ready).await.unwrap().unwrap();
        writer.database.send(cmd).await.unwrap();
        drop(writer);
        processor.await.unwrap().unwrap();

        let record = store.get_relay_info(hash).unwrap().unwrap();
        assert_eq!(record.status, RelayStatus::CompleteVerificationTxSent);
        assert!(record.complete_verification_tx_hash.is_some());
        assert_eq!(client.sent().len(), 2);
        let complete = client.sent()[1].data().unwrap().clone();
        assert_eq!(&complete[..4], &ethers::utils::id(calls::SUBMIT_COMPLETE)[..]);
    }
}
