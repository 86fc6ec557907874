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


//! # Parachain Commitment Listener
//!
//! Follows the finalized blocks of the parachain one by one. A block whose
//! header digest carries an [`AuxiliaryDigestItem`] has its commitment read
//! back from off-chain storage and sent, as one batch per block, to the
//! Ethereum writer.
//!
//! The next block to scan is kept in the [`HistoryStore`] under
//! [`HistoryStoreKey::ParachainCommitments`]. It moves past a block once the
//! writer committed the batch of that block, so a restart reads again what
//! the writer never finished.
#![warn(missing_docs)]

use std::sync::Arc;

use artemis_relayer_context::ParachainClient;
use artemis_relayer_store::{Cursor, Delivery, HistoryStore, HistoryStoreKey};
use artemis_relayer_types::message::{
    AuxiliaryDigestItem, CommitmentMessage, Message, SubstrateCommitment,
};
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::{probe, Error, Result};
use codec::Decode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const KEY: HistoryStoreKey = HistoryStoreKey::ParachainCommitments;

/// Emits the commitments of finalized parachain blocks.
pub struct CommitmentListener<C, S> {
    client: Arc<C>,
    cursor: Cursor<S>,
    policy: RetryPolicy,
}

impl<C, S> CommitmentListener<C, S>
where
    C: ParachainClient,
    S: HistoryStore + 'static,
{
    /// Creates a listener reading through `client`, keeping its cursor in
    /// `store` and waiting `policy`'s interval between two attempts.
    pub fn new(client: Arc<C>, store: S, policy: RetryPolicy) -> Self {
        Self {
            client,
            cursor: Cursor::new(store, KEY),
            policy,
        }
    }

    /// The block the listener scans next.
    ///
    /// Starts at the finalized head on first run.
    pub async fn cursor(&self, cancel: &CancellationToken) -> Result<u64> {
        let finalized = self.finalized_head(cancel).await?;
        self.cursor.get(finalized)
    }

    async fn finalized_head(&self, cancel: &CancellationToken) -> Result<u64> {
        self.policy
            .retry(cancel, "finalized head", || {
                self.client.finalized_block_number()
            })
            .await
    }

    /// Waits until `number` is finalized.
    async fn wait_for_finality(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let finalized = self.finalized_head(cancel).await?;
            if number <= finalized {
                return Ok(());
            }
            let e = Error::NotFinalized {
                block: number,
                finalized,
            };
            tracing::trace!(error = %e, "Waiting for finality");
            self.policy.sleep(cancel).await?;
        }
    }

    /// Reads the commitments of block `number`.
    ///
    /// A digest item or a commitment that does not decode is logged and
    /// left out of the batch.
    pub async fn commitments(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>> {
        let items = self
            .policy
            .retry(cancel, "block digest", || {
                self.client.auxiliary_digest_items(number)
            })
            .await?;
        let mut batch = Vec::new();
        for raw in items {
            let item = match AuxiliaryDigestItem::decode(&mut raw.as_slice()) {
                Ok(item) => item,
                Err(e) => {
                    tracing::error!(
                        block_number = number,
                        error = %e,
                        "Dropping undecodable digest item",
                    );
                    continue;
                }
            };
            let channel_id = item.channel_id();
            let commitment_hash = item.commitment_hash();
            tracing::debug!(
                block_number = number,
                %channel_id,
                ?commitment_hash,
                "Found commitment hash in header digest",
            );
            let key = item.offchain_key();
            let data = self
                .policy
                .retry(cancel, "offchain storage", || async {
                    self.client.offchain_storage(&key).await?.ok_or_else(|| {
                        Error::OffchainStorageMiss(hex::encode(&key))
                    })
                })
                .await?;
            tracing::debug!(
                block_number = number,
                size = data.len(),
                "Retrieved commitment from offchain storage",
            );
            let messages =
                match Vec::<CommitmentMessage>::decode(&mut data.as_slice()) {
                    Ok(messages) => messages,
                    Err(e) => {
                        tracing::error!(
                            block_number = number,
                            ?commitment_hash,
                            error = %e,
                            "Dropping undecodable commitment",
                        );
                        tracing::event!(
                            target: probe::TARGET,
                            tracing::Level::DEBUG,
                            kind = %probe::Kind::Listener,
                            chain = "parachain",
                            block_number = number,
                            dropped = true,
                        );
                        continue;
                    }
                };
            batch.push(Message::Commitment(SubstrateCommitment {
                channel_id,
                commitment_hash,
                block_number: number,
                messages,
            }));
        }
        Ok(batch)
    }

    /// Scans blocks until `cancel` fires or the writer goes away.
    ///
    /// Dropping `messages` on return closes the channel.
    #[tracing::instrument(skip_all, name = "parachain_listener")]
    pub async fn run(
        self,
        messages: mpsc::Sender<Delivery<Vec<Message>>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self.poll(&messages, &cancel).await {
            Err(Error::Cancelled) => {
                tracing::info!("Shutting down parachain listener");
                Ok(())
            }
            other => other,
        }
    }

    async fn poll(
        &self,
        messages: &mpsc::Sender<Delivery<Vec<Message>>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut current = self.cursor(cancel).await?;
        tracing::info!(block_number = current, "Polling parachain blocks");
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.wait_for_finality(current, cancel).await?;
            let batch = self.commitments(current, cancel).await?;
            if batch.is_empty() {
                // nothing the writer has to confirm
                self.cursor.advance(current + 1)?;
            } else {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Listener,
                    chain = "parachain",
                    block_number = current,
                    commitments = batch.len(),
                );
                let delivery =
                    Delivery::new(batch, self.cursor.checkpoint(current + 1));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    sent = messages.send(delivery) => {
                        sent.map_err(|_| Error::ChannelClosed("parachain messages"))?;
                    }
                }
            }
            current += 1;
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::TRACE,
                kind = %probe::Kind::Sync,
                chain = "parachain",
                next_block = current,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use artemis_relayer_context::mock::MockParachainClient;
    use artemis_relayer_store::InMemoryStore;
    use artemis_relayer_types::message::ChannelId;
    use codec::Encode;

    use super::*;

    fn listener(
        client: &MockParachainClient,
        store: &InMemoryStore,
    ) -> CommitmentListener<MockParachainClient, InMemoryStore> {
        CommitmentListener::new(
            Arc::new(client.clone()),
            store.clone(),
            RetryPolicy::new(Duration::from_millis(5), None),
        )
    }

    fn commit(client: &MockParachainClient, block: u64, nonce: u64) -> [u8; 32] {
        let hash = [block as u8; 32];
        let item = AuxiliaryDigestItem::Commitment(ChannelId::BASIC, hash);
        let messages = vec![CommitmentMessage {
            target: [0x33; 20],
            nonce,
            payload: vec![nonce as u8],
        }];
        let mut state = client.state.lock();
        state.digests.insert(block, vec![item.encode()]);
        state.offchain.insert(item.offchain_key(), messages.encode());
        hash
    }

    async fn next_cursor(store: &InMemoryStore, at_least: u64) -> u64 {
        loop {
            let cursor = store.get_last_block_number(KEY, 0).unwrap();
            if cursor >= at_least {
                return cursor;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn one_batch_per_block_in_order() {
        let client = MockParachainClient::default();
        client.finalize(5);
        commit(&client, 3, 1);
        commit(&client, 5, 2);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 3).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle =
            tokio::spawn(listener(&client, &store).run(tx, cancel.clone()));

        let (first, checkpoint) = rx.recv().await.unwrap().into_parts();
        checkpoint.commit().unwrap();
        let (second, checkpoint) = rx.recv().await.unwrap().into_parts();
        checkpoint.commit().unwrap();
        assert_eq!(next_cursor(&store, 6).await, 6);
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());

        let blocks = [first, second]
            .iter()
            .map(|batch| {
                assert_eq!(batch.len(), 1);
                match &batch[0] {
                    Message::Commitment(c) => (c.block_number, c.messages[0].nonce),
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect::<Vec<_>>();
        assert_eq!(blocks, vec![(3, 1), (5, 2)]);
    }

    #[tokio::test]
    async fn cursor_waits_for_finality() {
        let client = MockParachainClient::default();
        client.finalize(48);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 50).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle =
            tokio::spawn(listener(&client, &store).run(tx, cancel.clone()));

        while client.state.lock().finalized_queries < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 50);

        commit(&client, 50, 7);
        client.finalize(50);
        let (batch, checkpoint) = rx.recv().await.unwrap().into_parts();
        assert!(matches!(&batch[0], Message::Commitment(c) if c.block_number == 50));
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 50);
        checkpoint.commit().unwrap();
        assert_eq!(next_cursor(&store, 51).await, 51);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn undecodable_commitment_is_dropped() {
        let client = MockParachainClient::default();
        client.finalize(2);
        let item = AuxiliaryDigestItem::Commitment(ChannelId::BASIC, [1; 32]);
        {
            let mut state = client.state.lock();
            state.digests.insert(2, vec![item.encode()]);
            state.offchain.insert(item.offchain_key(), vec![0xff]);
        }
        let store = InMemoryStore::default();
        let listener = listener(&client, &store);
        let batch = listener
            .commitments(2, &CancellationToken::new())
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(logs_contain("Dropping undecodable commitment"));
    }

    #[tokio::test]
    async fn starts_at_the_finalized_head() {
        let client = MockParachainClient::default();
        client.finalize(12);
        let store = InMemoryStore::default();
        let cursor = listener(&client, &store)
            .cursor(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(cursor, 12);
    }

    #[tokio::test]
    async fn missing_commitment_is_retried() {
        let client = MockParachainClient::default();
        client.finalize(1);
        let item = AuxiliaryDigestItem::Commitment(ChannelId::BASIC, [4; 32]);
        client.state.lock().digests.insert(1, vec![item.encode()]);
        let store = InMemoryStore::default();
        let listener = listener(&client, &store);
        let cancel = CancellationToken::new();

        let delayed = client.clone();
        let key = item.offchain_key();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            delayed
                .state
                .lock()
                .offchain
                .insert(key, Vec::<CommitmentMessage>::new().encode());
        });
        let batch = listener.commitments(1, &cancel).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    fn blocks(batch: &[Message]) -> Vec<u64> {
        batch
            .iter()
            .map(|message| match message {
                Message::Commitment(c) => c.block_number,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn unconfirmed_batches_are_read_again_after_restart() {
        let client = MockParachainClient::default();
        client.finalize(3);
        commit(&client, 2, 1);
        commit(&client, 3, 2);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 1).unwrap();

        // the writer goes away without handling what it received
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle =
            tokio::spawn(listener(&client, &store).run(tx, cancel.clone()));
        assert_eq!(blocks(rx.recv().await.unwrap().item()), vec![2]);
        assert_eq!(blocks(rx.recv().await.unwrap().item()), vec![3]);
        drop(rx);
        cancel.cancel();
        handle.await.unwrap().unwrap();
        // block 1 had nothing to deliver
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 2);

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle =
            tokio::spawn(listener(&client, &store).run(tx, cancel.clone()));
        let (batch, checkpoint) = rx.recv().await.unwrap().into_parts();
        assert_eq!(blocks(&batch), vec![2]);
        checkpoint.commit().unwrap();
        let (batch, checkpoint) = rx.recv().await.unwrap().into_parts();
        assert_eq!(blocks(&batch), vec![3]);
        checkpoint.commit().unwrap();
        assert_eq!(next_cursor(&store, 4).await, 4);
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn empty_blocks_wait_for_pending_batches() {
        let client = MockParachainClient::default();
        client.finalize(4);
        commit(&client, 2, 1);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 2).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle =
            tokio::spawn(listener(&client, &store).run(tx, cancel.clone()));
        let delivery = rx.recv().await.unwrap();
        // blocks 3 and 4 are scanned while block 2 is still with the writer
        let seen = client.state.lock().finalized_queries;
        while client.state.lock().finalized_queries < seen + 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 2);

        let (_, checkpoint) = delivery.into_parts();
        checkpoint.commit().unwrap();
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 3);
        // the next empty block finds nothing pending anymore
        client.finalize(5);
        assert_eq!(next_cursor(&store, 6).await, 6);
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
