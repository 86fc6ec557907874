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

use artemis_relayer_context::EthereumClient;
use artemis_relayer_store::{Cursor, Delivery, HistoryStore, HistoryStoreKey};
use artemis_relayer_types::message::{EthereumHeader, Header};
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::{probe, Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const KEY: HistoryStoreKey = HistoryStoreKey::EthereumHeaders;

/// Where the header relay starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPoint {
    /// Right after the header the parachain light client finalized last.
    /// Overrides the saved cursor, also when that one is further ahead.
    After(u64),
    /// At the saved cursor, or at this block when nothing was saved.
    Block(u64),
}

/// Relays Ethereum headers once they have `descendants_until_final`
/// descendants.
///
/// Each header carries a checkpoint: the cursor moves past a header once the
/// parachain writer committed it.
pub struct HeaderListener<C, S> {
    client: Arc<C>,
    cursor: Cursor<S>,
    descendants_until_final: u64,
    poll: RetryPolicy,
    policy: RetryPolicy,
}

impl<C, S> HeaderListener<C, S>
where
    C: EthereumClient,
    S: HistoryStore + 'static,
{
    /// `poll` paces the head polling, `policy` the retries of failed reads.
    pub fn new(
        client: Arc<C>,
        store: S,
        descendants_until_final: u64,
        poll: RetryPolicy,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            cursor: Cursor::new(store, KEY),
            descendants_until_final,
            poll,
            policy,
        }
    }

    async fn header(
        &self,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<Header> {
        let header = self
            .policy
            .retry(cancel, "block", || async {
                let block = self.client.block(number).await?;
                block
                    .as_ref()
                    .and_then(EthereumHeader::from_block)
                    .ok_or_else(|| Error::NotFound(format!("ethereum block #{number}")))
            })
            .await?;
        Ok(header.into_header())
    }

    /// The first header to relay from `start`.
    pub fn first_block(&self, start: StartPoint) -> Result<u64> {
        match start {
            StartPoint::After(finalized) => {
                let next = finalized + 1;
                self.cursor.reset(next)?;
                Ok(next)
            }
            StartPoint::Block(block) => self.cursor.get(block),
        }
    }

    /// Relays headers from `start` on until `cancel` fires.
    #[tracing::instrument(skip_all, name = "header_listener")]
    pub async fn run(
        self,
        start: StartPoint,
        headers: mpsc::Sender<Delivery<Header>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self.follow(start, &headers, &cancel).await {
            Err(Error::Cancelled) => {
                tracing::info!("Shutting down header listener");
                Ok(())
            }
            other => other,
        }
    }

    async fn follow(
        &self,
        start: StartPoint,
        headers: &mpsc::Sender<Delivery<Header>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut next = self.first_block(start)?;
        tracing::info!(block_number = next, "Relaying Ethereum headers");
        loop {
            let head = self
                .policy
                .retry(cancel, "block number", || self.client.block_number())
                .await?;
            let last_final = head.saturating_sub(self.descendants_until_final);
            while next <= last_final {
                let header = self.header(next, cancel).await?;
                next += 1;
                let delivery = Delivery::new(header, self.cursor.checkpoint(next));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    sent = headers.send(delivery) => {
                        sent.map_err(|_| Error::ChannelClosed("ethereum headers"))?;
                    }
                }
            }
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::TRACE,
                kind = %probe::Kind::Sync,
                chain = "ethereum",
                head,
                next_header = next,
            );
            self.poll.sleep(cancel).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use artemis_relayer_context::mock::MockEthereumClient;
    use artemis_relayer_store::InMemoryStore;
    use codec::Decode;

    use super::*;

    fn listener(
        client: &Arc<MockEthereumClient>,
        store: &InMemoryStore,
    ) -> HeaderListener<MockEthereumClient, InMemoryStore> {
        let policy = RetryPolicy::new(Duration::from_millis(5), Some(3));
        HeaderListener::new(client.clone(), store.clone(), 3, policy, policy)
    }

    #[tokio::test]
    async fn headers_follow_the_head_at_depth() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(10);
        let store = InMemoryStore::default();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store).run(StartPoint::Block(5), tx, cancel.clone()),
        );

        let mut numbers = Vec::new();
        for _ in 0..3 {
            let (header, checkpoint) = rx.recv().await.unwrap().into_parts();
            let decoded =
                EthereumHeader::decode(&mut header.header_data.as_slice())
                    .unwrap();
            assert_eq!(decoded.number, header.number);
            numbers.push(header.number);
            checkpoint.commit().unwrap();
        }
        assert_eq!(numbers, vec![5, 6, 7]);

        client.set_block_number(12);
        for expected in [8, 9] {
            let (header, checkpoint) = rx.recv().await.unwrap().into_parts();
            assert_eq!(header.number, expected);
            checkpoint.commit().unwrap();
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 10);
    }

    #[tokio::test]
    async fn saved_cursor_wins_over_the_start_block() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(20);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 15).unwrap();
        let listener = listener(&client, &store);
        assert_eq!(listener.first_block(StartPoint::Block(4)).unwrap(), 15);
        assert_eq!(listener.first_block(StartPoint::Block(17)).unwrap(), 15);
    }

    #[tokio::test]
    async fn finalized_header_rewinds_the_cursor() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(20);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 15).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store).run(StartPoint::After(9), tx, cancel.clone()),
        );
        assert_eq!(rx.recv().await.unwrap().item().number, 10);
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 10);
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unconfirmed_headers_are_read_again_after_restart() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(8);
        let store = InMemoryStore::default();
        store.set_last_block_number(KEY, 3).unwrap();

        // the writer goes away without handling what it received
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store).run(StartPoint::Block(1), tx, cancel.clone()),
        );
        assert_eq!(rx.recv().await.unwrap().item().number, 3);
        assert_eq!(rx.recv().await.unwrap().item().number, 4);
        drop(rx);
        cancel.cancel();
        handle.await.unwrap().ok();
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 3);

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store).run(StartPoint::Block(1), tx, cancel.clone()),
        );
        let (header, checkpoint) = rx.recv().await.unwrap().into_parts();
        assert_eq!(header.number, 3);
        checkpoint.commit().unwrap();
        assert_eq!(store.get_last_block_number(KEY, 0).unwrap(), 4);
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
