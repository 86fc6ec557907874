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

use artemis_relayer_config::evm::AppConfig;
use artemis_relayer_context::EthereumClient;
use artemis_relayer_store::{Checkpoint, Cursor, Delivery, HistoryStore};
use artemis_relayer_types::message::{EthereumMessage, Message};
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::{probe, Error, Result};
use ethers::types::{Filter, Log};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Relays the events of the configured applications.
///
/// Each application is followed on its own subscription. Its cursor in the
/// [`HistoryStore`] is the block the next catch-up starts from, so events
/// emitted while the relayer was down are read back on start. The cursor
/// only moves past an event once the writer committed it: events may be
/// relayed twice around a restart, never skipped.
pub struct AppListener<C, S> {
    client: Arc<C>,
    store: S,
    apps: Vec<AppConfig>,
    policy: RetryPolicy,
}

impl<C, S> AppListener<C, S>
where
    C: EthereumClient,
    S: HistoryStore + 'static,
{
    /// Creates a listener for `apps`.
    pub fn new(
        client: Arc<C>,
        store: S,
        apps: Vec<AppConfig>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            store,
            apps,
            policy,
        }
    }

    /// Signs the encoded log and wraps it into a message.
    ///
    /// Returns `None` for logs of pending blocks.
    pub fn message(&self, log: &Log) -> Result<Option<EthereumMessage>> {
        let Some(block_number) = log.block_number else {
            return Ok(None);
        };
        let mut message = EthereumMessage {
            app_id: log.address,
            block_number: block_number.as_u64(),
            data: EthereumMessage::encode_log(log),
            signature: Vec::new(),
        };
        message.signature = self.client.sign_hash(message.digest())?.to_vec();
        Ok(Some(message))
    }

    /// Follows every application until `cancel` fires.
    ///
    /// An application whose events cannot be followed is logged and left
    /// out; the others keep going.
    #[tracing::instrument(skip_all, name = "app_listener")]
    pub async fn run(
        self,
        messages: mpsc::Sender<Delivery<Vec<Message>>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let tasks = self
            .apps
            .iter()
            .map(|app| self.follow(app, &messages, &cancel));
        let results = futures::future::join_all(tasks).await;
        tracing::info!("Shutting down application listener");
        results.into_iter().collect::<Result<()>>()
    }

    async fn follow(
        &self,
        app: &AppConfig,
        messages: &mpsc::Sender<Delivery<Vec<Message>>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.subscribe_and_relay(app, messages, cancel).await {
            Ok(()) | Err(Error::Cancelled) => Ok(()),
            Err(e @ Error::ChannelClosed(_)) => Err(e),
            Err(e) => {
                tracing::error!(
                    app = %app.name,
                    address = ?app.address,
                    error = %e,
                    "Failed to follow application events, skipping it",
                );
                Ok(())
            }
        }
    }

    async fn subscribe_and_relay(
        &self,
        app: &AppConfig,
        messages: &mpsc::Sender<Delivery<Vec<Message>>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let cursor = Cursor::new(self.store.clone(), app.address);
        let mut filter = Filter::new().address(app.address);
        if let Some(event) = &app.event {
            filter = filter.event(event);
        }
        loop {
            let mut logs = self
                .policy
                .retry(cancel, "subscribe logs", || {
                    self.client.subscribe_logs(&filter)
                })
                .await?;
            tracing::info!(app = %app.name, "Listening for application events");

            // read back what happened before the subscription
            let head = self
                .policy
                .retry(cancel, "block number", || self.client.block_number())
                .await?;
            let next = cursor.get(head + 1)?;
            if next <= head {
                let range = filter.clone().from_block(next).to_block(head);
                let missed = self
                    .policy
                    .retry(cancel, "logs", || self.client.logs(&range))
                    .await?;
                tracing::debug!(
                    app = %app.name,
                    from = next,
                    to = head,
                    count = missed.len(),
                    "Catching up on application events",
                );
                let missed = missed
                    .iter()
                    .filter(|log| log.removed != Some(true))
                    .filter_map(|log| self.message(log).transpose())
                    .collect::<Result<Vec<_>>>()?;
                let last = missed.len();
                for (i, message) in missed.into_iter().enumerate() {
                    // the last one also covers the empty blocks up to head
                    let next = if i + 1 == last {
                        head + 1
                    } else {
                        message.block_number
                    };
                    self.relay(message, cursor.checkpoint(next), messages, cancel)
                        .await?;
                }
            }
            cursor.advance(head + 1)?;

            loop {
                let log = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    log = logs.next() => log,
                };
                let Some(log) = log else { break };
                if log.removed == Some(true) {
                    continue;
                }
                let Some(message) = self.message(&log)? else { continue };
                if message.block_number <= head {
                    continue;
                }
                // more events of the same block may follow
                let checkpoint = cursor.checkpoint(message.block_number);
                self.relay(message, checkpoint, messages, cancel).await?;
            }
            tracing::warn!(app = %app.name, "Log subscription ended, subscribing again");
            self.policy.sleep(cancel).await?;
        }
    }

    async fn relay(
        &self,
        message: EthereumMessage,
        checkpoint: Checkpoint,
        messages: &mpsc::Sender<Delivery<Vec<Message>>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Listener,
            chain = "ethereum",
            app = ?message.app_id,
            block_number = message.block_number,
        );
        let delivery = Delivery::new(vec![Message::Ethereum(message)], checkpoint);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sent = messages.send(delivery) => {
                sent.map_err(|_| Error::ChannelClosed("ethereum messages"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use artemis_relayer_context::mock::MockEthereumClient;
    use artemis_relayer_store::{HistoryStoreKey, InMemoryStore};
    use ethers::types::{Address, Bytes, H256, U64};

    use super::*;
    use crate::test_utils::ethereum_config;

    fn apps(addresses: &[Address]) -> Vec<AppConfig> {
        let apps = addresses
            .iter()
            .enumerate()
            .map(|(i, a)| {
                serde_json::json!({
                    "name": format!("app-{i}"),
                    "address": a,
                    "pallet": "ETH",
                    "call": "mint",
                })
            })
            .collect::<Vec<_>>();
        ethereum_config(serde_json::json!({ "apps": apps })).apps
    }

    fn log(address: Address, block: u64) -> Log {
        Log {
            address,
            topics: vec![H256::repeat_byte(0x01), H256::repeat_byte(0x02)],
            data: Bytes::from(vec![0xca, 0xfe]),
            block_number: Some(U64::from(block)),
            ..Default::default()
        }
    }

    fn listener(
        client: &Arc<MockEthereumClient>,
        store: &InMemoryStore,
        addresses: &[Address],
    ) -> AppListener<MockEthereumClient, InMemoryStore> {
        AppListener::new(
            client.clone(),
            store.clone(),
            apps(addresses),
            RetryPolicy::new(Duration::from_millis(5), Some(2)),
        )
    }

    async fn subscribed(client: &MockEthereumClient, count: usize) {
        while client.subscriptions() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn log_becomes_a_signed_message() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(99);
        let store = InMemoryStore::default();
        let app = Address::repeat_byte(0xaa);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store, &[app]).run(tx, cancel.clone()),
        );
        subscribed(&client, 1).await;

        let log = log(app, 100);
        client.push_log(log.clone());
        let (batch, checkpoint) = rx.recv().await.unwrap().into_parts();
        checkpoint.commit().unwrap();
        let Message::Ethereum(message) = &batch[0] else {
            panic!("expected an ethereum message")
        };
        assert_eq!(message.app_id, app);
        assert_eq!(message.block_number, 100);
        assert_eq!(message.data, EthereumMessage::encode_log(&log));
        assert_eq!(message.recover_signer().unwrap(), client.address());

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(
            store
                .get_last_block_number(HistoryStoreKey::from(app), 0)
                .unwrap(),
            100
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failing_application_is_skipped() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(10);
        let broken = Address::repeat_byte(0x0b);
        let working = Address::repeat_byte(0x0a);
        client.state.lock().refused_subscriptions.push(broken);
        let store = InMemoryStore::default();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store, &[broken, working])
                .run(tx, cancel.clone()),
        );
        subscribed(&client, 1).await;

        client.push_log(log(working, 11));
        let delivery = rx.recv().await.unwrap();
        assert!(matches!(&delivery.item()[0], Message::Ethereum(m) if m.app_id == working));

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(logs_contain("Failed to follow application events"));
    }

    #[tokio::test]
    async fn missed_events_are_read_back() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(60);
        let app = Address::repeat_byte(0xaa);
        client.state.lock().logs = vec![log(app, 40), log(app, 55)];
        let store = InMemoryStore::default();
        store
            .set_last_block_number(HistoryStoreKey::from(app), 50)
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store, &[app]).run(tx, cancel.clone()),
        );

        let (batch, checkpoint) = rx.recv().await.unwrap().into_parts();
        assert!(matches!(&batch[0], Message::Ethereum(m) if m.block_number == 55));
        checkpoint.commit().unwrap();
        // the catch-up covered everything up to the head
        assert_eq!(
            store
                .get_last_block_number(HistoryStoreKey::from(app), 0)
                .unwrap(),
            61
        );
        subscribed(&client, 1).await;
        // a log of an already scanned block arriving late is not relayed twice
        client.push_log(log(app, 58));
        client.push_log(log(app, 61));
        let delivery = rx.recv().await.unwrap();
        assert!(matches!(&delivery.item()[0], Message::Ethereum(m) if m.block_number == 61));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    fn block_numbers(delivery: &Delivery<Vec<Message>>) -> Vec<u64> {
        delivery
            .item()
            .iter()
            .map(|message| match message {
                Message::Ethereum(m) => m.block_number,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn unconfirmed_events_are_read_again_after_restart() {
        let client = Arc::new(MockEthereumClient::default());
        client.set_block_number(60);
        let app = Address::repeat_byte(0xaa);
        let key = HistoryStoreKey::from(app);
        client.state.lock().logs = vec![log(app, 55), log(app, 57)];
        let store = InMemoryStore::default();
        store.set_last_block_number(key, 50).unwrap();

        // the writer goes away without handling what it received
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store, &[app]).run(tx, cancel.clone()),
        );
        assert_eq!(block_numbers(&rx.recv().await.unwrap()), vec![55]);
        assert_eq!(block_numbers(&rx.recv().await.unwrap()), vec![57]);
        drop(rx);
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.get_last_block_number(key, 0).unwrap(), 50);

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            listener(&client, &store, &[app]).run(tx, cancel.clone()),
        );
        let first = rx.recv().await.unwrap();
        assert_eq!(block_numbers(&first), vec![55]);
        let (_, checkpoint) = first.into_parts();
        checkpoint.commit().unwrap();
        assert_eq!(store.get_last_block_number(key, 0).unwrap(), 55);
        let second = rx.recv().await.unwrap();
        assert_eq!(block_numbers(&second), vec![57]);
        let (_, checkpoint) = second.into_parts();
        checkpoint.commit().unwrap();
        assert_eq!(store.get_last_block_number(key, 0).unwrap(), 61);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
