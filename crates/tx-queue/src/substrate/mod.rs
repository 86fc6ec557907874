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


use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use artemis_relayer_context::substrate::{ExtrinsicProgress, ExtrinsicStatus};
use artemis_relayer_utils::{probe, Error, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Submits parachain extrinsics and follows them until they are finalized.
///
/// At most one extrinsic per nonce is in flight, and at most
/// `max_watched` extrinsics are followed at once: a submission waits for a
/// free slot before it is dispatched.
#[derive(Clone, Debug)]
pub struct ExtrinsicPool {
    in_flight: Arc<Mutex<HashSet<u64>>>,
    slots: Arc<Semaphore>,
    watchers: TaskTracker,
    cancel: CancellationToken,
}

/// Removes its nonce from the in-flight set when dropped.
struct InFlight {
    nonce: u64,
    set: Arc<Mutex<HashSet<u64>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.nonce);
    }
}

impl ExtrinsicPool {
    /// Creates a pool following at most `max_watched` extrinsics, stopped by
    /// `cancel`.
    pub fn new(max_watched: usize, cancel: CancellationToken) -> Self {
        Self {
            in_flight: Default::default(),
            slots: Arc::new(Semaphore::new(max_watched.max(1))),
            watchers: TaskTracker::new(),
            cancel,
        }
    }

    /// Number of extrinsics currently followed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Dispatches one extrinsic with `nonce`.
    ///
    /// Returns once `submit` resolved: `Ok` means the node accepted the
    /// extrinsic and its progress is now followed in the background.
    pub async fn submit<F, Fut>(&self, nonce: u64, submit: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExtrinsicProgress>>,
    {
        if !self.in_flight.lock().insert(nonce) {
            return Err(Error::DuplicateNonce(nonce));
        }
        let guard = InFlight {
            nonce,
            set: self.in_flight.clone(),
        };
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.slots.clone().acquire_owned() => {
                permit.map_err(|_| Error::ChannelClosed("extrinsic pool"))?
            }
        };
        let progress = submit().await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            ty = "SUBSTRATE",
            nonce,
            submitted = true,
        );
        self.watchers.spawn(watch(
            progress,
            guard,
            permit,
            self.cancel.clone(),
        ));
        Ok(())
    }

    /// Waits until every followed extrinsic reached a terminal status or the
    /// pool was cancelled.
    pub async fn close(&self) {
        self.watchers.close();
        self.watchers.wait().await;
    }
}

async fn watch(
    mut progress: ExtrinsicProgress,
    guard: InFlight,
    _permit: OwnedSemaphorePermit,
    cancel: CancellationToken,
) {
    let nonce = guard.nonce;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = progress.next() => next,
        };
        let status = match next {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::WARN,
                    kind = %probe::Kind::TxQueue,
                    ty = "SUBSTRATE",
                    nonce,
                    errored = true,
                    error = %e,
                );
                break;
            }
            None => {
                tracing::debug!(nonce, "Extrinsic status stream ended");
                break;
            }
        };
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            ty = "SUBSTRATE",
            nonce,
            status = status.name(),
        );
        match &status {
            ExtrinsicStatus::InFinalizedBlock { block_hash } => {
                tracing::info!(nonce, ?block_hash, "Extrinsic finalized");
            }
            ExtrinsicStatus::InBestBlock { block_hash } => {
                tracing::debug!(nonce, ?block_hash, "Extrinsic in best block");
            }
            ExtrinsicStatus::Error { message }
            | ExtrinsicStatus::Invalid { message }
            | ExtrinsicStatus::Dropped { message } => {
                tracing::warn!(
                    nonce,
                    status = status.name(),
                    %message,
                    "Extrinsic did not make it into a block",
                );
            }
            _ => {}
        }
        if status.is_terminal() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::H256;
    use futures::stream;

    use super::*;

    fn finalized() -> ExtrinsicProgress {
        stream::iter(vec![
            Ok(ExtrinsicStatus::Validated),
            Ok(ExtrinsicStatus::Broadcasted { num_peers: 2 }),
            Ok(ExtrinsicStatus::InBestBlock {
                block_hash: H256::repeat_byte(1),
            }),
            Ok(ExtrinsicStatus::InFinalizedBlock {
                block_hash: H256::repeat_byte(1),
            }),
        ])
        .boxed()
    }

    #[tokio::test]
    async fn same_nonce_is_rejected_while_in_flight() {
        let pool = ExtrinsicPool::new(4, CancellationToken::new());
        // a status stream that never ends keeps the nonce in flight
        pool.submit(1, || async { Ok(stream::pending().boxed()) })
            .await
            .unwrap();
        let again = pool
            .submit(1, || async { Ok(stream::pending().boxed()) })
            .await;
        assert!(matches!(again, Err(Error::DuplicateNonce(1))));
        assert_eq!(pool.in_flight(), 1);
    }

    #[tokio::test]
    async fn finalized_extrinsics_release_their_nonce() {
        let pool = ExtrinsicPool::new(1, CancellationToken::new());
        pool.submit(5, || async { Ok(finalized()) }).await.unwrap();
        pool.close().await;
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn failed_dispatch_does_not_hold_the_nonce() {
        let pool = ExtrinsicPool::new(1, CancellationToken::new());
        let res = pool
            .submit(9, || async {
                Err::<ExtrinsicProgress, _>(Error::Transient(
                    "connection reset".into(),
                ))
            })
            .await;
        assert!(res.is_err());
        assert_eq!(pool.in_flight(), 0);
        pool.submit(9, || async { Ok(finalized()) }).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_the_watchers() {
        let cancel = CancellationToken::new();
        let pool = ExtrinsicPool::new(1, cancel.clone());
        pool.submit(1, || async { Ok(stream::pending().boxed()) })
            .await
            .unwrap();
        // the only slot is taken, the next submission waits for it
        let waiting = pool.submit(2, || async { Ok(finalized()) });
        cancel.cancel();
        assert!(matches!(waiting.await, Err(Error::Cancelled)));
        pool.close().await;
        assert_eq!(pool.in_flight(), 0);
    }
}
