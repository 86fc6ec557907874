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


//! Listener cursors that only move once the consumer confirmed the work.
//!
//! A listener hands every batch to its writer as a [`Delivery`] carrying a
//! [`Checkpoint`]. The writer commits the checkpoint after it processed the
//! batch; a delivery dropped unprocessed leaves the cursor where it was, so
//! the next run reads the batch again.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use artemis_relayer_utils::Result;

use crate::{HistoryStore, HistoryStoreKey};

/// The cursor of one listener.
#[derive(Clone)]
pub struct Cursor<S> {
    store: S,
    key: HistoryStoreKey,
    pending: Arc<AtomicUsize>,
}

impl<S: Debug> Debug for Cursor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("key", &self.key)
            .field("pending", &self.pending.load(Ordering::Acquire))
            .finish()
    }
}

impl<S> Cursor<S>
where
    S: HistoryStore + 'static,
{
    /// The cursor stored under `key`.
    pub fn new(store: S, key: impl Into<HistoryStoreKey>) -> Self {
        Self {
            store,
            key: key.into(),
            pending: Default::default(),
        }
    }

    /// The stored position, `default` when nothing was stored yet.
    pub fn get(&self, default: u64) -> Result<u64> {
        self.store.get_last_block_number(self.key, default)
    }

    /// Stores `next` right away, also when it is behind the stored position.
    pub fn reset(&self, next: u64) -> Result<()> {
        self.store.set_last_block_number(self.key, next)?;
        Ok(())
    }

    /// Number of checkpoints handed out and not committed yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// A checkpoint moving the cursor to `next` once committed.
    ///
    /// Checkpoints of one cursor must be committed in the order they were
    /// handed out.
    pub fn checkpoint(&self, next: u64) -> Checkpoint {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let store = self.store.clone();
        let key = self.key;
        let pending = self.pending.clone();
        Checkpoint {
            commit: Some(Box::new(move || {
                store.set_last_block_number(key, next)?;
                pending.fetch_sub(1, Ordering::AcqRel);
                Ok(())
            })),
        }
    }

    /// Moves the cursor to `next` when no checkpoint is outstanding.
    ///
    /// Used for blocks that produced nothing to deliver. Returns whether the
    /// cursor moved.
    pub fn advance(&self, next: u64) -> Result<bool> {
        if self.pending() > 0 {
            return Ok(false);
        }
        self.reset(next)?;
        Ok(true)
    }
}

type Commit = Box<dyn FnOnce() -> Result<()> + Send>;

/// A cursor move the consumer of a [`Delivery`] confirms.
///
/// Dropping it without [`Checkpoint::commit`] keeps the cursor, and every
/// later [`Cursor::advance`], where it is.
#[must_use = "the cursor only moves when the checkpoint is committed"]
pub struct Checkpoint {
    commit: Option<Commit>,
}

impl Checkpoint {
    /// A checkpoint that moves nothing.
    pub fn none() -> Self {
        Self { commit: None }
    }

    /// Stores the position of this checkpoint.
    pub fn commit(mut self) -> Result<()> {
        match self.commit.take() {
            Some(commit) => commit(),
            None => Ok(()),
        }
    }
}

impl Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("armed", &self.commit.is_some())
            .finish()
    }
}

/// An item on its way from a listener to a writer.
#[derive(Debug)]
pub struct Delivery<T> {
    item: T,
    checkpoint: Checkpoint,
}

impl<T> Delivery<T> {
    /// `item`, moving its listener's cursor once the writer is done with it.
    pub fn new(item: T, checkpoint: Checkpoint) -> Self {
        Self { item, checkpoint }
    }

    /// `item` without a cursor behind it.
    pub fn detached(item: T) -> Self {
        Self::new(item, Checkpoint::none())
    }

    /// The delivered item.
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Splits the delivery; commit the checkpoint after handling the item.
    pub fn into_parts(self) -> (T, Checkpoint) {
        (self.item, self.checkpoint)
    }
}
