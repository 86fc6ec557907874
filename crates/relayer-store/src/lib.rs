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


//! # Relayer Store Module 🕸️
//!
//! A module for managing the storage of the relayer.
//!
//! ## Overview
//!
//! The relayer store keeps the block cursors of the listeners and the BEEFY
//! relay records. Relay records are only mutated through [`DatabaseCmd`]s
//! applied by a single [`commands::process_commands`] task; everything else
//! reads them through [`CommitmentStore`]. Listener cursors move through
//! [`Cursor`] checkpoints committed by the writers.

use std::fmt::{Debug, Display};

use artemis_relayer_types::beefy::{
    BeefyRelayInfo, RelayInfoChanges, RelayStatus,
};
use artemis_relayer_utils::Result;
use ethers::types::{H160, H256};

/// The command channel that serializes relay record mutations.
pub mod commands;
/// Listener cursors confirmed by the writers.
pub mod cursor;
/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

pub use commands::{DatabaseCmd, DatabaseCmdSender};
pub use cursor::{Checkpoint, Cursor, Delivery};
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;
/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;

/// HistoryStoreKey names the cursor of one listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HistoryStoreKey {
    /// Next parachain block scanned for commitments.
    ParachainCommitments,
    /// Next Ethereum block whose header is relayed.
    EthereumHeaders,
    /// Next Ethereum block scanned for events of an application.
    EthereumApp {
        /// The application contract.
        address: H160,
    },
}

impl HistoryStoreKey {
    /// Returns the bytes of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::ParachainCommitments => vec![0],
            Self::EthereumHeaders => vec![1],
            Self::EthereumApp { address } => {
                let mut bytes = vec![2];
                bytes.extend_from_slice(address.as_bytes());
                bytes
            }
        }
    }
}

impl Display for HistoryStoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParachainCommitments => write!(f, "ParachainCommitments"),
            Self::EthereumHeaders => write!(f, "EthereumHeaders"),
            Self::EthereumApp { address } => {
                write!(f, "EthereumApp({address:?})")
            }
        }
    }
}

impl From<H160> for HistoryStoreKey {
    fn from(address: H160) -> Self {
        Self::EthereumApp { address }
    }
}

/// HistoryStore is a simple trait for storing and retrieving history
/// of block numbers.
pub trait HistoryStore: Clone + Send + Sync {
    /// Sets the new block number for that key and returns the old one.
    fn set_last_block_number<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> Result<u64>;
    /// Get the last block number for that key.
    /// if not found, returns the `default_block_number`.
    fn get_last_block_number<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> Result<u64>;

    /// an easy way to call the `get_last_block_number`
    /// where the default block number is `1`.
    fn get_last_block_number_or_default<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
    ) -> Result<u64> {
        self.get_last_block_number(key, 1u64)
    }
}

/// CommitmentStore holds the [`BeefyRelayInfo`] records, keyed by commitment
/// hash.
pub trait CommitmentStore: Clone + Send + Sync {
    /// Fetches one record.
    fn get_relay_info(&self, commitment_hash: H256)
        -> Result<Option<BeefyRelayInfo>>;

    /// All records currently in `status`, ordered by relaychain block.
    fn relay_infos_by_status(
        &self,
        status: RelayStatus,
    ) -> Result<Vec<BeefyRelayInfo>>;

    /// Inserts a new record.
    ///
    /// Fails with `RecordAlreadyExists` when a record with the same
    /// commitment hash is present, which keeps re-delivered justifications
    /// from creating a second record.
    fn insert_relay_info(&self, info: &BeefyRelayInfo) -> Result<()>;

    /// Applies `changes` to a record and returns the updated record.
    ///
    /// Fails with `RecordNotFound`, `InvalidStatusTransition` or
    /// `MissingTransactionHash` without touching the stored record.
    fn update_relay_info(
        &self,
        commitment_hash: H256,
        changes: &RelayInfoChanges,
    ) -> Result<BeefyRelayInfo>;
}

/// Everything the relayer persists.
pub trait RelayerStore: HistoryStore + CommitmentStore + 'static {}

impl<S> RelayerStore for S where S: HistoryStore + CommitmentStore + 'static {}

pub(crate) fn sort_by_block(infos: &mut [BeefyRelayInfo]) {
    infos.sort_by_key(|info| (info.block_number(), info.commitment_hash));
}
