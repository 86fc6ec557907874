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


use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use artemis_relayer_types::beefy::{
    BeefyRelayInfo, RelayInfoChanges, RelayStatus,
};
use artemis_relayer_utils::{Error, Result};
use ethers::types::H256;
use tempfile::TempDir;

use super::{CommitmentStore, HistoryStore, HistoryStoreKey};

const LAST_BLOCK_NUMBERS: &str = "last_block_numbers";
const BEEFY_RELAY_INFOS: &str = "beefy_relay_infos";

/// SledStore is a store that stores the relayer state in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    /// Directory of a temporary store, removed with the last clone.
    tmp: Option<Arc<TempDir>>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db, tmp: None })
    }

    /// Creates a temporary SledStore.
    ///
    /// Its directory lives as long as the store or any of its clones.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut store = Self::open(dir.path())?;
        store.tmp = Some(Arc::new(dir));
        Ok(store)
    }

    /// Where a temporary store keeps its files.
    pub fn temporary_path(&self) -> Option<&Path> {
        self.tmp.as_deref().map(TempDir::path)
    }
}

fn decode_block_number(bytes: &[u8]) -> Result<u64> {
    let output: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Generic("stored block number is not 8 bytes"))?;
    Ok(u64::from_le_bytes(output))
}

impl HistoryStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn set_last_block_number<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> Result<u64> {
        let tree = self.db.open_tree(LAST_BLOCK_NUMBERS)?;
        let key: HistoryStoreKey = key.into();
        let old = tree.insert(key.to_bytes(), &block_number.to_le_bytes())?;
        match old {
            Some(v) => decode_block_number(&v),
            None => Ok(block_number),
        }
    }

    #[tracing::instrument(skip(self))]
    fn get_last_block_number<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> Result<u64> {
        let tree = self.db.open_tree(LAST_BLOCK_NUMBERS)?;
        let key: HistoryStoreKey = key.into();
        match tree.get(key.to_bytes())? {
            Some(v) => decode_block_number(&v),
            None => Ok(default_block_number),
        }
    }
}

impl CommitmentStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn get_relay_info(
        &self,
        commitment_hash: H256,
    ) -> Result<Option<BeefyRelayInfo>> {
        let tree = self.db.open_tree(BEEFY_RELAY_INFOS)?;
        tree.get(commitment_hash.as_bytes())?
            .map(|v| serde_json::from_slice(&v).map_err(Error::from))
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    fn relay_infos_by_status(
        &self,
        status: RelayStatus,
    ) -> Result<Vec<BeefyRelayInfo>> {
        let tree = self.db.open_tree(BEEFY_RELAY_INFOS)?;
        let mut infos = Vec::new();
        for entry in tree.iter() {
            let (_, v) = entry?;
            let info: BeefyRelayInfo = serde_json::from_slice(&v)?;
            if info.status == status {
                infos.push(info);
            }
        }
        crate::sort_by_block(&mut infos);
        Ok(infos)
    }

    #[tracing::instrument(skip(self, info), fields(commitment_hash = ?info.commitment_hash))]
    fn insert_relay_info(&self, info: &BeefyRelayInfo) -> Result<()> {
        info.validate()?;
        let tree = self.db.open_tree(BEEFY_RELAY_INFOS)?;
        let bytes = serde_json::to_vec(info)?;
        tree.compare_and_swap(
            info.commitment_hash.as_bytes(),
            None::<&[u8]>,
            Some(bytes),
        )?
        .map_err(|_| {
            Error::RecordAlreadyExists(format!("{:?}", info.commitment_hash))
        })
    }

    #[tracing::instrument(skip(self))]
    fn update_relay_info(
        &self,
        commitment_hash: H256,
        changes: &RelayInfoChanges,
    ) -> Result<BeefyRelayInfo> {
        let tree = self.db.open_tree(BEEFY_RELAY_INFOS)?;
        let key = commitment_hash.as_bytes();
        let mut old_bytes = tree
            .get(key)?
            .ok_or_else(|| Error::RecordNotFound(format!("{commitment_hash:?}")))?;
        let mut current: BeefyRelayInfo = serde_json::from_slice(&old_bytes)?;
        // another writer won the swap: apply again on top of its record
        loop {
            let updated = current.apply(changes)?;
            let new_bytes = serde_json::to_vec(&updated)?;
            match tree.compare_and_swap(key, Some(&old_bytes), Some(new_bytes))? {
                Ok(()) => return Ok(updated),
                Err(conflict) => {
                    tracing::debug!(
                        "Relay record changed concurrently, applying again"
                    );
                    old_bytes = conflict.current.ok_or_else(|| {
                        Error::RecordNotFound(format!("{commitment_hash:?}"))
                    })?;
                    current = serde_json::from_slice(&old_bytes)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use artemis_relayer_types::beefy::{Commitment, SignedCommitment};
    use ethers::types::Address;

    use super::*;

    fn record(block_number: u64) -> BeefyRelayInfo {
        let signed = SignedCommitment {
            commitment: Commitment {
                payload: [block_number as u8; 32],
                block_number,
                validator_set_id: 0,
            },
            signatures: vec![None, None],
        };
        BeefyRelayInfo::witnessed(
            &signed,
            vec![Address::repeat_byte(1), Address::repeat_byte(2)],
        )
    }

    #[test]
    fn get_last_block_number_should_work() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        let key = HistoryStoreKey::ParachainCommitments;
        assert_eq!(store.get_last_block_number(key, 7).unwrap(), 7);
        assert_eq!(store.set_last_block_number(key, 20).unwrap(), 20);
        assert_eq!(store.set_last_block_number(key, 21).unwrap(), 20);
        assert_eq!(store.get_last_block_number(key, 1).unwrap(), 21);
        // other keys are independent
        assert_eq!(
            store
                .get_last_block_number_or_default(Address::repeat_byte(0xaa))
                .unwrap(),
            1
        );
    }

    #[test]
    fn relay_infos_are_created_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        let info = record(10);
        store.insert_relay_info(&info).unwrap();
        let again = store.insert_relay_info(&info);
        assert!(matches!(again, Err(Error::RecordAlreadyExists(_))));
        assert_eq!(
            store.get_relay_info(info.commitment_hash).unwrap(),
            Some(info)
        );
    }

    #[test]
    fn updates_follow_the_transition_table() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        let info = record(10);
        store.insert_relay_info(&info).unwrap();
        let hash = info.commitment_hash;

        let skip = store.update_relay_info(hash, &RelayInfoChanges::complete());
        assert!(matches!(skip, Err(Error::InvalidStatusTransition { .. })));

        let tx = H256::repeat_byte(0xee);
        let updated = store
            .update_relay_info(
                hash,
                &RelayInfoChanges::initial_verification_sent(tx),
            )
            .unwrap();
        assert_eq!(updated.initial_verification_tx_hash, Some(tx));
        assert_eq!(
            store.get_relay_info(hash).unwrap().unwrap().status,
            RelayStatus::InitialVerificationTxSent
        );

        let missing = store
            .update_relay_info(H256::zero(), &RelayInfoChanges::complete());
        assert!(matches!(missing, Err(Error::RecordNotFound(_))));
    }

    #[test]
    fn records_are_listed_by_status_in_block_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        for block in [30, 10, 20] {
            store.insert_relay_info(&record(block)).unwrap();
        }
        let moved = record(20).commitment_hash;
        store
            .update_relay_info(
                moved,
                &RelayInfoChanges::initial_verification_sent(H256::zero()),
            )
            .unwrap();
        let witnessed: Vec<_> = store
            .relay_infos_by_status(RelayStatus::Witnessed)
            .unwrap()
            .iter()
            .map(|i| i.block_number())
            .collect();
        assert_eq!(witnessed, vec![10, 30]);
    }

    #[test]
    fn records_survive_reopening() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        let info = record(5);
        {
            let db = sled::Config::new().path(&path).open().unwrap();
            let store = SledStore { db, tmp: None };
            store.insert_relay_info(&info).unwrap();
            store.db.flush().unwrap();
        }
        let db = sled::Config::new().path(&path).open().unwrap();
        let store = SledStore { db, tmp: None };
        assert!(store.get_relay_info(info.commitment_hash).unwrap().is_some());
    }

    #[test]
    fn concurrent_updates_of_one_record_do_not_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        let info = record(8);
        let hash = info.commitment_hash;
        store.insert_relay_info(&info).unwrap();

        let handles = (0..8u64)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25u64)
                        .map(|j| {
                            store.update_relay_info(
                                hash,
                                &RelayInfoChanges {
                                    initial_verification_block: Some(i * 100 + j),
                                    ..Default::default()
                                },
                            )
                        })
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        let record = store.get_relay_info(hash).unwrap().unwrap();
        assert_eq!(record.status, RelayStatus::Witnessed);
        assert!(record.initial_verification_block.is_some());
    }

    #[test]
    fn racing_status_updates_apply_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        let info = record(9);
        let hash = info.commitment_hash;
        store.insert_relay_info(&info).unwrap();

        let handles = (0..4u8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.update_relay_info(
                        hash,
                        &RelayInfoChanges::initial_verification_sent(
                            H256::repeat_byte(i + 1),
                        ),
                    )
                })
            })
            .collect::<Vec<_>>();
        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        // the losers see the record already moved on
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().all(|r| matches!(
            r,
            Ok(_) | Err(Error::InvalidStatusTransition { .. })
        )));
        let stored = store.get_relay_info(hash).unwrap().unwrap();
        let winner = results.into_iter().find_map(|r| r.ok()).unwrap();
        assert_eq!(stored, winner);
    }

    #[test]
    fn temporary_store_keeps_its_directory() {
        let store = SledStore::temporary().unwrap();
        let path = store.temporary_path().unwrap().to_path_buf();
        let clone = store.clone();
        drop(store);
        assert!(path.exists());
        clone
            .set_last_block_number(HistoryStoreKey::EthereumHeaders, 3)
            .unwrap();
        assert_eq!(
            clone
                .get_last_block_number(HistoryStoreKey::EthereumHeaders, 0)
                .unwrap(),
            3
        );
        drop(clone);
        assert!(!path.exists());
    }
}
