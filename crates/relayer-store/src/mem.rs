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
use std::fmt::Debug;
use std::sync::Arc;

use artemis_relayer_types::beefy::{
    BeefyRelayInfo, RelayInfoChanges, RelayStatus,
};
use artemis_relayer_utils::{Error, Result};
use ethers::types::H256;
use parking_lot::RwLock;

use super::{CommitmentStore, HistoryStore, HistoryStoreKey};

/// InMemoryStore is a store that keeps the relayer state in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    last_block_numbers: Arc<RwLock<HashMap<HistoryStoreKey, u64>>>,
    relay_infos: Arc<RwLock<HashMap<H256, BeefyRelayInfo>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl HistoryStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn get_last_block_number<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> Result<u64> {
        let guard = self.last_block_numbers.read();
        let val = guard
            .get(&key.into())
            .cloned()
            .unwrap_or(default_block_number);
        Ok(val)
    }

    #[tracing::instrument(skip(self))]
    fn set_last_block_number<K: Into<HistoryStoreKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> Result<u64> {
        let mut guard = self.last_block_numbers.write();
        let val = guard.entry(key.into()).or_insert(block_number);
        let old = *val;
        *val = block_number;
        Ok(old)
    }
}

impl CommitmentStore for InMemoryStore {
    fn get_relay_info(
        &self,
        commitment_hash: H256,
    ) -> Result<Option<BeefyRelayInfo>> {
        Ok(self.relay_infos.read().get(&commitment_hash).cloned())
    }

    fn relay_infos_by_status(
        &self,
        status: RelayStatus,
    ) -> Result<Vec<BeefyRelayInfo>> {
        let mut infos: Vec<_> = self
            .relay_infos
            .read()
            .values()
            .filter(|info| info.status == status)
            .cloned()
            .collect();
        crate::sort_by_block(&mut infos);
        Ok(infos)
    }

    #[tracing::instrument(skip(self, info), fields(commitment_hash = ?info.commitment_hash))]
    fn insert_relay_info(&self, info: &BeefyRelayInfo) -> Result<()> {
        info.validate()?;
        let mut guard = self.relay_infos.write();
        if guard.contains_key(&info.commitment_hash) {
            return Err(Error::RecordAlreadyExists(format!(
                "{:?}",
                info.commitment_hash
            )));
        }
        guard.insert(info.commitment_hash, info.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn update_relay_info(
        &self,
        commitment_hash: H256,
        changes: &RelayInfoChanges,
    ) -> Result<BeefyRelayInfo> {
        let mut guard = self.relay_infos.write();
        let current = guard.get_mut(&commitment_hash).ok_or_else(|| {
            Error::RecordNotFound(format!("{commitment_hash:?}"))
        })?;
        let updated = current.apply(changes)?;
        *current = updated.clone();
        Ok(updated)
    }
}
