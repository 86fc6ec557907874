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


use artemis_relayer_types::beefy::{BeefyRelayInfo, RelayInfoChanges};
use artemis_relayer_utils::{probe, Error, Result};
use ethers::types::H256;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::CommitmentStore;

/// Sending half of the command channel. Cloned by every producer.
pub type DatabaseCmdSender = mpsc::Sender<DatabaseCmd>;

/// A mutation of the relay records.
///
/// Commands are fire-and-forget: the sender does not learn whether it was
/// applied, a rejected command is logged by the processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseCmd {
    /// Insert a new record.
    Create(Box<BeefyRelayInfo>),
    /// Change fields of an existing record.
    Update {
        /// The record to change.
        commitment_hash: H256,
        /// The field changes.
        changes: RelayInfoChanges,
    },
}

impl DatabaseCmd {
    /// A create command for `info`.
    pub fn create(info: BeefyRelayInfo) -> Self {
        Self::Create(Box::new(info))
    }

    /// An update command for the record of `commitment_hash`.
    pub fn update(commitment_hash: H256, changes: RelayInfoChanges) -> Self {
        Self::Update {
            commitment_hash,
            changes,
        }
    }

    /// The record this command refers to.
    pub fn commitment_hash(&self) -> H256 {
        match self {
            Self::Create(info) => info.commitment_hash,
            Self::Update {
                commitment_hash, ..
            } => *commitment_hash,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update { .. } => "update",
        }
    }
}

/// Applies one command to the store.
pub fn apply_command<S: CommitmentStore>(
    store: &S,
    cmd: &DatabaseCmd,
) -> Result<()> {
    match cmd {
        DatabaseCmd::Create(info) => store.insert_relay_info(info),
        DatabaseCmd::Update {
            commitment_hash,
            changes,
        } => store.update_relay_info(*commitment_hash, changes).map(|_| ()),
    }
}

/// Whether a failed command is a rejection of the command itself rather than
/// a failure of the store.
fn is_rejection(e: &Error) -> bool {
    matches!(
        e,
        Error::RecordAlreadyExists(_)
            | Error::RecordNotFound(_)
            | Error::InvalidStatusTransition { .. }
            | Error::MissingTransactionHash { .. }
    )
}

fn handle_command<S: CommitmentStore>(
    store: &S,
    cmd: DatabaseCmd,
) -> Result<()> {
    let commitment_hash = cmd.commitment_hash();
    let operation = cmd.operation();
    match apply_command(store, &cmd) {
        Ok(()) => {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::CommitmentStore,
                operation,
                ?commitment_hash,
                applied = true,
            );
            Ok(())
        }
        Err(e) if is_rejection(&e) => {
            tracing::warn!(
                operation,
                ?commitment_hash,
                error = %e,
                "Commitment store rejected command",
            );
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::CommitmentStore,
                operation,
                ?commitment_hash,
                applied = false,
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                operation,
                ?commitment_hash,
                error = %e,
                "Commitment store failed",
            );
            Err(e)
        }
    }
}

/// The single consumer of the command channel.
///
/// Commands are applied in the order they were received. On cancellation
/// the commands already buffered are still applied before returning. The
/// task ends with `Ok(())` once every sender is dropped, and with the store
/// error if the store itself fails.
#[tracing::instrument(skip_all)]
pub async fn process_commands<S: CommitmentStore>(
    store: S,
    mut commands: mpsc::Receiver<DatabaseCmd>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let cmd = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            cmd = commands.recv() => cmd,
        };
        match cmd {
            Some(cmd) => handle_command(&store, cmd)?,
            None => {
                tracing::debug!("All command senders dropped");
                return Ok(());
            }
        }
    }
    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        handle_command(&store, cmd)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use artemis_relayer_types::beefy::{
        Commitment, RelayStatus, SignedCommitment,
    };
    use ethers::types::Address;

    use super::*;
    use crate::InMemoryStore;

    fn witnessed(block_number: u64) -> BeefyRelayInfo {
        let signed = SignedCommitment {
            commitment: Commitment {
                payload: [1u8; 32],
                block_number,
                validator_set_id: 3,
            },
            signatures: vec![None],
        };
        BeefyRelayInfo::witnessed(&signed, vec![Address::repeat_byte(1)])
    }

    #[tokio::test]
    async fn commands_are_applied_in_order() {
        let store = InMemoryStore::default();
        let (tx, rx) = mpsc::channel(8);
        let info = witnessed(100);
        let hash = info.commitment_hash;
        tx.send(DatabaseCmd::create(info.clone())).await.unwrap();
        // re-delivery of the same justification
        tx.send(DatabaseCmd::create(info)).await.unwrap();
        tx.send(DatabaseCmd::update(
            hash,
            RelayInfoChanges::initial_verification_sent(H256::repeat_byte(7)),
        ))
        .await
        .unwrap();
        drop(tx);

        process_commands(store.clone(), rx, CancellationToken::new())
            .await
            .unwrap();

        let record = store.get_relay_info(hash).unwrap().unwrap();
        assert_eq!(record.status, RelayStatus::InitialVerificationTxSent);
        assert_eq!(
            record.initial_verification_tx_hash,
            Some(H256::repeat_byte(7))
        );
        assert_eq!(
            store
                .relay_infos_by_status(RelayStatus::InitialVerificationTxSent)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn rejected_commands_do_not_stop_the_processor() {
        let store = InMemoryStore::default();
        let (tx, rx) = mpsc::channel(8);
        let info = witnessed(1);
        let hash = info.commitment_hash;
        tx.send(DatabaseCmd::update(hash, RelayInfoChanges::complete()))
            .await
            .unwrap();
        tx.send(DatabaseCmd::create(info)).await.unwrap();
        tx.send(DatabaseCmd::update(hash, RelayInfoChanges::complete()))
            .await
            .unwrap();
        drop(tx);

        process_commands(store.clone(), rx, CancellationToken::new())
            .await
            .unwrap();
        let record = store.get_relay_info(hash).unwrap().unwrap();
        assert_eq!(record.status, RelayStatus::Witnessed);
    }

    #[tokio::test]
    async fn buffered_commands_are_applied_on_cancel() {
        let store = InMemoryStore::default();
        let (tx, rx) = mpsc::channel(8);
        let info = witnessed(2);
        let hash = info.commitment_hash;
        tx.send(DatabaseCmd::create(info)).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        process_commands(store.clone(), rx, cancel).await.unwrap();
        assert!(store.get_relay_info(hash).unwrap().is_some());
        // the channel is closed for the remaining senders
        assert!(tx.send(DatabaseCmd::create(witnessed(3))).await.is_err());
    }
}
