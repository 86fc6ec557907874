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
use std::sync::Arc;
use std::time::Instant;

use artemis_relayer_config::relay::BeefyRelayConfig;
use artemis_relayer_context::EthereumClient;
use artemis_relayer_store::{CommitmentStore, DatabaseCmd, DatabaseCmdSender};
use artemis_relayer_types::beefy::{
    BeefyRelayInfo, RelayInfoChanges, RelayStatus,
};
use artemis_relayer_utils::retry::RetryPolicy;
use artemis_relayer_utils::{probe, Error, Result};
use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Event emitted by the light client when an initial signature commitment
/// is accepted: `(prover, block number, id)`.
pub const INITIAL_VERIFICATION_SUCCESSFUL: &str =
    "InitialVerificationSuccessful(address,uint256,uint256)";

/// Drives the BEEFY relay records between the writer's transactions.
///
/// Every scan:
/// * `Witnessed` and `ReadyToComplete` records are handed to the BEEFY
///   writer, at most once per `redispatch_after`;
/// * `InitialVerificationTxSent` records become `ReadyToComplete` once the
///   initial transaction succeeded and `block_delay` blocks were mined
///   after it;
/// * `CompleteVerificationTxSent` records become `Complete` once the
///   completion transaction succeeded.
pub struct BeefyRelayScheduler<C, S> {
    client: Arc<C>,
    store: S,
    light_client: Address,
    block_delay: u64,
    config: BeefyRelayConfig,
    policy: RetryPolicy,
    dispatched: HashMap<(H256, RelayStatus), Instant>,
}

impl<C, S> BeefyRelayScheduler<C, S>
where
    C: EthereumClient,
    S: CommitmentStore,
{
    /// Creates a scheduler for the light client at `light_client`.
    pub fn new(
        client: Arc<C>,
        store: S,
        light_client: Address,
        block_delay: u64,
        config: BeefyRelayConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            store,
            light_client,
            block_delay,
            config,
            policy,
            dispatched: HashMap::new(),
        }
    }

    /// Runs one scan.
    pub async fn scan(
        &mut self,
        writer: &mpsc::Sender<BeefyRelayInfo>,
        database: &DatabaseCmdSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let redispatch_after = self.config.redispatch_after();
        self.dispatched
            .retain(|_, at| at.elapsed() < redispatch_after);

        for status in [RelayStatus::Witnessed, RelayStatus::ReadyToComplete] {
            for info in self.store.relay_infos_by_status(status)? {
                self.dispatch(info, writer)?;
            }
        }

        let pending_initial = self
            .store
            .relay_infos_by_status(RelayStatus::InitialVerificationTxSent)?;
        let pending_complete = self
            .store
            .relay_infos_by_status(RelayStatus::CompleteVerificationTxSent)?;
        if pending_initial.is_empty() && pending_complete.is_empty() {
            return Ok(());
        }
        let latest = self
            .policy
            .retry(cancel, "block number", || self.client.block_number())
            .await?;

        for info in pending_initial {
            match self.check_initial(&info, latest, cancel).await {
                Ok(Some(changes)) => {
                    send(database, DatabaseCmd::update(info.commitment_hash, changes))
                        .await?
                }
                Ok(None) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => tracing::error!(
                    commitment = ?info.commitment_hash,
                    error = %e,
                    "Initial verification did not succeed",
                ),
            }
        }
        for info in pending_complete {
            match self.check_complete(&info, cancel).await {
                Ok(true) => {
                    send(
                        database,
                        DatabaseCmd::update(
                            info.commitment_hash,
                            RelayInfoChanges::complete(),
                        ),
                    )
                    .await?
                }
                Ok(false) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => tracing::error!(
                    commitment = ?info.commitment_hash,
                    error = %e,
                    "Complete verification did not succeed",
                ),
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        info: BeefyRelayInfo,
        writer: &mpsc::Sender<BeefyRelayInfo>,
    ) -> Result<()> {
        let key = (info.commitment_hash, info.status);
        if self.dispatched.contains_key(&key) {
            return Ok(());
        }
        match writer.try_send(info) {
            Ok(()) => {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::BeefyRelay,
                    commitment = ?key.0,
                    status = %key.1,
                    dispatched = true,
                );
                self.dispatched.insert(key, Instant::now());
                Ok(())
            }
            // picked up again on the next scan
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                Err(Error::ChannelClosed("beefy records"))
            }
        }
    }

    async fn receipt(
        &self,
        tx_hash: H256,
        cancel: &CancellationToken,
    ) -> Result<Option<TransactionReceipt>> {
        let receipt = self
            .policy
            .retry(cancel, "transaction receipt", || {
                self.client.transaction_receipt(tx_hash)
            })
            .await?;
        match receipt {
            Some(r) if r.status == Some(U64::zero()) => {
                Err(Error::TransactionReverted(format!("{tx_hash:?}")))
            }
            other => Ok(other),
        }
    }

    async fn check_initial(
        &self,
        info: &BeefyRelayInfo,
        latest: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<RelayInfoChanges>> {
        let Some(tx_hash) = info.initial_verification_tx_hash else {
            return Ok(None);
        };
        let Some(receipt) = self.receipt(tx_hash, cancel).await? else {
            return Ok(None);
        };
        let Some(block) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(None);
        };
        if block + self.block_delay > latest {
            tracing::trace!(
                commitment = ?info.commitment_hash,
                block,
                latest,
                "Waiting for the BEEFY block delay",
            );
            return Ok(None);
        }
        let id = validation_id(&receipt, self.light_client)?;
        tracing::info!(
            commitment = ?info.commitment_hash,
            block,
            %id,
            "Initial verification is ready to complete",
        );
        Ok(Some(RelayInfoChanges::ready_to_complete(block, id)))
    }

    async fn check_complete(
        &self,
        info: &BeefyRelayInfo,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(tx_hash) = info.complete_verification_tx_hash else {
            return Ok(false);
        };
        let done = self.receipt(tx_hash, cancel).await?.is_some();
        if done {
            tracing::info!(
                commitment = ?info.commitment_hash,
                block_number = info.block_number(),
                "BEEFY commitment relayed",
            );
        }
        Ok(done)
    }

    /// Scans every `scan_interval` until `cancel` fires.
    #[tracing::instrument(skip_all, name = "beefy_relay_scheduler")]
    pub async fn run(
        mut self,
        writer: mpsc::Sender<BeefyRelayInfo>,
        database: DatabaseCmdSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let pace = RetryPolicy::new(self.config.scan_interval(), None);
        let outcome = loop {
            if let Err(e) = self.scan(&writer, &database, &cancel).await {
                break Err(e);
            }
            if let Err(e) = pace.sleep(&cancel).await {
                break Err(e);
            }
        };
        match outcome {
            Err(Error::Cancelled) => {
                tracing::info!("Shutting down BEEFY relay scheduler");
                Ok(())
            }
            other => other,
        }
    }
}

async fn send(database: &DatabaseCmdSender, cmd: DatabaseCmd) -> Result<()> {
    database
        .send(cmd)
        .await
        .map_err(|_| Error::ChannelClosed("database commands"))
}

/// Reads the verification id from the `InitialVerificationSuccessful` log
/// of the light client in `receipt`.
pub(crate) fn validation_id(
    receipt: &TransactionReceipt,
    light_client: Address,
) -> Result<U256> {
    let topic = H256(ethers::utils::keccak256(INITIAL_VERIFICATION_SUCCESSFUL));
    let log = receipt
        .logs
        .iter()
        .find(|log| log.address == light_client && log.topics.first() == Some(&topic))
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{INITIAL_VERIFICATION_SUCCESSFUL} in {:?}",
                receipt.transaction_hash
            ))
        })?;
    let tokens = decode(
        &[ParamType::Address, ParamType::Uint(256), ParamType::Uint(256)],
        &log.data,
    )?;
    match tokens.get(2) {
        Some(Token::Uint(id)) => Ok(*id),
        _ => Err(Error::Decode(
            "InitialVerificationSuccessful without an id".into(),
        )),
    }
}
