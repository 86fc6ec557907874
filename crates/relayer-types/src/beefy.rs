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


//! BEEFY commitments and the relay record that tracks their two-phase
//! verification on Ethereum.

use artemis_relayer_utils::{Error, Result};
use codec::{Decode, Encode};
use derive_more::Display;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// The data BEEFY validators vote on.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct Commitment {
    /// The MMR root of the relaychain at `block_number`.
    pub payload: [u8; 32],
    /// The relaychain block this commitment was made at.
    pub block_number: u64,
    /// The authority set that signed the commitment.
    pub validator_set_id: u64,
}

impl Commitment {
    /// `keccak256` of the SCALE encoded commitment.
    pub fn hash(&self) -> H256 {
        H256(keccak256(self.encode()))
    }
}

/// A commitment together with one optional signature per validator.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SignedCommitment {
    /// The commitment that was signed.
    pub commitment: Commitment,
    /// Signatures ordered like the authority set, `None` for validators that
    /// did not vote.
    pub signatures: Vec<Option<[u8; 65]>>,
}

impl SignedCommitment {
    /// Number of signatures present.
    pub fn signature_count(&self) -> usize {
        self.signatures.iter().filter(|s| s.is_some()).count()
    }
}

/// The lifecycle of a relayed commitment.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RelayStatus {
    /// The signed commitment was observed on the relaychain.
    Witnessed,
    /// `submitInitialSignatureCommitment` was sent.
    InitialVerificationTxSent,
    /// Enough blocks passed since the initial transaction was mined.
    ReadyToComplete,
    /// `submitCompleteSignatureCommitment` was sent.
    CompleteVerificationTxSent,
    /// The completion transaction succeeded.
    Complete,
}

impl RelayStatus {
    /// The status following this one, `None` for `Complete`.
    pub fn next(self) -> Option<Self> {
        use RelayStatus::*;
        match self {
            Witnessed => Some(InitialVerificationTxSent),
            InitialVerificationTxSent => Some(ReadyToComplete),
            ReadyToComplete => Some(CompleteVerificationTxSent),
            CompleteVerificationTxSent => Some(Complete),
            Complete => None,
        }
    }

    /// Only single forward steps are allowed.
    pub fn can_transition_to(self, to: Self) -> bool {
        self.next() == Some(to)
    }

    /// Whether a record in this status must carry the initial tx hash.
    pub fn requires_initial_tx(self) -> bool {
        self >= RelayStatus::InitialVerificationTxSent
    }

    /// Whether a record in this status must carry the completion tx hash.
    pub fn requires_complete_tx(self) -> bool {
        self >= RelayStatus::CompleteVerificationTxSent
    }
}

/// How the validator proven in the initial signature commitment is chosen.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorSelection {
    /// The lowest position with a verifying signature.
    #[default]
    FirstValid,
    /// A uniformly random position among the verifying signatures.
    Random,
}

/// A signature that recovered to the validator at its position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// Position in the authority set.
    pub position: usize,
    /// The validator address.
    pub address: Address,
    /// `r || s || v`.
    pub signature: [u8; 65],
}

/// Field changes carried by an update command.
///
/// `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfoChanges {
    /// The new status.
    pub status: Option<RelayStatus>,
    /// Hash of the initial verification transaction.
    pub initial_verification_tx_hash: Option<H256>,
    /// Block the initial verification transaction was mined in.
    pub initial_verification_block: Option<u64>,
    /// Id assigned by the light client to the verification in progress.
    pub validation_id: Option<U256>,
    /// Hash of the completion transaction.
    pub complete_verification_tx_hash: Option<H256>,
}

impl RelayInfoChanges {
    /// Moves a `Witnessed` record on once `submitInitialSignatureCommitment`
    /// was sent in `tx_hash`.
    pub fn initial_verification_sent(tx_hash: H256) -> Self {
        Self {
            status: Some(RelayStatus::InitialVerificationTxSent),
            initial_verification_tx_hash: Some(tx_hash),
            ..Default::default()
        }
    }

    /// Records the block the initial transaction was mined in and the id
    /// the light client gave the verification.
    pub fn ready_to_complete(block: u64, validation_id: U256) -> Self {
        Self {
            status: Some(RelayStatus::ReadyToComplete),
            initial_verification_block: Some(block),
            validation_id: Some(validation_id),
            ..Default::default()
        }
    }

    /// `submitCompleteSignatureCommitment` was sent in `tx_hash`.
    pub fn complete_verification_sent(tx_hash: H256) -> Self {
        Self {
            status: Some(RelayStatus::CompleteVerificationTxSent),
            complete_verification_tx_hash: Some(tx_hash),
            ..Default::default()
        }
    }

    /// The completion transaction succeeded.
    pub fn complete() -> Self {
        Self {
            status: Some(RelayStatus::Complete),
            ..Default::default()
        }
    }
}

/// The persisted progress of one commitment across both chains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeefyRelayInfo {
    /// Key of the record.
    pub commitment_hash: H256,
    /// The commitment itself.
    pub commitment: Commitment,
    /// The SCALE encoded [`SignedCommitment`].
    pub signed_commitment: Vec<u8>,
    /// Ethereum addresses of the authority set, in authority order.
    pub validator_addresses: Vec<Address>,
    /// Where the record is in its lifecycle.
    pub status: RelayStatus,
    pub initial_verification_tx_hash: Option<H256>,
    pub initial_verification_block: Option<u64>,
    pub validation_id: Option<U256>,
    pub complete_verification_tx_hash: Option<H256>,
}

impl BeefyRelayInfo {
    /// Creates a `Witnessed` record for a justification seen on the relaychain.
    pub fn witnessed(
        signed_commitment: &SignedCommitment,
        validator_addresses: Vec<Address>,
    ) -> Self {
        Self {
            commitment_hash: signed_commitment.commitment.hash(),
            commitment: signed_commitment.commitment,
            signed_commitment: signed_commitment.encode(),
            validator_addresses,
            status: RelayStatus::Witnessed,
            initial_verification_tx_hash: None,
            initial_verification_block: None,
            validation_id: None,
            complete_verification_tx_hash: None,
        }
    }

    /// The relaychain block of the commitment.
    pub fn block_number(&self) -> u64 {
        self.commitment.block_number
    }

    /// Decodes the stored signed commitment.
    pub fn signed_commitment(&self) -> Result<SignedCommitment> {
        Ok(SignedCommitment::decode(
            &mut self.signed_commitment.as_slice(),
        )?)
    }

    /// Checks that the tx hashes required by the current status are present.
    pub fn validate(&self) -> Result<()> {
        if self.status.requires_initial_tx()
            && self.initial_verification_tx_hash.is_none()
        {
            return Err(Error::MissingTransactionHash {
                status: self.status.to_string(),
                field: "initial verification tx hash",
            });
        }
        if self.status.requires_complete_tx()
            && self.complete_verification_tx_hash.is_none()
        {
            return Err(Error::MissingTransactionHash {
                status: self.status.to_string(),
                field: "complete verification tx hash",
            });
        }
        Ok(())
    }

    /// Returns a copy of this record with `changes` applied.
    ///
    /// Fails if the status change is not a single forward step, which
    /// includes repeating the current status, or if the result would violate
    /// the tx hash requirements of its status. An update without a status
    /// keeps the current one.
    pub fn apply(&self, changes: &RelayInfoChanges) -> Result<Self> {
        let mut updated = self.clone();
        if let Some(status) = changes.status {
            if !self.status.can_transition_to(status) {
                return Err(Error::InvalidStatusTransition {
                    from: self.status.to_string(),
                    to: status.to_string(),
                });
            }
            updated.status = status;
        }
        if let Some(hash) = changes.initial_verification_tx_hash {
            updated.initial_verification_tx_hash = Some(hash);
        }
        if let Some(block) = changes.initial_verification_block {
            updated.initial_verification_block = Some(block);
        }
        if let Some(id) = changes.validation_id {
            updated.validation_id = Some(id);
        }
        if let Some(hash) = changes.complete_verification_tx_hash {
            updated.complete_verification_tx_hash = Some(hash);
        }
        updated.validate()?;
        Ok(updated)
    }

    /// Recovers every signature and keeps the ones that belong to the
    /// validator at their position.
    pub fn verified_signatures(&self) -> Result<Vec<VerifiedSignature>> {
        let signed = self.signed_commitment()?;
        let hash = self.commitment_hash;
        let verified = signed
            .signatures
            .iter()
            .enumerate()
            .filter_map(|(position, signature)| {
                let signature = (*signature)?;
                let expected = *self.validator_addresses.get(position)?;
                match recover(&signature, hash) {
                    Ok(address) if address == expected => {
                        Some(VerifiedSignature {
                            position,
                            address,
                            signature,
                        })
                    }
                    Ok(address) => {
                        tracing::warn!(
                            position,
                            %address,
                            %expected,
                            "Signature does not belong to the validator at its position",
                        );
                        None
                    }
                    Err(e) => {
                        tracing::warn!(
                            position,
                            error = %e,
                            "Malformed validator signature",
                        );
                        None
                    }
                }
            })
            .collect();
        Ok(verified)
    }

    /// Picks the validator whose signature is proven in the initial
    /// signature commitment.
    pub fn select_validator(
        &self,
        selection: ValidatorSelection,
    ) -> Result<(VerifiedSignature, Vec<VerifiedSignature>)> {
        let verified = self.verified_signatures()?;
        let chosen = match selection {
            ValidatorSelection::FirstValid => verified.first().copied(),
            ValidatorSelection::Random => {
                verified.choose(&mut rand::thread_rng()).copied()
            }
        };
        let chosen = chosen.ok_or_else(|| {
            Error::InvalidSignature(format!(
                "no verifying signature for commitment {:?}",
                self.commitment_hash
            ))
        })?;
        Ok((chosen, verified))
    }
}

/// Recovers the signer of a 65 byte `r || s || v` signature over `hash`.
pub fn recover(signature: &[u8; 65], hash: H256) -> Result<Address> {
    let signature = Signature::try_from(&signature[..])?;
    Ok(signature.recover(hash)?)
}

/// Builds the `uint256[]` bitfield with one bit set per position.
pub fn claims_bitfield(
    positions: impl IntoIterator<Item = usize>,
    validator_count: usize,
) -> Vec<U256> {
    let mut words = vec![U256::zero(); (validator_count + 255) / 256];
    for position in positions {
        if let Some(word) = words.get_mut(position / 256) {
            *word = *word | (U256::one() << (position % 256));
        }
    }
    words
}

/// The Ethereum address of a BEEFY authority, given its compressed
/// secp256k1 public key.
pub fn authority_address(public_key: &[u8; 33]) -> Result<Address> {
    let key = ethers::core::k256::ecdsa::VerifyingKey::from_sec1_bytes(
        public_key,
    )
    .map_err(|e| Error::Decode(format!("authority key: {e}")))?;
    Ok(ethers::utils::public_key_to_address(&key))
}
