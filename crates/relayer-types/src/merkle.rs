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


//! Keccak merkle proofs over the validator set.
//!
//! Leaves are the 20 byte validator addresses in authority order, the same
//! layout the relaychain uses for the BEEFY authority set root.

use binary_merkle_tree::merkle_proof;
use ethers::types::{Address, H256};
use sp_core::KeccakHasher;

/// A proof that `address` sits at `position` of a validator set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorProof {
    pub position: usize,
    pub address: Address,
    pub proof: Vec<H256>,
}

/// Builds the proof for the validator at `position`.
pub fn validator_proof(
    addresses: &[Address],
    position: usize,
) -> Option<ValidatorProof> {
    let address = *addresses.get(position)?;
    let proof = merkle_proof::<KeccakHasher, _, _>(
        addresses.iter().map(|a| a.0),
        position as _,
    );
    Some(ValidatorProof {
        position,
        address,
        proof: proof.proof.into_iter().map(|h| H256(h.0)).collect(),
    })
}
