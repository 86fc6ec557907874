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


//! Types shared between the listeners, the writers and the store.

/// BEEFY commitments and relay records.
pub mod beefy;
/// `$ENV_VAR` indirection for config values.
pub mod env;
/// Validator set merkle proofs.
pub mod merkle;
/// Messages and headers passed between chains.
pub mod message;
pub mod private_key;
pub mod rpc_url;
pub mod suri;

pub use message::{
    AuxiliaryDigestItem, CallName, ChannelId, CommitmentMessage,
    EthereumHeader, EthereumMessage, Header, HeaderId, Message,
    ParachainMessage, SubstrateCommitment,
};
