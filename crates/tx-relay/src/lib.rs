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


//! # Artemis Transaction Relay
//!
//! Writers consume what the listeners of the other chain produced and turn
//! every accepted item into one transaction:
//!
//! * [`substrate::ParachainWriter`] dispatches Ethereum application messages
//!   and Ethereum headers as parachain extrinsics.
//! * [`evm::EthereumWriter`] delivers application messages and parachain
//!   commitments to their contracts on Ethereum.
//! * [`evm::BeefyEthereumWriter`] drives the two transactions of the BEEFY
//!   light client and reports their hashes to the commitment store.
//!
//! Every writer stops when its cancellation token fires or when its peer
//! closes the inbound channel, and drains what is still buffered before
//! returning so no listener stays blocked on a full channel.
#![warn(missing_docs)]

use tokio::sync::mpsc;

/// Ethereum writers.
pub mod evm;
/// Parachain writer.
pub mod substrate;

/// Closes `rx` and discards what is still buffered in it.
pub(crate) async fn drain<T>(rx: &mut mpsc::Receiver<T>, what: &'static str) {
    rx.close();
    let mut discarded = 0usize;
    while rx.recv().await.is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        tracing::debug!(discarded, "Discarded {what}");
    }
}
