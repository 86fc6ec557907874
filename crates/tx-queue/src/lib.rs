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


//! # Transaction Queue Module 🕸️
//!
//! Serializes the transactions of one relayer account per chain.
//!
//! * [`NonceSequencer`] hands out nonces strictly in order and only moves
//!   forward when a submission was dispatched.
//! * [`substrate::ExtrinsicPool`] keeps at most one extrinsic in flight per
//!   nonce and follows each one until it is finalized or dropped.
//! * [`evm::EthereumTxQueue`] sends Ethereum transactions one at a time with
//!   the pending nonce of the relayer account.

#![warn(missing_docs)]

/// Ethereum transaction submission.
pub mod evm;
mod nonce;
/// Parachain extrinsic submission.
pub mod substrate;

pub use nonce::NonceSequencer;
