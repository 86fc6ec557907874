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


//! # Artemis Relayer 🕸️
//!
//! Relays messages between Ethereum and a Substrate parachain, and BEEFY
//! commitments from the relaychain to the Ethereum light client.
//!
//! Each configured chain is a [`Chain`](chain::Chain): it is given the
//! channels it produces into and consumes from, then started inside one
//! fail-fast [`TaskGroup`](artemis_relayer_utils::task_group::TaskGroup).
//! [`service::ignite`] connects to the configured chains and wires them.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The chain abstraction and the channels between chains.
pub mod chain;
/// Chains and the wiring between them.
pub mod service;
