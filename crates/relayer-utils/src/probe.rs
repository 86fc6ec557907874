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


//! Probe events are structured `tracing` events emitted on a dedicated
//! target, so tooling can follow the relayer state without parsing
//! free-form log lines.
//!
//! ```ignore
//! tracing::event!(
//!     target: artemis_relayer_utils::probe::TARGET,
//!     tracing::Level::DEBUG,
//!     kind = %artemis_relayer_utils::probe::Kind::Lifecycle,
//!     started = true,
//! );
//! ```

use derive_more::Display;

/// Target for logger
pub const TARGET: &str = "artemis_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the Relayer changes, like starting or shutting down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Relayer Sync state on a specific chain.
    #[display(fmt = "sync")]
    Sync,
    /// A listener produced, skipped or dropped a unit of work.
    #[display(fmt = "listener")]
    Listener,
    /// A writer submitted or failed to submit a transaction.
    #[display(fmt = "writer")]
    Writer,
    /// Relayer Transaction Queue state on a specific chain.
    #[display(fmt = "tx_queue")]
    TxQueue,
    /// A command was applied to or rejected by the commitment store.
    #[display(fmt = "commitment_store")]
    CommitmentStore,
    /// The BEEFY relay scheduler moved a record forward.
    #[display(fmt = "beefy_relay")]
    BeefyRelay,
    /// When the relayer will retry to do something.
    #[display(fmt = "retry")]
    Retry,
}
