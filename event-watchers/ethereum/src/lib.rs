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


//! # Ethereum Watchers
//!
//! Everything that follows the Ethereum chain:
//!
//! * [`AppListener`] turns the events of the configured applications into
//!   signed messages for the parachain.
//! * [`HeaderListener`] relays finalized headers to the parachain light
//!   client.
//! * [`BeefyRelayScheduler`] watches the light client transactions and
//!   moves the BEEFY relay records forward.

/// Application event listener.
mod apps;
/// BEEFY relay scheduler.
mod beefy;
/// Header listener.
mod headers;

pub use apps::AppListener;
pub use beefy::{BeefyRelayScheduler, INITIAL_VERIFICATION_SUCCESSFUL};
pub use headers::{HeaderListener, StartPoint};
