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


/// Blocks an Ethereum header must be buried under before it is relayed.
pub const fn descendants_until_final() -> u64 {
    35
}
/// Ethereum blocks to wait after the initial signature commitment.
pub const fn beefy_block_delay() -> u64 {
    45
}
/// Interval between two polls of the Ethereum head, in milliseconds.
pub const fn poll_interval_ms() -> u64 {
    6_000
}
/// Gas limit of `submitInitialSignatureCommitment`.
pub const fn initial_signature_commitment_gas() -> u64 {
    5_000_000
}
/// Gas limit of `submitCompleteSignatureCommitment`.
pub const fn complete_signature_commitment_gas() -> u64 {
    500_000
}
/// Gas limit of an application `submit`.
pub const fn app_submit_gas() -> u64 {
    2_000_000
}
/// Gas limit of an inbound channel `submit`.
pub const fn inbound_channel_gas() -> u64 {
    500_000
}
/// Extrinsics watched at the same time by the parachain writer.
pub const fn max_watched_extrinsics() -> usize {
    20
}
/// Mortality of parachain extrinsics, in blocks.
pub const fn mortality_period() -> u64 {
    64
}
/// Capacity of the channels between listeners and writers.
pub const fn channel_capacity() -> usize {
    64
}
/// Fixed delay between two attempts of a remote read, in milliseconds.
pub const fn retry_interval_ms() -> u64 {
    10_000
}
/// Interval between two scans of the relay records, in milliseconds.
pub const fn beefy_scan_interval_ms() -> u64 {
    6_000
}
/// A dispatched record is handed to the writer again after this long if its
/// status did not move, in milliseconds.
pub const fn beefy_redispatch_after_ms() -> u64 {
    120_000
}
