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


use std::time::Duration;

use artemis_relayer_types::beefy::ValidatorSelection;
use artemis_relayer_utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::defaults;

/// RelayConfig holds the pipeline settings shared by all chains.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    /// Capacity of every listener to writer channel.
    #[serde(default = "defaults::channel_capacity")]
    pub channel_capacity: usize,
    /// Retry policy of remote reads.
    #[serde(default)]
    pub retry: RetryConfig,
    /// BEEFY relay scheduling.
    #[serde(default)]
    pub beefy: BeefyRelayConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::channel_capacity(),
            retry: RetryConfig::default(),
            beefy: BeefyRelayConfig::default(),
        }
    }
}

/// RetryConfig is the fixed backoff used by every remote read.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Delay between two attempts, in milliseconds.
    #[serde(default = "defaults::retry_interval_ms")]
    pub interval_ms: u64,
    /// Maximum number of retries, unbounded when unset.
    #[serde(default)]
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: defaults::retry_interval_ms(),
            max_retries: None,
        }
    }
}

impl RetryConfig {
    /// Builds the retry policy described by this config.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.interval_ms), self.max_retries)
    }
}

/// BeefyRelayConfig controls the scan of the relay records.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BeefyRelayConfig {
    /// Interval between two scans, in milliseconds.
    #[serde(default = "defaults::beefy_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Time after which a record that did not move is dispatched again,
    /// in milliseconds.
    #[serde(default = "defaults::beefy_redispatch_after_ms")]
    pub redispatch_after_ms: u64,
    /// Which signing validator is proven in the initial commitment.
    #[serde(default)]
    pub validator_selection: ValidatorSelection,
}

impl Default for BeefyRelayConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: defaults::beefy_scan_interval_ms(),
            redispatch_after_ms: defaults::beefy_redispatch_after_ms(),
            validator_selection: ValidatorSelection::default(),
        }
    }
}

impl BeefyRelayConfig {
    /// The scan interval as a duration.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// The redispatch delay as a duration.
    pub fn redispatch_after(&self) -> Duration {
        Duration::from_millis(self.redispatch_after_ms)
    }
}
