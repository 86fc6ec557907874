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


#![warn(missing_docs)]

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! The relayer configuration is split per chain:
//! * `ethereum`: endpoint, signing key, application contracts, inbound
//!   channels and the BEEFY light client.
//! * `parachain`: endpoint and signing key of the parachain account.
//! * `relaychain`: endpoint of the relaychain the BEEFY justifications are
//!   read from.
//! * `relay`: channel sizes, retry policy and BEEFY relay scheduling.
//!
//! See [config/local](../../config/local) for an example.

/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Default values of optional settings.
pub mod defaults;
/// Ethereum configuration
pub mod evm;
/// Relay pipeline configuration
pub mod relay;
/// Parachain and relaychain configuration
pub mod substrate;
/// Utils for processing configuration
pub mod utils;

use evm::EthereumConfig;
use relay::RelayConfig;
use serde::{Deserialize, Serialize};
use substrate::{ParachainConfig, RelaychainConfig};

/// ArtemisRelayerConfig is the configuration for the artemis relayer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ArtemisRelayerConfig {
    /// The Ethereum side of the bridge.
    #[serde(default)]
    pub ethereum: Option<EthereumConfig>,
    /// The parachain hosting the bridge pallets.
    #[serde(default)]
    pub parachain: Option<ParachainConfig>,
    /// The relaychain producing BEEFY justifications.
    #[serde(default)]
    pub relaychain: Option<RelaychainConfig>,
    /// Pipeline settings shared by every chain.
    #[serde(default)]
    pub relay: RelayConfig,
}

impl ArtemisRelayerConfig {
    /// Number of chains present in the configuration.
    pub fn chain_count(&self) -> usize {
        usize::from(self.ethereum.is_some())
            + usize::from(self.parachain.is_some())
            + usize::from(self.relaychain.is_some())
    }

    /// Makes sure that the config is valid, by going
    /// through the whole config and doing some basic checks.
    pub fn verify(&self) -> artemis_relayer_utils::Result<()> {
        use artemis_relayer_utils::Error;
        let ethereum =
            self.ethereum.as_ref().ok_or(Error::MissingConfig("ethereum"))?;
        if self.chain_count() < 2 {
            return Err(Error::MissingConfig(
                "parachain or relaychain (at least two chains are needed)",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        if !ethereum.apps.iter().all(|app| seen.insert(app.address)) {
            return Err(Error::Generic(
                "application addresses must be unique",
            ));
        }
        if self.relaychain.is_some() && ethereum.beefy_light_client.is_none()
        {
            return Err(Error::MissingConfig("ethereum.beefy-light-client"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_config_files_are_correct() {
        // Walks every directory of the repository `config` dir and parses the
        // files inside it.
        let config_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../config");
        let pattern = config_dir.join("*");
        let config_dirs = glob::glob(&pattern.to_string_lossy())
            .expect("Failed to read config directory")
            .filter_map(|p| p.ok())
            .filter(|p| p.is_dir())
            .collect::<Vec<_>>();
        assert!(
            !config_dirs.is_empty(),
            "No config directories found in the config directory"
        );
        for config_subdir in config_dirs {
            // Load the example dot env file.
            let _ = dotenv::from_path(config_subdir.join(".env.example"));
            if let Err(e) = utils::load(&config_subdir) {
                panic!("Failed to parse config file in directory: {config_subdir:?} with error: {e}");
            }
        }
    }
}
