use artemis_relayer_types::{rpc_url::RpcUrl, suri::Suri};

use super::*;
use crate::defaults;

/// ParachainConfig is the relayer configuration for the parachain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParachainConfig {
    /// Websocket endpoint of the parachain collator.
    #[serde(skip_serializing)]
    pub endpoint: RpcUrl,
    /// Interprets the string in order to generate a key Pair.
    ///
    /// - If `s` begins with a `$` character it is interpreted as an environment variable.
    /// - If `s` is a valid BIP-39 key phrase of 12, 15, 18, 21 or 24 words, then the key will
    /// be derived from it.
    /// - If `s` begins with a `/` character it is prefixed with the Substrate public `DEV_PHRASE` and
    /// interpreted as above.
    #[serde(skip_serializing)]
    pub suri: Suri,
    /// Maximum number of extrinsics followed until finalization at once.
    #[serde(default = "defaults::max_watched_extrinsics")]
    pub max_watched_extrinsics: usize,
    /// Number of blocks an extrinsic stays valid for.
    #[serde(default = "defaults::mortality_period")]
    pub mortality_period: u64,
}

/// RelaychainConfig is the relayer configuration for the relaychain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelaychainConfig {
    /// Websocket endpoint of the relaychain node.
    #[serde(skip_serializing)]
    pub endpoint: RpcUrl,
}
