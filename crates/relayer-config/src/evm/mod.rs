use artemis_relayer_types::message::{CallName, ChannelId};
use artemis_relayer_types::{private_key::PrivateKey, rpc_url::RpcUrl};
use ethers::types::Address;

use super::*;
use crate::defaults;

/// EthereumConfig is the configuration for the Ethereum side of the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthereumConfig {
    /// Websocket endpoint of the Ethereum node.
    #[serde(skip_serializing)]
    pub endpoint: RpcUrl,
    /// The private key of the relayer account.
    ///
    /// 1. if it starts with '0x' then this would be raw (64 bytes) hex encoded
    ///    private key.
    /// 2. if it starts with '$' then it would be considered as an Enviroment variable
    ///    of a hex-encoded private key.
    ///    Example: $ETHEREUM_PRIVATE_KEY
    #[serde(skip_serializing)]
    pub private_key: PrivateKey,
    /// Chain id used to sign transactions. Queried from the node when unset.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// How many descendants a block needs before its header is relayed.
    #[serde(default = "defaults::descendants_until_final")]
    pub descendants_until_final: u64,
    /// First block relayed when the parachain has no finalized Ethereum
    /// header yet. Defaults to the current head.
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Interval between two polls of the chain head, in milliseconds.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Address of the BEEFY light client contract.
    #[serde(default)]
    pub beefy_light_client: Option<Address>,
    /// Blocks to wait between the initial and the complete signature
    /// commitment.
    #[serde(default = "defaults::beefy_block_delay")]
    pub beefy_block_delay: u64,
    /// Addresses allowed to sign application messages.
    #[serde(default)]
    pub trusted_signers: Vec<Address>,
    /// Applications whose events are relayed to the parachain.
    #[serde(default)]
    pub apps: Vec<AppConfig>,
    /// Inbound channel contracts, one per channel id.
    #[serde(default)]
    pub inbound_channels: Vec<InboundChannelConfig>,
    /// Gas limits of the transactions sent by the relayer.
    #[serde(default)]
    pub gas_limits: GasLimits,
}

impl EthereumConfig {
    /// Looks up an application by its contract address.
    pub fn app(&self, address: Address) -> Option<&AppConfig> {
        self.apps.iter().find(|app| app.address == address)
    }

    /// The inbound channel contract of `channel_id`.
    pub fn inbound_channel(&self, channel_id: ChannelId) -> Option<Address> {
        self.inbound_channels
            .iter()
            .find(|c| c.id == channel_id)
            .map(|c| c.address)
    }
}

/// An application contract and the parachain call its events map to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    /// Human readable name, used in logs.
    pub name: String,
    /// The contract address.
    pub address: Address,
    /// Event signature to filter on, e.g. `AppEvent(bytes)`.
    /// All events of the contract are relayed when unset.
    #[serde(default)]
    pub event: Option<String>,
    /// The pallet handling the events of this app.
    pub pallet: String,
    /// The call handling the events of this app.
    pub call: String,
}

impl AppConfig {
    /// The parachain call receiving this application's messages.
    pub fn call_name(&self) -> CallName {
        CallName::new(&self.pallet, &self.call)
    }
}

/// An inbound channel contract.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InboundChannelConfig {
    /// The channel id.
    pub id: ChannelId,
    /// The contract address.
    pub address: Address,
}

/// Gas limits per transaction kind.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GasLimits {
    /// `submitInitialSignatureCommitment`.
    #[serde(default = "defaults::initial_signature_commitment_gas")]
    pub initial_signature_commitment: u64,
    /// `submitCompleteSignatureCommitment`.
    #[serde(default = "defaults::complete_signature_commitment_gas")]
    pub complete_signature_commitment: u64,
    /// Application `submit`.
    #[serde(default = "defaults::app_submit_gas")]
    pub app_submit: u64,
    /// Inbound channel `submit`.
    #[serde(default = "defaults::inbound_channel_gas")]
    pub inbound_channel: u64,
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            initial_signature_commitment:
                defaults::initial_signature_commitment_gas(),
            complete_signature_commitment:
                defaults::complete_signature_commitment_gas(),
            app_submit: defaults::app_submit_gas(),
            inbound_channel: defaults::inbound_channel_gas(),
        }
    }
}
