use config::{Config, File};
use std::path::{Path, PathBuf};

use super::*;

/// Prefix of the environment variables merged over the config files.
pub const ENV_PREFIX: &str = "ARTEMIS";

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> artemis_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(artemis_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`ArtemisRelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> artemis_relayer_utils::Result<ArtemisRelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of ARTEMIS).
    let builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX).separator("_"),
    );
    let cfg = builder.build()?;
    // and finally deserialize the config and post-process it
    let config: Result<
        ArtemisRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files and
///
/// Returns `Ok(ArtemisRelayerConfig)` on success, or an error on failure.
///
/// # Arguments
///
/// * `path` - The path to the configuration directory
///
/// # Example
///
/// ```no_run
/// use artemis_relayer_config::utils::load;
///
/// let path = "/path/to/config";
/// let _ = load(path);
/// ```
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> artemis_relayer_utils::Result<ArtemisRelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: ArtemisRelayerConfig,
) -> artemis_relayer_utils::Result<ArtemisRelayerConfig> {
    tracing::trace!("Checking configration sanity ...");
    config.verify()?;

    if let Some(ethereum) = config.ethereum.as_mut() {
        ethereum.apps.sort_by_key(|app| app.address);
        ethereum.trusted_signers.sort();
        ethereum.trusted_signers.dedup();
        if ethereum.trusted_signers.is_empty() && !ethereum.apps.is_empty() {
            tracing::warn!(
                "!!WARNING!!: No trusted signers configured, \
                application messages will not be accepted by the Ethereum writer"
            );
        }
    }
    if config.relay.channel_capacity == 0 {
        tracing::warn!("channel-capacity of 0 is not allowed, using 1");
        config.relay.channel_capacity = 1;
    }

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_KEY: &str =
        "0x8075991ce870b93a8870eca0c0f91913d12f47948ca0fd25b49c6fa7cdbeee8b";

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn loads_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "ethereum.toml",
            &format!(
                r#"
[ethereum]
endpoint = "ws://localhost:8546"
private-key = "{DEV_KEY}"
beefy-light-client = "0x8cf6147918a5cbb672703f879f385036f8793a24"
trusted-signers = ["0xbe5be5f4d0f9a3e4b0bf1cec6bdb1a6e05a1b1f0"]

[[ethereum.apps]]
name = "eth"
address = "0x774667629726ec1fabebcec0d9139bd1c8f72a23"
pallet = "ETH"
call = "mint"

[[ethereum.inbound-channels]]
id = 0
address = "0x2ffa5ecdbe006d30397c7636d3e015eee251369f"
"#
            ),
        );
        write(
            dir.path(),
            "substrate.json",
            r#"{
  "parachain": { "endpoint": "ws://localhost:11144", "suri": "//Relay" },
  "relaychain": { "endpoint": "ws://localhost:9944" },
  "relay": { "beefy": { "validator-selection": "random" } }
}"#,
        );

        let config = load(dir.path()).unwrap();
        let ethereum = config.ethereum.unwrap();
        assert_eq!(ethereum.descendants_until_final, 35);
        assert_eq!(ethereum.beefy_block_delay, 45);
        assert_eq!(ethereum.gas_limits.initial_signature_commitment, 5_000_000);
        assert_eq!(ethereum.inbound_channels[0].id.0, 0);
        assert_eq!(ethereum.apps[0].call_name().to_string(), "ETH.mint");
        let parachain = config.parachain.unwrap();
        assert_eq!(parachain.max_watched_extrinsics, 20);
        assert_eq!(config.relay.channel_capacity, 64);
        assert_eq!(config.relay.retry.interval_ms, 10_000);
        assert_eq!(config.relay.retry.max_retries, None);
        assert_eq!(
            config.relay.beefy.validator_selection,
            artemis_relayer_types::beefy::ValidatorSelection::Random
        );
    }

    #[test]
    fn relaychain_requires_the_beefy_light_client() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "config.toml",
            &format!(
                r#"
[ethereum]
endpoint = "ws://localhost:8546"
private-key = "{DEV_KEY}"

[relaychain]
endpoint = "ws://localhost:9944"
"#
            ),
        );
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            artemis_relayer_utils::Error::MissingConfig(
                "ethereum.beefy-light-client"
            )
        ));
    }

    #[test]
    fn a_single_chain_is_not_enough() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "config.toml",
            "[parachain]\nendpoint = \"ws://localhost:11144\"\nsuri = \"//Relay\"\n",
        );
        assert!(load(dir.path()).is_err());
    }
}
