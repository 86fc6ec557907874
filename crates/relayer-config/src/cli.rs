use crate::ArtemisRelayerConfig;
use anyhow::Context;
use artemis_relayer_store::SledStore;
use directories_next::ProjectDirs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

/// Where the relayer keeps its files when no directory is given.
pub const PACKAGE_ID: [&str; 3] = ["network", "artemis", "artemis-relayer"];

/// Store subdirectory used when the config directory has no name.
const DEFAULT_NETWORK: &str = "default";

/// Relays messages and BEEFY commitments between Ethereum and a parachain.
///
/// $ artemis-relayer -vvv -c config/local
#[derive(Debug, StructOpt)]
#[structopt(name = "artemis-relayer")]
pub struct Opts {
    /// Log verbosity, repeat for more.
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory of the chain configuration files.
    ///
    /// Every `.toml` and `.json` file below it is merged, so the ethereum,
    /// parachain and relaychain sections may live in separate files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Directory of the listener cursors and BEEFY relay records.
    ///
    /// Defaults to a directory named after the config directory, so each
    /// network keeps its own cursors.
    #[structopt(
        long = "data-dir",
        value_name = "PATH",
        parse(from_os_str),
        conflicts_with = "tmp"
    )]
    pub data_dir: Option<PathBuf>,
    /// Keep cursors and relay records in a temporary store removed on exit.
    ///
    /// Every listener starts from its configured start block.
    #[structopt(long)]
    pub tmp: bool,
}

impl Opts {
    /// The config directory given on the command line, or the OS one.
    pub fn config_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.config_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.config_dir().to_path_buf()),
        }
    }

    /// Directory of the persistent store, `None` with `--tmp`.
    pub fn store_dir(&self) -> anyhow::Result<Option<PathBuf>> {
        if self.tmp {
            return Ok(None);
        }
        if let Some(dir) = &self.data_dir {
            return Ok(Some(dir.clone()));
        }
        let data_root = project_dirs()?.data_local_dir().to_path_buf();
        Ok(Some(network_store_dir(&data_root, &self.config_dir()?)))
    }
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("no home directory to derive the relayer directories from")
}

/// `<data_root>/<config dir name>/store`.
fn network_store_dir(data_root: &Path, config_dir: &Path) -> PathBuf {
    let network = config_dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_NETWORK);
    data_root.join(network).join("store")
}

/// Loads and validates the configuration found under `config_dir`.
pub fn load_config(config_dir: &Path) -> anyhow::Result<ArtemisRelayerConfig> {
    if !config_dir.is_dir() {
        anyhow::bail!("{} is not a directory", config_dir.display());
    }
    tracing::trace!("Loading Config from {} ..", config_dir.display());
    let config = crate::utils::load(config_dir)?;
    tracing::debug!(chains = config.chain_count(), "Config loaded");
    Ok(config)
}

/// Sets up the logger for the relayer, based on the verbosity level passed in.
///
/// `RUST_LOG` directives are honored on top of the verbosity.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // every `artemis_*` crate shares the prefix
    let directive: tracing_subscriber::filter::Directive =
        format!("artemis={log_level}").parse()?;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(directive);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // json lines for the integration tests to parse
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger.try_init().map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// Opens the store the listener cursors and relay records live in.
pub fn create_store(opts: &Opts) -> anyhow::Result<SledStore> {
    match opts.store_dir()? {
        Some(dir) => {
            tracing::debug!("Opening store at {}", dir.display());
            std::fs::create_dir_all(&dir).with_context(|| {
                format!("failed to create store directory {}", dir.display())
            })?;
            Ok(SledStore::open(dir)?)
        }
        None => {
            tracing::warn!(
                "Using a temporary store, cursors will not survive a restart"
            );
            Ok(SledStore::temporary()?)
        }
    }
}
