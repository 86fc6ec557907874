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


//! Artemis Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use tokio::signal::unix;

use artemis_relayer_config::cli::{create_store, load_config, setup_logger, Opts};
use artemis_relayer_context::RelayerContext;
use artemis_relayer_utils::probe;
use artemis_relayer_utils::task_group::TaskGroup;

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(&args.config_dir()?)?;

    // cursors and relay records, scoped to the network of the config
    let store = create_store(&args)?;

    // The RelayerContext holds the configuration, the store and the root
    // cancellation scope of every task.
    let ctx = RelayerContext::new(config, store);
    let group = TaskGroup::with_parent(&ctx.shutdown_signal());

    // start all background services.
    // this does not block, the tasks run in the group.
    let mut chains = match artemis_relayer::service::ignite(&ctx, &group).await {
        Ok(chains) => chains,
        Err(e) => {
            group.wait().await.ok();
            return Err(e.into());
        }
    };
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true
    );
    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let shutdown = || {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            shutdown = true
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
    };
    let outcome = tokio::select! {
        res = group.wait() => res,
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown();
            group.wait().await
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown();
            group.wait().await
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
            shutdown();
            group.wait().await
        },
    };
    for chain in chains.iter_mut() {
        chain.stop();
    }
    match outcome {
        Ok(()) => {
            tracing::info!("Clean Exit ..");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Relayer failed");
            Err(e.into())
        }
    }
}
