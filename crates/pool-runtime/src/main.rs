//! # coldstakepool
//!
//! Reward accounting and payout engine for a Ghost cold-staking pool.
//!
//! ```text
//! coldstakepool --datadir=~/.ghost --network testnet
//! ```
//!
//! Reads `stakepool.json` from the pool directory, attaches to the node
//! over JSON-RPC and runs until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use pool_runtime::adapters::{GhostRpcClient, GhostRpcConfig, RpcAuth};
use pool_runtime::{Cli, PoolRuntime, PoolSettings, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level {:?}", level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Cannot install log subscriber: {}", e))
}

/// Node connection from the settings, falling back to the cookie file.
fn rpc_config(cli: &Cli, settings: &PoolSettings) -> Result<GhostRpcConfig> {
    let port = settings
        .rpcport
        .unwrap_or_else(|| cli.network.default_rpc_port());
    let auth = match (&settings.rpcuser, &settings.rpcpassword) {
        (Some(user), Some(password)) => RpcAuth::new(user, password),
        _ => {
            let mut cookie: PathBuf = settings
                .ghostdatadir
                .clone()
                .unwrap_or_else(|| cli.data_dir());
            if let Some(chain) = cli.network.subdir() {
                cookie.push(chain);
            }
            cookie.push(".cookie");
            RpcAuth::from_cookie(&cookie)
                .with_context(|| format!("No rpcuser/rpcpassword set and cannot read {}", cookie.display()))?
        }
    };
    Ok(GhostRpcConfig {
        url: format!("http://{}:{}", settings.rpchost, port),
        auth,
        timeout: Duration::from_secs(settings.rpctimeoutsecs.max(1)),
        pool_address: settings.pooladdress.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let pool_dir = cli.pool_dir();
    let mut settings = PoolSettings::load(&pool_dir)
        .with_context(|| format!("Cannot load pool settings from {}", pool_dir.display()))?;
    if let Some(mode) = cli.mode {
        settings.mode = mode;
    }
    let config = RuntimeConfig::from_settings(&settings)?;

    let node = Arc::new(GhostRpcClient::new(rpc_config(&cli, &settings)?)?);
    let runtime = PoolRuntime::open(config, &pool_dir, node.clone(), node)?;

    runtime.start().await?;

    info!("Pool is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
