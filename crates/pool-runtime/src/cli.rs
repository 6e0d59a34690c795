//! # Command Line
//!
//! `coldstakepool --datadir=~/stakepoolDemo --network testnet`

use crate::settings::PoolMode;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// Chain the node runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Sub-directory of the node data directory used by this chain.
    pub fn subdir(&self) -> Option<&'static str> {
        match self {
            Network::Mainnet => None,
            Network::Testnet => Some("testnet"),
            Network::Regtest => Some("regtest"),
        }
    }

    /// Node RPC port when the settings do not name one.
    pub fn default_rpc_port(&self) -> u16 {
        match self {
            Network::Mainnet => 51725,
            Network::Testnet => 51925,
            Network::Regtest => 51936,
        }
    }
}

/// Cold-staking pool reward accounting and payout engine.
#[derive(Parser, Debug, Clone)]
#[command(name = "coldstakepool", version)]
pub struct Cli {
    /// Node data directory [default: ~/.ghost]
    #[arg(long)]
    pub datadir: Option<PathBuf>,

    /// Pool directory holding stakepool.json and the ledger
    /// [default: <datadir>/stakepool]
    #[arg(long)]
    pub pooldir: Option<PathBuf>,

    /// Chain the node runs on
    #[arg(long, value_enum, default_value_t = Network::Mainnet)]
    pub network: Network,

    /// Override the mode set in stakepool.json
    #[arg(long, value_enum)]
    pub mode: Option<PoolMode>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Node data directory, with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        match &self.datadir {
            Some(dir) => expand_home(dir),
            None => expand_home(Path::new("~/.ghost")),
        }
    }

    /// Pool directory.
    ///
    /// An explicit `--datadir` holds the pool directly; the default data
    /// directory keeps one pool per chain.
    pub fn pool_dir(&self) -> PathBuf {
        if let Some(dir) = &self.pooldir {
            return expand_home(dir);
        }
        let data_dir = self.data_dir();
        match (&self.datadir, self.network.subdir()) {
            (None, Some(chain)) => data_dir.join(chain).join("stakepool"),
            _ => data_dir.join("stakepool"),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
