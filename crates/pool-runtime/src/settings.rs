//! # Pool Settings
//!
//! `stakepool.json` in the pool directory, as written by the pool
//! preparation tooling, plus the engine tunables.
//!
//! ```json
//! {
//!     "mode": "master",
//!     "startheight": 200000,
//!     "pooladdress": "<stake-only address>",
//!     "rewardaddress": "<reward wallet address>",
//!     "parameters": [
//!         { "height": 0, "poolfeepercent": 3, "stakebonuspercent": 5,
//!           "payoutthreshold": 0.5, "minblocksbetweenpayments": 100,
//!           "minoutputvalue": 0.1 }
//!     ]
//! }
//! ```
//!
//! Percentages become basis points and coin values minor units here, once;
//! nothing downstream sees a float.

use clap::ValueEnum;
use csp_01_chain_watcher::WatcherConfig;
use csp_04_payout_scheduler::SchedulerConfig;
use csp_05_recovery::RecoveryConfig;
use serde::{Deserialize, Serialize};
use shared_types::{
    coins_to_amount, Amount, BlockHeight, ParameterError, ParameterSchedule, PoolParameters,
    RetryPolicy,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings file name inside the pool directory.
pub const SETTINGS_FILE: &str = "stakepool.json";

/// Whether this process pays out or only follows the pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// Accounts and pays out.
    #[default]
    Master,
    /// Accounts only; never constructs the payout scheduler.
    Observer,
}

/// Settings errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parameters[{index}].{field}: {reason}")]
    InvalidParameter {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("Invalid parameter schedule: {0}")]
    Schedule(#[from] ParameterError),

    #[error("Missing setting: {0}")]
    Missing(&'static str),
}

/// One `parameters[]` entry as written in the settings file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSettings {
    pub height: BlockHeight,
    pub poolfeepercent: f64,
    pub stakebonuspercent: f64,
    /// Whole coins.
    pub payoutthreshold: f64,
    pub minblocksbetweenpayments: u64,
    /// Whole coins.
    pub minoutputvalue: f64,
}

impl ParameterSettings {
    fn to_parameters(&self, index: usize) -> Result<PoolParameters, SettingsError> {
        Ok(PoolParameters {
            height: self.height,
            pool_fee_bps: percent_to_bps(index, "poolfeepercent", self.poolfeepercent)?,
            stake_bonus_bps: percent_to_bps(index, "stakebonuspercent", self.stakebonuspercent)?,
            payout_threshold: coins(index, "payoutthreshold", self.payoutthreshold)?,
            min_blocks_between_payments: self.minblocksbetweenpayments,
            min_output_value: coins(index, "minoutputvalue", self.minoutputvalue)?,
        })
    }
}

fn percent_to_bps(index: usize, field: &'static str, percent: f64) -> Result<u32, SettingsError> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(SettingsError::InvalidParameter {
            index,
            field,
            reason: format!("{} is not a percentage", percent),
        });
    }
    Ok((percent * 100.0).round() as u32)
}

fn coins(index: usize, field: &'static str, value: f64) -> Result<Amount, SettingsError> {
    coins_to_amount(value).ok_or_else(|| SettingsError::InvalidParameter {
        index,
        field,
        reason: format!("{} is not a coin amount", value),
    })
}

fn default_rpchost() -> String {
    "127.0.0.1".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_payout_interval() -> u64 {
    60
}
fn default_min_confirmations() -> u64 {
    100
}
fn default_payout_confirmations() -> u32 {
    10
}
fn default_max_outputs() -> usize {
    100
}
fn default_review_after() -> u64 {
    720
}
fn default_rpc_timeout() -> u64 {
    30
}
fn default_degrade_after() -> u32 {
    3
}
fn default_max_reorg_depth() -> u64 {
    1_000
}

/// Contents of `stakepool.json`.
///
/// Keys the engine does not use (`debug`, `zmqhost`, `htmlport`, ...) are
/// accepted and ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default)]
    pub mode: PoolMode,
    #[serde(default)]
    pub ghostbindir: Option<PathBuf>,
    #[serde(default)]
    pub ghostdatadir: Option<PathBuf>,
    /// First block the pool accounts for.
    #[serde(default)]
    pub startheight: BlockHeight,
    /// Stake-only address the pool's cold-stake outputs are delegated to.
    pub pooladdress: String,
    /// Address of the reward wallet paying out.
    pub rewardaddress: String,

    #[serde(default = "default_rpchost")]
    pub rpchost: String,
    #[serde(default)]
    pub rpcport: Option<u16>,
    /// When unset the node's `.cookie` file is used.
    #[serde(default)]
    pub rpcuser: Option<String>,
    #[serde(default)]
    pub rpcpassword: Option<String>,
    /// Node version the pool was prepared against (`subversion` prefix).
    #[serde(default)]
    pub coreversion: Option<String>,

    pub parameters: Vec<ParameterSettings>,

    #[serde(default = "default_poll_interval")]
    pub pollintervalsecs: u64,
    #[serde(default = "default_payout_interval")]
    pub payoutintervalsecs: u64,
    #[serde(default = "default_min_confirmations")]
    pub minconfirmations: u64,
    #[serde(default = "default_payout_confirmations")]
    pub payoutconfirmations: u32,
    #[serde(default = "default_max_outputs")]
    pub maxoutputspertx: usize,
    #[serde(default = "default_review_after")]
    pub reviewafterblocks: u64,
    #[serde(default = "default_rpc_timeout")]
    pub rpctimeoutsecs: u64,
    #[serde(default = "default_degrade_after")]
    pub degradeafter: u32,
    #[serde(default = "default_max_reorg_depth")]
    pub maxreorgdepth: u64,
}

impl PoolSettings {
    /// Load `stakepool.json` from the pool directory.
    pub fn load(pool_dir: &Path) -> Result<Self, SettingsError> {
        let path = pool_dir.join(SETTINGS_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let settings = Self::from_json(&text)?;
        Ok(settings)
    }

    /// Parse and validate settings text.
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: PoolSettings = serde_json::from_str(text)?;
        if settings.pooladdress.is_empty() {
            return Err(SettingsError::Missing("pooladdress"));
        }
        if settings.mode == PoolMode::Master && settings.rewardaddress.is_empty() {
            return Err(SettingsError::Missing("rewardaddress"));
        }
        settings.schedule()?;
        Ok(settings)
    }

    /// Height-indexed fee and payout parameters.
    pub fn schedule(&self) -> Result<ParameterSchedule, SettingsError> {
        let entries = self
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| p.to_parameters(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ParameterSchedule::new(entries)?)
    }

    /// Timeout and backoff for every node call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            call_timeout_ms: self.rpctimeoutsecs.saturating_mul(1_000),
            ..RetryPolicy::default()
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            poll_interval_ms: self.pollintervalsecs.max(1).saturating_mul(1_000),
            min_confirmations: self.minconfirmations,
            start_height: self.startheight,
            retry: self.retry_policy(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            payout_interval_ms: self.payoutintervalsecs.max(1).saturating_mul(1_000),
            max_outputs_per_tx: self.maxoutputspertx,
            payout_confirmations: self.payoutconfirmations,
            review_after_blocks: self.reviewafterblocks,
            retry: self.retry_policy(),
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            payout_confirmations: self.payoutconfirmations,
            max_reorg_depth: self.maxreorgdepth,
            retry: self.retry_policy(),
        }
    }
}
