//! Engine configuration
//!
//! Settings are read from a TOML file and then overlaid with environment variables. A missing
//! file yields the defaults. Recognized overrides:
//!
//! - `<CODE>_REFRESH_INTERVAL_MS` (for example `ETH_REFRESH_INTERVAL_MS`)
//! - `CHAIN_DELAY_MS`, `FETCH_INTERVAL_MINUTES`
//! - `SOL_RPC_URL`, `ALERT_WEBHOOK_URL`

use crate::adapters::solana::SolanaSettings;
use crate::engine::{
	ChainSchedule, RetryPolicy, SchedulerSettings, SubscriptionSettings,
	scheduler::default_poll_interval,
};
use crate::models::Chain;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid value for {key}: {reason}")]
	InvalidValue { key: String, reason: String },
}

impl ConfigError {
	fn invalid(key: &str, reason: impl Into<String>) -> Self {
		ConfigError::InvalidValue {
			key: key.to_string(),
			reason: reason.into(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
	#[serde(default)]
	pub engine: EngineSection,
	#[serde(default)]
	pub retry: RetrySection,
	/// Keyed by chain code, e.g. `[chains.ETH]`
	#[serde(default)]
	pub chains: BTreeMap<String, ChainSection>,
	#[serde(default)]
	pub alerts: AlertsSection,
	#[serde(default)]
	pub solana: SolanaSection,
	/// Registrations restored at startup
	#[serde(default)]
	pub monitors: Vec<MonitorSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
	/// Directory for the JSON stores
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
	/// Delay between wallets within one chain tick
	#[serde(default = "default_inter_wallet_delay_ms")]
	pub inter_wallet_delay_ms: u64,
	#[serde(default = "default_resync_interval_minutes")]
	pub resync_interval_minutes: u64,
	#[serde(default = "default_debounce_ms")]
	pub debounce_ms: u64,
	/// Seen-hash capacity per subscribed address
	#[serde(default = "default_seen_capacity")]
	pub seen_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_base_delay_ms")]
	pub base_delay_ms: u64,
	#[serde(default = "default_max_delay_ms")]
	pub max_delay_ms: u64,
	#[serde(default = "default_jitter")]
	pub jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
	#[serde(default = "default_true")]
	pub enabled: bool,
	/// Falls back to the chain's default interval
	#[serde(default)]
	pub interval_ms: Option<u64>,
	/// Poll wallets that already have live push delivery
	#[serde(default)]
	pub poll_subscribed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsSection {
	/// Default target for monitors registered without one
	#[serde(default)]
	pub webhook_url: Option<String>,
	#[serde(default = "default_items_per_message")]
	pub items_per_message: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaSection {
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default = "default_sol_rpc_url")]
	pub rpc_url: String,
	#[serde(default)]
	pub ws_url: Option<String>,
	#[serde(default = "default_signature_limit")]
	pub signature_limit: usize,
	#[serde(default = "default_max_pages")]
	pub max_pages: usize,
	#[serde(default = "default_max_catchup_pages")]
	pub max_catchup_pages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSeed {
	pub chain: String,
	pub address: String,
	#[serde(default)]
	pub alert_target: Option<String>,
}

fn default_data_dir() -> PathBuf {
	PathBuf::from("data")
}
fn default_inter_wallet_delay_ms() -> u64 {
	400
}
fn default_resync_interval_minutes() -> u64 {
	30
}
fn default_debounce_ms() -> u64 {
	500
}
fn default_seen_capacity() -> usize {
	1000
}
fn default_max_attempts() -> u32 {
	3
}
fn default_base_delay_ms() -> u64 {
	5000
}
fn default_max_delay_ms() -> u64 {
	60_000
}
fn default_jitter() -> f64 {
	0.2
}
fn default_true() -> bool {
	true
}
fn default_items_per_message() -> usize {
	10
}
fn default_sol_rpc_url() -> String {
	"https://api.mainnet-beta.solana.com".to_string()
}
fn default_signature_limit() -> usize {
	50
}
fn default_max_catchup_pages() -> usize {
	20
}
fn default_max_pages() -> usize {
	2
}

impl Default for EngineSection {
	fn default() -> Self {
		Self {
			data_dir: default_data_dir(),
			inter_wallet_delay_ms: default_inter_wallet_delay_ms(),
			resync_interval_minutes: default_resync_interval_minutes(),
			debounce_ms: default_debounce_ms(),
			seen_capacity: default_seen_capacity(),
		}
	}
}

impl Default for RetrySection {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			base_delay_ms: default_base_delay_ms(),
			max_delay_ms: default_max_delay_ms(),
			jitter: default_jitter(),
		}
	}
}

impl Default for ChainSection {
	fn default() -> Self {
		Self {
			enabled: true,
			interval_ms: None,
			poll_subscribed: false,
		}
	}
}

impl Default for AlertsSection {
	fn default() -> Self {
		Self {
			webhook_url: None,
			items_per_message: default_items_per_message(),
		}
	}
}

impl Default for SolanaSection {
	fn default() -> Self {
		Self {
			enabled: true,
			rpc_url: default_sol_rpc_url(),
			ws_url: None,
			signature_limit: default_signature_limit(),
			max_pages: default_max_pages(),
			max_catchup_pages: default_max_catchup_pages(),
		}
	}
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
	value
		.trim()
		.parse::<T>()
		.map_err(|_| ConfigError::invalid(key, format!("'{}' is not a valid number", value)))
}

impl EngineConfig {
	/// Load config from a TOML file, then overlay environment variables.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let mut config = match std::fs::read_to_string(path) {
			Ok(contents) => Self::from_toml(&contents)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
			Err(e) => return Err(ConfigError::Io(e)),
		};
		config.apply_overrides(|key| std::env::var(key).ok())?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(contents)?)
	}

	/// Overlay values from `lookup`, normally the process environment.
	pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		for chain in Chain::ALL {
			let key = format!("{}_REFRESH_INTERVAL_MS", chain.code());
			if let Some(value) = lookup(&key) {
				let interval = parse_number::<u64>(&key, &value)?;
				self.chains
					.entry(chain.code().to_string())
					.or_default()
					.interval_ms = Some(interval);
			}
		}
		if let Some(value) = lookup("CHAIN_DELAY_MS") {
			self.engine.inter_wallet_delay_ms = parse_number("CHAIN_DELAY_MS", &value)?;
		}
		if let Some(value) = lookup("FETCH_INTERVAL_MINUTES") {
			self.engine.resync_interval_minutes = parse_number("FETCH_INTERVAL_MINUTES", &value)?;
		}
		if let Some(value) = lookup("SOL_RPC_URL") {
			self.solana.rpc_url = value;
		}
		if let Some(value) = lookup("ALERT_WEBHOOK_URL") {
			self.alerts.webhook_url = Some(value).filter(|url| !url.trim().is_empty());
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.retry.max_attempts == 0 {
			return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
		}
		if !(0.0..=1.0).contains(&self.retry.jitter) {
			return Err(ConfigError::invalid("retry.jitter", "must be between 0 and 1"));
		}
		if self.engine.resync_interval_minutes == 0 {
			return Err(ConfigError::invalid(
				"engine.resync_interval_minutes",
				"must be positive",
			));
		}
		if self.alerts.items_per_message == 0 {
			return Err(ConfigError::invalid(
				"alerts.items_per_message",
				"must be at least 1",
			));
		}
		for (code, section) in &self.chains {
			Chain::from_str(code).map_err(|e| ConfigError::invalid("chains", e.to_string()))?;
			if section.interval_ms == Some(0) {
				return Err(ConfigError::invalid(
					&format!("chains.{}.interval_ms", code),
					"must be positive",
				));
			}
		}
		for monitor in &self.monitors {
			Chain::from_str(&monitor.chain)
				.map_err(|e| ConfigError::invalid("monitors.chain", e.to_string()))?;
		}
		Ok(())
	}

	fn chain_section(&self, chain: Chain) -> Option<&ChainSection> {
		self.chains
			.iter()
			.find(|(code, _)| Chain::from_str(code).ok() == Some(chain))
			.map(|(_, section)| section)
	}

	pub fn scheduler_settings(&self) -> SchedulerSettings {
		let chains = Chain::ALL
			.iter()
			.filter_map(|chain| {
				let section = self.chain_section(*chain).cloned().unwrap_or_default();
				section.enabled.then(|| ChainSchedule {
					chain: *chain,
					interval: section
						.interval_ms
						.map(Duration::from_millis)
						.unwrap_or_else(|| default_poll_interval(*chain)),
					poll_subscribed: section.poll_subscribed,
				})
			})
			.collect();

		SchedulerSettings {
			chains,
			inter_wallet_delay: Duration::from_millis(self.engine.inter_wallet_delay_ms),
			resync_interval: Duration::from_secs(self.engine.resync_interval_minutes * 60),
		}
	}

	pub fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy {
			max_attempts: self.retry.max_attempts,
			base_delay: Duration::from_millis(self.retry.base_delay_ms),
			max_delay: Duration::from_millis(self.retry.max_delay_ms),
			jitter: self.retry.jitter,
		}
	}

	pub fn subscription_settings(&self) -> SubscriptionSettings {
		SubscriptionSettings {
			debounce: Duration::from_millis(self.engine.debounce_ms),
			seen_capacity: self.engine.seen_capacity,
		}
	}

	pub fn solana_settings(&self) -> SolanaSettings {
		SolanaSettings {
			rpc_url: self.solana.rpc_url.clone(),
			ws_url: self.solana.ws_url.clone(),
			signature_limit: self.solana.signature_limit,
			max_pages: self.solana.max_pages,
			max_catchup_pages: self.solana.max_catchup_pages,
			..SolanaSettings::default()
		}
	}

	/// Seed registrations, with the default webhook filled in where no target is given
	pub fn seed_monitors(&self) -> Result<Vec<(Chain, String, Option<String>)>, ConfigError> {
		self.monitors
			.iter()
			.map(|seed| {
				let chain = Chain::from_str(&seed.chain)
					.map_err(|e| ConfigError::invalid("monitors.chain", e.to_string()))?;
				let target = seed
					.alert_target
					.clone()
					.or_else(|| self.alerts.webhook_url.clone());
				Ok((chain, seed.address.clone(), target))
			})
			.collect()
	}
}
