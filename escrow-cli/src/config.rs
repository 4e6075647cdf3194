use anyhow::{Context, Result};
use escrow_primitives::{Address, BlockNumber};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	pub networks: HashMap<String, NetworkConfig>,
}

impl Config {
	pub fn from_file(path: &Path) -> Result<Self> {
		let config = std::fs::read_to_string(path)
			.with_context(|| format!("failed to read config {}", path.display()))?;
		Ok(serde_yaml::from_str(&config)?)
	}

	pub fn network(&self, network: &str) -> Result<&NetworkConfig> {
		self.networks.get(network).with_context(|| format!("no config for network `{network}`"))
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backend {
	Rust,
	Evm,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
	pub backend: Backend,
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub legacy_escrow: Option<Address>,
	#[serde(default)]
	pub escrow: Option<Address>,
	#[serde(default)]
	pub sender: Option<Address>,
	#[serde(default)]
	pub requires_account_list: bool,
	#[serde(default)]
	pub from_block: BlockNumber,
	#[serde(default)]
	pub log_chunk_size: Option<u64>,
	#[serde(default)]
	pub gas_limit: Option<u64>,
}
