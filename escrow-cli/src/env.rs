use anyhow::{Context, Result};
use escrow_primitives::Address;

pub struct Provider {
	pub url: Option<String>,
	pub sender: Option<Address>,
}

impl Provider {
	pub fn from_env() -> Result<Self> {
		let sender = match std::env::var("ESCROW_SENDER") {
			Ok(sender) => Some(sender.parse().context("invalid var `ESCROW_SENDER`")?),
			Err(_) => None,
		};
		Ok(Self {
			url: std::env::var("PROVIDER_URL").ok(),
			sender,
		})
	}
}

/// Infura endpoints are configured with a `network` placeholder.
pub fn provider_url(url: &str, network: &str) -> String {
	if url.contains("infura") {
		url.replace("network", network)
	} else {
		url.to_string()
	}
}
