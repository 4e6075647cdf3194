use crate::Amount;
use anyhow::Result;

/// Formats token amounts with exact integer arithmetic.
pub struct AmountFormatter<'a> {
	decimals: u32,
	symbol: &'a str,
}

impl<'a> AmountFormatter<'a> {
	pub fn new(decimals: u32, symbol: &'a str) -> Self {
		Self { decimals, symbol }
	}

	fn base(&self) -> Amount {
		Amount::from(10u64).pow(Amount::from(self.decimals))
	}

	pub fn format(&self, amount: Amount) -> String {
		let base = self.base();
		let whole = amount / base;
		let frac = amount % base;
		if frac.is_zero() {
			return format!("{whole} {}", self.symbol);
		}
		let frac = format!("{:0>width$}", frac.to_string(), width = self.decimals as usize);
		let frac = frac.trim_end_matches('0');
		format!("{whole}.{frac} {}", self.symbol)
	}
}

fn parse_decimal(amount: &str) -> Result<Amount> {
	Amount::from_str_radix(amount, 10).map_err(|_| anyhow::anyhow!("invalid amount `{amount}`"))
}

/// Parses a base unit amount given either in decimal or as `0x` prefixed hex.
pub fn parse_amount(amount: &str) -> Result<Amount> {
	let amount = amount.trim();
	if let Some(hex) = amount.strip_prefix("0x") {
		return Amount::from_str_radix(hex, 16)
			.map_err(|_| anyhow::anyhow!("invalid hex amount `{amount}`"));
	}
	parse_decimal(amount)
}

/// Serializes amounts as decimal strings. Deserialization also accepts hex
/// strings and plain JSON integers.
pub mod decimal {
	use super::parse_amount;
	use crate::Amount;
	use serde::de::Error;
	use serde::{Deserialize, Deserializer, Serializer};

	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Repr {
		Str(String),
		Num(u64),
	}

	impl Repr {
		fn into_amount(self) -> anyhow::Result<Amount> {
			match self {
				Self::Str(amount) => parse_amount(&amount),
				Self::Num(amount) => Ok(Amount::from(amount)),
			}
		}
	}

	pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&amount.to_string())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
		Repr::deserialize(deserializer)?.into_amount().map_err(D::Error::custom)
	}

	pub mod option {
		use super::Repr;
		use crate::Amount;
		use serde::de::Error;
		use serde::{Deserialize, Deserializer, Serializer};

		pub fn serialize<S: Serializer>(
			amount: &Option<Amount>,
			serializer: S,
		) -> Result<S::Ok, S::Error> {
			match amount {
				Some(amount) => serializer.serialize_some(&amount.to_string()),
				None => serializer.serialize_none(),
			}
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			deserializer: D,
		) -> Result<Option<Amount>, D::Error> {
			Option::<Repr>::deserialize(deserializer)?
				.map(Repr::into_amount)
				.transpose()
				.map_err(D::Error::custom)
		}
	}
}
