use crate::{amount::decimal, Address, Amount, CallKind, Timestamp, TxHash};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Candidate account as supplied by a static account list or recovered from
/// the event history. Balances are optional; when missing they are read
/// from the legacy escrow during classification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
	pub address: Address,
	#[serde(default, with = "decimal::option", skip_serializing_if = "Option::is_none")]
	pub balance_of: Option<Amount>,
	#[serde(default, with = "decimal::option", skip_serializing_if = "Option::is_none")]
	pub vested_balance_of: Option<Amount>,
}

impl AccountRecord {
	pub fn new(address: Address) -> Self {
		Self {
			address,
			balance_of: None,
			vested_balance_of: None,
		}
	}

	pub fn with_balances(address: Address, balance: Amount, vested: Amount) -> Self {
		Self {
			address,
			balance_of: Some(balance),
			vested_balance_of: Some(vested),
		}
	}

	/// Both balances, if the record supplies them.
	pub fn balances(&self) -> Option<(Amount, Amount)> {
		Some((self.balance_of?, self.vested_balance_of?))
	}
}

/// A classified account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
	pub address: Address,
	#[serde(rename = "balance", with = "decimal")]
	pub legacy_balance: Amount,
	#[serde(rename = "vested", with = "decimal")]
	pub legacy_vested: Amount,
	#[serde(rename = "hasEscrowBalance")]
	pub already_migrated: bool,
}

/// A single `(time, amount)` pair of a legacy vesting schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingEntry {
	pub timestamp: Timestamp,
	#[serde(with = "decimal")]
	pub amount: Amount,
}

/// Matured vesting entries of an account collapsed into one import record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedEntry {
	pub address: Address,
	#[serde(with = "decimal")]
	pub amount: Amount,
}

/// A batch transaction that was accepted by the network but not yet
/// observed as confirmed. Carries the batch so a later run can record it
/// once the receipt shows up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
	pub kind: CallKind,
	pub hash: TxHash,
	pub size: usize,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub accounts: Vec<Account>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub entries: Vec<FlattenedEntry>,
}

/// Aggregate totals of both escrows after a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
	#[serde(with = "decimal")]
	pub legacy_total: Amount,
	#[serde(with = "decimal")]
	pub successor_total: Amount,
}

impl Reconciliation {
	pub fn is_match(&self) -> bool {
		self.legacy_total == self.successor_total
	}
}

impl std::fmt::Display for Reconciliation {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		if self.is_match() {
			write!(f, "totals match: {}", self.successor_total)
		} else {
			write!(
				f,
				"total mismatch: successor {} versus legacy {}",
				self.successor_total, self.legacy_total
			)
		}
	}
}

/// Persisted output of a migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
	#[serde(default)]
	pub network: String,
	#[serde(default)]
	pub started_at: Timestamp,
	#[serde(default)]
	pub dry_run: bool,
	#[serde(default)]
	pub skipped_accounts: Vec<Account>,
	pub migrated_accounts: Vec<Account>,
	pub imported_vested_entries: Vec<FlattenedEntry>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pending_transaction: Option<PendingTransaction>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reconciliation: Option<Reconciliation>,
}

impl MigrationResult {
	/// Loads and validates an artifact written by an earlier run.
	pub fn load(path: &Path) -> Result<Self> {
		let json = std::fs::read_to_string(path)
			.with_context(|| format!("failed to read {}", path.display()))?;
		let result: Self = serde_json::from_str(&json)
			.with_context(|| format!("failed to parse {}", path.display()))?;
		result.validate().with_context(|| format!("invalid artifact {}", path.display()))?;
		Ok(result)
	}

	/// Checks the structural invariants of a loaded artifact.
	pub fn validate(&self) -> Result<()> {
		let mut seen = BTreeSet::new();
		for account in &self.migrated_accounts {
			anyhow::ensure!(
				!account.already_migrated,
				"migrated account {} is flagged as already migrated",
				account.address
			);
			anyhow::ensure!(
				seen.insert(account.address),
				"duplicate migrated account {}",
				account.address
			);
		}
		let mut seen = BTreeSet::new();
		for entry in &self.imported_vested_entries {
			anyhow::ensure!(!entry.amount.is_zero(), "zero amount entry for {}", entry.address);
			anyhow::ensure!(
				seen.insert(entry.address),
				"duplicate imported entry {}",
				entry.address
			);
		}
		Ok(())
	}

	/// Sum of the legacy balances of all migrated accounts.
	pub fn migrated_total(&self) -> Option<Amount> {
		self.migrated_accounts
			.iter()
			.try_fold(Amount::ZERO, |total, account| total.checked_add(account.legacy_balance))
	}
}
