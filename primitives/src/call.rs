use crate::{Address, Amount, BlockNumber, TxHash};
use serde::{Deserialize, Serialize};

/// State mutating calls on the successor escrow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowCall {
	MigrateAccountEscrowBalances {
		accounts: Vec<Address>,
		balances: Vec<Amount>,
		vested: Vec<Amount>,
	},
	ImportVestingSchedule {
		accounts: Vec<Address>,
		amounts: Vec<Amount>,
	},
}

impl EscrowCall {
	pub fn kind(&self) -> CallKind {
		match self {
			Self::MigrateAccountEscrowBalances { .. } => CallKind::Migrate,
			Self::ImportVestingSchedule { .. } => CallKind::Import,
		}
	}

	/// Number of accounts carried by the call.
	pub fn len(&self) -> usize {
		match self {
			Self::MigrateAccountEscrowBalances { accounts, .. } => accounts.len(),
			Self::ImportVestingSchedule { accounts, .. } => accounts.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallKind {
	Migrate,
	Import,
}

impl CallKind {
	pub fn method(&self) -> &'static str {
		match self {
			Self::Migrate => "migrateAccountEscrowBalances",
			Self::Import => "importVestingSchedule",
		}
	}
}

impl std::fmt::Display for CallKind {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.write_str(self.method())
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
	Success,
	Reverted { reason: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
	pub hash: TxHash,
	pub block: BlockNumber,
	pub gas_used: u64,
	pub status: TxStatus,
}

impl TxReceipt {
	pub fn is_success(&self) -> bool {
		self.status == TxStatus::Success
	}
}
