use anyhow::Result;
use futures::stream::BoxStream;
use std::ops::Range;
use std::time::Duration;

mod account;
mod amount;
mod call;

pub use crate::account::*;
pub use crate::amount::*;
pub use crate::call::*;

pub use alloy_primitives::{Address, B256, U256};

/// Token amount in base units.
pub type Amount = U256;
/// Block number on the ledger.
pub type BlockNumber = u64;
/// Unix timestamp in seconds.
pub type Timestamp = u64;
/// Transaction hash.
pub type TxHash = B256;

/// One of the two escrow contracts taking part in a migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Escrow {
	Legacy,
	Successor,
}

impl std::fmt::Display for Escrow {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Legacy => f.write_str("legacy"),
			Self::Successor => f.write_str("successor"),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
	pub number: BlockNumber,
	pub timestamp: Timestamp,
}

/// A `VestingEntryCreated` event emitted by the legacy escrow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VestingEntryCreated {
	pub beneficiary: Address,
	pub time: Timestamp,
	pub value: Amount,
	pub block: BlockNumber,
}

#[async_trait::async_trait]
pub trait IChain: Send + Sync {
	/// Network name.
	fn network(&self) -> &str;

	/// Token decimals and symbol.
	fn currency(&self) -> (u32, &str) {
		(18, "SNX")
	}

	/// Formats an amount into a string.
	fn format_amount(&self, amount: Amount) -> String {
		let (decimals, symbol) = self.currency();
		AmountFormatter::new(decimals, symbol).format(amount)
	}

	/// Latest block number and timestamp.
	async fn latest_block(&self) -> Result<BlockInfo>;
}

/// Read and write access to the legacy and successor escrow contracts.
#[async_trait::async_trait]
pub trait IEscrowLedger: IChain {
	/// `totalEscrowedAccountBalance(account)` on either contract.
	async fn total_escrowed_account_balance(
		&self,
		escrow: Escrow,
		account: Address,
	) -> Result<Amount>;

	/// `totalVestedAccountBalance(account)` on the legacy contract.
	async fn total_vested_account_balance(&self, account: Address) -> Result<Amount>;

	/// `numVestingEntries(account)` on the successor contract.
	async fn num_vesting_entries(&self, account: Address) -> Result<u64>;

	/// `checkAccountSchedule(account)` on the legacy contract, as the flat
	/// `[time, amount, time, amount, ...]` sequence the contract returns.
	async fn check_account_schedule(&self, account: Address) -> Result<Vec<Amount>>;

	/// `migrateEntriesThresholdAmount()` on the successor contract.
	async fn migrate_entries_threshold_amount(&self) -> Result<Amount>;

	/// `totalEscrowedBalance()` on either contract.
	async fn total_escrowed_balance(&self, escrow: Escrow) -> Result<Amount>;

	/// Lazily replays `VestingEntryCreated` events of the legacy contract.
	fn vesting_entry_created(
		&self,
		blocks: Range<BlockNumber>,
	) -> BoxStream<'_, Result<VestingEntryCreated>>;

	/// Sends a state mutating call to the successor contract and returns
	/// once the network accepted it.
	async fn submit(&self, call: &EscrowCall) -> Result<TxHash>;

	/// Waits until the transaction is included. Returns `None` when the
	/// timeout elapses first.
	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		timeout: Option<Duration>,
	) -> Result<Option<TxReceipt>>;
}
