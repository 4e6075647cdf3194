use anyhow::Result;
use escrow_primitives::{
	Address, Amount, BlockInfo, BlockNumber, Escrow, EscrowCall, IChain, IEscrowLedger, TxHash,
	TxReceipt, TxStatus, VestingEntryCreated,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const LATEST_BLOCK: BlockNumber = 100;
pub const LATEST_TIMESTAMP: u64 = 1_000_000;

#[derive(Default)]
struct State {
	legacy: HashMap<Address, (Amount, Amount)>,
	schedules: HashMap<Address, Vec<Amount>>,
	events: Vec<VestingEntryCreated>,
	successor: HashMap<Address, Amount>,
	vesting_entries: HashMap<Address, u64>,
	threshold: Amount,
	legacy_total: Amount,
	successor_total: Amount,
	calls: Vec<EscrowCall>,
	receipts: HashMap<TxHash, TxReceipt>,
	submit_attempts: usize,
	reads: usize,
	legacy_reads: usize,
	fail_reads: bool,
	fail_submit_at: Option<usize>,
	revert_at: Option<(usize, String)>,
	withhold_receipts: bool,
	fail_receipts: bool,
}

/// In-memory ledger that records mutating calls and injects failures.
#[derive(Default)]
pub struct MockLedger {
	state: Mutex<State>,
}

impl MockLedger {
	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap()
	}

	fn read(&self, legacy: bool) -> Result<MutexGuard<'_, State>> {
		let mut state = self.state();
		state.reads += 1;
		if legacy {
			state.legacy_reads += 1;
		}
		anyhow::ensure!(!state.fail_reads, "injected read failure");
		Ok(state)
	}

	pub fn seed(&self, address: Address, balance: u64, vested: u64, schedule: &[(u64, u64)]) {
		let mut state = self.state();
		let balance = Amount::from(balance);
		state.legacy.insert(address, (balance, Amount::from(vested)));
		state.legacy_total += balance;
		let flat = schedule.iter().flat_map(|(t, a)| [Amount::from(*t), Amount::from(*a)]).collect();
		state.schedules.insert(address, flat);
	}

	pub fn emit_event(&self, beneficiary: Address, block: BlockNumber) {
		self.state().events.push(VestingEntryCreated {
			beneficiary,
			time: 0,
			value: Amount::from(1u64),
			block,
		});
	}

	pub fn set_successor_balance(&self, address: Address, balance: u64) {
		let mut state = self.state();
		state.successor.insert(address, Amount::from(balance));
		state.successor_total += Amount::from(balance);
	}

	pub fn set_vesting_entries(&self, address: Address, entries: u64) {
		self.state().vesting_entries.insert(address, entries);
	}

	pub fn set_threshold(&self, threshold: u64) {
		self.state().threshold = Amount::from(threshold);
	}

	pub fn set_totals(&self, legacy: u64, successor: u64) {
		let mut state = self.state();
		state.legacy_total = Amount::from(legacy);
		state.successor_total = Amount::from(successor);
	}

	pub fn fail_reads(&self, fail: bool) {
		self.state().fail_reads = fail;
	}

	/// Rejects the `index`th submission.
	pub fn fail_submit_at(&self, index: usize) {
		self.state().fail_submit_at = Some(index);
	}

	/// Includes the `index`th submission as reverted.
	pub fn revert_at(&self, index: usize, reason: &str) {
		self.state().revert_at = Some((index, reason.into()));
	}

	pub fn withhold_receipts(&self, withhold: bool) {
		self.state().withhold_receipts = withhold;
	}

	/// Fails every receipt lookup while the transaction itself still lands.
	pub fn fail_receipts(&self, fail: bool) {
		self.state().fail_receipts = fail;
	}

	/// Calls that were applied to the successor.
	pub fn calls(&self) -> Vec<EscrowCall> {
		self.state().calls.clone()
	}

	pub fn mutating_calls(&self) -> usize {
		self.state().calls.len()
	}

	pub fn submit_attempts(&self) -> usize {
		self.state().submit_attempts
	}

	pub fn read_calls(&self) -> usize {
		self.state().reads
	}

	pub fn legacy_reads(&self) -> usize {
		self.state().legacy_reads
	}
}

fn apply(state: &mut State, call: &EscrowCall) {
	match call {
		EscrowCall::MigrateAccountEscrowBalances { accounts, balances, .. } => {
			for (account, balance) in accounts.iter().zip(balances) {
				state.successor.insert(*account, *balance);
				state.successor_total += *balance;
			}
		},
		EscrowCall::ImportVestingSchedule { accounts, .. } => {
			for account in accounts {
				*state.vesting_entries.entry(*account).or_default() += 1;
			}
		},
	}
}

#[async_trait::async_trait]
impl IChain for MockLedger {
	fn network(&self) -> &str {
		"mock"
	}

	async fn latest_block(&self) -> Result<BlockInfo> {
		drop(self.read(false)?);
		Ok(BlockInfo { number: LATEST_BLOCK, timestamp: LATEST_TIMESTAMP })
	}
}

#[async_trait::async_trait]
impl IEscrowLedger for MockLedger {
	async fn total_escrowed_account_balance(
		&self,
		escrow: Escrow,
		account: Address,
	) -> Result<Amount> {
		let state = self.read(escrow == Escrow::Legacy)?;
		Ok(match escrow {
			Escrow::Legacy => state.legacy.get(&account).map(|b| b.0),
			Escrow::Successor => state.successor.get(&account).copied(),
		}
		.unwrap_or_default())
	}

	async fn total_vested_account_balance(&self, account: Address) -> Result<Amount> {
		let state = self.read(true)?;
		Ok(state.legacy.get(&account).map(|b| b.1).unwrap_or_default())
	}

	async fn num_vesting_entries(&self, account: Address) -> Result<u64> {
		let state = self.read(false)?;
		Ok(state.vesting_entries.get(&account).copied().unwrap_or_default())
	}

	async fn check_account_schedule(&self, account: Address) -> Result<Vec<Amount>> {
		let state = self.read(true)?;
		Ok(state.schedules.get(&account).cloned().unwrap_or_default())
	}

	async fn migrate_entries_threshold_amount(&self) -> Result<Amount> {
		Ok(self.read(false)?.threshold)
	}

	async fn total_escrowed_balance(&self, escrow: Escrow) -> Result<Amount> {
		let state = self.read(false)?;
		Ok(match escrow {
			Escrow::Legacy => state.legacy_total,
			Escrow::Successor => state.successor_total,
		})
	}

	fn vesting_entry_created(
		&self,
		blocks: Range<BlockNumber>,
	) -> BoxStream<'_, Result<VestingEntryCreated>> {
		let events: Vec<_> = match self.read(true) {
			Ok(state) => state
				.events
				.iter()
				.filter(|e| blocks.contains(&e.block))
				.cloned()
				.map(Ok)
				.collect(),
			Err(err) => vec![Err(err)],
		};
		futures::stream::iter(events).boxed()
	}

	async fn submit(&self, call: &EscrowCall) -> Result<TxHash> {
		let mut state = self.state();
		let index = state.submit_attempts;
		state.submit_attempts += 1;
		anyhow::ensure!(state.fail_submit_at != Some(index), "injected submission failure");
		let hash = TxHash::with_last_byte(index as u8 + 1);
		let revert = state.revert_at.clone().filter(|(at, _)| *at == index);
		let status = match revert {
			Some((_, reason)) => TxStatus::Reverted { reason: Some(reason) },
			None => {
				apply(&mut state, call);
				state.calls.push(call.clone());
				TxStatus::Success
			},
		};
		let receipt = TxReceipt { hash, block: LATEST_BLOCK, gas_used: 21_000, status };
		state.receipts.insert(hash, receipt);
		Ok(hash)
	}

	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		timeout: Option<Duration>,
	) -> Result<Option<TxReceipt>> {
		let receipt = {
			let state = self.state();
			anyhow::ensure!(!state.fail_receipts, "connection reset by peer");
			(!state.withhold_receipts).then(|| state.receipts.get(&hash).cloned()).flatten()
		};
		if receipt.is_none() {
			if let Some(timeout) = timeout {
				tokio::time::sleep(timeout).await;
			}
			return Ok(None);
		}
		Ok(receipt)
	}
}
