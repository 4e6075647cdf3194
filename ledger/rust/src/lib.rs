use anyhow::{Context, Result};
use escrow_primitives::{
	Address, Amount, BlockInfo, BlockNumber, EscrowCall, Escrow, IChain, IEscrowLedger, TxHash,
	TxReceipt, TxStatus, VestingEntry, VestingEntryCreated,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use redb::{Database, ReadableTable, Table, TableDefinition, TypeName, Value};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

const BLOCK_TIME: u64 = 1;
const RECEIPT_POLL: Duration = Duration::from_millis(100);
const GAS_PER_ACCOUNT: u64 = 21_000;

const BLOCKS: TableDefinition<u64, u64> = TableDefinition::new("blocks");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const PARAMS: TableDefinition<&str, [u8; 32]> = TableDefinition::new("params");
const LEGACY_BALANCE: TableDefinition<[u8; 20], [u8; 32]> =
	TableDefinition::new("legacy_balance");
const LEGACY_VESTED: TableDefinition<[u8; 20], [u8; 32]> = TableDefinition::new("legacy_vested");
const LEGACY_SCHEDULE: TableDefinition<[u8; 20], Bincode<Vec<StoredEntry>>> =
	TableDefinition::new("legacy_schedule");
const EVENTS: TableDefinition<u64, Bincode<StoredEvent>> = TableDefinition::new("events");
const BALANCE: TableDefinition<[u8; 20], [u8; 32]> = TableDefinition::new("balance");
const VESTED: TableDefinition<[u8; 20], [u8; 32]> = TableDefinition::new("vested");
const ENTRIES: TableDefinition<[u8; 20], Bincode<Vec<StoredEntry>>> =
	TableDefinition::new("entries");
const RECEIPTS: TableDefinition<[u8; 32], Bincode<StoredReceipt>> =
	TableDefinition::new("receipts");

const LEGACY_TOTAL: &str = "legacy_total";
const SUCCESSOR_TOTAL: &str = "successor_total";
const THRESHOLD: &str = "threshold";
const NONCE: &str = "nonce";
const EVENT_SEQ: &str = "event_seq";

type StoredEntry = (u64, [u8; 32]);

#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
	beneficiary: [u8; 20],
	time: u64,
	value: [u8; 32],
	block: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredReceipt {
	block: u64,
	gas_used: u64,
	revert: Option<String>,
	reverted: bool,
}

/// Simulated legacy and successor escrow pair living in a single redb
/// database. Mutating calls are applied atomically and leave a receipt.
#[derive(Clone)]
pub struct Ledger {
	network: String,
	db: Arc<Database>,
	genesis: SystemTime,
	_tmpfile: Option<Arc<NamedTempFile>>,
}

fn key(address: Address) -> [u8; 20] {
	address.into()
}

fn amount(bytes: [u8; 32]) -> Amount {
	Amount::from_be_bytes(bytes)
}

fn bytes(amount: Amount) -> [u8; 32] {
	amount.to_be_bytes::<32>()
}

fn now() -> u64 {
	SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn block(genesis: SystemTime) -> u64 {
	let elapsed = SystemTime::now().duration_since(genesis).unwrap_or_default();
	elapsed.as_secs() / BLOCK_TIME
}

fn read_amount<T: ReadableTable<[u8; 20], [u8; 32]>>(table: &T, addr: Address) -> Result<Amount> {
	Ok(table.get(key(addr))?.map(|v| amount(v.value())).unwrap_or_default())
}

fn read_param<T: ReadableTable<&'static str, [u8; 32]>>(table: &T, name: &str) -> Result<Amount> {
	Ok(table.get(name)?.map(|v| amount(v.value())).unwrap_or_default())
}

fn add_param(
	table: &mut Table<'_, &'static str, [u8; 32]>,
	name: &str,
	delta: Amount,
) -> Result<()> {
	let total = read_param(&*table, name)?.checked_add(delta).context("total overflow")?;
	table.insert(name, bytes(total))?;
	Ok(())
}

fn next_counter(table: &mut Table<'_, &'static str, u64>, name: &str) -> Result<u64> {
	let value = table.get(name)?.map(|v| v.value()).unwrap_or_default();
	table.insert(name, value + 1)?;
	Ok(value)
}

fn tx_hash(call: &EscrowCall, nonce: u64) -> TxHash {
	let mut hasher = blake3::Hasher::new();
	hasher.update(call.kind().method().as_bytes());
	hasher.update(&nonce.to_le_bytes());
	match call {
		EscrowCall::MigrateAccountEscrowBalances { accounts, balances, vested } => {
			for account in accounts {
				hasher.update(account.as_slice());
			}
			for amount in balances.iter().chain(vested) {
				hasher.update(&bytes(*amount));
			}
		},
		EscrowCall::ImportVestingSchedule { accounts, amounts } => {
			for account in accounts {
				hasher.update(account.as_slice());
			}
			for amount in amounts {
				hasher.update(&bytes(*amount));
			}
		},
	}
	TxHash::from(*hasher.finalize().as_bytes())
}

impl Ledger {
	/// Opens the ledger database at `url`, or a temporary one when `url` is
	/// `tempfile`.
	pub fn new(network: &str, url: &str) -> Result<Self> {
		let (tmpfile, path) = if url == "tempfile" {
			let file = NamedTempFile::new()?;
			let path = file.path().to_owned();
			(Some(Arc::new(file)), path)
		} else {
			(None, Path::new(url).to_owned())
		};
		let db = Database::create(path)?;
		let tx = db.begin_write()?;
		let genesis = {
			let mut blocks = tx.open_table(BLOCKS)?;
			let timestamp = blocks.get(0)?.map(|t| t.value());
			if let Some(timestamp) = timestamp {
				SystemTime::UNIX_EPOCH + Duration::from_secs(timestamp)
			} else {
				let genesis = SystemTime::now();
				blocks.insert(0, genesis.duration_since(SystemTime::UNIX_EPOCH)?.as_secs())?;
				genesis
			}
		};
		tx.open_table(COUNTERS)?;
		tx.open_table(PARAMS)?;
		tx.open_table(LEGACY_BALANCE)?;
		tx.open_table(LEGACY_VESTED)?;
		tx.open_table(LEGACY_SCHEDULE)?;
		tx.open_table(EVENTS)?;
		tx.open_table(BALANCE)?;
		tx.open_table(VESTED)?;
		tx.open_table(ENTRIES)?;
		tx.open_table(RECEIPTS)?;
		tx.commit()?;
		Ok(Self {
			network: network.into(),
			db: Arc::new(db),
			genesis,
			_tmpfile: tmpfile,
		})
	}

	/// Creates a legacy escrow account with the given vesting schedule. Every
	/// non empty schedule entry emits a `VestingEntryCreated` event.
	pub fn seed_account(
		&self,
		address: Address,
		balance: Amount,
		vested: Amount,
		schedule: &[VestingEntry],
	) -> Result<()> {
		let block = block(self.genesis);
		let tx = self.db.begin_write()?;
		{
			let mut balances = tx.open_table(LEGACY_BALANCE)?;
			let previous = read_amount(&balances, address)?;
			anyhow::ensure!(previous.is_zero(), "account {address} already seeded");
			balances.insert(key(address), bytes(balance))?;
			tx.open_table(LEGACY_VESTED)?.insert(key(address), bytes(vested))?;
			let entries: Vec<StoredEntry> =
				schedule.iter().map(|e| (e.timestamp, bytes(e.amount))).collect();
			tx.open_table(LEGACY_SCHEDULE)?.insert(key(address), entries)?;
			add_param(&mut tx.open_table(PARAMS)?, LEGACY_TOTAL, balance)?;
			let mut counters = tx.open_table(COUNTERS)?;
			let mut events = tx.open_table(EVENTS)?;
			for entry in schedule.iter().filter(|e| !e.amount.is_zero()) {
				let seq = next_counter(&mut counters, EVENT_SEQ)?;
				events.insert(
					seq,
					StoredEvent {
						beneficiary: key(address),
						time: entry.timestamp,
						value: bytes(entry.amount),
						block,
					},
				)?;
			}
		}
		tx.commit()?;
		Ok(())
	}

	/// Sets the successor's `migrateEntriesThresholdAmount`.
	pub fn set_threshold(&self, threshold: Amount) -> Result<()> {
		let tx = self.db.begin_write()?;
		tx.open_table(PARAMS)?.insert(THRESHOLD, bytes(threshold))?;
		tx.commit()?;
		Ok(())
	}

	/// Imported vesting entries of an account on the successor.
	pub fn vesting_entries(&self, address: Address) -> Result<Vec<VestingEntry>> {
		let tx = self.db.begin_read()?;
		let t = tx.open_table(ENTRIES)?;
		let entries = t.get(key(address))?.map(|v| v.value()).unwrap_or_default();
		Ok(entries
			.into_iter()
			.map(|(timestamp, value)| VestingEntry { timestamp, amount: amount(value) })
			.collect())
	}

	fn read_events(&self, blocks: Range<BlockNumber>) -> Result<Vec<VestingEntryCreated>> {
		let tx = self.db.begin_read()?;
		let t = tx.open_table(EVENTS)?;
		let mut events = vec![];
		for entry in t.iter()? {
			let (_, event) = entry?;
			let event = event.value();
			if !blocks.contains(&event.block) {
				continue;
			}
			events.push(VestingEntryCreated {
				beneficiary: Address::from(event.beneficiary),
				time: event.time,
				value: amount(event.value),
				block: event.block,
			});
		}
		Ok(events)
	}

	/// Applies a call to the successor tables. Returns the revert reason when
	/// the call violates a contract requirement.
	fn apply(&self, tx: &redb::WriteTransaction, call: &EscrowCall) -> Result<Option<String>> {
		match call {
			EscrowCall::MigrateAccountEscrowBalances { accounts, balances, vested } => {
				let mut balance_table = tx.open_table(BALANCE)?;
				let mut vested_table = tx.open_table(VESTED)?;
				let mut params = tx.open_table(PARAMS)?;
				for ((account, balance), vested) in accounts.iter().zip(balances).zip(vested) {
					if !read_amount(&balance_table, *account)?.is_zero() {
						return Ok(Some(format!("{account} already has an escrow balance")));
					}
					balance_table.insert(key(*account), bytes(*balance))?;
					vested_table.insert(key(*account), bytes(*vested))?;
					add_param(&mut params, SUCCESSOR_TOTAL, *balance)?;
				}
			},
			EscrowCall::ImportVestingSchedule { accounts, amounts } => {
				let mut entries = tx.open_table(ENTRIES)?;
				let timestamp = now();
				for (account, value) in accounts.iter().zip(amounts) {
					if value.is_zero() {
						return Ok(Some(format!("zero escrow amount for {account}")));
					}
					let mut schedule =
						entries.get(key(*account))?.map(|v| v.value()).unwrap_or_default();
					schedule.push((timestamp, bytes(*value)));
					entries.insert(key(*account), schedule)?;
				}
			},
		}
		Ok(None)
	}
}

#[async_trait::async_trait]
impl IChain for Ledger {
	fn network(&self) -> &str {
		&self.network
	}

	async fn latest_block(&self) -> Result<BlockInfo> {
		Ok(BlockInfo {
			number: block(self.genesis),
			timestamp: now(),
		})
	}
}

#[async_trait::async_trait]
impl IEscrowLedger for Ledger {
	async fn total_escrowed_account_balance(
		&self,
		escrow: Escrow,
		account: Address,
	) -> Result<Amount> {
		let tx = self.db.begin_read()?;
		let t = match escrow {
			Escrow::Legacy => tx.open_table(LEGACY_BALANCE)?,
			Escrow::Successor => tx.open_table(BALANCE)?,
		};
		read_amount(&t, account)
	}

	async fn total_vested_account_balance(&self, account: Address) -> Result<Amount> {
		let tx = self.db.begin_read()?;
		let t = tx.open_table(LEGACY_VESTED)?;
		read_amount(&t, account)
	}

	async fn num_vesting_entries(&self, account: Address) -> Result<u64> {
		Ok(self.vesting_entries(account)?.len() as u64)
	}

	async fn check_account_schedule(&self, account: Address) -> Result<Vec<Amount>> {
		let tx = self.db.begin_read()?;
		let t = tx.open_table(LEGACY_SCHEDULE)?;
		let entries = t.get(key(account))?.map(|v| v.value()).unwrap_or_default();
		Ok(entries
			.into_iter()
			.flat_map(|(timestamp, value)| [Amount::from(timestamp), amount(value)])
			.collect())
	}

	async fn migrate_entries_threshold_amount(&self) -> Result<Amount> {
		let tx = self.db.begin_read()?;
		let t = tx.open_table(PARAMS)?;
		read_param(&t, THRESHOLD)
	}

	async fn total_escrowed_balance(&self, escrow: Escrow) -> Result<Amount> {
		let tx = self.db.begin_read()?;
		let t = tx.open_table(PARAMS)?;
		match escrow {
			Escrow::Legacy => read_param(&t, LEGACY_TOTAL),
			Escrow::Successor => read_param(&t, SUCCESSOR_TOTAL),
		}
	}

	fn vesting_entry_created(
		&self,
		blocks: Range<BlockNumber>,
	) -> BoxStream<'_, Result<VestingEntryCreated>> {
		let events = match self.read_events(blocks) {
			Ok(events) => events.into_iter().map(Ok).collect(),
			Err(err) => vec![Err(err)],
		};
		futures::stream::iter(events).boxed()
	}

	async fn submit(&self, call: &EscrowCall) -> Result<TxHash> {
		anyhow::ensure!(!call.is_empty(), "{} called without accounts", call.kind());
		let lengths_match = match call {
			EscrowCall::MigrateAccountEscrowBalances { accounts, balances, vested } => {
				accounts.len() == balances.len() && accounts.len() == vested.len()
			},
			EscrowCall::ImportVestingSchedule { accounts, amounts } => {
				accounts.len() == amounts.len()
			},
		};
		anyhow::ensure!(lengths_match, "input array length mismatch");

		let nonce = {
			let tx = self.db.begin_write()?;
			let nonce = next_counter(&mut tx.open_table(COUNTERS)?, NONCE)?;
			tx.commit()?;
			nonce
		};
		let hash = tx_hash(call, nonce);
		let receipt = {
			let tx = self.db.begin_write()?;
			let revert = self.apply(&tx, call)?;
			if revert.is_some() {
				tx.abort()?;
			} else {
				tx.commit()?;
			}
			StoredReceipt {
				block: block(self.genesis),
				gas_used: GAS_PER_ACCOUNT * call.len() as u64,
				reverted: revert.is_some(),
				revert,
			}
		};
		tracing::debug!(%hash, reverted = receipt.reverted, "{} included", call.kind());
		let tx = self.db.begin_write()?;
		tx.open_table(RECEIPTS)?.insert(<[u8; 32]>::from(hash), receipt)?;
		tx.commit()?;
		Ok(hash)
	}

	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		timeout: Option<Duration>,
	) -> Result<Option<TxReceipt>> {
		let start = tokio::time::Instant::now();
		loop {
			let stored = {
				let tx = self.db.begin_read()?;
				let t = tx.open_table(RECEIPTS)?;
				let stored = t.get(<[u8; 32]>::from(hash))?.map(|v| v.value());
				stored
			};
			if let Some(stored) = stored {
				let status = if stored.reverted {
					TxStatus::Reverted { reason: stored.revert }
				} else {
					TxStatus::Success
				};
				return Ok(Some(TxReceipt {
					hash,
					block: stored.block,
					gas_used: stored.gas_used,
					status,
				}));
			}
			if timeout.is_some_and(|timeout| start.elapsed() >= timeout) {
				return Ok(None);
			}
			tokio::time::sleep(RECEIPT_POLL).await;
		}
	}
}

#[derive(Debug)]
pub struct Bincode<T>(pub T);

impl<T> Value for Bincode<T>
where
	T: Debug + Serialize + for<'a> Deserialize<'a>,
{
	type SelfType<'a> = T
	where
		Self: 'a;

	type AsBytes<'a> = Vec<u8>
	where
		Self: 'a;

	fn fixed_width() -> Option<usize> {
		None
	}

	fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
	where
		Self: 'a,
	{
		bincode::deserialize(data).expect("corrupt ledger database")
	}

	fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
	where
		Self: 'a,
		Self: 'b,
	{
		bincode::serialize(value).expect("bincode serialization is infallible")
	}

	fn type_name() -> TypeName {
		TypeName::new(&format!("Bincode<{}>", std::any::type_name::<T>()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::TryStreamExt;

	fn addr(byte: u8) -> Address {
		Address::repeat_byte(byte)
	}

	fn entry(timestamp: u64, amount: u64) -> VestingEntry {
		VestingEntry { timestamp, amount: Amount::from(amount) }
	}

	#[tokio::test]
	async fn smoke_test() -> Result<()> {
		let ledger = Ledger::new("local", "tempfile")?;
		ledger.seed_account(
			addr(1),
			Amount::from(100u64),
			Amount::from(10u64),
			&[entry(0, 0), entry(5, 60), entry(6, 40)],
		)?;
		ledger.seed_account(addr(2), Amount::from(50u64), Amount::ZERO, &[entry(7, 50)])?;
		assert_eq!(ledger.total_escrowed_balance(Escrow::Legacy).await?, Amount::from(150u64));
		assert_eq!(
			ledger.check_account_schedule(addr(1)).await?,
			[0u64, 0, 5, 60, 6, 40].map(Amount::from).to_vec()
		);

		let events: Vec<_> = ledger.vesting_entry_created(0..u64::MAX).try_collect().await?;
		let beneficiaries: Vec<_> = events.iter().map(|e| e.beneficiary).collect();
		assert_eq!(beneficiaries, vec![addr(1), addr(1), addr(2)]);

		let call = EscrowCall::MigrateAccountEscrowBalances {
			accounts: vec![addr(1), addr(2)],
			balances: vec![Amount::from(100u64), Amount::from(50u64)],
			vested: vec![Amount::from(10u64), Amount::ZERO],
		};
		let hash = ledger.submit(&call).await?;
		let receipt = ledger.wait_for_receipt(hash, None).await?.unwrap();
		assert!(receipt.is_success());
		assert_eq!(receipt.gas_used, 2 * GAS_PER_ACCOUNT);
		assert_eq!(
			ledger.total_escrowed_account_balance(Escrow::Successor, addr(1)).await?,
			Amount::from(100u64)
		);
		assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, Amount::from(150u64));

		let call = EscrowCall::ImportVestingSchedule {
			accounts: vec![addr(1)],
			amounts: vec![Amount::from(100u64)],
		};
		let hash = ledger.submit(&call).await?;
		assert!(ledger.wait_for_receipt(hash, None).await?.unwrap().is_success());
		assert_eq!(ledger.num_vesting_entries(addr(1)).await?, 1);
		assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, Amount::from(150u64));
		Ok(())
	}

	#[tokio::test]
	async fn migrating_twice_reverts() -> Result<()> {
		let ledger = Ledger::new("local", "tempfile")?;
		let call = EscrowCall::MigrateAccountEscrowBalances {
			accounts: vec![addr(1)],
			balances: vec![Amount::from(10u64)],
			vested: vec![Amount::ZERO],
		};
		let hash = ledger.submit(&call).await?;
		assert!(ledger.wait_for_receipt(hash, None).await?.unwrap().is_success());
		let hash = ledger.submit(&call).await?;
		let receipt = ledger.wait_for_receipt(hash, None).await?.unwrap();
		assert!(matches!(receipt.status, TxStatus::Reverted { reason: Some(_) }));
		assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, Amount::from(10u64));
		Ok(())
	}

	#[tokio::test]
	async fn mismatched_arrays_are_rejected() -> Result<()> {
		let ledger = Ledger::new("local", "tempfile")?;
		let call = EscrowCall::ImportVestingSchedule {
			accounts: vec![addr(1), addr(2)],
			amounts: vec![Amount::from(1u64)],
		};
		assert!(ledger.submit(&call).await.is_err());
		Ok(())
	}

	#[tokio::test]
	async fn unknown_receipt_times_out() -> Result<()> {
		let ledger = Ledger::new("local", "tempfile")?;
		let receipt =
			ledger.wait_for_receipt(TxHash::ZERO, Some(Duration::from_millis(10))).await?;
		assert!(receipt.is_none());
		Ok(())
	}
}
