use crate::checkpoint::MigrationLog;
use crate::error::{MigrationError, Result};
use crate::tx::{Batch, TxOutcome, TxProtocol};
use escrow_primitives::{Account, FlattenedEntry, IEscrowLedger};
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_MIGRATION_BATCH_SIZE: usize = 450;
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 350;

/// Splits `items` into contiguous batches of at most `size` elements.
pub fn partition<T>(items: &[T], size: usize) -> Result<std::slice::Chunks<'_, T>> {
	if size == 0 {
		return Err(MigrationError::Configuration("batch size must be greater than 0".into()));
	}
	Ok(items.chunks(size))
}

/// Sends batches strictly one after another, recording each completed batch
/// before the next one starts.
pub struct BatchSubmitter<'a> {
	ledger: &'a dyn IEscrowLedger,
	dry_run: bool,
	confirm_timeout: Option<Duration>,
	abort: watch::Receiver<bool>,
}

impl<'a> BatchSubmitter<'a> {
	pub fn new(
		ledger: &'a dyn IEscrowLedger,
		dry_run: bool,
		confirm_timeout: Option<Duration>,
		abort: watch::Receiver<bool>,
	) -> Self {
		Self { ledger, dry_run, confirm_timeout, abort }
	}

	/// Migrates the escrow balances of pending accounts. Returns the size of
	/// every batch, in order.
	pub async fn migrate(
		&self,
		log: &mut MigrationLog,
		accounts: &[Account],
		batch_size: usize,
	) -> Result<Vec<usize>> {
		let batches = partition(accounts, batch_size)?;
		let count = batches.len();
		let mut sizes = Vec::with_capacity(count);
		for (index, accounts) in batches.enumerate() {
			self.check_abort()?;
			tracing::info!(batch = index + 1, of = count, "migrating {} accounts", accounts.len());
			self.send(Batch::Migrate(accounts), log).await?;
			sizes.push(accounts.len());
		}
		Ok(sizes)
	}

	/// Imports flattened vesting entries. Returns the size of every batch.
	pub async fn import(
		&self,
		log: &mut MigrationLog,
		entries: &[FlattenedEntry],
		batch_size: usize,
	) -> Result<Vec<usize>> {
		let batches = partition(entries, batch_size)?;
		let count = batches.len();
		let mut sizes = Vec::with_capacity(count);
		for (index, entries) in batches.enumerate() {
			self.check_abort()?;
			tracing::info!(batch = index + 1, of = count, "importing {} accounts", entries.len());
			self.send(Batch::Import(entries), log).await?;
			sizes.push(entries.len());
		}
		Ok(sizes)
	}

	fn check_abort(&self) -> Result<()> {
		if *self.abort.borrow() {
			tracing::warn!("abort requested, stopping at batch boundary");
			return Err(MigrationError::Aborted);
		}
		Ok(())
	}

	/// Sends one batch and records it once confirmed. A dry run records the
	/// batch without sending it.
	async fn send(&self, batch: Batch<'_>, log: &mut MigrationLog) -> Result<()> {
		if self.dry_run {
			tracing::info!(size = batch.len(), "dry run, not sending {}", batch.kind());
			return batch.record(log);
		}
		match TxProtocol::new(self.ledger, self.confirm_timeout).execute(batch, log).await? {
			TxOutcome::Confirmed(_) => batch.record(log),
			TxOutcome::Unconfirmed(hash) => {
				Err(MigrationError::Unconfirmed { kind: batch.kind(), hash })
			},
		}
	}
}
