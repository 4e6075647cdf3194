use escrow_primitives::IEscrowLedger;
use std::time::Duration;
use tokio::sync::watch;

mod batch;
mod checkpoint;
mod classify;
mod discover;
mod error;
mod flatten;
#[cfg(test)]
mod mock;
mod reconcile;
mod tx;

pub use crate::batch::{
	partition, BatchSubmitter, DEFAULT_IMPORT_BATCH_SIZE, DEFAULT_MIGRATION_BATCH_SIZE,
};
pub use crate::checkpoint::{artifact_path, MigrationLog};
pub use crate::classify::{classify, classify_account, pending, skipped};
pub use crate::discover::{discover, load_account_list, AccountSource};
pub use crate::error::{MigrationError, Result};
pub use crate::flatten::{flatten, flatten_schedule, MalformedEntry};
pub use crate::reconcile::reconcile;
pub use crate::tx::{Batch, TxOutcome, TxProtocol, TxState};

pub const LOG_TARGET: &str = "migration";

/// Knobs of a single migration run.
#[derive(Clone, Debug)]
pub struct MigrationParams {
	pub source: Option<AccountSource>,
	pub requires_account_list: bool,
	pub dry_run: bool,
	pub migration_batch_size: usize,
	pub import_batch_size: usize,
	pub confirm_timeout: Option<Duration>,
}

impl Default for MigrationParams {
	fn default() -> Self {
		Self {
			source: None,
			requires_account_list: false,
			dry_run: false,
			migration_batch_size: DEFAULT_MIGRATION_BATCH_SIZE,
			import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
			confirm_timeout: None,
		}
	}
}

impl MigrationParams {
	/// Checks the parameters without touching any ledger.
	pub fn validate(&self) -> Result<()> {
		if self.migration_batch_size == 0 || self.import_batch_size == 0 {
			return Err(MigrationError::Configuration("batch sizes must be greater than 0".into()));
		}
		match &self.source {
			None => Err(MigrationError::Configuration("no account source configured".into())),
			Some(AccountSource::Events { .. }) if self.requires_account_list => Err(
				MigrationError::Configuration("network requires an account list".into()),
			),
			Some(_) => Ok(()),
		}
	}
}

/// Batch sizes sent, or recorded in a dry run, by one call to [`migrate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
	pub migration_batches: Vec<usize>,
	pub import_batches: Vec<usize>,
}

/// Runs discovery, classification, migration, flattening, import and
/// reconciliation, recording progress in `log` after every batch. A batch a
/// resumed log still lists as pending is settled first.
pub async fn migrate(
	ledger: &dyn IEscrowLedger,
	params: &MigrationParams,
	log: &mut MigrationLog,
	abort: watch::Receiver<bool>,
) -> Result<RunSummary> {
	params.validate()?;
	let mode = if params.dry_run { "dry run" } else { "live" };
	tracing::info!(target: LOG_TARGET, network = ledger.network(), "starting {mode} migration");
	TxProtocol::new(ledger, params.confirm_timeout).settle_pending(log).await?;

	let records =
		discover(ledger, params.source.as_ref(), params.requires_account_list).await?;
	let accounts = classify(ledger, &records).await?;
	log.append_skipped(&skipped(&accounts))?;

	let submitter = BatchSubmitter::new(ledger, params.dry_run, params.confirm_timeout, abort);
	let to_migrate = pending(&accounts);
	let migration_batches =
		submitter.migrate(log, &to_migrate, params.migration_batch_size).await?;
	tracing::info!(target: LOG_TARGET, migrated = to_migrate.len(), "escrow balances migrated");

	let reference = ledger.latest_block().await.map_err(MigrationError::read(None))?;
	tracing::info!(
		target: LOG_TARGET,
		block = reference.number,
		timestamp = reference.timestamp,
		"flattening against reference block"
	);
	let entries = flatten(ledger, &accounts, reference).await?;
	let import_batches = submitter.import(log, &entries, params.import_batch_size).await?;
	tracing::info!(target: LOG_TARGET, imported = entries.len(), "vesting entries imported");

	let reconciliation = reconcile(ledger, params.dry_run).await?;
	log.set_reconciliation(reconciliation)?;
	Ok(RunSummary { migration_batches, import_batches })
}
