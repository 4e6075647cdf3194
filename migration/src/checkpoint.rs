use crate::error::{MigrationError, Result};
use anyhow::Context;
use escrow_primitives::{
	Account, Address, FlattenedEntry, MigrationResult, PendingTransaction, Reconciliation,
	Timestamp,
};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default artifact location for a run.
pub fn artifact_path(output_dir: &Path, network: &str, started_at: Timestamp) -> PathBuf {
	output_dir.join(format!("rewards-out-{network}-{started_at}.json"))
}

/// Append-only record of a migration run. Every mutation is flushed to the
/// artifact file before returning.
#[derive(Debug)]
pub struct MigrationLog {
	path: Option<PathBuf>,
	result: MigrationResult,
	migrated: BTreeSet<Address>,
	skipped: BTreeSet<Address>,
	imported: BTreeSet<Address>,
}

impl MigrationLog {
	/// Starts a fresh log that is persisted to `path`.
	pub fn create(path: PathBuf, network: &str, started_at: Timestamp, dry_run: bool) -> Self {
		let result = MigrationResult {
			network: network.into(),
			started_at,
			dry_run,
			..Default::default()
		};
		Self::new(Some(path), result)
	}

	/// Continues the artifact at `path` written by an earlier run on the same
	/// network and in the same mode.
	pub fn resume(path: PathBuf, network: &str, dry_run: bool) -> Result<Self> {
		let result = MigrationResult::load(&path).map_err(MigrationError::Checkpoint)?;
		if result.network != network {
			return Err(MigrationError::Configuration(format!(
				"{} was written for network {}, not {network}",
				path.display(),
				result.network
			)));
		}
		if result.dry_run != dry_run {
			let mode = |dry_run| if dry_run { "dry run" } else { "live run" };
			return Err(MigrationError::Configuration(format!(
				"{} was written by a {}, this is a {}",
				path.display(),
				mode(result.dry_run),
				mode(dry_run)
			)));
		}
		if let Some(pending) = &result.pending_transaction {
			tracing::warn!(
				hash = %pending.hash,
				size = pending.size,
				"previous run left an unconfirmed {} transaction",
				pending.kind
			);
		}
		tracing::info!(
			migrated = result.migrated_accounts.len(),
			imported = result.imported_vested_entries.len(),
			"resuming {}",
			path.display()
		);
		Ok(Self::new(Some(path), result))
	}

	/// A log that is never written to disk.
	pub fn in_memory(network: &str, started_at: Timestamp, dry_run: bool) -> Self {
		let mut log = Self::create(PathBuf::new(), network, started_at, dry_run);
		log.path = None;
		log
	}

	fn new(path: Option<PathBuf>, result: MigrationResult) -> Self {
		let migrated = result.migrated_accounts.iter().map(|a| a.address).collect();
		let skipped = result.skipped_accounts.iter().map(|a| a.address).collect();
		let imported = result.imported_vested_entries.iter().map(|e| e.address).collect();
		Self { path, result, migrated, skipped, imported }
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	pub fn result(&self) -> &MigrationResult {
		&self.result
	}

	pub fn into_result(self) -> MigrationResult {
		self.result
	}

	pub fn append_skipped(&mut self, accounts: &[Account]) -> Result<()> {
		for account in accounts {
			if self.skipped.contains(&account.address) || self.migrated.contains(&account.address) {
				continue;
			}
			self.skipped.insert(account.address);
			self.result.skipped_accounts.push(account.clone());
		}
		self.persist()
	}

	pub fn append_migrated(&mut self, accounts: &[Account]) -> Result<()> {
		for account in accounts {
			if !self.migrated.insert(account.address) {
				tracing::debug!(address = %account.address, "already logged as migrated");
				continue;
			}
			self.result.migrated_accounts.push(account.clone());
		}
		self.persist()
	}

	pub fn append_imported(&mut self, entries: &[FlattenedEntry]) -> Result<()> {
		for entry in entries {
			if !self.imported.insert(entry.address) {
				tracing::debug!(address = %entry.address, "already logged as imported");
				continue;
			}
			self.result.imported_vested_entries.push(entry.clone());
		}
		self.persist()
	}

	pub fn set_pending(&mut self, pending: Option<PendingTransaction>) -> Result<()> {
		self.result.pending_transaction = pending;
		self.persist()
	}

	pub fn set_reconciliation(&mut self, reconciliation: Reconciliation) -> Result<()> {
		self.result.reconciliation = Some(reconciliation);
		self.persist()
	}

	/// Atomically replaces the artifact with the current state.
	pub fn persist(&self) -> Result<()> {
		let Some(path) = &self.path else {
			return Ok(());
		};
		self.write(path).map_err(MigrationError::Checkpoint)
	}

	fn write(&self, path: &Path) -> anyhow::Result<()> {
		let dir = match path.parent() {
			Some(dir) if !dir.as_os_str().is_empty() => dir,
			_ => Path::new("."),
		};
		std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
		let mut file = tempfile::NamedTempFile::new_in(dir)?;
		serde_json::to_writer_pretty(&mut file, &self.result)?;
		file.write_all(b"\n")?;
		file.as_file().sync_all()?;
		file.persist(path).with_context(|| format!("failed to write {}", path.display()))?;
		Ok(())
	}
}
