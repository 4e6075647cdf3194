use crate::checkpoint::MigrationLog;
use crate::error::{MigrationError, Result};
use escrow_primitives::{
	Account, CallKind, EscrowCall, FlattenedEntry, IEscrowLedger, PendingTransaction, TxHash,
	TxReceipt, TxStatus,
};
use std::time::Duration;

/// Lifecycle of a single batch transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxState {
	Staged,
	Submitted(TxHash),
	Confirmed(TxReceipt),
	Rejected(String),
}

/// How a transaction left the protocol without an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOutcome {
	Confirmed(TxReceipt),
	/// The confirmation timeout expired. The transaction may still land.
	Unconfirmed(TxHash),
}

/// Items carried by one batch transaction.
#[derive(Clone, Copy, Debug)]
pub enum Batch<'a> {
	Migrate(&'a [Account]),
	Import(&'a [FlattenedEntry]),
}

impl Batch<'_> {
	pub fn kind(&self) -> CallKind {
		match self {
			Self::Migrate(_) => CallKind::Migrate,
			Self::Import(_) => CallKind::Import,
		}
	}

	pub fn len(&self) -> usize {
		match self {
			Self::Migrate(accounts) => accounts.len(),
			Self::Import(entries) => entries.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn call(&self) -> EscrowCall {
		match self {
			Self::Migrate(accounts) => EscrowCall::MigrateAccountEscrowBalances {
				accounts: accounts.iter().map(|a| a.address).collect(),
				balances: accounts.iter().map(|a| a.legacy_balance).collect(),
				vested: accounts.iter().map(|a| a.legacy_vested).collect(),
			},
			Self::Import(entries) => EscrowCall::ImportVestingSchedule {
				accounts: entries.iter().map(|e| e.address).collect(),
				amounts: entries.iter().map(|e| e.amount).collect(),
			},
		}
	}

	fn pending(&self, hash: TxHash) -> PendingTransaction {
		let (accounts, entries) = match self {
			Self::Migrate(accounts) => (accounts.to_vec(), vec![]),
			Self::Import(entries) => (vec![], entries.to_vec()),
		};
		PendingTransaction { kind: self.kind(), hash, size: self.len(), accounts, entries }
	}

	/// Appends the batch to the matching artifact list.
	pub fn record(&self, log: &mut MigrationLog) -> Result<()> {
		match self {
			Self::Migrate(accounts) => log.append_migrated(accounts),
			Self::Import(entries) => log.append_imported(entries),
		}
	}
}

/// Submits a call exactly once and waits for its receipt.
pub struct TxProtocol<'a> {
	ledger: &'a dyn IEscrowLedger,
	confirm_timeout: Option<Duration>,
}

impl<'a> TxProtocol<'a> {
	pub fn new(ledger: &'a dyn IEscrowLedger, confirm_timeout: Option<Duration>) -> Self {
		Self { ledger, confirm_timeout }
	}

	pub async fn execute(&self, batch: Batch<'_>, log: &mut MigrationLog) -> Result<TxOutcome> {
		let kind = batch.kind();
		let mut state = TxState::Staged;
		loop {
			state = match state {
				TxState::Staged => {
					tracing::info!(size = batch.len(), "staged {kind}");
					match self.ledger.submit(&batch.call()).await {
						Ok(hash) => TxState::Submitted(hash),
						Err(err) => TxState::Rejected(format!("{err:#}")),
					}
				},
				TxState::Submitted(hash) => {
					tracing::info!(%hash, "submitted {kind}");
					log.set_pending(Some(batch.pending(hash)))?;
					let Some(receipt) = self.receipt(kind, hash).await? else {
						tracing::warn!(%hash, "{kind} not confirmed before timeout");
						return Ok(TxOutcome::Unconfirmed(hash));
					};
					log.set_pending(None)?;
					match receipt.status.clone() {
						TxStatus::Success => TxState::Confirmed(receipt),
						TxStatus::Reverted { reason } => TxState::Rejected(match reason {
							Some(reason) => format!("reverted: {reason}"),
							None => format!("reverted in block {}", receipt.block),
						}),
					}
				},
				TxState::Confirmed(receipt) => {
					tracing::info!(
						hash = %receipt.hash,
						block = receipt.block,
						gas_used = receipt.gas_used,
						"confirmed {kind}"
					);
					return Ok(TxOutcome::Confirmed(receipt));
				},
				TxState::Rejected(reason) => {
					tracing::error!("{kind} rejected: {reason}");
					return Err(MigrationError::BatchSubmission { kind, reason });
				},
			};
		}
	}

	/// Settles a transaction an earlier run left unconfirmed. A confirmed
	/// batch is recorded as if this run had sent it, a reverted one is
	/// dropped so its accounts get classified again.
	pub async fn settle_pending(&self, log: &mut MigrationLog) -> Result<()> {
		let Some(pending) = log.result().pending_transaction.clone() else {
			return Ok(());
		};
		let (kind, hash) = (pending.kind, pending.hash);
		tracing::info!(%hash, size = pending.size, "settling {kind} left by an earlier run");
		let Some(receipt) = self.receipt(kind, hash).await? else {
			tracing::warn!(%hash, "{kind} from an earlier run is still unconfirmed");
			return Err(MigrationError::Unconfirmed { kind, hash });
		};
		match &receipt.status {
			TxStatus::Success => {
				tracing::info!(%hash, block = receipt.block, "{kind} from an earlier run landed");
				log.append_migrated(&pending.accounts)?;
				log.append_imported(&pending.entries)?;
			},
			TxStatus::Reverted { reason } => {
				tracing::warn!(%hash, ?reason, "{kind} from an earlier run reverted");
			},
		}
		log.set_pending(None)
	}

	/// A failed receipt lookup leaves the transaction in flight, so it is
	/// reported as unconfirmed and the pending entry stays in the artifact.
	async fn receipt(&self, kind: CallKind, hash: TxHash) -> Result<Option<TxReceipt>> {
		self.ledger.wait_for_receipt(hash, self.confirm_timeout).await.map_err(|err| {
			tracing::warn!(%hash, "waiting for {kind} failed: {err:#}");
			MigrationError::Unconfirmed { kind, hash }
		})
	}
}
