use escrow_primitives::{Address, CallKind, TxHash};

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
	#[error("configuration error: {0}")]
	Configuration(String),
	#[error("ledger read failed{}", .address.map(|a| format!(" for {a}")).unwrap_or_default())]
	ClassificationRead {
		address: Option<Address>,
		#[source]
		source: anyhow::Error,
	},
	#[error("{kind} batch rejected: {reason}")]
	BatchSubmission { kind: CallKind, reason: String },
	#[error("{kind} transaction {hash} was not confirmed in time")]
	Unconfirmed { kind: CallKind, hash: TxHash },
	#[error("checkpoint failed")]
	Checkpoint(#[source] anyhow::Error),
	#[error("amount overflow while summing entries of {address}")]
	AmountOverflow { address: Address },
	#[error("aborted by operator")]
	Aborted,
}

impl MigrationError {
	pub(crate) fn read(address: Option<Address>) -> impl FnOnce(anyhow::Error) -> Self {
		move |source| Self::ClassificationRead { address, source }
	}
}
