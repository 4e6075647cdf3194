use crate::error::{MigrationError, Result};
use escrow_primitives::{Escrow, IEscrowLedger, Reconciliation};

/// Compares the total escrowed balance of both contracts.
pub async fn reconcile(ledger: &dyn IEscrowLedger, dry_run: bool) -> Result<Reconciliation> {
	let legacy_total = ledger
		.total_escrowed_balance(Escrow::Legacy)
		.await
		.map_err(MigrationError::read(None))?;
	let successor_total = ledger
		.total_escrowed_balance(Escrow::Successor)
		.await
		.map_err(MigrationError::read(None))?;
	let reconciliation = Reconciliation { legacy_total, successor_total };
	if reconciliation.is_match() {
		tracing::info!("total escrowed balance matches: {}", ledger.format_amount(successor_total));
	} else if dry_run {
		tracing::warn!(%legacy_total, %successor_total, "total escrowed balance mismatch");
	} else {
		tracing::error!(%legacy_total, %successor_total, "total escrowed balance mismatch");
	}
	Ok(reconciliation)
}
