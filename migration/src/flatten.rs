use crate::error::{MigrationError, Result};
use escrow_primitives::{Account, Address, Amount, BlockInfo, FlattenedEntry, IEscrowLedger};

/// A schedule pair that could not be interpreted. `amount` is `None` for a
/// dangling trailing element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedEntry {
	pub address: Address,
	pub timestamp: Amount,
	pub amount: Option<Amount>,
}

/// Sums the matured entries of a flat `[time, amount, ...]` schedule. Entries
/// with a timestamp after `reference` have not vested yet.
pub fn flatten_schedule(
	address: Address,
	schedule: &[Amount],
	reference: Amount,
) -> Result<(Option<FlattenedEntry>, Vec<MalformedEntry>)> {
	let mut malformed = vec![];
	let mut total = Amount::ZERO;
	let mut pairs = schedule.chunks_exact(2);
	for pair in &mut pairs {
		let (timestamp, amount) = (pair[0], pair[1]);
		if timestamp.is_zero() && amount.is_zero() {
			continue;
		}
		if timestamp > reference {
			continue;
		}
		if timestamp.is_zero() || amount.is_zero() {
			malformed.push(MalformedEntry { address, timestamp, amount: Some(amount) });
			continue;
		}
		total = total.checked_add(amount).ok_or(MigrationError::AmountOverflow { address })?;
	}
	if let [timestamp] = pairs.remainder() {
		malformed.push(MalformedEntry { address, timestamp: *timestamp, amount: None });
	}
	let entry = (!total.is_zero()).then_some(FlattenedEntry { address, amount: total });
	Ok((entry, malformed))
}

/// Builds the import list for accounts above the successor's migration
/// threshold whose successor schedule is still empty.
pub async fn flatten(
	ledger: &dyn IEscrowLedger,
	accounts: &[Account],
	reference: BlockInfo,
) -> Result<Vec<FlattenedEntry>> {
	let threshold =
		ledger.migrate_entries_threshold_amount().await.map_err(MigrationError::read(None))?;
	let candidates: Vec<_> = accounts.iter().filter(|a| a.legacy_balance > threshold).collect();
	tracing::info!(
		candidates = candidates.len(),
		threshold = %ledger.format_amount(threshold),
		"flattening matured vesting entries"
	);
	let mut entries = vec![];
	for account in candidates {
		let address = account.address;
		let imported =
			ledger.num_vesting_entries(address).await.map_err(MigrationError::read(Some(address)))?;
		if imported > 0 {
			tracing::info!(%address, imported, "vesting entries already imported, skipping");
			continue;
		}
		let schedule =
			ledger.check_account_schedule(address).await.map_err(MigrationError::read(Some(address)))?;
		let (entry, malformed) =
			flatten_schedule(address, &schedule, Amount::from(reference.timestamp))?;
		for bad in malformed {
			match bad.amount {
				Some(amount) => tracing::warn!(
					%address,
					timestamp = %bad.timestamp,
					%amount,
					"ignoring malformed vesting entry"
				),
				None => tracing::warn!(
					%address,
					value = %bad.timestamp,
					"ignoring trailing schedule element"
				),
			}
		}
		if let Some(entry) = entry {
			tracing::debug!(%address, amount = %entry.amount, "flattened vested entries");
			entries.push(entry);
		}
	}
	Ok(entries)
}
