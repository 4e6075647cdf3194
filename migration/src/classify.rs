use crate::error::{MigrationError, Result};
use escrow_primitives::{Account, AccountRecord, Amount, Escrow, IEscrowLedger};

/// Classifies candidates one by one in input order.
pub async fn classify(ledger: &dyn IEscrowLedger, records: &[AccountRecord]) -> Result<Vec<Account>> {
	let mut accounts = Vec::with_capacity(records.len());
	for record in records {
		accounts.push(classify_account(ledger, record).await?);
	}
	let skipped = accounts.iter().filter(|a| a.already_migrated).count();
	tracing::info!(
		pending = accounts.len() - skipped,
		skipped,
		"classified {} accounts",
		accounts.len()
	);
	Ok(accounts)
}

pub async fn classify_account(ledger: &dyn IEscrowLedger, record: &AccountRecord) -> Result<Account> {
	let address = record.address;
	let successor = ledger
		.total_escrowed_account_balance(Escrow::Successor, address)
		.await
		.map_err(MigrationError::read(Some(address)))?;
	if !successor.is_zero() {
		tracing::info!(%address, balance = %successor, "already migrated, skipping");
		return Ok(Account {
			address,
			legacy_balance: record.balance_of.unwrap_or(successor),
			legacy_vested: record.vested_balance_of.unwrap_or(Amount::ZERO),
			already_migrated: true,
		});
	}
	let (legacy_balance, legacy_vested) = match record.balances() {
		Some(balances) => balances,
		None => futures::try_join!(
			ledger.total_escrowed_account_balance(Escrow::Legacy, address),
			ledger.total_vested_account_balance(address),
		)
		.map_err(MigrationError::read(Some(address)))?,
	};
	tracing::debug!(%address, %legacy_balance, %legacy_vested, "pending migration");
	Ok(Account {
		address,
		legacy_balance,
		legacy_vested,
		already_migrated: false,
	})
}

/// Accounts that still need a migration call.
pub fn pending(accounts: &[Account]) -> Vec<Account> {
	accounts.iter().filter(|a| !a.already_migrated).cloned().collect()
}

/// Accounts whose successor balance is already set.
pub fn skipped(accounts: &[Account]) -> Vec<Account> {
	accounts.iter().filter(|a| a.already_migrated).cloned().collect()
}
