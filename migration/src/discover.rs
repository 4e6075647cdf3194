use crate::error::{MigrationError, Result};
use escrow_primitives::{AccountRecord, Address, BlockNumber, IEscrowLedger};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::path::Path;

/// Where candidate accounts come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountSource {
	/// A static list supplied by the operator.
	List(Vec<AccountRecord>),
	/// Replay of `VestingEntryCreated` events. `to_block` defaults to the
	/// latest block.
	Events { from_block: BlockNumber, to_block: Option<BlockNumber> },
}

/// Reads a JSON array of account records.
pub fn load_account_list(path: &Path) -> Result<Vec<AccountRecord>> {
	let json = std::fs::read_to_string(path).map_err(|err| {
		MigrationError::Configuration(format!("cannot read {}: {err}", path.display()))
	})?;
	serde_json::from_str(&json).map_err(|err| {
		MigrationError::Configuration(format!("invalid account list {}: {err}", path.display()))
	})
}

/// Produces the candidate accounts, deduplicated by address in order of
/// first appearance.
pub async fn discover(
	ledger: &dyn IEscrowLedger,
	source: Option<&AccountSource>,
	requires_account_list: bool,
) -> Result<Vec<AccountRecord>> {
	match source {
		Some(AccountSource::List(records)) => {
			let records = dedup_records(records);
			tracing::info!(accounts = records.len(), "loaded account list");
			Ok(records)
		},
		Some(AccountSource::Events { .. }) if requires_account_list => {
			Err(MigrationError::Configuration(format!(
				"network {} requires an account list",
				ledger.network()
			)))
		},
		Some(AccountSource::Events { from_block, to_block }) => {
			let to_block = match to_block {
				Some(to_block) => *to_block,
				None => ledger.latest_block().await.map_err(MigrationError::read(None))?.number,
			};
			let addresses = replay_events(ledger, *from_block, to_block).await?;
			tracing::info!(
				accounts = addresses.len(),
				from_block,
				to_block,
				"found accounts in VestingEntryCreated events"
			);
			Ok(addresses.into_iter().map(AccountRecord::new).collect())
		},
		None => Err(MigrationError::Configuration("no account source configured".into())),
	}
}

async fn replay_events(
	ledger: &dyn IEscrowLedger,
	from_block: BlockNumber,
	to_block: BlockNumber,
) -> Result<Vec<Address>> {
	if from_block > to_block {
		return Err(MigrationError::Configuration(format!(
			"from block {from_block} is after to block {to_block}"
		)));
	}
	let mut events = ledger.vesting_entry_created(from_block..to_block.saturating_add(1));
	let mut seen = HashSet::new();
	let mut addresses = vec![];
	while let Some(event) = events.try_next().await.map_err(MigrationError::read(None))? {
		if seen.insert(event.beneficiary) {
			addresses.push(event.beneficiary);
		}
	}
	Ok(addresses)
}

fn dedup_records(records: &[AccountRecord]) -> Vec<AccountRecord> {
	let mut seen = HashSet::new();
	let mut unique = Vec::with_capacity(records.len());
	for record in records {
		if seen.insert(record.address) {
			unique.push(record.clone());
		} else {
			tracing::warn!(address = %record.address, "dropping duplicate account record");
		}
	}
	unique
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::MockLedger;
	use escrow_primitives::Amount;

	fn addr(byte: u8) -> Address {
		Address::repeat_byte(byte)
	}

	#[tokio::test]
	async fn static_list_keeps_first_occurrence() -> anyhow::Result<()> {
		let ledger = MockLedger::default();
		let records = vec![
			AccountRecord::with_balances(addr(2), Amount::from(5u64), Amount::ZERO),
			AccountRecord::new(addr(1)),
			AccountRecord::new(addr(2)),
		];
		let source = AccountSource::List(records.clone());
		let found = discover(&ledger, Some(&source), true).await?;
		assert_eq!(found, records[..2].to_vec());
		Ok(())
	}

	#[tokio::test]
	async fn event_replay_dedups_in_order() -> anyhow::Result<()> {
		let ledger = MockLedger::default();
		for (block, byte) in [(1, 3), (2, 1), (3, 3), (4, 2), (9, 5)] {
			ledger.emit_event(addr(byte), block);
		}
		let source = AccountSource::Events { from_block: 0, to_block: Some(4) };
		let found = discover(&ledger, Some(&source), false).await?;
		let addresses: Vec<_> = found.iter().map(|r| r.address).collect();
		assert_eq!(addresses, vec![addr(3), addr(1), addr(2)]);
		assert!(found.iter().all(|r| r.balances().is_none()));
		Ok(())
	}

	#[tokio::test]
	async fn event_replay_defaults_to_latest_block() -> anyhow::Result<()> {
		let ledger = MockLedger::default();
		ledger.emit_event(addr(1), 0);
		ledger.emit_event(addr(2), crate::mock::LATEST_BLOCK);
		let source = AccountSource::Events { from_block: 0, to_block: None };
		assert_eq!(discover(&ledger, Some(&source), false).await?.len(), 2);
		Ok(())
	}

	#[tokio::test]
	async fn account_list_required() {
		let ledger = MockLedger::default();
		let source = AccountSource::Events { from_block: 0, to_block: None };
		let err = discover(&ledger, Some(&source), true).await.unwrap_err();
		assert!(matches!(err, MigrationError::Configuration(_)));
		let err = discover(&ledger, None, false).await.unwrap_err();
		assert!(matches!(err, MigrationError::Configuration(_)));
		assert_eq!(ledger.read_calls(), 0);
	}

	#[test]
	fn load_account_list_from_file() -> anyhow::Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("accounts.json");
		std::fs::write(
			&path,
			r#"[{"address":"0x0101010101010101010101010101010101010101","balanceOf":"10","vestedBalanceOf":"0"}]"#,
		)?;
		let records = load_account_list(&path)?;
		assert_eq!(records, vec![AccountRecord::with_balances(addr(1), Amount::from(10u64), Amount::ZERO)]);
		assert!(load_account_list(&dir.path().join("missing.json")).is_err());
		Ok(())
	}
}
