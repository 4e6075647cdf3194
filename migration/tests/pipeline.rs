use anyhow::Result;
use escrow_migration::{
	artifact_path, migrate, AccountSource, MigrationError, MigrationLog, MigrationParams,
};
use escrow_primitives::{
	AccountRecord, Address, Amount, Escrow, IChain, IEscrowLedger, MigrationResult, VestingEntry,
};
use ledger_rust::Ledger;
use std::path::PathBuf;
use tokio::sync::watch;

const FUTURE: u64 = 9_999_999_999;

fn addr(byte: u8) -> Address {
	Address::repeat_byte(byte)
}

fn snx(n: u64) -> Amount {
	Amount::from(n) * Amount::from(10u64).pow(Amount::from(18u64))
}

fn entry(timestamp: u64, amount: Amount) -> VestingEntry {
	VestingEntry { timestamp, amount }
}

fn events() -> MigrationParams {
	MigrationParams {
		source: Some(AccountSource::Events { from_block: 0, to_block: None }),
		..Default::default()
	}
}

/// Three legacy accounts: one above the threshold with matured entries, one
/// below it and one whose entries have not matured yet.
fn seeded_ledger() -> Result<Ledger> {
	let ledger = Ledger::new("local", "tempfile")?;
	ledger.set_threshold(snx(100))?;
	ledger.seed_account(
		addr(1),
		snx(500),
		snx(20),
		&[entry(100, snx(300)), entry(200, snx(100)), entry(FUTURE, snx(100))],
	)?;
	ledger.seed_account(addr(2), snx(50), snx(0), &[entry(100, snx(50))])?;
	ledger.seed_account(addr(3), snx(1000), snx(0), &[entry(FUTURE, snx(1000))])?;
	Ok(ledger)
}

async fn run(ledger: &Ledger, params: &MigrationParams, path: PathBuf) -> Result<MigrationResult> {
	let (_tx, abort) = watch::channel(false);
	let mut log = MigrationLog::create(path, ledger.network(), 0, params.dry_run);
	migrate(ledger, params, &mut log, abort).await?;
	Ok(log.into_result())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn migrates_flattens_and_reconciles() -> Result<()> {
	let ledger = seeded_ledger()?;
	let dir = tempfile::tempdir()?;
	let path = artifact_path(dir.path(), "local", 0);
	let result = run(&ledger, &events(), path.clone()).await?;

	let migrated: Vec<_> = result.migrated_accounts.iter().map(|a| a.address).collect();
	assert_eq!(migrated, vec![addr(1), addr(2), addr(3)]);
	assert_eq!(result.imported_vested_entries.len(), 1);
	assert_eq!(result.imported_vested_entries[0].address, addr(1));
	assert_eq!(result.imported_vested_entries[0].amount, snx(400));
	assert!(result.reconciliation.as_ref().is_some_and(|r| r.is_match()));
	assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, snx(1550));
	assert_eq!(ledger.vesting_entries(addr(1))?.len(), 1);

	assert_eq!(MigrationResult::load(&path)?, result);
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_is_idempotent() -> Result<()> {
	let ledger = seeded_ledger()?;
	let dir = tempfile::tempdir()?;
	run(&ledger, &events(), dir.path().join("first.json")).await?;
	let result = run(&ledger, &events(), dir.path().join("second.json")).await?;

	assert!(result.migrated_accounts.is_empty());
	assert!(result.imported_vested_entries.is_empty());
	assert_eq!(result.skipped_accounts.len(), 3);
	assert!(result.skipped_accounts.iter().all(|a| a.already_migrated));
	assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, snx(1550));
	assert_eq!(ledger.vesting_entries(addr(1))?.len(), 1);
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resumed_artifact_stays_unique() -> Result<()> {
	let ledger = seeded_ledger()?;
	let dir = tempfile::tempdir()?;
	let path = dir.path().join("artifact.json");
	run(&ledger, &events(), path.clone()).await?;

	let (_tx, abort) = watch::channel(false);
	let mut log = MigrationLog::resume(path.clone(), "local", false)?;
	migrate(&ledger, &events(), &mut log, abort).await?;
	let result = MigrationResult::load(&path)?;
	assert_eq!(result.migrated_accounts.len(), 3);
	assert!(result.skipped_accounts.is_empty());
	assert_eq!(result.imported_vested_entries.len(), 1);
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dry_run_leaves_successor_untouched() -> Result<()> {
	let ledger = seeded_ledger()?;
	let dir = tempfile::tempdir()?;
	let params = MigrationParams { dry_run: true, ..events() };
	let result = run(&ledger, &params, dir.path().join("dry.json")).await?;

	assert!(result.dry_run);
	assert_eq!(result.migrated_accounts.len(), 3);
	assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, Amount::ZERO);
	let reconciliation = result.reconciliation.unwrap();
	assert!(!reconciliation.is_match());
	assert_eq!(reconciliation.legacy_total, snx(1550));
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn account_list_overrides_balances() -> Result<()> {
	let ledger = seeded_ledger()?;
	let dir = tempfile::tempdir()?;
	let params = MigrationParams {
		source: Some(AccountSource::List(vec![
			AccountRecord::with_balances(addr(2), snx(50), snx(5)),
			AccountRecord::new(addr(3)),
		])),
		requires_account_list: true,
		..Default::default()
	};
	let result = run(&ledger, &params, dir.path().join("list.json")).await?;
	let migrated: Vec<_> = result.migrated_accounts.iter().map(|a| a.address).collect();
	assert_eq!(migrated, vec![addr(2), addr(3)]);
	assert_eq!(result.migrated_accounts[0].legacy_vested, snx(5));
	assert_eq!(result.migrated_accounts[1].legacy_balance, snx(1000));
	assert!(result.imported_vested_entries.is_empty());
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_rejected_when_list_required() -> Result<()> {
	let ledger = seeded_ledger()?;
	let dir = tempfile::tempdir()?;
	let params = MigrationParams { requires_account_list: true, ..events() };
	let err = run(&ledger, &params, dir.path().join("mainnet.json")).await.unwrap_err();
	assert!(matches!(
		err.downcast_ref::<MigrationError>(),
		Some(MigrationError::Configuration(_))
	));
	assert_eq!(ledger.total_escrowed_balance(Escrow::Successor).await?, Amount::ZERO);
	Ok(())
}
