use escrow_primitives::{Account, AmountFormatter, FlattenedEntry, MigrationResult};
use tabled::{Table, Tabled};

pub trait IntoRow {
	type Row: Tabled;

	fn into_row(self, fmt: &AmountFormatter) -> Self::Row;
}

pub fn print_table<R: IntoRow>(fmt: &AmountFormatter, table: Vec<R>) {
	let rows: Vec<_> = table.into_iter().map(|row| row.into_row(fmt)).collect();
	println!("{}", Table::new(rows));
}

#[derive(Tabled)]
pub struct AccountEntry {
	address: String,
	balance: String,
	vested: String,
	has_escrow_balance: bool,
}

impl IntoRow for Account {
	type Row = AccountEntry;

	fn into_row(self, fmt: &AmountFormatter) -> Self::Row {
		AccountEntry {
			address: self.address.to_string(),
			balance: fmt.format(self.legacy_balance),
			vested: fmt.format(self.legacy_vested),
			has_escrow_balance: self.already_migrated,
		}
	}
}

#[derive(Tabled)]
pub struct ImportEntry {
	address: String,
	amount: String,
}

impl IntoRow for FlattenedEntry {
	type Row = ImportEntry;

	fn into_row(self, fmt: &AmountFormatter) -> Self::Row {
		ImportEntry {
			address: self.address.to_string(),
			amount: fmt.format(self.amount),
		}
	}
}

#[derive(Tabled)]
pub struct SummaryEntry {
	network: String,
	started_at: u64,
	dry_run: bool,
	skipped: usize,
	migrated: usize,
	migrated_total: String,
	imported: usize,
	pending: String,
	reconciliation: String,
}

impl IntoRow for &MigrationResult {
	type Row = SummaryEntry;

	fn into_row(self, fmt: &AmountFormatter) -> Self::Row {
		SummaryEntry {
			network: self.network.clone(),
			started_at: self.started_at,
			dry_run: self.dry_run,
			skipped: self.skipped_accounts.len(),
			migrated: self.migrated_accounts.len(),
			migrated_total: self
				.migrated_total()
				.map(|total| fmt.format(total))
				.unwrap_or_else(|| "overflow".into()),
			imported: self.imported_vested_entries.len(),
			pending: self
				.pending_transaction
				.as_ref()
				.map(|tx| format!("{} {}", tx.kind, tx.hash))
				.unwrap_or_default(),
			reconciliation: self
				.reconciliation
				.as_ref()
				.map(|r| {
					if r.is_match() {
						format!("match ({})", fmt.format(r.successor_total))
					} else {
						r.to_string()
					}
				})
				.unwrap_or_default(),
		}
	}
}

pub fn print_summary(fmt: &AmountFormatter, result: &MigrationResult) {
	print_table(fmt, vec![result]);
}

pub fn print_result(fmt: &AmountFormatter, result: &MigrationResult) {
	if !result.skipped_accounts.is_empty() {
		println!("skipped accounts");
		print_table(fmt, result.skipped_accounts.clone());
	}
	println!("migrated accounts");
	print_table(fmt, result.migrated_accounts.clone());
	println!("imported vesting entries");
	print_table(fmt, result.imported_vested_entries.clone());
	print_summary(fmt, result);
}
