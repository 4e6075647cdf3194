use anyhow::{Context, Result};
use clap::Parser;
use escrow_migration::{
	artifact_path, load_account_list, AccountSource, MigrationLog, MigrationParams,
	DEFAULT_IMPORT_BATCH_SIZE, DEFAULT_MIGRATION_BATCH_SIZE,
};
use escrow_primitives::{AmountFormatter, IEscrowLedger, MigrationResult};
use ledger_evm::Contracts;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod env;
mod table;

use crate::config::{Backend, Config, NetworkConfig};
use crate::env::{provider_url, Provider};

#[derive(Parser, Debug)]
struct Args {
	#[arg(long, default_value = "config.yaml")]
	config: PathBuf,
	#[arg(long, default_value = "local")]
	network: String,
	/// Overrides the configured provider url and `PROVIDER_URL`.
	#[arg(long)]
	url: Option<String>,
	#[clap(subcommand)]
	cmd: Command,
}

#[derive(Parser, Debug)]
enum Command {
	Migrate(MigrateArgs),
	Reconcile,
	Inspect { artifact: PathBuf },
}

#[derive(clap::Args, Debug)]
struct MigrateArgs {
	/// JSON list of accounts to migrate instead of replaying events.
	#[arg(long)]
	account_json: Option<PathBuf>,
	#[arg(long)]
	dry_run: bool,
	#[arg(long, default_value_t = DEFAULT_MIGRATION_BATCH_SIZE)]
	migration_batch_size: usize,
	#[arg(long, default_value_t = DEFAULT_IMPORT_BATCH_SIZE)]
	import_batch_size: usize,
	#[arg(long)]
	from_block: Option<u64>,
	#[arg(long)]
	to_block: Option<u64>,
	#[arg(long, default_value = ".")]
	output_dir: PathBuf,
	/// Continue an artifact written by an earlier run.
	#[arg(long)]
	resume: Option<PathBuf>,
	/// Seconds to wait for each receipt. Waits forever when unset.
	#[arg(long)]
	confirm_timeout: Option<u64>,
	/// Gas price in gwei.
	#[arg(long)]
	gas_price: Option<u64>,
}

impl Args {
	fn network(&self) -> Result<NetworkConfig> {
		let config = Config::from_file(&self.config)?;
		Ok(config.network(&self.network)?.clone())
	}

	fn connect(
		&self,
		network: &NetworkConfig,
		gas_price: Option<u64>,
	) -> Result<Box<dyn IEscrowLedger>> {
		let provider = Provider::from_env()?;
		let url = self
			.url
			.clone()
			.or(provider.url)
			.or_else(|| network.url.clone())
			.context("no provider url, pass --url or set `PROVIDER_URL`")?;
		let url = provider_url(&url, &self.network);
		let ledger: Box<dyn IEscrowLedger> = match network.backend {
			Backend::Rust => Box::new(ledger_rust::Ledger::new(&self.network, &url)?),
			Backend::Evm => {
				let contracts = Contracts {
					legacy: network.legacy_escrow.context("missing `legacyEscrow` address")?,
					successor: network.escrow.context("missing `escrow` address")?,
					sender: provider
						.sender
						.or(network.sender)
						.context("no sender, set `ESCROW_SENDER`")?,
				};
				let mut connector = ledger_evm::Connector::new(&self.network, &url, contracts)?;
				if let Some(size) = network.log_chunk_size {
					connector = connector.with_log_chunk_size(size);
				}
				if let Some(gas_limit) = network.gas_limit {
					connector = connector.with_gas_limit(gas_limit);
				}
				if let Some(gwei) = gas_price {
					connector = connector.with_gas_price_gwei(gwei);
				}
				Box::new(connector)
			},
		};
		tracing::info!(network = %self.network, backend = ?network.backend, "connected");
		Ok(ledger)
	}
}

fn formatter(ledger: &dyn IEscrowLedger) -> AmountFormatter<'_> {
	let (decimals, symbol) = ledger.currency();
	AmountFormatter::new(decimals, symbol)
}

/// Builds the run parameters from the command line. Fails on a bad
/// configuration before any ledger is contacted.
fn migration_params(network: &NetworkConfig, args: &MigrateArgs) -> Result<MigrationParams> {
	let source = match &args.account_json {
		Some(path) => AccountSource::List(load_account_list(path)?),
		None => AccountSource::Events {
			from_block: args.from_block.unwrap_or(network.from_block),
			to_block: args.to_block,
		},
	};
	let params = MigrationParams {
		source: Some(source),
		requires_account_list: network.requires_account_list,
		dry_run: args.dry_run,
		migration_batch_size: args.migration_batch_size,
		import_batch_size: args.import_batch_size,
		confirm_timeout: args.confirm_timeout.map(Duration::from_secs),
	};
	params.validate()?;
	Ok(params)
}

async fn migrate(
	ledger: &dyn IEscrowLedger,
	params: &MigrationParams,
	args: &MigrateArgs,
) -> Result<MigrationResult> {
	let mut log = match &args.resume {
		Some(path) => MigrationLog::resume(path.clone(), ledger.network(), args.dry_run)?,
		None => {
			let started_at = ledger.latest_block().await?.timestamp;
			let path = artifact_path(&args.output_dir, ledger.network(), started_at);
			MigrationLog::create(path, ledger.network(), started_at, args.dry_run)
		},
	};

	let (abort_tx, abort) = watch::channel(false);
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("interrupt received, stopping at the next batch boundary");
			let _ = abort_tx.send(true);
		}
	});

	let outcome = escrow_migration::migrate(ledger, params, &mut log, abort).await;
	if let Some(path) = log.path() {
		tracing::info!("artifact written to {}", path.display());
	}
	table::print_summary(&formatter(ledger), log.result());
	let summary = outcome?;
	tracing::info!(
		migration_batches = ?summary.migration_batches,
		import_batches = ?summary.import_batches,
		"migration finished"
	);
	Ok(log.into_result())
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();
	let args = Args::parse();
	match &args.cmd {
		Command::Migrate(migrate_args) => {
			let network = args.network()?;
			let params = migration_params(&network, migrate_args)?;
			let ledger = args.connect(&network, migrate_args.gas_price)?;
			migrate(ledger.as_ref(), &params, migrate_args).await?;
		},
		Command::Reconcile => {
			let network = args.network()?;
			let ledger = args.connect(&network, None)?;
			let reconciliation = escrow_migration::reconcile(ledger.as_ref(), true).await?;
			let fmt = formatter(ledger.as_ref());
			println!(
				"legacy {} / successor {}",
				fmt.format(reconciliation.legacy_total),
				fmt.format(reconciliation.successor_total)
			);
			println!("{reconciliation}");
		},
		Command::Inspect { artifact } => {
			let result = MigrationResult::load(artifact)?;
			table::print_result(&AmountFormatter::new(18, "SNX"), &result);
		},
	}
	Ok(())
}
