use crate::sol::{IRewardEscrow, IRewardEscrowV2};
use alloy_primitives::{Bytes, B256};
use alloy_provider::{Provider, ProviderBuilder, ReqwestProvider};
use alloy_rpc_types_eth::{
	BlockId, BlockTransactionsKind, Filter, TransactionInput, TransactionRequest,
};
use alloy_sol_types::{SolCall, SolEvent};
use anyhow::{Context, Result};
use escrow_primitives::{
	Address, Amount, BlockInfo, BlockNumber, Escrow, EscrowCall, IChain, IEscrowLedger, TxHash,
	TxReceipt, TxStatus, VestingEntryCreated,
};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::ops::Range;
use std::time::Duration;

pub(crate) mod sol;

pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;
pub const DEFAULT_LOG_CHUNK_SIZE: u64 = 100_000;
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const GWEI: u128 = 1_000_000_000;

/// Addresses of the contracts and the account sending transactions.
#[derive(Clone, Copy, Debug)]
pub struct Contracts {
	pub legacy: Address,
	pub successor: Address,
	pub sender: Address,
}

/// Escrow ledger talking to an EVM node. Transactions are signed by the
/// node for the configured sender account.
pub struct Connector {
	network: String,
	provider: ReqwestProvider,
	contracts: Contracts,
	gas_limit: u64,
	gas_price: Option<u128>,
	log_chunk_size: u64,
	poll_interval: Duration,
}

impl Connector {
	pub fn new(network: &str, url: &str, contracts: Contracts) -> Result<Self> {
		let url = url.parse().with_context(|| format!("invalid provider url `{url}`"))?;
		Ok(Self {
			network: network.into(),
			provider: ProviderBuilder::new().on_http(url),
			contracts,
			gas_limit: DEFAULT_GAS_LIMIT,
			gas_price: None,
			log_chunk_size: DEFAULT_LOG_CHUNK_SIZE,
			poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
		})
	}

	/// Fixes the gas price of submitted transactions.
	pub fn with_gas_price_gwei(mut self, gwei: u64) -> Self {
		self.gas_price = Some(u128::from(gwei) * GWEI);
		self
	}

	pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
		self.gas_limit = gas_limit;
		self
	}

	/// Maximum block span of a single `eth_getLogs` request.
	pub fn with_log_chunk_size(mut self, size: u64) -> Self {
		self.log_chunk_size = size.max(1);
		self
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	fn escrow_address(&self, escrow: Escrow) -> Address {
		match escrow {
			Escrow::Legacy => self.contracts.legacy,
			Escrow::Successor => self.contracts.successor,
		}
	}

	/// A transaction from the sender with the configured gas settings.
	fn transaction(&self, to: Address, input: Bytes) -> TransactionRequest {
		let mut tx = TransactionRequest::default()
			.from(self.contracts.sender)
			.to(to)
			.input(TransactionInput::new(input));
		tx.gas = Some(self.gas_limit.into());
		tx.gas_price = self.gas_price.map(Into::into);
		tx
	}

	async fn evm_view<T: SolCall>(&self, contract: Address, call: T) -> Result<T::Return> {
		let tx = TransactionRequest::default()
			.to(contract)
			.input(TransactionInput::new(call.abi_encode().into()));
		let result = self.provider.call(&tx).await?;
		Ok(T::abi_decode_returns(&result, true)?)
	}

	async fn logs_in(&self, from: BlockNumber, to: BlockNumber) -> Result<Vec<VestingEntryCreated>> {
		let filter = Filter::new()
			.address(self.contracts.legacy)
			.event_signature(IRewardEscrow::VestingEntryCreated::SIGNATURE_HASH)
			.from_block(from)
			.to_block(to);
		let logs = self.provider.get_logs(&filter).await?;
		tracing::debug!(from, to, logs = logs.len(), "fetched VestingEntryCreated logs");
		logs.iter()
			.map(|log| {
				decode_vesting_entry(log.inner.data.topics(), &log.inner.data.data, log.block_number)
			})
			.collect()
	}

	/// Replays a reverted transaction as a call at its block to recover the
	/// revert reason.
	async fn revert_reason(&self, hash: TxHash, block: BlockNumber) -> Option<String> {
		let tx = match self.provider.get_transaction_by_hash(hash).await {
			Ok(Some(tx)) => tx,
			Ok(None) => return None,
			Err(err) => {
				tracing::warn!(%hash, "failed to fetch reverted transaction: {err}");
				return None;
			},
		};
		let replay = self.transaction(tx.to?, tx.input).from(tx.from);
		match self.provider.call(&replay).block(BlockId::number(block)).await {
			Ok(_) => None,
			Err(err) => {
				let payload = err.as_error_resp()?;
				decode_revert(&payload.message, payload.as_revert_data())
			},
		}
	}
}

/// Decodes `Error(string)` revert data, falling back to the reason geth puts
/// in the error message.
fn decode_revert(message: &str, data: Option<Bytes>) -> Option<String> {
	data.and_then(|data| alloy_sol_types::decode_revert_reason(&data))
		.or_else(|| message.strip_prefix("execution reverted: ").map(str::to_string))
}

fn encode_call(call: &EscrowCall) -> Vec<u8> {
	match call.clone() {
		EscrowCall::MigrateAccountEscrowBalances { accounts, balances, vested } => {
			IRewardEscrowV2::migrateAccountEscrowBalancesCall {
				accounts,
				escrowBalances: balances,
				vestedBalances: vested,
			}
			.abi_encode()
		},
		EscrowCall::ImportVestingSchedule { accounts, amounts } => {
			IRewardEscrowV2::importVestingScheduleCall { accounts, escrowAmounts: amounts }
				.abi_encode()
		},
	}
}

fn decode_vesting_entry(
	topics: &[B256],
	data: &[u8],
	block: Option<BlockNumber>,
) -> Result<VestingEntryCreated> {
	let event =
		IRewardEscrow::VestingEntryCreated::decode_raw_log(topics.iter().copied(), data, true)?;
	let time = u64::try_from(event.time)
		.map_err(|_| anyhow::anyhow!("vesting entry time {} out of range", event.time))?;
	Ok(VestingEntryCreated {
		beneficiary: event.beneficiary,
		time,
		value: event.value,
		block: block.context("log without block number")?,
	})
}

/// Splits `blocks` into inclusive `(from, to)` spans of at most `size` blocks.
fn block_chunks(blocks: Range<BlockNumber>, size: u64) -> impl Iterator<Item = (u64, u64)> {
	let end = blocks.end;
	(blocks.start..blocks.end)
		.step_by(size as usize)
		.map(move |from| (from, from.saturating_add(size).min(end) - 1))
}

#[async_trait::async_trait]
impl IChain for Connector {
	fn network(&self) -> &str {
		&self.network
	}

	async fn latest_block(&self) -> Result<BlockInfo> {
		let number = self.provider.get_block_number().await?;
		let block = self
			.provider
			.get_block(BlockId::number(number), BlockTransactionsKind::Hashes)
			.await?
			.with_context(|| format!("node returned no block {number}"))?;
		Ok(BlockInfo { number, timestamp: block.header.timestamp })
	}
}

#[async_trait::async_trait]
impl IEscrowLedger for Connector {
	async fn total_escrowed_account_balance(
		&self,
		escrow: Escrow,
		account: Address,
	) -> Result<Amount> {
		let contract = self.escrow_address(escrow);
		let balance = match escrow {
			Escrow::Legacy => {
				self.evm_view(
					contract,
					IRewardEscrow::totalEscrowedAccountBalanceCall { account },
				)
				.await?
				._0
			},
			Escrow::Successor => {
				self.evm_view(
					contract,
					IRewardEscrowV2::totalEscrowedAccountBalanceCall { account },
				)
				.await?
				._0
			},
		};
		Ok(balance)
	}

	async fn total_vested_account_balance(&self, account: Address) -> Result<Amount> {
		let call = IRewardEscrow::totalVestedAccountBalanceCall { account };
		Ok(self.evm_view(self.contracts.legacy, call).await?._0)
	}

	async fn num_vesting_entries(&self, account: Address) -> Result<u64> {
		let call = IRewardEscrowV2::numVestingEntriesCall { account };
		let entries = self.evm_view(self.contracts.successor, call).await?._0;
		u64::try_from(entries).map_err(|_| anyhow::anyhow!("numVestingEntries out of range"))
	}

	async fn check_account_schedule(&self, account: Address) -> Result<Vec<Amount>> {
		let call = IRewardEscrow::checkAccountScheduleCall { account };
		Ok(self.evm_view(self.contracts.legacy, call).await?._0.to_vec())
	}

	async fn migrate_entries_threshold_amount(&self) -> Result<Amount> {
		let call = IRewardEscrowV2::migrateEntriesThresholdAmountCall {};
		Ok(self.evm_view(self.contracts.successor, call).await?._0)
	}

	async fn total_escrowed_balance(&self, escrow: Escrow) -> Result<Amount> {
		let contract = self.escrow_address(escrow);
		let total = match escrow {
			Escrow::Legacy => {
				self.evm_view(contract, IRewardEscrow::totalEscrowedBalanceCall {}).await?._0
			},
			Escrow::Successor => {
				self.evm_view(contract, IRewardEscrowV2::totalEscrowedBalanceCall {}).await?._0
			},
		};
		Ok(total)
	}

	fn vesting_entry_created(
		&self,
		blocks: Range<BlockNumber>,
	) -> BoxStream<'_, Result<VestingEntryCreated>> {
		futures::stream::iter(block_chunks(blocks, self.log_chunk_size))
			.then(move |(from, to)| self.logs_in(from, to))
			.map_ok(|events| futures::stream::iter(events.into_iter().map(Ok::<_, anyhow::Error>)))
			.try_flatten()
			.boxed()
	}

	async fn submit(&self, call: &EscrowCall) -> Result<TxHash> {
		let tx = self.transaction(self.contracts.successor, encode_call(call).into());
		let hash = *self.provider.send_transaction(tx).await?.tx_hash();
		tracing::info!(%hash, accounts = call.len(), "{} sent", call.kind());
		Ok(hash)
	}

	async fn wait_for_receipt(
		&self,
		hash: TxHash,
		timeout: Option<Duration>,
	) -> Result<Option<TxReceipt>> {
		let start = tokio::time::Instant::now();
		loop {
			match self.provider.get_transaction_receipt(hash).await {
				Ok(Some(receipt)) => {
					let block = receipt.block_number.context("receipt without block number")?;
					let status = if receipt.status() {
						TxStatus::Success
					} else {
						TxStatus::Reverted { reason: self.revert_reason(hash, block).await }
					};
					let gas_used = u64::try_from(receipt.gas_used)
						.map_err(|_| anyhow::anyhow!("gas used out of range"))?;
					return Ok(Some(TxReceipt { hash, block, gas_used, status }));
				},
				Ok(None) => {},
				// the transaction is still in flight, keep polling
				Err(err) => tracing::warn!(%hash, "receipt lookup failed: {err}"),
			}
			if timeout.is_some_and(|timeout| start.elapsed() >= timeout) {
				return Ok(None);
			}
			tokio::time::sleep(self.poll_interval).await;
		}
	}
}
