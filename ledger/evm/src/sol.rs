alloy_sol_types::sol! {
	interface IRewardEscrow {
		function totalEscrowedAccountBalance(address account) external view returns (uint256);
		function totalVestedAccountBalance(address account) external view returns (uint256);
		function totalEscrowedBalance() external view returns (uint256);
		function checkAccountSchedule(address account) external view returns (uint256[520] memory);

		event VestingEntryCreated(address indexed beneficiary, uint256 time, uint256 value);
	}

	interface IRewardEscrowV2 {
		function totalEscrowedAccountBalance(address account) external view returns (uint256);
		function totalEscrowedBalance() external view returns (uint256);
		function numVestingEntries(address account) external view returns (uint256);
		function migrateEntriesThresholdAmount() external view returns (uint256);
		function migrateAccountEscrowBalances(
			address[] calldata accounts,
			uint256[] calldata escrowBalances,
			uint256[] calldata vestedBalances
		) external;
		function importVestingSchedule(address[] calldata accounts, uint256[] calldata escrowAmounts) external;
	}
}
