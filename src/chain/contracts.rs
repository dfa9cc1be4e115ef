//! Solidity interfaces for the vault, the hook and USDC.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IVelvetVault {
        function deposit(uint256 amount) external returns (uint256 shares);
        function withdraw(uint256 shares) external returns (uint256 amount);
        function balanceOf(address user) external view returns (uint256);

        function bridgeToExecution(uint256 amount, uint256 destinationChain, bytes32 recipient) external;
        function confirmDeployment() external;
        function signalReturn() external;
        function confirmReturn(uint256 amount) external;
        function triggerCircuitBreaker(string reason) external;

        function state() external view returns (uint8);
        function getVaultStats() external view returns (
            uint8 currentState,
            uint256 totalDeposited,
            uint256 totalSharesIssued,
            uint256 currentlyDeployed,
            uint256 availableBalance,
            uint256 yieldEarned,
            uint256 sharePrice
        );
    }
}

sol! {
    #[sol(rpc)]
    interface IVelvetHook {
        function updateDynamicFee(uint24 newFee, string reason) external;
        function getHookStatus() external view returns (
            uint24 currentFee,
            uint8 currentVolatility,
            uint256 liquidity,
            uint256 lastUpdate,
            string feeReason
        );
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
