//! Gas limit and price selection

use crate::chain::LedgerClient;
use crate::config::DeployerConfig;
use crate::error::DeployerResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(config: &DeployerConfig) -> Self {
        Self {
            gas_limit_buffer_percent: config.gas_limit_buffer_percent,
            gas_price_buffer_percent: config.gas_price_buffer_percent,
        }
    }

    /// Estimate the gas limit for a transaction, plus buffer
    pub async fn estimate_gas_limit(
        &self,
        client: &dyn LedgerClient,
        tx: &TypedTransaction,
    ) -> DeployerResult<U256> {
        let estimate = client.estimate_gas(tx).await?;
        Ok(Self::with_buffer(estimate, self.gas_limit_buffer_percent))
    }

    /// Current gas price, plus buffer
    pub async fn gas_price(&self, client: &dyn LedgerClient) -> DeployerResult<U256> {
        let price = client.gas_price().await?;
        let buffered = Self::with_buffer(price, self.gas_price_buffer_percent);
        debug!("Gas price for chain {}: {}", client.chain_id(), buffered);
        Ok(buffered)
    }

    fn with_buffer(value: U256, percent: u64) -> U256 {
        value + value * percent / 100
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: U256) -> U256 {
        gas_limit * gas_price
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(&DeployerConfig::default())
    }
}
