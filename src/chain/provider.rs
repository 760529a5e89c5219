//! Chain provider backed by an ethers HTTP provider and a local wallet

use super::LedgerClient;
use crate::config::NetworkConfig;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use tracing::{debug, info};

/// Signing client for a single network
pub struct ChainProvider {
    /// Network configuration
    config: NetworkConfig,
    /// Provider with the deployer wallet attached
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
}

impl ChainProvider {
    /// Create a provider and load the signer named by `private_key_env`
    pub fn new(config: NetworkConfig) -> DeployerResult<Self> {
        let wallet = Self::load_wallet(&config)?;

        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| DeployerError::ChainConnection {
                chain_id: config.chain_id,
                message: format!("Invalid RPC URL: {}", e),
            })?
            .interval(config.poll_interval());

        info!(
            "Connected to {} (chain {}) as {:?}",
            config.name,
            config.chain_id,
            wallet.address()
        );

        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            config,
        })
    }

    /// Load the wallet from the configured environment variable
    fn load_wallet(config: &NetworkConfig) -> DeployerResult<LocalWallet> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            DeployerError::Wallet(format!(
                "No signer configured. Set {}",
                config.private_key_env
            ))
        })?;

        key.trim()
            .parse::<LocalWallet>()
            .map(|w| w.with_chain_id(config.chain_id))
            .map_err(|e| DeployerError::Wallet(format!("Invalid private key: {}", e)))
    }

    fn connection_error(&self, e: impl std::fmt::Display) -> DeployerError {
        DeployerError::ChainConnection {
            chain_id: self.config.chain_id,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl LedgerClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn signer(&self) -> Address {
        self.client.address()
    }

    async fn transaction_count(&self, address: Address) -> DeployerResult<u64> {
        let count = self
            .client
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| DeployerError::Nonce {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?;
        Ok(count.as_u64())
    }

    async fn balance(&self, address: Address) -> DeployerResult<U256> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn block_number(&self) -> DeployerResult<u64> {
        self.client
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| self.connection_error(e))
    }

    async fn gas_price(&self) -> DeployerResult<U256> {
        self.client
            .get_gas_price()
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> DeployerResult<U256> {
        // A revert during estimation is the node rejecting the call up front
        self.client
            .estimate_gas(tx, None)
            .await
            .map_err(|e| DeployerError::TransactionFailed {
                label: "gas estimation".to_string(),
                reason: e.to_string(),
            })
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> DeployerResult<H256> {
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| DeployerError::TransactionFailed {
                label: "broadcast".to_string(),
                reason: e.to_string(),
            })?;
        let tx_hash = pending.tx_hash();
        debug!("Broadcast accepted on chain {}: {:?}", self.config.chain_id, tx_hash);
        Ok(tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> DeployerResult<Option<TransactionReceipt>> {
        self.client
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn call(&self, tx: &TypedTransaction) -> DeployerResult<Bytes> {
        self.client
            .call(tx, None)
            .await
            .map_err(|e| self.connection_error(e))
    }
}
