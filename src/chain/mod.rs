//! Chain module - the network client seam and confirmation tracking
//!
//! This module provides:
//! - The `LedgerClient` trait every network-touching component goes through
//! - An ethers-backed provider bound to one signing identity
//! - Confirmation-depth tracking for submitted transactions

pub mod finality;
pub mod provider;
#[cfg(test)]
pub mod testing;

pub use finality::ConfirmationWatcher;
pub use provider::ChainProvider;

use crate::error::DeployerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Handle to a remote ledger plus the identity that signs for it
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain ID this client talks to
    fn chain_id(&self) -> u64;

    /// Address of the signing identity
    fn signer(&self) -> Address;

    /// Transactions sent by `address`, including pending ones
    async fn transaction_count(&self, address: Address) -> DeployerResult<u64>;

    /// Native balance of `address`
    async fn balance(&self, address: Address) -> DeployerResult<U256>;

    /// Current head block number
    async fn block_number(&self) -> DeployerResult<u64>;

    /// Current legacy gas price
    async fn gas_price(&self) -> DeployerResult<U256>;

    /// Estimate gas for a transaction
    async fn estimate_gas(&self, tx: &TypedTransaction) -> DeployerResult<U256>;

    /// Sign and broadcast a transaction, returning its hash
    async fn send_transaction(&self, tx: TypedTransaction) -> DeployerResult<H256>;

    /// Receipt of an included transaction, `None` while it is not in a block
    async fn transaction_receipt(&self, tx_hash: H256)
        -> DeployerResult<Option<TransactionReceipt>>;

    /// Execute a read-only call against the head block
    async fn call(&self, tx: &TypedTransaction) -> DeployerResult<Bytes>;
}
