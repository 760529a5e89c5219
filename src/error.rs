//! Error types for the deployer

use thiserror::Error;

/// Main error type for deployment and linking runs
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Unknown contract interface: {name}")]
    UnknownInterface { name: String },

    #[error("Deployment of {interface} failed: {reason}")]
    DeploymentFailed { interface: String, reason: String },

    #[error("Transaction {label} failed: {reason}")]
    TransactionFailed { label: String, reason: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("No deployment of {interface} recorded for network {network}")]
    MissingDeployment { network: String, interface: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Artifact error for {name}: {message}")]
    Artifact { name: String, message: String },

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployerError {
    /// Whether re-running the failed step may succeed without operator changes.
    ///
    /// Nothing in the crate retries on its own; this only shapes the
    /// diagnostic printed before exit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployerError::TransactionFailed { .. }
                | DeployerError::Timeout { .. }
                | DeployerError::ChainConnection { .. }
        )
    }

    /// Re-tag a rejected or reverted creation as a failed deployment
    pub fn into_deployment_failure(self, interface: &str) -> Self {
        match self {
            DeployerError::TransactionFailed { reason, .. } => DeployerError::DeploymentFailed {
                interface: interface.to_string(),
                reason,
            },
            // Still in flight: the creation may land after the run gives up
            DeployerError::Timeout { operation } if !operation.contains(interface) => {
                DeployerError::Timeout {
                    operation: format!("{} ({})", operation, interface),
                }
            }
            other => other,
        }
    }
}

/// Result type for deployer operations
pub type DeployerResult<T> = Result<T, DeployerError>;
