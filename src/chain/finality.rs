//! Confirmation tracking for submitted transactions
//!
//! A transaction is durable once it is `required` blocks deep, counting its
//! own inclusion block as depth 1. Anything shallower is a wait state, never
//! an error. A receipt that vanishes after inclusion means the block was
//! reorged out; the wait simply returns to "not included".

use super::LedgerClient;
use crate::error::{DeployerError, DeployerResult};
use crate::events::{DeployEvent, EventSink};

use ethers::types::{Address, TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Result of a transaction that reached the required depth
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub tx_hash: H256,
    pub block_number: u64,
    pub confirmed_at_depth: u64,
    pub receipt: TransactionReceipt,
}

/// Polls a ledger until transactions are included and sufficiently deep
pub struct ConfirmationWatcher {
    /// Delay between polls
    poll_interval: Duration,
    /// Upper bound on one transaction's whole wait
    max_wait: Duration,
    /// Progress sink
    sink: Arc<dyn EventSink>,
}

impl ConfirmationWatcher {
    pub fn new(poll_interval: Duration, max_wait: Duration, sink: Arc<dyn EventSink>) -> Self {
        Self {
            poll_interval,
            max_wait,
            sink,
        }
    }

    /// Wait until the transaction is `required` blocks deep
    pub async fn wait_for_depth(
        &self,
        client: &dyn LedgerClient,
        tx_hash: H256,
        label: &str,
        required: u64,
    ) -> DeployerResult<TransactionOutcome> {
        self.bounded(label, self.poll_depth(client, tx_hash, label, required))
            .await
    }

    /// Wait until a contract creation is `required` blocks deep
    ///
    /// The assigned address is logged as soon as the creation is included,
    /// but inclusion and depth share one timeout.
    pub async fn wait_for_creation(
        &self,
        client: &dyn LedgerClient,
        tx_hash: H256,
        label: &str,
        required: u64,
    ) -> DeployerResult<(Address, TransactionOutcome)> {
        self.bounded(label, async {
            let receipt = self.poll_inclusion(client, tx_hash, label).await?;
            let address =
                receipt
                    .contract_address
                    .ok_or_else(|| DeployerError::TransactionFailed {
                        label: label.to_string(),
                        reason: "receipt carries no contract address".to_string(),
                    })?;
            info!(
                "{} assigned address {:?}, waiting for {} confirmations",
                label, address, required
            );

            let outcome = self.deepen(client, receipt, label, required).await?;
            Ok::<_, DeployerError>((address, outcome))
        })
        .await
    }

    async fn bounded<T>(
        &self,
        label: &str,
        wait: impl std::future::Future<Output = DeployerResult<T>>,
    ) -> DeployerResult<T> {
        match timeout(self.max_wait, wait).await {
            Ok(result) => result,
            Err(_) => Err(DeployerError::Timeout {
                operation: format!("confirmation of {}", label),
            }),
        }
    }

    async fn poll_inclusion(
        &self,
        client: &dyn LedgerClient,
        tx_hash: H256,
        label: &str,
    ) -> DeployerResult<TransactionReceipt> {
        loop {
            if let Some(receipt) = client.transaction_receipt(tx_hash).await? {
                let receipt = Self::check_status(receipt, label)?;
                if let Some(block) = receipt.block_number {
                    self.sink.notify(&DeployEvent::TransactionIncluded {
                        label: label.to_string(),
                        tx_hash,
                        block_number: block.as_u64(),
                    });
                    return Ok(receipt);
                }
            }
            debug!("{} not yet included: {:?}", label, tx_hash);
            sleep(self.poll_interval).await;
        }
    }

    async fn poll_depth(
        &self,
        client: &dyn LedgerClient,
        tx_hash: H256,
        label: &str,
        required: u64,
    ) -> DeployerResult<TransactionOutcome> {
        let receipt = self.poll_inclusion(client, tx_hash, label).await?;
        self.deepen(client, receipt, label, required).await
    }

    async fn deepen(
        &self,
        client: &dyn LedgerClient,
        mut receipt: TransactionReceipt,
        label: &str,
        required: u64,
    ) -> DeployerResult<TransactionOutcome> {
        let tx_hash = receipt.transaction_hash;
        let mut last_depth = 0;

        loop {
            let included_at = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
            let head = client.block_number().await?;
            let depth = head.saturating_sub(included_at) + 1;

            if depth != last_depth {
                last_depth = depth;
                self.sink.notify(&DeployEvent::ConfirmationProgress {
                    label: label.to_string(),
                    tx_hash,
                    depth,
                    required,
                });
            }

            if depth >= required {
                self.sink.notify(&DeployEvent::TransactionConfirmed {
                    label: label.to_string(),
                    tx_hash,
                    depth,
                });
                return Ok(TransactionOutcome {
                    tx_hash,
                    block_number: included_at,
                    confirmed_at_depth: depth,
                    receipt,
                });
            }

            sleep(self.poll_interval).await;

            // Re-check inclusion; the block holding the receipt may have been reorged out
            match client.transaction_receipt(tx_hash).await? {
                Some(latest) if latest.block_number.is_some() => {
                    receipt = Self::check_status(latest, label)?;
                }
                _ => {
                    warn!(
                        "{} dropped out of block {} on chain {}, waiting for re-inclusion",
                        label,
                        included_at,
                        client.chain_id()
                    );
                    last_depth = 0;
                    receipt = self.poll_inclusion(client, tx_hash, label).await?;
                }
            }
        }
    }

    fn check_status(
        receipt: TransactionReceipt,
        label: &str,
    ) -> DeployerResult<TransactionReceipt> {
        if receipt.status == Some(0u64.into()) {
            return Err(DeployerError::TransactionFailed {
                label: label.to_string(),
                reason: format!("reverted in block {:?}", receipt.block_number),
            });
        }
        Ok(receipt)
    }
}
