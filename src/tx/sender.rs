//! Confirmation-gated transaction submission
//!
//! `submit` does not return until the transaction is `confirmations` blocks
//! deep. Nothing here retries: a failure surfaces to the caller, who re-runs
//! the whole step if it wants another attempt.

use super::gas::GasEstimator;
use super::nonce::NonceManager;
use crate::chain::finality::TransactionOutcome;
use crate::chain::{ConfirmationWatcher, LedgerClient};
use crate::error::{DeployerError, DeployerResult};
use crate::events::{DeployEvent, EventSink};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A state-changing call, or a contract creation when `to` is `None`
#[derive(Clone)]
pub struct ContractCall {
    pub client: Arc<dyn LedgerClient>,
    pub to: Option<Address>,
    pub data: Bytes,
}

impl std::fmt::Debug for ContractCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractCall")
            .field("chain_id", &self.client.chain_id())
            .field("to", &self.to)
            .field("data", &self.data)
            .finish()
    }
}

/// Submits transactions one at a time and waits for them to become durable
pub struct TransactionSender {
    /// Nonce sequence of the signing identity
    nonce_manager: Arc<NonceManager>,
    /// Gas estimator
    gas_estimator: GasEstimator,
    /// Confirmation tracking
    watcher: ConfirmationWatcher,
    /// Required confirmation depth
    confirmations: u64,
    /// Progress sink
    sink: Arc<dyn EventSink>,
}

impl TransactionSender {
    pub fn new(
        nonce_manager: Arc<NonceManager>,
        gas_estimator: GasEstimator,
        watcher: ConfirmationWatcher,
        confirmations: u64,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            nonce_manager,
            gas_estimator,
            watcher,
            confirmations,
            sink,
        }
    }

    /// Send a call and wait for the configured confirmation depth
    pub async fn submit(&self, call: ContractCall, label: &str) -> DeployerResult<TransactionOutcome> {
        let started = Instant::now();
        let client = call.client.as_ref();
        let (tx_hash, nonce) = self.broadcast(&call, label).await?;

        let result = self
            .watcher
            .wait_for_depth(client, tx_hash, label, self.confirmations)
            .await;
        self.settle(client, nonce, label, started, result).await
    }

    /// Send a contract creation and wait for the configured confirmation depth
    ///
    /// The address is known as soon as the creation is included, but it is
    /// only returned once the transaction is as deep as any other. A timeout
    /// leaves the creation in flight.
    pub async fn submit_creation(
        &self,
        call: ContractCall,
        label: &str,
    ) -> DeployerResult<(Address, TransactionOutcome)> {
        if call.to.is_some() {
            return Err(DeployerError::TransactionFailed {
                label: label.to_string(),
                reason: "contract creation must not have a recipient".to_string(),
            });
        }

        let started = Instant::now();
        let client = call.client.as_ref();
        let (tx_hash, nonce) = self.broadcast(&call, label).await?;

        let result = self
            .watcher
            .wait_for_creation(client, tx_hash, label, self.confirmations)
            .await;
        match result {
            Ok((address, outcome)) => {
                let outcome = self
                    .settle(client, nonce, label, started, Ok(outcome))
                    .await?;
                Ok((address, outcome))
            }
            Err(e) => Err(self.fail(client, nonce, label, e).await),
        }
    }

    /// Allocate a nonce, build, sign and send
    async fn broadcast(&self, call: &ContractCall, label: &str) -> DeployerResult<(H256, u64)> {
        let client = call.client.as_ref();
        let chain_id = client.chain_id();
        let nonce = self.nonce_manager.next_nonce(client).await?;

        match self.send(call, nonce).await {
            Ok(tx_hash) => {
                self.nonce_manager
                    .mark_pending(chain_id, nonce, &format!("{:?}", tx_hash))
                    .await?;
                self.sink.notify(&DeployEvent::TransactionSubmitted {
                    label: label.to_string(),
                    tx_hash,
                    nonce,
                });
                crate::metrics::record_tx_submitted(chain_id);
                Ok((tx_hash, nonce))
            }
            Err(e) => {
                // Never reached the mempool, the nonce is still free
                self.nonce_manager.release_nonce(chain_id, nonce).await?;
                let e = relabel(e, label);
                self.report_failure(chain_id, label, &e);
                Err(e)
            }
        }
    }

    async fn send(&self, call: &ContractCall, nonce: u64) -> DeployerResult<H256> {
        let client = call.client.as_ref();

        let mut request = TransactionRequest::new()
            .from(client.signer())
            .data(call.data.clone())
            .nonce(nonce)
            .chain_id(client.chain_id());
        if let Some(to) = call.to {
            request = request.to(to);
        }
        let mut tx: TypedTransaction = request.into();

        let gas_limit = self.gas_estimator.estimate_gas_limit(client, &tx).await?;
        let gas_price = self.gas_estimator.gas_price(client).await?;
        tx.set_gas(gas_limit);
        tx.set_gas_price(gas_price);
        debug!(
            "Sending nonce {} with gas {} (max cost {} wei)",
            nonce,
            gas_limit,
            GasEstimator::calculate_cost(gas_limit, gas_price)
        );

        client.send_transaction(tx).await
    }

    /// Book-keeping once a broadcast transaction has resolved either way
    async fn settle(
        &self,
        client: &dyn LedgerClient,
        nonce: u64,
        label: &str,
        started: Instant,
        result: DeployerResult<TransactionOutcome>,
    ) -> DeployerResult<TransactionOutcome> {
        let chain_id = client.chain_id();
        match result {
            Ok(outcome) => {
                self.nonce_manager.confirm_nonce(chain_id, nonce).await?;
                crate::metrics::record_tx_confirmed(chain_id, started.elapsed().as_secs_f64());
                Ok(outcome)
            }
            Err(e) => Err(self.fail(client, nonce, label, e).await),
        }
    }

    async fn fail(
        &self,
        client: &dyn LedgerClient,
        nonce: u64,
        label: &str,
        e: DeployerError,
    ) -> DeployerError {
        let chain_id = client.chain_id();
        match &e {
            // Mined and reverted: the nonce is spent
            DeployerError::TransactionFailed { .. } => {
                if let Err(err) = self.nonce_manager.confirm_nonce(chain_id, nonce).await {
                    warn!("Could not settle nonce {}: {}", nonce, err);
                }
            }
            _ => {
                let in_flight = self.nonce_manager.pending(chain_id).await;
                warn!(
                    "{} left in flight with nonce {} on chain {}; unresolved transactions: {:?}",
                    label, nonce, chain_id, in_flight
                );
            }
        }
        let e = relabel(e, label);
        self.report_failure(chain_id, label, &e);
        e
    }

    fn report_failure(&self, chain_id: u64, label: &str, e: &DeployerError) {
        self.sink.notify(&DeployEvent::TransactionFailed {
            label: label.to_string(),
            reason: e.to_string(),
        });
        crate::metrics::record_tx_failed(chain_id);
    }
}

fn relabel(e: DeployerError, label: &str) -> DeployerError {
    match e {
        DeployerError::TransactionFailed { reason, .. } => DeployerError::TransactionFailed {
            label: label.to_string(),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeLedger;
    use crate::config::DeployerConfig;
    use crate::events::{MockEventSink, RecordingSink};
    use std::time::Duration;

    fn sender_with(sink: Arc<dyn EventSink>, confirmations: u64) -> TransactionSender {
        TransactionSender::new(
            Arc::new(NonceManager::new()),
            GasEstimator::new(&DeployerConfig::default()),
            ConfirmationWatcher::new(Duration::from_millis(1), Duration::from_secs(5), sink.clone()),
            confirmations,
            sink,
        )
    }

    fn call_to(ledger: &Arc<FakeLedger>, to: Address) -> ContractCall {
        ContractCall {
            client: ledger.clone(),
            to: Some(to),
            data: Bytes::from(vec![0xaa, 0xbb, 0xcc, 0xdd, 0x01]),
        }
    }

    #[tokio::test]
    async fn test_submit_waits_for_second_confirmation() {
        let ledger = Arc::new(FakeLedger::new());
        let sink = Arc::new(RecordingSink::default());
        let sender = sender_with(sink.clone(), 2);

        let outcome = sender
            .submit(call_to(&ledger, Address::repeat_byte(1)), "Factory.setAuctionAddr")
            .await
            .unwrap();

        assert_eq!(outcome.confirmed_at_depth, 2);
        assert_eq!(
            sink.names(),
            vec![
                "TransactionSubmitted",
                "TransactionIncluded",
                "ConfirmationProgress",
                "ConfirmationProgress",
                "TransactionConfirmed",
            ]
        );
        match &sink.events()[2] {
            DeployEvent::ConfirmationProgress { depth, required, .. } => {
                assert_eq!((*depth, *required), (1, 2));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_depth_is_configurable() {
        let ledger = Arc::new(FakeLedger::new());
        let sender = sender_with(Arc::new(RecordingSink::default()), 4);

        let outcome = sender
            .submit(call_to(&ledger, Address::repeat_byte(1)), "deep")
            .await
            .unwrap();
        assert_eq!(outcome.confirmed_at_depth, 4);
    }

    #[tokio::test]
    async fn test_rejected_broadcast_frees_nonce() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.reject_next_sends(1);

        let mut sink = MockEventSink::new();
        sink.expect_notify()
            .withf(|e| matches!(e, DeployEvent::TransactionFailed { label, .. } if label == "first"))
            .times(1)
            .return_const(());
        let sender = sender_with(Arc::new(sink), 2);

        let err = sender
            .submit(call_to(&ledger, Address::repeat_byte(1)), "first")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployerError::TransactionFailed { ref label, .. } if label == "first"));
        assert!(ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_nonce_reused_after_rejection() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.reject_next_sends(1);
        let sender = sender_with(Arc::new(RecordingSink::default()), 2);

        let target = Address::repeat_byte(1);
        assert!(sender.submit(call_to(&ledger, target), "a").await.is_err());
        sender.submit(call_to(&ledger, target), "a").await.unwrap();

        assert_eq!(ledger.sent()[0].nonce, 0);
    }

    #[tokio::test]
    async fn test_reverted_transaction_consumes_nonce() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.revert_next_sends(1);
        let sink = Arc::new(RecordingSink::default());
        let sender = sender_with(sink.clone(), 2);

        let target = Address::repeat_byte(1);
        let err = sender.submit(call_to(&ledger, target), "a").await.unwrap_err();
        assert!(matches!(err, DeployerError::TransactionFailed { .. }));
        assert_eq!(sink.names().last(), Some(&"TransactionFailed"));

        sender.submit(call_to(&ledger, target), "b").await.unwrap();
        let nonces: Vec<u64> = ledger.sent().iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_creation_returns_assigned_address() {
        let ledger = Arc::new(FakeLedger::new());
        let sender = sender_with(Arc::new(RecordingSink::default()), 2);

        let (address, outcome) = sender
            .submit_creation(
                ContractCall {
                    client: ledger.clone(),
                    to: None,
                    data: Bytes::from(vec![0x60, 0x80]),
                },
                "deploy Factory",
            )
            .await
            .unwrap();

        assert_eq!(
            address,
            ethers::utils::get_contract_address(ledger.signer(), 0u64)
        );
        assert_eq!(outcome.confirmed_at_depth, 2);
    }

    #[tokio::test]
    async fn test_creation_rejects_recipient() {
        let ledger = Arc::new(FakeLedger::new());
        let sender = sender_with(Arc::new(RecordingSink::default()), 2);

        let result = sender
            .submit_creation(call_to(&ledger, Address::repeat_byte(1)), "bad")
            .await;
        assert!(result.is_err());
        assert_eq!(ledger.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_stalled_creation_times_out_and_stays_in_flight() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.stall_mining(true);
        let sink = Arc::new(RecordingSink::default());
        let sender = TransactionSender::new(
            Arc::new(NonceManager::new()),
            GasEstimator::new(&DeployerConfig::default()),
            ConfirmationWatcher::new(Duration::from_millis(1), Duration::from_millis(50), sink.clone()),
            2,
            sink.clone(),
        );

        let err = sender
            .submit_creation(
                ContractCall {
                    client: ledger.clone(),
                    to: None,
                    data: Bytes::from(vec![0x60, 0x80]),
                },
                "deploy NitrilityFactory",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployerError::Timeout { .. }));
        assert_eq!(ledger.sent().len(), 1);
        assert_eq!(sink.names().last(), Some(&"TransactionFailed"));
        assert!(!sink.names().contains(&"TransactionConfirmed"));
    }
}
