//! Progress events emitted while deploying and linking
//!
//! Events are advisory: sinks observe them but never influence control flow.

use crate::linking::LinkState;

use ethers::types::{Address, H256};
use serde::Serialize;
use tracing::{debug_span, error, info, warn};

/// Progress notices for the operator and for tests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeployEvent {
    /// Transaction signed and accepted by the node
    TransactionSubmitted {
        label: String,
        tx_hash: H256,
        nonce: u64,
    },

    /// Transaction included in a block
    TransactionIncluded {
        label: String,
        tx_hash: H256,
        block_number: u64,
    },

    /// Observed confirmation depth changed
    ConfirmationProgress {
        label: String,
        tx_hash: H256,
        depth: u64,
        required: u64,
    },

    /// Required confirmation depth reached
    TransactionConfirmed {
        label: String,
        tx_hash: H256,
        depth: u64,
    },

    /// Transaction rejected, reverted or timed out
    TransactionFailed { label: String, reason: String },

    /// Contract created and confirmed
    ContractDeployed {
        network: String,
        interface: String,
        address: Address,
        tx_hash: H256,
    },

    /// A link step moved between states
    LinkStepStateChanged {
        index: usize,
        label: String,
        state: LinkState,
    },

    /// Linking stopped at a failed step
    LinkHalted {
        failed_step: String,
        confirmed: Vec<String>,
        pending: Vec<String>,
    },

    /// Every link step confirmed
    LinkCompleted { steps: usize },
}

impl DeployEvent {
    /// Get event name
    pub fn name(&self) -> &'static str {
        match self {
            DeployEvent::TransactionSubmitted { .. } => "TransactionSubmitted",
            DeployEvent::TransactionIncluded { .. } => "TransactionIncluded",
            DeployEvent::ConfirmationProgress { .. } => "ConfirmationProgress",
            DeployEvent::TransactionConfirmed { .. } => "TransactionConfirmed",
            DeployEvent::TransactionFailed { .. } => "TransactionFailed",
            DeployEvent::ContractDeployed { .. } => "ContractDeployed",
            DeployEvent::LinkStepStateChanged { .. } => "LinkStepStateChanged",
            DeployEvent::LinkHalted { .. } => "LinkHalted",
            DeployEvent::LinkCompleted { .. } => "LinkCompleted",
        }
    }
}

/// Receives progress events
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &DeployEvent);
}

/// Sink that writes every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: &DeployEvent) {
        let _event = debug_span!("event", kind = event.name()).entered();
        match event {
            DeployEvent::TransactionSubmitted {
                label,
                tx_hash,
                nonce,
            } => info!("{} submitted: {:?} (nonce {})", label, tx_hash, nonce),
            DeployEvent::TransactionIncluded {
                label,
                tx_hash,
                block_number,
            } => info!("{} included in block {}: {:?}", label, block_number, tx_hash),
            DeployEvent::ConfirmationProgress {
                label,
                depth,
                required,
                ..
            } => info!("{} has {} / {} confirmations", label, depth, required),
            DeployEvent::TransactionConfirmed {
                label,
                tx_hash,
                depth,
            } => info!("{} confirmed at depth {}: {:?}", label, depth, tx_hash),
            DeployEvent::TransactionFailed { label, reason } => {
                error!("{} failed: {}", label, reason)
            }
            DeployEvent::ContractDeployed {
                network,
                interface,
                address,
                ..
            } => info!("{} deployed on {} at {:?}", interface, network, address),
            DeployEvent::LinkStepStateChanged {
                index,
                label,
                state,
            } => info!("Link step {} ({}) is now {:?}", index, label, state),
            DeployEvent::LinkHalted {
                failed_step,
                confirmed,
                pending,
            } => warn!(
                "Linking halted at {}; confirmed: {:?}; not attempted: {:?}. \
                 Re-run linking to finish",
                failed_step, confirmed, pending
            ),
            DeployEvent::LinkCompleted { steps } => info!("All {} link steps confirmed", steps),
        }
    }
}

/// Sink that keeps every event in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<DeployEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<DeployEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DeployEvent::name).collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn notify(&self, event: &DeployEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
