//! Ordered, fail-fast execution of link steps

use super::plan::{LinkProgress, LinkState, LinkStep, LinkTarget};
use crate::chain::finality::TransactionOutcome;
use crate::contracts::ContractResolver;
use crate::error::DeployerResult;
use crate::events::{DeployEvent, EventSink};
use crate::state::ManifestStore;
use crate::tx::{ContractCall, TransactionSender};

use ethers::abi::Token;
use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, error, info};

struct PreparedStep {
    label: String,
    call: ContractCall,
}

/// Wires deployed contracts together
pub struct LinkingBootstrap {
    resolver: Arc<ContractResolver>,
    sender: Arc<TransactionSender>,
    manifest: Arc<ManifestStore>,
    sink: Arc<dyn EventSink>,
}

impl LinkingBootstrap {
    pub fn new(
        resolver: Arc<ContractResolver>,
        sender: Arc<TransactionSender>,
        manifest: Arc<ManifestStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            resolver,
            sender,
            manifest,
            sink,
        }
    }

    /// Run `steps` in order, each confirmed before the next is sent.
    ///
    /// Every address is resolved from the manifest before the first send, so
    /// a missing deployment fails without touching the chain. On a failed
    /// step the remaining steps are never sent and confirmed ones stay applied.
    pub async fn link(&self, steps: &[LinkStep]) -> DeployerResult<Vec<TransactionOutcome>> {
        let mut prepared = Vec::with_capacity(steps.len());
        for step in steps {
            prepared.push(self.prepare(step).await?);
        }

        let total = prepared.len();
        let mut progress = LinkProgress::new(prepared.iter().map(|p| p.label.clone()).collect());
        let mut outcomes = Vec::with_capacity(prepared.len());

        for (index, step) in prepared.into_iter().enumerate() {
            self.advance(&mut progress, index, LinkState::Submitted)?;

            match self.sender.submit(step.call, &step.label).await {
                Ok(outcome) => {
                    self.advance(&mut progress, index, LinkState::Confirmed)?;
                    info!(
                        "{} confirmed in block {} ({}/{})",
                        step.label,
                        outcome.block_number,
                        index + 1,
                        total
                    );
                    outcomes.push(outcome);
                }
                Err(e) => {
                    self.advance(&mut progress, index, LinkState::Failed)?;
                    let confirmed = progress.labels_in(LinkState::Confirmed);
                    let pending = progress.labels_in(LinkState::Pending);
                    error!(
                        "Linking halted at {}: {}. Confirmed: {:?}. Not sent: {:?}",
                        step.label, e, confirmed, pending
                    );
                    self.sink.notify(&DeployEvent::LinkHalted {
                        failed_step: step.label,
                        confirmed,
                        pending,
                    });
                    return Err(e);
                }
            }
        }

        info!("Linking complete: {} steps confirmed", outcomes.len());
        self.sink.notify(&DeployEvent::LinkCompleted {
            steps: outcomes.len(),
        });
        Ok(outcomes)
    }

    async fn prepare(&self, step: &LinkStep) -> DeployerResult<PreparedStep> {
        let source = self.manifest.address_of(&step.source).await?;
        let target = self.target_address(&step.target).await?;

        let handle = self.resolver.resolve(&step.source, source, None)?;
        let call = handle.method(&step.setter, &[Token::Address(target)])?;
        debug!(
            "{} at {:?} on chain {} -> {:?}",
            handle.label(&step.setter),
            handle.address(),
            handle.client().chain_id(),
            target
        );

        Ok(PreparedStep {
            label: handle.label(&step.setter),
            call,
        })
    }

    async fn target_address(&self, target: &LinkTarget) -> DeployerResult<Address> {
        match target {
            LinkTarget::Contract(name) => self.manifest.address_of(name).await,
            LinkTarget::Address(address) => Ok(*address),
        }
    }

    fn advance(
        &self,
        progress: &mut LinkProgress,
        index: usize,
        state: LinkState,
    ) -> DeployerResult<()> {
        progress.transition(index, state)?;
        self.sink.notify(&DeployEvent::LinkStepStateChanged {
            index,
            label: progress.label(index).to_string(),
            state,
        });
        Ok(())
    }
}
