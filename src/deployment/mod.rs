//! Contract deployment
//!
//! A deployment resolves the interface, sends the creation transaction and
//! records the assigned address in the manifest once the creation is as deep
//! as any other confirmed transaction. A failed creation records nothing.
//! A creation that times out is reported as a timeout, since it may still
//! be mined after the run gives up.
//!
//! Deploying is not idempotent: running it again creates a new contract and
//! replaces the manifest entry.

use crate::chain::LedgerClient;
use crate::contracts::ArtifactCatalog;
use crate::error::DeployerResult;
use crate::events::{DeployEvent, EventSink};
use crate::state::{ManifestEntry, ManifestStore};
use crate::tx::{ContractCall, TransactionSender};

use chrono::Utc;
use ethers::abi::Token;
use ethers::types::Address;
use ethers::utils::format_ether;
use std::sync::Arc;
use tracing::info;

/// A contract whose creation reached the required confirmation depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub interface: String,
    pub address: Address,
}

/// Creates contracts from catalog interfaces
pub struct Deployer {
    catalog: Arc<ArtifactCatalog>,
    client: Arc<dyn LedgerClient>,
    sender: Arc<TransactionSender>,
    manifest: Arc<ManifestStore>,
    sink: Arc<dyn EventSink>,
}

impl Deployer {
    pub fn new(
        catalog: Arc<ArtifactCatalog>,
        client: Arc<dyn LedgerClient>,
        sender: Arc<TransactionSender>,
        manifest: Arc<ManifestStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog,
            client,
            sender,
            manifest,
            sink,
        }
    }

    /// Log the deploying account and its balance
    pub async fn announce(&self) -> DeployerResult<()> {
        let signer = self.client.signer();
        let balance = self.client.balance(signer).await?;
        info!(
            "Deploying on {} with the account {:?} (balance {} ETH)",
            self.manifest.network(),
            signer,
            format_ether(balance)
        );
        Ok(())
    }

    /// Deploy `interface_name` with textual constructor arguments
    pub async fn deploy_with_args(
        &self,
        interface_name: &str,
        raw_args: &[String],
    ) -> DeployerResult<DeployedContract> {
        let interface = self.catalog.interface(interface_name)?;
        let args = interface.constructor_tokens(raw_args)?;
        self.deploy(interface_name, &args).await
    }

    /// Deploy `interface_name` and record it in the manifest
    pub async fn deploy(
        &self,
        interface_name: &str,
        constructor_args: &[Token],
    ) -> DeployerResult<DeployedContract> {
        let interface = self.catalog.interface(interface_name)?;
        let data = interface.creation_data(constructor_args)?;
        let label = format!("deploy {}", interface_name);

        let call = ContractCall {
            client: self.client.clone(),
            to: None,
            data,
        };
        let (address, outcome) = self
            .sender
            .submit_creation(call, &label)
            .await
            .map_err(|e| e.into_deployment_failure(interface_name))?;

        self.manifest
            .record(
                interface_name,
                ManifestEntry {
                    address,
                    tx_hash: outcome.tx_hash,
                    block_number: outcome.block_number,
                    confirmations: outcome.confirmed_at_depth,
                    deployed_at: Utc::now(),
                },
            )
            .await?;

        self.sink.notify(&DeployEvent::ContractDeployed {
            network: self.manifest.network().to_string(),
            interface: interface_name.to_string(),
            address,
            tx_hash: outcome.tx_hash,
        });
        crate::metrics::record_contract_deployed(interface_name);
        info!("{} address: {:?}", interface_name, address);

        Ok(DeployedContract {
            interface: interface_name.to_string(),
            address,
        })
    }
}
