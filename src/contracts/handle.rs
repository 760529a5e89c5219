//! Callable handles bound to a deployed address and a network client

use super::artifacts::{ArtifactCatalog, ContractInterface};
use crate::chain::LedgerClient;
use crate::error::{DeployerError, DeployerResult};
use crate::tx::ContractCall;

use ethers::abi::{Function, StateMutability, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest};
use std::sync::Arc;

/// A contract interface bound to an address and a client
#[derive(Clone)]
pub struct ContractHandle {
    interface: Arc<ContractInterface>,
    address: Address,
    client: Arc<dyn LedgerClient>,
}

impl ContractHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    /// Observability label for a method, e.g. `NitrilityFactory.setAuctionAddr`
    pub fn label(&self, method: &str) -> String {
        format!("{}.{}", self.interface.name, method)
    }

    fn function(&self, name: &str) -> DeployerResult<&Function> {
        self.interface.abi.function(name).map_err(|_| {
            DeployerError::Abi(format!("{} has no method {}", self.interface.name, name))
        })
    }

    /// Encode a state-changing call, ready for the transaction sender
    pub fn method(&self, name: &str, args: &[Token]) -> DeployerResult<ContractCall> {
        let function = self.function(name)?;
        if matches!(
            function.state_mutability,
            StateMutability::View | StateMutability::Pure
        ) {
            return Err(DeployerError::Abi(format!(
                "{} is read-only, use read()",
                self.label(name)
            )));
        }

        let data = function
            .encode_input(args)
            .map_err(|e| DeployerError::Abi(format!("{}: {}", self.label(name), e)))?;

        Ok(ContractCall {
            client: self.client.clone(),
            to: Some(self.address),
            data: data.into(),
        })
    }

    /// Call a method without sending a transaction and decode its outputs
    pub async fn read(&self, name: &str, args: &[Token]) -> DeployerResult<Vec<Token>> {
        let function = self.function(name)?;
        let data = function
            .encode_input(args)
            .map_err(|e| DeployerError::Abi(format!("{}: {}", self.label(name), e)))?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.address)
            .data(data)
            .into();
        let output = self.client.call(&tx).await?;

        function
            .decode_output(&output)
            .map_err(|e| DeployerError::Abi(format!("{} output: {}", self.label(name), e)))
    }
}

/// Produces handles for already-deployed contracts
pub struct ContractResolver {
    catalog: Arc<ArtifactCatalog>,
    client: Arc<dyn LedgerClient>,
}

impl ContractResolver {
    pub fn new(catalog: Arc<ArtifactCatalog>, client: Arc<dyn LedgerClient>) -> Self {
        Self { catalog, client }
    }

    /// Bind `interface_name` at `address` to the default client or `client_override`
    ///
    /// Never touches the network; an unknown name fails before any client is used.
    pub fn resolve(
        &self,
        interface_name: &str,
        address: Address,
        client_override: Option<Arc<dyn LedgerClient>>,
    ) -> DeployerResult<ContractHandle> {
        let interface = self.catalog.interface(interface_name)?;

        Ok(ContractHandle {
            interface,
            address,
            client: client_override.unwrap_or_else(|| self.client.clone()),
        })
    }
}
