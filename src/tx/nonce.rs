//! Nonce management for the deployer's signing identity
//!
//! Handles:
//! - Local nonce tracking so sequential submissions never collide
//! - Releasing a nonce whose broadcast never reached the node
//! - Reporting transactions still in flight

use crate::chain::LedgerClient;
use crate::error::{DeployerError, DeployerResult};

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-chain nonce state
#[derive(Debug)]
struct ChainNonceState {
    /// Current local nonce (next to use)
    current: u64,
    /// In-flight transactions: nonce -> tx hash
    pending: BTreeMap<u64, String>,
    /// Highest nonce whose transaction reached the confirmation depth
    confirmed: Option<u64>,
}

/// Owns the nonce sequence of one signer across the chains it touches
pub struct NonceManager {
    chain_state: DashMap<u64, Arc<Mutex<ChainNonceState>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            chain_state: DashMap::new(),
        }
    }

    /// Initialize the sequence for a chain from the signer's pending count
    pub async fn init_chain(&self, client: &dyn LedgerClient) -> DeployerResult<()> {
        let chain_id = client.chain_id();
        let on_chain_nonce = client.transaction_count(client.signer()).await?;

        let state = ChainNonceState {
            current: on_chain_nonce,
            pending: BTreeMap::new(),
            confirmed: on_chain_nonce.checked_sub(1),
        };

        self.chain_state
            .insert(chain_id, Arc::new(Mutex::new(state)));
        debug!("Initialized nonce for chain {}: {}", chain_id, on_chain_nonce);

        Ok(())
    }

    fn state(&self, chain_id: u64) -> DeployerResult<Arc<Mutex<ChainNonceState>>> {
        self.chain_state
            .get(&chain_id)
            .map(|s| s.clone())
            .ok_or(DeployerError::Nonce {
                chain_id,
                message: "Chain not initialized".to_string(),
            })
    }

    /// Allocate the next nonce, initializing the chain on first use
    pub async fn next_nonce(&self, client: &dyn LedgerClient) -> DeployerResult<u64> {
        let chain_id = client.chain_id();
        if !self.chain_state.contains_key(&chain_id) {
            self.init_chain(client).await?;
        }

        let state = self.state(chain_id)?;
        let mut state = state.lock().await;
        let nonce = state.current;
        state.current += 1;

        debug!("Allocated nonce {} for chain {}", nonce, chain_id);
        Ok(nonce)
    }

    /// Mark a nonce as in flight with its transaction hash
    pub async fn mark_pending(
        &self,
        chain_id: u64,
        nonce: u64,
        tx_hash: &str,
    ) -> DeployerResult<()> {
        let state = self.state(chain_id)?;
        state
            .lock()
            .await
            .pending
            .insert(nonce, tx_hash.to_string());
        Ok(())
    }

    /// The transaction holding `nonce` was mined, successfully or not
    pub async fn confirm_nonce(&self, chain_id: u64, nonce: u64) -> DeployerResult<()> {
        let state = self.state(chain_id)?;
        let mut state = state.lock().await;
        state.pending.remove(&nonce);
        if state.confirmed.map_or(true, |c| nonce > c) {
            state.confirmed = Some(nonce);
        }
        Ok(())
    }

    /// Release a nonce whose broadcast failed
    ///
    /// Only the most recently allocated nonce can be handed out again; an
    /// older one would leave a gap that blocks every later transaction.
    pub async fn release_nonce(&self, chain_id: u64, nonce: u64) -> DeployerResult<()> {
        let state = self.state(chain_id)?;
        let mut state = state.lock().await;
        state.pending.remove(&nonce);

        if nonce + 1 == state.current {
            state.current = nonce;
        } else {
            warn!(
                "Released nonce {} on chain {} is not the latest ({}), gap left behind",
                nonce,
                chain_id,
                state.current - 1
            );
        }
        Ok(())
    }

    /// In-flight transactions for a chain
    pub async fn pending(&self, chain_id: u64) -> Vec<(u64, String)> {
        match self.state(chain_id) {
            Ok(state) => state
                .lock()
                .await
                .pending
                .iter()
                .map(|(n, h)| (*n, h.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}
