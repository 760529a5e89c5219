//! In-process ledger for tests
//!
//! Mining is driven by polling: the first receipt lookup for a transaction
//! includes it in a fresh block and returns nothing, later lookups return
//! the receipt. Every head-block query appends one empty block, so a watcher
//! sees depth 1, then depth 2, and so on.

use super::LedgerClient;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::get_contract_address;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Transaction accepted by the fake ledger
#[derive(Debug, Clone)]
pub struct SentTx {
    pub tx_hash: H256,
    pub to: Option<Address>,
    pub data: Bytes,
    pub nonce: u64,
}

impl SentTx {
    pub fn selector(&self) -> Option<[u8; 4]> {
        selector_of(&self.data)
    }
}

#[derive(Debug, Default)]
struct Mined {
    included_at: Option<u64>,
    served: u32,
    reverted: bool,
}

#[derive(Default)]
struct FakeState {
    head: u64,
    next_nonce: u64,
    sent: Vec<SentTx>,
    mined: HashMap<H256, Mined>,
    storage: HashMap<(Address, [u8; 4]), Bytes>,
    call_results: HashMap<(Address, [u8; 4]), Bytes>,
    revert_calls: HashSet<(Address, [u8; 4])>,
    revert_next: u32,
    reject_next: u32,
    reorg: HashSet<H256>,
    stalled: bool,
    network_calls: usize,
}

pub struct FakeLedger {
    chain_id: u64,
    signer: Address,
    state: Mutex<FakeState>,
}

fn selector_of(data: &Bytes) -> Option<[u8; 4]> {
    data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::with_chain_id(31337)
    }

    pub fn with_chain_id(chain_id: u64) -> Self {
        Self {
            chain_id,
            signer: Address::repeat_byte(0xde),
            state: Mutex::new(FakeState {
                head: 100,
                ..Default::default()
            }),
        }
    }

    /// Broadcast a transaction bypassing nonce and gas handling
    pub fn broadcast_raw(&self, to: Option<Address>) -> H256 {
        let mut state = self.state.lock().unwrap();
        let nonce = state.next_nonce;
        Self::accept(&mut state, to, Bytes::default(), nonce)
    }

    /// Make the next `n` accepted transactions revert when mined
    pub fn revert_next_sends(&self, n: u32) {
        self.state.lock().unwrap().revert_next = n;
    }

    /// Make the next `n` broadcasts fail outright
    pub fn reject_next_sends(&self, n: u32) {
        self.state.lock().unwrap().reject_next = n;
    }

    /// Revert every call to `selector` on `to`
    pub fn revert_calls_to(&self, to: Address, selector: [u8; 4]) {
        self.state.lock().unwrap().revert_calls.insert((to, selector));
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.revert_calls.clear();
        state.revert_next = 0;
        state.reject_next = 0;
    }

    /// Stop including transactions and producing blocks
    pub fn stall_mining(&self, stalled: bool) {
        self.state.lock().unwrap().stalled = stalled;
    }

    /// Drop `tx_hash` from its block once, after its receipt has been served
    pub fn reorg_once(&self, tx_hash: H256) {
        self.state.lock().unwrap().reorg.insert(tx_hash);
    }

    pub fn set_call_result(&self, to: Address, selector: [u8; 4], result: Bytes) {
        self.state
            .lock()
            .unwrap()
            .call_results
            .insert((to, selector), result);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Last value written by a successful call to `selector` on `to`
    pub fn stored(&self, to: Address, selector: [u8; 4]) -> Option<Bytes> {
        self.state.lock().unwrap().storage.get(&(to, selector)).cloned()
    }

    pub fn storage_snapshot(&self) -> HashMap<(Address, [u8; 4]), Bytes> {
        self.state.lock().unwrap().storage.clone()
    }

    /// Number of trait calls that would have hit the network
    pub fn network_calls(&self) -> usize {
        self.state.lock().unwrap().network_calls
    }

    fn accept(state: &mut FakeState, to: Option<Address>, data: Bytes, nonce: u64) -> H256 {
        let tx_hash = H256::from_low_u64_be(state.sent.len() as u64 + 1);
        let mut reverted = to
            .zip(selector_of(&data))
            .map(|key| state.revert_calls.contains(&key))
            .unwrap_or(false);
        if state.revert_next > 0 {
            state.revert_next -= 1;
            reverted = true;
        }

        state.sent.push(SentTx {
            tx_hash,
            to,
            data,
            nonce,
        });
        state.next_nonce = state.next_nonce.max(nonce + 1);
        state.mined.insert(
            tx_hash,
            Mined {
                reverted,
                ..Default::default()
            },
        );
        tx_hash
    }

    fn receipt_for(&self, state: &FakeState, tx_hash: H256, block: u64) -> TransactionReceipt {
        let tx = state.sent.iter().find(|t| t.tx_hash == tx_hash);
        let reverted = state.mined.get(&tx_hash).map(|m| m.reverted).unwrap_or(false);
        let contract_address = match tx {
            Some(t) if t.to.is_none() && !reverted => {
                Some(get_contract_address(self.signer, t.nonce))
            }
            _ => None,
        };

        TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(block)),
            status: Some(U64::from(if reverted { 0u64 } else { 1u64 })),
            from: self.signer,
            to: tx.and_then(|t| t.to),
            contract_address,
            gas_used: Some(U256::from(21_000u64)),
            ..Default::default()
        }
    }
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer(&self) -> Address {
        self.signer
    }

    async fn transaction_count(&self, _address: Address) -> DeployerResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.network_calls += 1;
        Ok(state.next_nonce)
    }

    async fn balance(&self, _address: Address) -> DeployerResult<U256> {
        self.state.lock().unwrap().network_calls += 1;
        Ok(ethers::utils::parse_ether(10u64).unwrap_or_default())
    }

    async fn block_number(&self) -> DeployerResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.network_calls += 1;
        let head = state.head;
        if !state.stalled {
            state.head += 1;
        }
        Ok(head)
    }

    async fn gas_price(&self) -> DeployerResult<U256> {
        self.state.lock().unwrap().network_calls += 1;
        Ok(U256::from(1_000_000_000u64))
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> DeployerResult<U256> {
        self.state.lock().unwrap().network_calls += 1;
        Ok(U256::from(100_000u64))
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> DeployerResult<H256> {
        let mut state = self.state.lock().unwrap();
        state.network_calls += 1;

        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(DeployerError::TransactionFailed {
                label: "broadcast".to_string(),
                reason: "insufficient funds for gas * price + value".to_string(),
            });
        }

        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or(state.next_nonce);
        let to = tx.to().and_then(|t| t.as_address().copied());
        let data = tx.data().cloned().unwrap_or_default();
        Ok(Self::accept(&mut state, to, data, nonce))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> DeployerResult<Option<TransactionReceipt>> {
        let mut state = self.state.lock().unwrap();
        state.network_calls += 1;

        if state.stalled {
            return Ok(None);
        }

        let (included_at, served, reverted) = match state.mined.get(&tx_hash) {
            Some(m) => (m.included_at, m.served, m.reverted),
            None => return Ok(None),
        };

        match included_at {
            None => {
                state.head += 1;
                let head = state.head;
                if let Some(m) = state.mined.get_mut(&tx_hash) {
                    m.included_at = Some(head);
                }
                if !reverted {
                    let write = state
                        .sent
                        .iter()
                        .find(|t| t.tx_hash == tx_hash)
                        .and_then(|t| Some(((t.to?, t.selector()?), t.data.clone())));
                    if let Some((key, data)) = write {
                        state.storage.insert(key, data);
                    }
                }
                Ok(None)
            }
            Some(block) => {
                if served >= 1 && state.reorg.remove(&tx_hash) {
                    if let Some(m) = state.mined.get_mut(&tx_hash) {
                        m.included_at = None;
                        m.served = 0;
                    }
                    return Ok(None);
                }
                if let Some(m) = state.mined.get_mut(&tx_hash) {
                    m.served += 1;
                }
                Ok(Some(self.receipt_for(&state, tx_hash, block)))
            }
        }
    }

    async fn call(&self, tx: &TypedTransaction) -> DeployerResult<Bytes> {
        let mut state = self.state.lock().unwrap();
        state.network_calls += 1;

        let to = tx.to().and_then(|t| t.as_address().copied());
        let selector = tx.data().and_then(selector_of);
        Ok(to
            .zip(selector)
            .and_then(|key| state.call_results.get(&key).cloned())
            .unwrap_or_default())
    }
}
