//! Transaction submission with nonce management and confirmation gating

mod gas;
mod nonce;
mod sender;

pub use gas::GasEstimator;
pub use nonce::NonceManager;
pub use sender::{ContractCall, TransactionSender};
