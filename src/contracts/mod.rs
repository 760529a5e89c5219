//! Contract interfaces and handles
//!
//! The artifact catalog maps interface names to ABI and creation code; the
//! resolver binds an interface to a deployed address and a network client.

pub mod artifacts;
pub mod handle;

pub use artifacts::ArtifactCatalog;
pub use handle::ContractResolver;

#[cfg(test)]
pub mod fixtures {
    use super::artifacts::{ArtifactCatalog, ContractInterface};
    use ethers::types::Bytes;

    pub const FACTORY_ABI: &str = r#"[
        {"type":"constructor","inputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"setAuctionAddr","inputs":[{"name":"_auctionAddr","type":"address","internalType":"address"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"auctionAddr","inputs":[],"outputs":[{"name":"","type":"address","internalType":"address"}],"stateMutability":"view"}
    ]"#;

    pub const AUCTION_ABI: &str = r#"[
        {"type":"constructor","inputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"setFactory","inputs":[{"name":"_factory","type":"address","internalType":"address"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"factory","inputs":[],"outputs":[{"name":"","type":"address","internalType":"address"}],"stateMutability":"view"}
    ]"#;

    pub const REGISTRY_ABI: &str = r#"[
        {"type":"constructor","inputs":[{"name":"owner","type":"address","internalType":"address"},{"name":"fee","type":"uint256","internalType":"uint256"}],"stateMutability":"nonpayable"}
    ]"#;

    fn interface(name: &str, abi: &str, bytecode: &[u8]) -> ContractInterface {
        ContractInterface {
            name: name.to_string(),
            abi: serde_json::from_str(abi).expect("fixture abi"),
            bytecode: Bytes::from(bytecode.to_vec()),
        }
    }

    /// Catalog holding the factory, the auction and a contract with constructor arguments
    pub fn catalog() -> ArtifactCatalog {
        let catalog = ArtifactCatalog::default();
        catalog.insert(interface("NitrilityFactory", FACTORY_ABI, &[0x60, 0x80, 0x01]));
        catalog.insert(interface("NitrilityAuction", AUCTION_ABI, &[0x60, 0x80, 0x02]));
        catalog.insert(interface("NitrilityRegistry", REGISTRY_ABI, &[0x60, 0x80, 0x03]));
        catalog
    }
}
