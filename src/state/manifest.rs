//! JSON deployment manifest
//!
//! Shape: `{ "<network>": { "<InterfaceName>": ManifestEntry } }`. Only
//! addresses whose creation reached the required confirmation depth are
//! recorded.

use crate::error::{DeployerError, DeployerResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A confirmed deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub address: Address,
    pub tx_hash: H256,
    pub block_number: u64,
    pub confirmations: u64,
    pub deployed_at: DateTime<Utc>,
}

type Networks = BTreeMap<String, BTreeMap<String, ManifestEntry>>;

/// File-backed record of deployed addresses, keyed by network and interface name
pub struct ManifestStore {
    path: PathBuf,
    network: String,
    records: RwLock<Networks>,
}

impl ManifestStore {
    /// Open the manifest at `path`; a missing file is an empty manifest
    pub fn open(path: &Path, network: &str) -> DeployerResult<Self> {
        let records = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Networks>(&raw).map_err(|e| {
                DeployerError::Manifest(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifest at {}, starting empty", path.display());
                Networks::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            network: network.to_string(),
            records: RwLock::new(records),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Record a confirmed deployment and persist the manifest
    pub async fn record(&self, interface: &str, entry: ManifestEntry) -> DeployerResult<()> {
        let mut records = self.records.write().await;
        let mut updated = records.clone();
        let contracts = updated.entry(self.network.clone()).or_default();

        if let Some(previous) = contracts.get(interface) {
            if previous.address != entry.address {
                warn!(
                    "Replacing {} on {}: {:?} -> {:?}. Contracts linked to the old address keep pointing at it",
                    interface, self.network, previous.address, entry.address
                );
            }
        }
        contracts.insert(interface.to_string(), entry);

        // Memory only follows a successful write
        Self::persist(&self.path, &updated)?;
        *records = updated;
        info!("Manifest {} updated with {}", self.path.display(), interface);
        Ok(())
    }

    /// Address of `interface` on this store's network
    pub async fn address_of(&self, interface: &str) -> DeployerResult<Address> {
        self.entry(interface)
            .await
            .map(|e| e.address)
            .ok_or_else(|| DeployerError::MissingDeployment {
                network: self.network.clone(),
                interface: interface.to_string(),
            })
    }

    pub async fn entry(&self, interface: &str) -> Option<ManifestEntry> {
        self.records
            .read()
            .await
            .get(&self.network)
            .and_then(|c| c.get(interface))
            .cloned()
    }

    /// All entries for this store's network, ordered by interface name
    pub async fn entries(&self) -> Vec<(String, ManifestEntry)> {
        self.records
            .read()
            .await
            .get(&self.network)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn persist(path: &Path, records: &Networks) -> DeployerResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let body = serde_json::to_string_pretty(records)
            .map_err(|e| DeployerError::Manifest(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
