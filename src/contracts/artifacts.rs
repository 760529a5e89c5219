//! Build-artifact catalog
//!
//! Reads Hardhat artifact files (`<dir>/**/<Name>.json` carrying
//! `contractName`, `abi` and `bytecode`). Files are indexed by name when the
//! catalog is opened and parsed on first lookup.

use crate::error::{DeployerError, DeployerResult};

use dashmap::DashMap;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, ParamType, Token};
use ethers::types::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callable surface and creation code of a contract
#[derive(Debug, Clone)]
pub struct ContractInterface {
    pub name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl ContractInterface {
    /// Creation bytecode with ABI-encoded constructor arguments appended
    pub fn creation_data(&self, args: &[Token]) -> DeployerResult<Bytes> {
        if self.bytecode.is_empty() {
            return Err(DeployerError::Artifact {
                name: self.name.clone(),
                message: "no creation bytecode (abstract contract or interface?)".to_string(),
            });
        }

        match self.abi.constructor() {
            Some(constructor) => constructor
                .encode_input(self.bytecode.to_vec(), args)
                .map(Bytes::from)
                .map_err(|e| DeployerError::Abi(format!("{} constructor: {}", self.name, e))),
            None if args.is_empty() => Ok(self.bytecode.clone()),
            None => Err(DeployerError::Abi(format!(
                "{} takes no constructor arguments, got {}",
                self.name,
                args.len()
            ))),
        }
    }

    /// Parse textual constructor arguments against the constructor's parameter types
    pub fn constructor_tokens(&self, raw: &[String]) -> DeployerResult<Vec<Token>> {
        let params = self
            .abi
            .constructor()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();

        if params.len() != raw.len() {
            return Err(DeployerError::Abi(format!(
                "{} constructor expects {} arguments, got {}",
                self.name,
                params.len(),
                raw.len()
            )));
        }

        params
            .iter()
            .zip(raw)
            .map(|(param, value)| {
                let value = match param.kind {
                    ParamType::Address => value.trim().trim_start_matches("0x"),
                    _ => value.trim(),
                };
                LenientTokenizer::tokenize(&param.kind, value).map_err(|e| {
                    DeployerError::Abi(format!(
                        "{} constructor argument {}: {}",
                        self.name, param.name, e
                    ))
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    abi: Abi,
    #[serde(default)]
    bytecode: String,
}

/// Maps interface names to their ABI and bytecode
#[derive(Default)]
pub struct ArtifactCatalog {
    /// Artifact files by contract name
    paths: HashMap<String, PathBuf>,
    /// Parsed interfaces
    resolved: DashMap<String, Arc<ContractInterface>>,
}

impl ArtifactCatalog {
    /// Index every artifact below `dir`
    pub fn open(dir: &Path) -> DeployerResult<Self> {
        let mut paths = HashMap::new();
        Self::index(dir, &mut paths).map_err(|e| DeployerError::Artifact {
            name: dir.display().to_string(),
            message: e.to_string(),
        })?;
        debug!("Indexed {} artifacts under {}", paths.len(), dir.display());

        Ok(Self {
            paths,
            resolved: DashMap::new(),
        })
    }

    fn index(dir: &Path, paths: &mut HashMap<String, PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::index(&path, paths)?;
                continue;
            }

            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
                continue;
            }
            let name = file_name.trim_end_matches(".json").to_string();
            if let Some(previous) = paths.insert(name.clone(), path.clone()) {
                warn!(
                    "Artifact {} found twice ({} and {}), using the latter",
                    name,
                    previous.display(),
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Register an interface directly
    #[cfg(test)]
    pub fn insert(&self, interface: ContractInterface) {
        self.resolved
            .insert(interface.name.clone(), Arc::new(interface));
    }

    /// Look up an interface by name
    pub fn interface(&self, name: &str) -> DeployerResult<Arc<ContractInterface>> {
        if let Some(found) = self.resolved.get(name) {
            return Ok(found.clone());
        }

        let path = self
            .paths
            .get(name)
            .ok_or_else(|| DeployerError::UnknownInterface {
                name: name.to_string(),
            })?;

        let interface = Arc::new(Self::load(name, path)?);
        self.resolved.insert(name.to_string(), interface.clone());
        Ok(interface)
    }

    fn load(name: &str, path: &Path) -> DeployerResult<ContractInterface> {
        let artifact_error = |message: String| DeployerError::Artifact {
            name: name.to_string(),
            message,
        };

        let raw = std::fs::read_to_string(path)?;
        let artifact: HardhatArtifact = serde_json::from_str(&raw)
            .map_err(|e| artifact_error(format!("{}: {}", path.display(), e)))?;

        if artifact.contract_name != name {
            return Err(artifact_error(format!(
                "{} declares contractName {}",
                path.display(),
                artifact.contract_name
            )));
        }

        let encoded = artifact.bytecode.trim();
        let bytecode = hex::decode(encoded.strip_prefix("0x").unwrap_or(encoded))
            .map(Bytes::from)
            .map_err(|e| {
                artifact_error(format!("bytecode is not plain hex (unlinked library?): {}", e))
            })?;

        Ok(ContractInterface {
            name: artifact.contract_name,
            abi: artifact.abi,
            bytecode,
        })
    }

    /// Names known to the catalog
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .paths
            .keys()
            .cloned()
            .chain(self.resolved.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
