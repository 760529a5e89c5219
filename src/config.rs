//! Configuration management for the deployer
//!
//! Loads configuration from a TOML file with environment variable substitution,
//! so RPC endpoints and signing keys never have to live in the file itself.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    #[serde(default)]
    pub deployer: DeployerConfig,
    pub artifacts: ArtifactsConfig,
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    /// Name of the environment variable holding the signer's private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    /// Blocks (inclusion block counted) before a transaction is treated as durable
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_gas_limit_buffer")]
    pub gas_limit_buffer_percent: u64,
    #[serde(default = "default_gas_price_buffer")]
    pub gas_price_buffer_percent: u64,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            gas_limit_buffer_percent: default_gas_limit_buffer(),
            gas_price_buffer_percent: default_gas_price_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Write the registry here in text exposition format when the run ends
    pub textfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub name: String,
    #[serde(default)]
    pub constructor_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub source: String,
    pub method: String,
    /// A contract name recorded in the manifest, or a literal 0x address
    pub target: String,
}

fn default_private_key_env() -> String {
    "DEPLOYER_PRIVATE_KEY".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_confirmation_timeout_secs() -> u64 {
    600
}

fn default_confirmations() -> u64 {
    2
}

fn default_gas_limit_buffer() -> u64 {
    20
}

fn default_gas_price_buffer() -> u64 {
    10
}

impl Settings {
    /// Load settings from `path`, falling back to `NITRILITY_CONFIG` and then
    /// `config/default.toml`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var("NITRILITY_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/default.toml")),
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML source, substituting `${VAR}` references first
    pub fn from_toml(source: &str) -> Result<Self> {
        let config_str = substitute_env_vars(source);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.network.rpc_url.trim().is_empty() {
            anyhow::bail!("Network {} has no RPC URL configured", self.network.name);
        }

        if self.deployer.confirmations == 0 {
            anyhow::bail!("deployer.confirmations must be at least 1");
        }

        for link in &self.links {
            if link.source.is_empty() || link.method.is_empty() || link.target.is_empty() {
                anyhow::bail!("Link entries need a source, method and target: {:?}", link);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(contract.name.as_str()) {
                tracing::warn!("Contract {} is listed more than once", contract.name);
            }
        }

        Ok(())
    }

    /// Get contract config by interface name
    pub fn contract(&self, name: &str) -> Option<&ContractConfig> {
        self.contracts.iter().find(|c| c.name == name)
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [network]
        name = "arbitrumOne"
        chain_id = 42161
        rpc_url = "https://arb.example.com/${NITRILITY_TEST_RPC_KEY}"

        [artifacts]
        dir = "artifacts/contracts"

        [manifest]
        path = "deployments/manifest.json"

        [[contracts]]
        name = "NitrilityFactory"

        [[contracts]]
        name = "NitrilityAuction"

        [[links]]
        source = "NitrilityFactory"
        method = "setAuctionAddr"
        target = "NitrilityAuction"

        [[links]]
        source = "NitrilityAuction"
        method = "setFactory"
        target = "NitrilityFactory"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_applied() {
        env::set_var("NITRILITY_TEST_RPC_KEY", "abc");
        let settings = Settings::from_toml(SAMPLE).unwrap();

        assert_eq!(settings.network.rpc_url, "https://arb.example.com/abc");
        assert_eq!(settings.network.private_key_env, "DEPLOYER_PRIVATE_KEY");
        assert_eq!(settings.deployer.confirmations, 2);
        assert_eq!(settings.links.len(), 2);
        assert_eq!(settings.links[1].method, "setFactory");
        assert!(settings.contract("NitrilityAuction").is_some());
        assert!(settings.metrics.textfile.is_none());
    }

    #[test]
    fn test_zero_confirmations_rejected() {
        let source = format!("{}\n[deployer]\nconfirmations = 0\n", SAMPLE);
        assert!(Settings::from_toml(&source).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.network.chain_id, 42161);
        assert_eq!(settings.network.poll_interval(), Duration::from_secs(1));
    }
}
