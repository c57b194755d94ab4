//! TOML deployment configuration.
//!
//! The file carries default per-contract tables plus one section per
//! network; a network's contract tables override the defaults key by key.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::network::NetworkDefinition;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default per-contract configuration, keyed by snake-case name.
    #[serde(default)]
    pub contracts: toml::value::Table,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkDefinition>,
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(format!("invalid config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("could not read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Resolve a network definition with its contract tables merged over
    /// the defaults.
    pub fn network(&self, name: &str) -> Result<NetworkDefinition> {
        let mut definition = self
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("unknown network: {name}")))?;

        let mut merged = self.contracts.clone();
        for (contract, overrides) in &definition.contracts {
            match (merged.get_mut(contract), overrides.as_table()) {
                (Some(toml::Value::Table(base)), Some(overrides)) => {
                    for (key, value) in overrides {
                        base.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    merged.insert(contract.clone(), overrides.clone());
                }
            }
        }
        definition.contracts = merged;

        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [contracts.arbiter_staking]
        stake_duration = 100

        [contracts.erc20_relay]
        nct_eth_exchange_rate = 80972

        [networks.testnet]
        eth_uri = "http://localhost:8545"
        network_id = 1337
        gas_limit = 6700000

        [networks.testnet.contracts.arbiter_staking]
        stake_duration = 10

        [networks.mainnet]
        eth_uri = "https://mainnet.example.com"
        network_id = 1
        gas_limit = 8000000
        gas_price = 20000000000
        timeout = 600
    "#;

    #[test]
    fn unknown_network_is_a_configuration_error() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        assert!(matches!(
            config.network("ropsten"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn network_overrides_win_key_by_key() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let testnet = config.network("testnet").unwrap();

        let staking = testnet.contracts["arbiter_staking"].as_table().unwrap();
        assert_eq!(staking["stake_duration"].as_integer(), Some(10));

        // Untouched defaults survive the merge.
        let relay = testnet.contracts["erc20_relay"].as_table().unwrap();
        assert_eq!(relay["nct_eth_exchange_rate"].as_integer(), Some(80972));
    }

    #[test]
    fn defaults_apply_where_the_file_is_silent() {
        let config = Config::from_toml_str(CONFIG).unwrap();
        let testnet = config.network("testnet").unwrap();
        assert_eq!(testnet.gas_price, 0);
        assert_eq!(testnet.gas_estimate_multiplier, 2.0);
        assert_eq!(testnet.timeout, 240);

        let mainnet = config.network("mainnet").unwrap();
        assert_eq!(mainnet.gas_price, 20_000_000_000);
        assert_eq!(mainnet.timeout, 600);
    }
}
