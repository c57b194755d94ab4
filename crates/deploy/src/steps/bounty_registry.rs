//! BountyRegistry deployment step.

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, U256};
use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::{Error, Result};
use crate::network::{Network, TxOverrides, normalize_address};
use crate::steps::{Step, config_u64, contract_config};

const CONTRACT: &str = "BountyRegistry";
const CONFIG_KEY: &str = "bounty_registry";

const DEFAULT_ARBITER_VOTE_WINDOW: u64 = 100;
const DEFAULT_ASSERTION_REVEAL_WINDOW: u64 = 10;

/// Deploys the bounty registry, points ArbiterStaking at it, and registers
/// the configured arbiters.
pub struct BountyRegistry;

fn configured_arbiters(network: &Network) -> Result<Vec<Address>> {
    contract_config(network, CONFIG_KEY)
        .and_then(|config| config.get("arbiters"))
        .and_then(|value| value.as_array())
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    entry
                        .as_str()
                        .ok_or_else(|| {
                            Error::Configuration("arbiters must be address strings".to_string())
                        })
                        .and_then(normalize_address)
                })
                .collect()
        })
        .unwrap_or_else(|| Ok(Vec::new()))
}

fn windows(network: &Network) -> Result<(u64, u64)> {
    let vote = config_u64(
        network,
        CONFIG_KEY,
        "arbiter_vote_window",
        DEFAULT_ARBITER_VOTE_WINDOW,
    )?;
    let reveal = config_u64(
        network,
        CONFIG_KEY,
        "assertion_reveal_window",
        DEFAULT_ASSERTION_REVEAL_WINDOW,
    )?;
    Ok((vote, reveal))
}

#[async_trait]
impl Step for BountyRegistry {
    fn name(&self) -> &'static str {
        "BountyRegistry"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["NectarToken", "ArbiterStaking"]
    }

    fn validate(&self, network: &Network) -> Result<()> {
        windows(network)?;
        configured_arbiters(network).map(|_| ())
    }

    async fn run(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()> {
        let token = deployer.address("NectarToken")?;
        let staking = deployer.address("ArbiterStaking")?;

        let (vote_window, reveal_window) = windows(network)?;
        let arbiters = configured_arbiters(network)?;

        let registry = deployer
            .deploy(
                network,
                CONTRACT,
                &[
                    DynSolValue::Address(token),
                    DynSolValue::Address(staking),
                    DynSolValue::Uint(U256::from(vote_window), 256),
                    DynSolValue::Uint(U256::from(reveal_window), 256),
                ],
                &TxOverrides::default(),
            )
            .await?;

        tracing::info!(registry = %registry, "pointing ArbiterStaking at the bounty registry");
        let call = deployer.call(
            "ArbiterStaking",
            "setBountyRegistry",
            &[DynSolValue::Address(registry)],
        )?;
        let hash = deployer
            .transact(network, &call, &TxOverrides::default())
            .await?;
        network.wait_and_check_transaction(hash).await?;

        let mut hashes = Vec::with_capacity(arbiters.len());
        for arbiter in arbiters {
            tracing::info!(arbiter = %arbiter, "adding arbiter");
            let block = network.block_number().await?;
            let call = deployer.call(
                CONTRACT,
                "addArbiter",
                &[
                    DynSolValue::Address(arbiter),
                    DynSolValue::Uint(U256::from(block), 256),
                ],
            )?;
            hashes.push(
                deployer
                    .transact(network, &call, &TxOverrides::default())
                    .await?,
            );
        }
        network.wait_and_check_transactions(&hashes).await?;

        Ok(())
    }

    /// Deprecate the registry and wait out the longest window in which an
    /// in-flight bounty could still need resolution.
    async fn deactivate(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()> {
        let call = deployer.call(CONTRACT, "deprecate", &[])?;
        let hash = deployer
            .transact(network, &call, &TxOverrides::default())
            .await?;
        network.wait_and_check_transaction(hash).await?;

        let reveal_window = view_u64(deployer, network, "assertionRevealWindow").await?;
        let vote_window = view_u64(deployer, network, "arbiterVoteWindow").await?;
        let max_duration = view_u64(deployer, network, "MAX_DURATION").await?;
        network
            .wait_blocks((reveal_window + vote_window + max_duration) * 2)
            .await
    }
}

async fn view_u64(deployer: &Deployer, network: &Network, function: &str) -> Result<u64> {
    let outputs = deployer.view(network, CONTRACT, function, &[]).await?;
    outputs
        .first()
        .and_then(|value| value.as_uint())
        .and_then(|(value, _)| u64::try_from(value).ok())
        .ok_or_else(|| {
            Error::Artifact(format!("unexpected output from {CONTRACT}.{function}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Chain, NetworkDefinition};

    fn network_with(config: &str) -> Network {
        let contracts: toml::value::Table = toml::from_str(config).unwrap();
        NetworkDefinition {
            eth_uri: "http://localhost:8545".to_string(),
            network_id: 1337,
            gas_limit: 6_700_000,
            gas_price: 0,
            gas_estimate_multiplier: 2.0,
            timeout: 240,
            contracts,
        }
        .create("testnet", Chain::Home)
        .unwrap()
    }

    #[test]
    fn negative_vote_window_is_rejected() {
        let network = network_with("[bounty_registry]\narbiter_vote_window = -1\n");
        assert!(matches!(
            BountyRegistry.validate(&network),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn negative_reveal_window_is_rejected() {
        let network = network_with("[bounty_registry]\nassertion_reveal_window = -10\n");
        assert!(matches!(
            BountyRegistry.validate(&network),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn missing_windows_fall_back_to_the_defaults() {
        let network = network_with("");
        assert!(BountyRegistry.validate(&network).is_ok());
        assert_eq!(
            windows(&network).unwrap(),
            (DEFAULT_ARBITER_VOTE_WINDOW, DEFAULT_ASSERTION_REVEAL_WINDOW)
        );
    }

    #[test]
    fn malformed_arbiter_addresses_are_rejected() {
        let network = network_with("[bounty_registry]\narbiters = [\"not-an-address\"]\n");
        assert!(matches!(
            BountyRegistry.validate(&network),
            Err(Error::Configuration(_))
        ));
    }
}
