//! ERC20Relay deployment step.

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::{Address, U256};
use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::{Error, Result};
use crate::network::{Chain, Network, TxOverrides, normalize_address};
use crate::steps::{Step, config_u64, contract_config};

const CONTRACT: &str = "ERC20Relay";
const CONFIG_KEY: &str = "erc20_relay";

/// NCT total supply on the home chain; the side chain relay is seeded with
/// the same amount so balances can move freely in both directions.
const TOTAL_SUPPLY: &str = "1885913075851542181982426285";

/// NCT per ETH, used to price relay fees.
const DEFAULT_NCT_ETH_EXCHANGE_RATE: u64 = 80972;

pub struct Erc20Relay;

fn exchange_rate(network: &Network) -> Result<u64> {
    config_u64(
        network,
        CONFIG_KEY,
        "nct_eth_exchange_rate",
        DEFAULT_NCT_ETH_EXCHANGE_RATE,
    )
}

#[async_trait]
impl Step for Erc20Relay {
    fn name(&self) -> &'static str {
        "ERC20Relay"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["NectarToken"]
    }

    fn validate(&self, network: &Network) -> Result<()> {
        exchange_rate(network)?;
        let config = contract_config(network, CONFIG_KEY);
        let fee_wallet = config.and_then(|c| c.get("fee_wallet"));
        let verifiers = config.and_then(|c| c.get("verifiers"));
        if fee_wallet.is_none() || verifiers.is_none() {
            return Err(Error::Configuration(
                "erc20_relay config requires fee_wallet and verifiers".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()> {
        let token = deployer.address("NectarToken")?;

        let exchange_rate = exchange_rate(network)?;
        let config = contract_config(network, CONFIG_KEY);
        let fee_wallet = config
            .and_then(|c| c.get("fee_wallet"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::Configuration("erc20_relay fee_wallet must be an address".to_string())
            })
            .and_then(normalize_address)?;
        let verifiers: Vec<Address> = config
            .and_then(|c| c.get("verifiers"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                Error::Configuration("erc20_relay verifiers must be a list".to_string())
            })?
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .ok_or_else(|| {
                        Error::Configuration("verifiers must be address strings".to_string())
                    })
                    .and_then(normalize_address)
            })
            .collect::<Result<_>>()?;

        let relay = deployer
            .deploy(
                network,
                CONTRACT,
                &[
                    DynSolValue::Address(token),
                    DynSolValue::Uint(U256::from(exchange_rate), 256),
                    DynSolValue::Address(fee_wallet),
                    DynSolValue::Array(verifiers.into_iter().map(DynSolValue::Address).collect()),
                ],
                &TxOverrides::default(),
            )
            .await?;

        match network.chain {
            Chain::Home => {
                tracing::info!("home chain, nothing to mint");
            }
            Chain::Side => {
                tracing::info!(relay = %relay, "minting total supply to relay contract");
                let supply = U256::from_str_radix(TOTAL_SUPPLY, 10)
                    .map_err(|e| Error::Configuration(format!("bad total supply: {e}")))?;
                let call = deployer.call(
                    "NectarToken",
                    "mint",
                    &[DynSolValue::Address(relay), DynSolValue::Uint(supply, 256)],
                )?;
                let hash = deployer
                    .transact(network, &call, &TxOverrides::default())
                    .await?;
                network.wait_for_transaction(hash).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkDefinition;

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

    const VALID: &str = concat!(
        "[erc20_relay]\n",
        "fee_wallet = \"0x0000000000000000000000000000000000000001\"\n",
        "verifiers = [\"0x0000000000000000000000000000000000000002\"]\n",
    );

    #[test]
    fn negative_exchange_rate_is_rejected() {
        let config = format!("{VALID}nct_eth_exchange_rate = -1\n");
        let network = network_with(&config);
        assert!(matches!(
            Erc20Relay.validate(&network),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn missing_fee_wallet_is_rejected() {
        let network = network_with("[erc20_relay]\nverifiers = []\n");
        assert!(matches!(
            Erc20Relay.validate(&network),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn valid_config_passes_and_rate_defaults() {
        let network = network_with(VALID);
        assert!(Erc20Relay.validate(&network).is_ok());
        assert_eq!(
            exchange_rate(&network).unwrap(),
            DEFAULT_NCT_ETH_EXCHANGE_RATE
        );
    }
}
