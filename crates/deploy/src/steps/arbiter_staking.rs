//! ArbiterStaking deployment step.

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::U256;
use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::Result;
use crate::network::{Network, TxOverrides};
use crate::steps::{Step, config_u64};

const CONTRACT: &str = "ArbiterStaking";
const CONFIG_KEY: &str = "arbiter_staking";

/// Blocks a stake remains locked, unless overridden in the config.
const DEFAULT_STAKE_DURATION: u64 = 100;

pub struct ArbiterStaking;

fn stake_duration(network: &Network) -> Result<u64> {
    config_u64(network, CONFIG_KEY, "stake_duration", DEFAULT_STAKE_DURATION)
}

#[async_trait]
impl Step for ArbiterStaking {
    fn name(&self) -> &'static str {
        "ArbiterStaking"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["NectarToken"]
    }

    fn validate(&self, network: &Network) -> Result<()> {
        stake_duration(network).map(|_| ())
    }

    async fn run(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()> {
        let token = deployer.address("NectarToken")?;
        let stake_duration = stake_duration(network)?;

        deployer
            .deploy(
                network,
                CONTRACT,
                &[
                    DynSolValue::Address(token),
                    DynSolValue::Uint(U256::from(stake_duration), 256),
                ],
                &TxOverrides::default(),
            )
            .await?;
        Ok(())
    }
}
