//! OfferRegistry deployment step.

use alloy_core::dyn_abi::DynSolValue;
use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::Result;
use crate::network::{Network, TxOverrides};
use crate::steps::Step;

const CONTRACT: &str = "OfferRegistry";

pub struct OfferRegistry;

#[async_trait]
impl Step for OfferRegistry {
    fn name(&self) -> &'static str {
        "OfferRegistry"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["NectarToken"]
    }

    async fn run(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()> {
        let token = deployer.address("NectarToken")?;
        deployer
            .deploy(
                network,
                CONTRACT,
                &[DynSolValue::Address(token)],
                &TxOverrides::default(),
            )
            .await?;
        Ok(())
    }
}
