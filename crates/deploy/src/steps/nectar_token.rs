//! NectarToken deployment step.

use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::Result;
use crate::network::{Network, TxOverrides, normalize_address};
use crate::steps::{Step, contract_config};

const CONTRACT: &str = "NectarToken";
const CONFIG_KEY: &str = "nectar_token";

/// Deploys the community's NCT token, or binds to a pre-deployed one when
/// the network config pins an address.
pub struct NectarToken;

#[async_trait]
impl Step for NectarToken {
    fn name(&self) -> &'static str {
        "NectarToken"
    }

    async fn run(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()> {
        let configured = contract_config(network, CONFIG_KEY)
            .and_then(|config| config.get("address"))
            .and_then(|value| value.as_str())
            .map(str::to_string);

        match configured {
            Some(address) => {
                tracing::warn!(
                    network = %network.name,
                    address = %address,
                    "using already deployed token"
                );
                deployer.bind_at(CONTRACT, normalize_address(&address)?, false)
            }
            None => {
                deployer
                    .deploy(network, CONTRACT, &[], &TxOverrides::default())
                    .await?;
                Ok(())
            }
        }
    }
}
