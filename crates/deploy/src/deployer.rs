//! Contract bindings and the authenticated transaction path: deploy,
//! transact, call, and results files.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use alloy_core::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy_core::json_abi::Function;
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};

use crate::artifact::{Artifact, scan_artifacts};
use crate::error::{Error, Result};
use crate::git;
use crate::ledger::{ContractRecord, DeploymentId, Ledger};
use crate::network::{Network, TxOverrides, normalize_address};

/// An encoded contract interaction. `to = None` is a creation.
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

/// A contract name bound to an on-chain address. `deployed` distinguishes
/// contracts we created from pre-existing ones we only bound to.
#[derive(Debug, Clone)]
pub struct DeployedContract {
    pub name: String,
    pub address: Address,
    pub deployed: bool,
}

/// Owns the artifact store and the live name-to-address bindings for one
/// community deployment.
pub struct Deployer {
    pub community: String,
    artifacts: BTreeMap<String, Artifact>,
    contracts: BTreeMap<String, DeployedContract>,
    contract_config: toml::value::Table,
    ledger: Option<(Box<dyn Ledger>, DeploymentId)>,
}

impl Deployer {
    /// Scan the artifact directory and, when a ledger is given, open a
    /// deployment row in it (with git provenance unless disabled).
    pub fn new(
        community: &str,
        network: &Network,
        artifact_dir: &Path,
        record_provenance: bool,
        ledger: Option<Box<dyn Ledger>>,
    ) -> Result<Self> {
        let artifacts = scan_artifacts(artifact_dir)?;
        tracing::info!(
            community,
            artifacts = artifacts.len(),
            dir = %artifact_dir.display(),
            "loaded artifacts"
        );

        let ledger = match ledger {
            Some(mut ledger) => {
                let (commit, dirty) = if record_provenance {
                    git::provenance()
                } else {
                    (None, None)
                };
                let id = ledger.open_deployment(
                    community,
                    &network.name,
                    network.network_id,
                    network.chain,
                    commit.as_deref(),
                    dirty,
                )?;
                Some((ledger, id))
            }
            None => None,
        };

        Ok(Deployer {
            community: community.to_string(),
            artifacts,
            contracts: BTreeMap::new(),
            contract_config: network.contract_config.clone(),
            ledger,
        })
    }

    pub fn artifact(&self, name: &str) -> Result<&Artifact> {
        self.artifacts.get(name).ok_or_else(|| {
            Error::Artifact(format!("no artifact {name}, have you compiled?"))
        })
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.contracts.contains_key(name)
    }

    pub fn contract(&self, name: &str) -> Option<&DeployedContract> {
        self.contracts.get(name)
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        self.contracts
            .get(name)
            .map(|c| c.address)
            .ok_or_else(|| Error::Configuration(format!("contract {name} is not bound")))
    }

    pub fn bindings(&self) -> &BTreeMap<String, DeployedContract> {
        &self.contracts
    }

    /// Per-contract configuration table, keyed by snake-case name.
    pub fn contract_config(&self, key: &str) -> Option<&toml::value::Table> {
        self.contract_config.get(key).and_then(|v| v.as_table())
    }

    /// Bind a contract name to an address. Rebinding replaces the previous
    /// binding wholesale.
    pub fn bind_at(&mut self, name: &str, address: Address, deployed: bool) -> Result<()> {
        let artifact = self.artifact(name)?;
        let record = ContractRecord {
            name: name.to_string(),
            deployed,
            address: Some(address),
            abi: serde_json::to_value(&artifact.abi).unwrap_or_default(),
            bytecode_sha256: artifact
                .bytecode()
                .ok()
                .map(|b| ContractRecord::digest_bytecode(&b)),
            config: self.contract_config_json(name),
        };

        tracing::info!(contract = name, address = %address, deployed, "bound contract");
        self.contracts.insert(
            name.to_string(),
            DeployedContract {
                name: name.to_string(),
                address,
                deployed,
            },
        );

        self.record(&record);
        Ok(())
    }

    fn contract_config_json(&self, name: &str) -> serde_json::Value {
        self.contract_config(&camel_case_to_snake_case(name))
            .and_then(|t| serde_json::to_value(t).ok())
            .unwrap_or(serde_json::Value::Null)
    }

    fn record(&mut self, record: &ContractRecord) {
        if let Some((ledger, id)) = self.ledger.as_mut()
            && let Err(e) = ledger.record_contract(*id, record)
        {
            tracing::warn!(contract = %record.name, error = %e, "failed to record contract in ledger");
        }
    }

    /// Deploy a contract by artifact name, wait for it to be mined and
    /// checked, and bind it at the created address.
    pub async fn deploy(
        &mut self,
        network: &mut Network,
        name: &str,
        args: &[DynSolValue],
        overrides: &TxOverrides,
    ) -> Result<Address> {
        let artifact = self.artifact(name)?;
        if self.is_bound(name) {
            tracing::warn!(contract = name, "redeploying an already bound contract");
        }

        let mut data = artifact.bytecode()?.to_vec();
        if !args.is_empty() {
            let constructor = artifact.abi.constructor.as_ref().ok_or_else(|| {
                Error::Artifact(format!(
                    "constructor arguments given but {name} has no constructor"
                ))
            })?;
            let encoded = constructor.abi_encode_input(args).map_err(|e| {
                Error::Artifact(format!("could not encode constructor for {name}: {e}"))
            })?;
            data.extend_from_slice(&encoded);
        }

        tracing::info!(contract = name, "deploying");
        let call = ContractCall {
            to: None,
            data: data.into(),
            value: U256::ZERO,
        };
        let hash = self.transact(network, &call, overrides).await?;
        let receipt = network.wait_and_check_transaction(hash).await?;
        let address = receipt
            .contract_address
            .ok_or(Error::TransactionFailure { hash })?;

        self.bind_at(name, address, true)?;
        Ok(address)
    }

    /// Sign and submit a transaction, returning its hash without waiting
    /// for it to be mined.
    ///
    /// Gas is capped at `min(gas_limit, ceil(estimate * multiplier))`; if
    /// estimation fails the full ceiling is used, since nodes reject
    /// estimates for transactions that depend on not-yet-mined state.
    pub async fn transact(
        &mut self,
        network: &mut Network,
        call: &ContractCall,
        overrides: &TxOverrides,
    ) -> Result<B256> {
        let mut opts = network.tx_options(true);
        opts.gas = match network.estimate_gas(call.to, &call.data, call.value).await {
            Ok(estimate) => {
                cap_gas(estimate, network.gas_estimate_multiplier, network.gas_limit)
            }
            Err(e) => {
                tracing::warn!(error = %e, "gas estimation failed, using full gas limit");
                network.gas_limit
            }
        };
        overrides.apply(&mut opts);

        let to = call.to.map(TxKind::Call).unwrap_or(TxKind::Create);
        let signed = network
            .sign_transaction(to, call.value, call.data.clone(), opts)
            .await?;
        let hash = network.send_transaction(&signed).await?;
        tracing::debug!(hash = %hash, nonce = opts.nonce, gas = opts.gas, "submitted transaction");
        Ok(hash)
    }

    fn function<'a>(&'a self, name: &str, function: &str) -> Result<&'a Function> {
        self.artifact(name)?
            .abi
            .function(function)
            .and_then(|fns| fns.first())
            .ok_or_else(|| {
                Error::Artifact(format!("contract {name} has no function {function}"))
            })
    }

    /// Encode a call to a bound contract's function.
    pub fn call(&self, name: &str, function: &str, args: &[DynSolValue]) -> Result<ContractCall> {
        let address = self.address(name)?;
        let function = self.function(name, function)?;
        let data = function.abi_encode_input(args).map_err(|e| {
            Error::Artifact(format!("could not encode call to {name}.{}: {e}", function.name))
        })?;
        Ok(ContractCall {
            to: Some(address),
            data: data.into(),
            value: U256::ZERO,
        })
    }

    /// Read-only call against a bound contract, with decoded outputs.
    pub async fn view(
        &self,
        network: &Network,
        name: &str,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let call = self.call(name, function, args)?;
        let to = call.to.ok_or_else(|| {
            Error::Configuration(format!("contract {name} is not bound"))
        })?;
        let output = network.eth_call(to, &call.data).await?;
        self.function(name, function)?
            .abi_decode_output(&output)
            .map_err(|e| {
                Error::Artifact(format!("could not decode output of {name}.{function}: {e}"))
            })
    }

    /// Write the results file consumed by downstream services. Compiled
    /// artifacts that never got bound are recorded in the ledger as
    /// not-deployed first.
    pub fn dump_results(&mut self, network: &Network, writer: impl Write) -> Result<()> {
        let unbound: Vec<ContractRecord> = self
            .artifacts
            .values()
            .filter(|artifact| !self.contracts.contains_key(&artifact.contract_name))
            .map(|artifact| ContractRecord {
                name: artifact.contract_name.clone(),
                deployed: false,
                address: None,
                abi: serde_json::to_value(&artifact.abi).unwrap_or_default(),
                bytecode_sha256: artifact
                    .bytecode()
                    .ok()
                    .map(|b| ContractRecord::digest_bytecode(&b)),
                config: self.contract_config_json(&artifact.contract_name),
            })
            .collect();
        for record in &unbound {
            self.record(record);
        }

        let mut results = serde_json::Map::new();
        for contract in self.contracts.values() {
            results.insert(
                format!("{}_address", camel_case_to_snake_case(&contract.name)),
                serde_json::Value::from(contract.address.to_checksum(None)),
            );
        }
        results.insert("eth_uri".to_string(), network.eth_uri.clone().into());
        results.insert("chain_id".to_string(), network.network_id.into());
        results.insert("free".to_string(), (network.gas_price == 0).into());

        serde_json::to_writer_pretty(writer, &serde_json::Value::Object(results))
            .map_err(|e| Error::Configuration(format!("could not write results: {e}")))
    }

    /// Bind contracts back from a previously dumped results file.
    pub fn load_results(&mut self, reader: impl Read) -> Result<()> {
        let results: serde_json::Map<String, serde_json::Value> =
            serde_json::from_reader(reader)
                .map_err(|e| Error::Configuration(format!("could not parse results: {e}")))?;

        for (key, value) in &results {
            let Some(snake_name) = key.strip_suffix("_address") else {
                continue;
            };
            let name = snake_case_to_camel_case(snake_name);
            let Some(address) = value.as_str() else {
                return Err(Error::Configuration(format!(
                    "results entry {key} is not an address string"
                )));
            };
            let address = normalize_address(address)?;
            if !self.artifacts.contains_key(&name) {
                tracing::warn!(contract = %name, "results entry has no matching artifact, skipping");
                continue;
            }
            self.bind_at(&name, address, false)?;
        }
        Ok(())
    }

    /// Mark the ledger deployment row successful. Ledger write failures are
    /// logged but never fail a completed run.
    pub fn mark_success(&mut self) {
        if let Some((ledger, id)) = self.ledger.as_mut()
            && let Err(e) = ledger.mark_success(*id)
        {
            tracing::warn!(error = %e, "failed to mark deployment successful in ledger");
        }
    }
}

/// Gas limit for a transaction, given an estimate: the estimate scaled by
/// the safety multiplier, never exceeding the network ceiling.
pub fn cap_gas(estimate: u64, multiplier: f64, ceiling: u64) -> u64 {
    let scaled = (estimate as f64 * multiplier).ceil() as u64;
    scaled.min(ceiling)
}

/// `ERC20Relay` -> `erc20_relay`, `NectarToken` -> `nectar_token`.
pub fn camel_case_to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// `erc20_relay` -> `ERC20Relay`; segments containing digits are acronyms
/// and come back fully uppercased.
pub fn snake_case_to_camel_case(name: &str) -> String {
    name.split('_')
        .map(|segment| {
            if segment.chars().any(|c| c.is_ascii_digit()) {
                segment.to_ascii_uppercase()
            } else {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Chain, NetworkDefinition};
    use tempdir::TempDir;

    fn artifact_json(name: &str) -> String {
        serde_json::json!({
            "contractName": name,
            "abi": [],
            "evm": {
                "bytecode": {"object": "0x6080604052", "linkReferences": {}}
            }
        })
        .to_string()
    }

    fn offline_network() -> Network {
        NetworkDefinition {
            eth_uri: "http://localhost:8545".to_string(),
            network_id: 1337,
            gas_limit: 6_700_000,
            gas_price: 0,
            gas_estimate_multiplier: 2.0,
            timeout: 240,
            contracts: toml::value::Table::new(),
        }
        .create("testnet", Chain::Home)
        .unwrap()
    }

    fn deployer_with(names: &[&str]) -> (TempDir, Deployer) {
        let dir = TempDir::new("build").unwrap();
        for name in names {
            std::fs::write(dir.path().join(format!("{name}.json")), artifact_json(name))
                .unwrap();
        }
        let network = offline_network();
        let deployer = Deployer::new("gamma", &network, dir.path(), false, None).unwrap();
        (dir, deployer)
    }

    #[test]
    fn camel_to_snake_vectors() {
        assert_eq!(camel_case_to_snake_case("NectarToken"), "nectar_token");
        assert_eq!(camel_case_to_snake_case("ERC20Relay"), "erc20_relay");
        assert_eq!(camel_case_to_snake_case("BountyRegistry"), "bounty_registry");
        assert_eq!(camel_case_to_snake_case("OfferMultiSig"), "offer_multi_sig");
    }

    #[test]
    fn snake_to_camel_vectors() {
        assert_eq!(snake_case_to_camel_case("nectar_token"), "NectarToken");
        assert_eq!(snake_case_to_camel_case("erc20_relay"), "ERC20Relay");
        assert_eq!(snake_case_to_camel_case("bounty_registry"), "BountyRegistry");
    }

    #[test]
    fn gas_cap_respects_ceiling() {
        assert_eq!(cap_gas(100_000, 2.0, 6_700_000), 200_000);
        assert_eq!(cap_gas(100_000, 1.5, 120_000), 120_000);
        assert_eq!(cap_gas(3, 1.1, 6_700_000), 4);
    }

    #[test]
    fn bind_requires_an_artifact() {
        let (_dir, mut deployer) = deployer_with(&["NectarToken"]);
        let err = deployer
            .bind_at("Missing", Address::ZERO, false)
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
    }

    #[test]
    fn rebinding_replaces_the_binding() {
        let (_dir, mut deployer) = deployer_with(&["NectarToken"]);
        let first: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let second: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();

        deployer.bind_at("NectarToken", first, true).unwrap();
        deployer.bind_at("NectarToken", second, false).unwrap();

        let bound = deployer.contract("NectarToken").unwrap();
        assert_eq!(bound.address, second);
        assert!(!bound.deployed);
        assert_eq!(deployer.bindings().len(), 1);
    }

    #[test]
    fn results_round_trip() {
        let network = offline_network();
        let (dir, mut deployer) = deployer_with(&["NectarToken", "ERC20Relay"]);
        let token: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let relay: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
        deployer.bind_at("NectarToken", token, true).unwrap();
        deployer.bind_at("ERC20Relay", relay, true).unwrap();

        let mut buffer = Vec::new();
        deployer.dump_results(&network, &mut buffer).unwrap();

        let results: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(results["eth_uri"], "http://localhost:8545");
        assert_eq!(results["chain_id"], 1337);
        assert_eq!(results["free"], true);
        assert!(results["nectar_token_address"].is_string());
        assert!(results["erc20_relay_address"].is_string());

        let mut restored =
            Deployer::new("gamma", &network, dir.path(), false, None).unwrap();
        restored.load_results(buffer.as_slice()).unwrap();
        assert_eq!(restored.address("NectarToken").unwrap(), token);
        assert_eq!(restored.address("ERC20Relay").unwrap(), relay);
        assert!(!restored.contract("ERC20Relay").unwrap().deployed);
    }

    #[test]
    fn load_results_skips_unknown_contracts() {
        let (_dir, mut deployer) = deployer_with(&["NectarToken"]);
        let results = serde_json::json!({
            "nectar_token_address": "0x1111111111111111111111111111111111111111",
            "vanished_address": "0x2222222222222222222222222222222222222222",
            "eth_uri": "http://localhost:8545",
            "chain_id": 1337,
            "free": true,
        })
        .to_string();

        deployer.load_results(results.as_bytes()).unwrap();
        assert!(deployer.is_bound("NectarToken"));
        assert_eq!(deployer.bindings().len(), 1);
    }
}
