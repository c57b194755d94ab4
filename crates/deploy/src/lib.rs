//! contractor-deploy - Contract deployment orchestration library.
//!
//! This crate provides the machinery for deploying a community's contracts
//! to a pair of Ethereum chains: a JSON-RPC chain endpoint with preflight
//! checks and nonce sequencing, an artifact store for compiled contracts,
//! a deployer that owns name-to-address bindings, a deployment ledger, and
//! a dependency-ordered step scheduler.

pub mod artifact;
pub mod config;
pub mod deployer;
pub mod error;
pub mod git;
pub mod ledger;
pub mod network;
pub mod rpc;
pub mod steps;

pub use artifact::{Artifact, scan_artifacts};
pub use config::Config;
pub use deployer::{
    ContractCall, DeployedContract, Deployer, camel_case_to_snake_case, cap_gas,
    snake_case_to_camel_case,
};
pub use error::{Error, Result};
pub use ledger::{ContractRecord, DeploymentId, JsonLedger, Ledger};
pub use network::{
    Chain, DeploySigner, Network, NetworkDefinition, SignedTransaction, TxOptions, TxOverrides,
    normalize_address,
};
pub use steps::{RunReport, Step, StepRegistry, StepState};
