//! Deployment ledger: an append-only record of what was deployed where.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use alloy_core::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::network::Chain;

pub type DeploymentId = u64;

/// Everything recorded about one contract within a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub name: String,
    pub deployed: bool,
    pub address: Option<Address>,
    pub abi: serde_json::Value,
    /// SHA-256 of the creation bytecode; enough to tell two builds apart
    /// without storing the full blob per row.
    pub bytecode_sha256: Option<String>,
    pub config: serde_json::Value,
}

impl ContractRecord {
    pub fn digest_bytecode(bytecode: &[u8]) -> String {
        hex::encode(Sha256::digest(bytecode))
    }
}

/// Sink for deployment history. Opening a deployment must succeed before a
/// run proceeds; later recording failures are surfaced to the caller, which
/// logs and carries on.
pub trait Ledger: Send + Sync {
    fn open_deployment(
        &mut self,
        community: &str,
        network: &str,
        network_id: u64,
        chain: Chain,
        commit_hash: Option<&str>,
        tree_dirty: Option<bool>,
    ) -> Result<DeploymentId>;

    fn record_contract(&mut self, id: DeploymentId, record: &ContractRecord) -> Result<()>;

    fn mark_success(&mut self, id: DeploymentId) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LedgerRow {
    Deployment {
        id: DeploymentId,
        community: String,
        network: String,
        network_id: u64,
        chain: Chain,
        commit_hash: Option<String>,
        tree_dirty: Option<bool>,
        timestamp: DateTime<Utc>,
    },
    Contract {
        deployment: DeploymentId,
        #[serde(flatten)]
        contract: ContractRecord,
        timestamp: DateTime<Utc>,
    },
    Success {
        deployment: DeploymentId,
        timestamp: DateTime<Utc>,
    },
}

/// JSON-lines ledger, one row per line, appended in order.
pub struct JsonLedger {
    file: File,
    next_id: DeploymentId,
}

impl JsonLedger {
    /// Open (or create) a ledger file. Deployment ids continue from the
    /// rows already present.
    pub fn open(path: &Path) -> Result<Self> {
        let existing = match File::open(path) {
            Ok(file) => BufReader::new(file)
                .lines()
                .map_while(|l| l.ok())
                .filter_map(|line| serde_json::from_str::<LedgerRow>(&line).ok())
                .filter(|row| matches!(row, LedgerRow::Deployment { .. }))
                .count() as DeploymentId,
            Err(_) => 0,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                Error::Configuration(format!("could not open ledger {}: {e}", path.display()))
            })?;

        Ok(JsonLedger {
            file,
            next_id: existing,
        })
    }

    fn append(&mut self, row: &LedgerRow) -> Result<()> {
        let line = serde_json::to_string(row)
            .map_err(|e| Error::Configuration(format!("could not serialize ledger row: {e}")))?;
        writeln!(self.file, "{line}")
            .map_err(|e| Error::Configuration(format!("could not write ledger row: {e}")))
    }
}

impl Ledger for JsonLedger {
    fn open_deployment(
        &mut self,
        community: &str,
        network: &str,
        network_id: u64,
        chain: Chain,
        commit_hash: Option<&str>,
        tree_dirty: Option<bool>,
    ) -> Result<DeploymentId> {
        let id = self.next_id;
        self.next_id += 1;
        self.append(&LedgerRow::Deployment {
            id,
            community: community.to_string(),
            network: network.to_string(),
            network_id,
            chain,
            commit_hash: commit_hash.map(str::to_string),
            tree_dirty,
            timestamp: Utc::now(),
        })?;
        Ok(id)
    }

    fn record_contract(&mut self, id: DeploymentId, record: &ContractRecord) -> Result<()> {
        self.append(&LedgerRow::Contract {
            deployment: id,
            contract: record.clone(),
            timestamp: Utc::now(),
        })
    }

    fn mark_success(&mut self, id: DeploymentId) -> Result<()> {
        self.append(&LedgerRow::Success {
            deployment: id,
            timestamp: Utc::now(),
        })
    }
}
