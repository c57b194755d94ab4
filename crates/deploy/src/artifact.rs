//! Compiled contract artifacts (solc standard-json output, one file per
//! contract).

use std::collections::BTreeMap;
use std::path::Path;

use alloy_core::json_abi::JsonAbi;
use alloy_core::primitives::Bytes;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub abi: JsonAbi,
    pub evm: Evm,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evm {
    pub bytecode: Bytecode,
    #[serde(default)]
    pub deployed_bytecode: Option<Bytecode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bytecode {
    pub object: String,
    #[serde(default)]
    pub link_references: serde_json::Value,
}

impl Artifact {
    /// Creation bytecode as raw bytes.
    pub fn bytecode(&self) -> Result<Bytes> {
        let object = self.evm.bytecode.object.trim_start_matches("0x");
        let bytes = hex::decode(object).map_err(|e| {
            Error::Artifact(format!(
                "invalid bytecode in artifact {}: {e}",
                self.contract_name
            ))
        })?;
        Ok(bytes.into())
    }
}

/// Scan a directory (non-recursive) for compiled artifacts, keyed by
/// contract name.
///
/// Files that are not artifacts (unparseable JSON, missing or empty
/// `contractName`) are skipped with a warning; compiler output directories
/// routinely contain metadata files. Two artifacts claiming the same
/// contract name is an error the operator has to resolve.
pub fn scan_artifacts(dir: &Path) -> Result<BTreeMap<String, Artifact>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Artifact(format!("could not read artifact dir {}: {e}", dir.display()))
    })?;

    let mut artifacts = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::Artifact(format!("could not read artifact dir {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        let artifact: Artifact = match serde_json::from_str(&contents) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping non-artifact file");
                continue;
            }
        };

        if artifact.contract_name.is_empty() {
            tracing::warn!(path = %path.display(), "skipping artifact with empty contract name");
            continue;
        }

        let name = artifact.contract_name.clone();
        if artifacts.insert(name.clone(), artifact).is_some() {
            return Err(Error::Artifact(format!(
                "duplicate artifact for contract {name}"
            )));
        }
        tracing::debug!(contract = %name, path = %path.display(), "loaded artifact");
    }

    Ok(artifacts)
}
