//! Error taxonomy for the deployment engine.

use std::time::Duration;

use alloy_core::primitives::B256;

/// Errors produced by the deployment engine.
///
/// Each variant maps to a distinct process exit code so operators and
/// automation can tell configuration mistakes apart from chain failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent configuration (bad network name, malformed
    /// address, cyclic step dependencies, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The chain endpoint is unreachable or failed a preflight check.
    #[error("connection error: {0}")]
    Connection(String),

    /// A compiled artifact is missing, malformed, or duplicated.
    #[error("artifact error: {0}")]
    Artifact(String),

    /// A transaction was mined but reverted or ran out of gas.
    #[error("transaction {hash} failed")]
    TransactionFailure { hash: B256 },

    /// A transaction was not mined within the configured timeout.
    #[error("transaction {hash} not mined within {timeout:?}")]
    Timeout { hash: B256, timeout: Duration },
}

impl Error {
    /// Process exit code for this error kind. Code 1 is reserved for
    /// unclassified failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Configuration(_) => 2,
            Error::Connection(_) => 3,
            Error::Artifact(_) => 4,
            Error::TransactionFailure { .. } => 5,
            Error::Timeout { .. } => 6,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// Callers that care about node-side RPC outcomes (a known-transaction
// rejection, a failed gas estimate) match on RpcError before converting;
// anything that reaches this blanket conversion is endpoint trouble.
impl From<crate::rpc::RpcError> for Error {
    fn from(e: crate::rpc::RpcError) -> Self {
        Error::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_reserved() {
        let errors = [
            Error::Configuration("x".into()),
            Error::Connection("x".into()),
            Error::Artifact("x".into()),
            Error::TransactionFailure { hash: B256::ZERO },
            Error::Timeout {
                hash: B256::ZERO,
                timeout: Duration::from_secs(240),
            },
        ];

        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&1), "code 1 is reserved for unclassified failures");
    }
}
