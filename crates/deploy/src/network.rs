//! Chain endpoint: connection, preflight checks, signing, and transaction
//! lifecycle (sign, send, wait, check).

use std::path::Path;
use std::time::{Duration, Instant};

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSigner;
use alloy_signer_ledger::{HDPath, LedgerSigner};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};
use crate::rpc::{self, RpcError, TxReceipt};

/// Blocks the home chain must advance during preflight before we trust it.
pub const BLOCKS_TO_WAIT: u64 = 5;

/// Interval between chain polls (receipts, block numbers).
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between nonce debounce polls.
const NONCE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Which side of a two-chain community deployment this endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Home,
    Side,
}

fn default_gas_estimate_multiplier() -> f64 {
    2.0
}

fn default_timeout_secs() -> u64 {
    240
}

/// Per-network configuration, deserialized from the TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub eth_uri: String,
    pub network_id: u64,
    pub gas_limit: u64,
    /// Zero means the network mines transactions for free.
    #[serde(default)]
    pub gas_price: u128,
    #[serde(default = "default_gas_estimate_multiplier")]
    pub gas_estimate_multiplier: f64,
    /// Seconds to wait for a transaction to be mined.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Per-contract configuration tables, already merged with the defaults.
    #[serde(default)]
    pub contracts: toml::value::Table,
}

impl NetworkDefinition {
    /// Build a live endpoint from this definition. Does not touch the
    /// network; call [`Network::connect`] for that.
    pub fn create(&self, name: &str, chain: Chain) -> Result<Network> {
        let client = rpc::create_client()?;
        Ok(Network {
            name: name.to_string(),
            chain,
            eth_uri: self.eth_uri.clone(),
            network_id: self.network_id,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            gas_estimate_multiplier: self.gas_estimate_multiplier,
            timeout: Duration::from_secs(self.timeout),
            contract_config: self.contracts.clone(),
            client,
            signer: None,
            nonce: 0,
        })
    }
}

/// The account used to author transactions.
pub enum DeploySigner {
    Keyfile(PrivateKeySigner),
    HardwareWallet(LedgerSigner),
}

impl DeploySigner {
    pub fn address(&self) -> Address {
        match self {
            DeploySigner::Keyfile(signer) => signer.address(),
            DeploySigner::HardwareWallet(signer) => TxSigner::address(signer),
        }
    }

    async fn sign(&self, tx: &mut TxLegacy) -> Result<alloy_signer::Signature> {
        let result = match self {
            DeploySigner::Keyfile(signer) => TxSigner::sign_transaction(signer, tx).await,
            DeploySigner::HardwareWallet(signer) => TxSigner::sign_transaction(signer, tx).await,
        };
        result.map_err(|e| Error::Connection(format!("failed to sign transaction: {e}")))
    }
}

/// Options attached to every authenticated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    pub chain_id: u64,
    pub gas: u64,
    pub gas_price: u128,
    pub nonce: u64,
}

/// Caller-supplied overrides for a single transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOverrides {
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
}

impl TxOverrides {
    pub fn apply(&self, opts: &mut TxOptions) {
        if let Some(gas) = self.gas {
            opts.gas = gas;
        }
        if let Some(gas_price) = self.gas_price {
            opts.gas_price = gas_price;
        }
        if let Some(nonce) = self.nonce {
            opts.nonce = nonce;
        }
    }
}

/// A signed transaction ready for submission. The hash is computed locally,
/// so it is known even when the node refuses a duplicate submission.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub hash: B256,
    pub raw: Bytes,
}

/// A live connection to one chain endpoint.
pub struct Network {
    pub name: String,
    pub chain: Chain,
    pub eth_uri: String,
    pub network_id: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub gas_estimate_multiplier: f64,
    pub timeout: Duration,
    pub contract_config: toml::value::Table,
    client: reqwest::Client,
    signer: Option<DeploySigner>,
    nonce: u64,
}

impl Network {
    /// Probe the endpoint and run preflight checks, then sync the nonce if a
    /// signer is unlocked.
    pub async fn connect(&mut self, skip_checks: bool) -> Result<()> {
        let remote_id = rpc::chain_id(&self.client, &self.eth_uri)
            .await
            .map_err(|e| {
                Error::Connection(format!("could not reach {}: {e}", self.eth_uri))
            })?;
        tracing::info!(network = %self.name, chain = %self.chain, chain_id = remote_id, "connected");

        if skip_checks {
            tracing::warn!(network = %self.name, "skipping preflight checks");
        } else {
            self.preflight(remote_id).await?;
        }

        if self.signer.is_some() {
            self.resync_nonce().await?;
        }

        Ok(())
    }

    async fn preflight(&self, remote_id: u64) -> Result<()> {
        if remote_id != self.network_id {
            return Err(Error::Connection(format!(
                "chain id mismatch on {}: expected {}, node reports {}",
                self.name, self.network_id, remote_id
            )));
        }

        // A home chain that has stopped producing blocks would stall every
        // transaction, so require visible progress before deploying.
        if self.chain == Chain::Home {
            let baseline = rpc::block_number(&self.client, &self.eth_uri).await?;
            let target = baseline + BLOCKS_TO_WAIT;
            tracing::info!(baseline, target, "waiting for chain to advance");
            let deadline = Instant::now() + self.timeout;
            loop {
                let current = rpc::block_number(&self.client, &self.eth_uri).await?;
                if current >= target {
                    break;
                }
                if Instant::now() > deadline {
                    return Err(Error::Connection(format!(
                        "chain {} did not advance {} blocks within {:?}",
                        self.name, BLOCKS_TO_WAIT, self.timeout
                    )));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        // Some chains ramp the block gas limit up over the first few blocks.
        let deadline = Instant::now() + self.timeout;
        loop {
            let block = rpc::latest_block(&self.client, &self.eth_uri).await?;
            if block.gas_limit >= self.gas_limit {
                break;
            }
            if Instant::now() > deadline {
                return Err(Error::Connection(format!(
                    "block gas limit {} below configured floor {} on {}",
                    block.gas_limit, self.gas_limit, self.name
                )));
            }
            tracing::debug!(
                gas_limit = block.gas_limit,
                floor = self.gas_limit,
                "waiting for block gas limit to reach floor"
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Ok(())
    }

    /// Decrypt a V3 keystore file and adopt it as the signing account.
    pub fn unlock_keyfile(&mut self, path: &Path, password: &str) -> Result<()> {
        let signer = PrivateKeySigner::decrypt_keystore(path, password).map_err(|e| {
            Error::Configuration(format!(
                "could not decrypt keystore {}: {e}",
                path.display()
            ))
        })?;
        tracing::info!(address = %signer.address(), "unlocked keyfile");
        self.signer = Some(DeploySigner::Keyfile(signer));
        Ok(())
    }

    /// Try to open a Ledger device at the given derivation path. Returns
    /// false when no device answers so the caller can fall back to a keyfile.
    pub async fn unlock_hardware_wallet(&mut self, derivation_path: &str) -> bool {
        let path = HDPath::Other(derivation_path.to_string());
        match LedgerSigner::new(path, Some(self.network_id)).await {
            Ok(signer) => {
                tracing::info!(address = %TxSigner::address(&signer), "unlocked hardware wallet");
                self.signer = Some(DeploySigner::HardwareWallet(signer));
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "hardware wallet unavailable");
                false
            }
        }
    }

    pub fn signer_address(&self) -> Result<Address> {
        self.signer
            .as_ref()
            .map(|s| s.address())
            .ok_or_else(|| Error::Configuration("no account unlocked".to_string()))
    }

    /// Adopt the node's pending transaction count as our next nonce.
    ///
    /// Parity-style nodes report a transiently stale pending count right
    /// after a burst of submissions, so poll until two consecutive reads
    /// agree before trusting the value.
    pub async fn resync_nonce(&mut self) -> Result<()> {
        let address = self.signer_address()?;
        let mut last = rpc::transaction_count(&self.client, &self.eth_uri, address).await?;
        loop {
            tokio::time::sleep(NONCE_POLL_INTERVAL).await;
            let next = rpc::transaction_count(&self.client, &self.eth_uri, address).await?;
            if next == last {
                break;
            }
            last = next;
        }
        tracing::debug!(nonce = last, "resynced nonce");
        self.nonce = last;
        Ok(())
    }

    /// Options for the next transaction. Incrementing reserves the nonce;
    /// issued nonces are monotonic with no gaps.
    pub fn tx_options(&mut self, increment_nonce: bool) -> TxOptions {
        let nonce = self.nonce;
        if increment_nonce {
            self.nonce += 1;
        }
        TxOptions {
            chain_id: self.network_id,
            gas: self.gas_limit,
            gas_price: self.gas_price,
            nonce,
        }
    }

    /// Sign a legacy (EIP-155) transaction with the unlocked account.
    pub async fn sign_transaction(
        &self,
        to: TxKind,
        value: U256,
        input: Bytes,
        opts: TxOptions,
    ) -> Result<SignedTransaction> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::Configuration("no account unlocked".to_string()))?;

        let mut tx = TxLegacy {
            chain_id: Some(opts.chain_id),
            nonce: opts.nonce,
            gas_price: opts.gas_price,
            gas_limit: opts.gas,
            to,
            value,
            input,
        };

        let signature = signer.sign(&mut tx).await?;
        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::Legacy(signed).encoded_2718();

        Ok(SignedTransaction {
            hash,
            raw: raw.into(),
        })
    }

    /// Submit a signed transaction. A node that already knows the
    /// transaction is treated as success; signing is deterministic, so the
    /// locally computed hash identifies the same transaction.
    pub async fn send_transaction(&self, signed: &SignedTransaction) -> Result<B256> {
        match rpc::send_raw_transaction(&self.client, &self.eth_uri, &signed.raw).await {
            Ok(hash) => Ok(hash),
            Err(e) if e.is_node_error() && is_known_transaction(e.message()) => {
                tracing::warn!(hash = %signed.hash, "transaction already known to node");
                Ok(signed.hash)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll until the transaction is mined or the configured timeout lapses.
    pub async fn wait_for_transaction(&self, hash: B256) -> Result<TxReceipt> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(receipt) =
                rpc::transaction_receipt(&self.client, &self.eth_uri, hash).await?
                && receipt.block_number.is_some()
            {
                return Ok(receipt);
            }
            if Instant::now() > deadline {
                return Err(Error::Timeout {
                    hash,
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Verify a mined transaction actually succeeded: a receipt exists, its
    /// status is success, and it used less gas than it was given (an
    /// out-of-gas revert on a pre-Byzantium chain consumes the full limit).
    pub async fn check_transaction(&self, hash: B256) -> Result<TxReceipt> {
        let receipt = rpc::transaction_receipt(&self.client, &self.eth_uri, hash)
            .await?
            .ok_or(Error::TransactionFailure { hash })?;

        if !receipt.succeeded() {
            return Err(Error::TransactionFailure { hash });
        }

        let tx = rpc::transaction_by_hash(&self.client, &self.eth_uri, hash)
            .await?
            .ok_or(Error::TransactionFailure { hash })?;
        if receipt.gas_used >= tx.gas {
            return Err(Error::TransactionFailure { hash });
        }

        Ok(receipt)
    }

    pub async fn wait_and_check_transaction(&self, hash: B256) -> Result<TxReceipt> {
        self.wait_for_transaction(hash).await?;
        self.check_transaction(hash).await
    }

    /// Wait for every transaction to be mined before checking any of them,
    /// so a batch failure reports after all submissions have settled.
    pub async fn wait_and_check_transactions(&self, hashes: &[B256]) -> Result<Vec<TxReceipt>> {
        for hash in hashes {
            self.wait_for_transaction(*hash).await?;
        }
        let mut receipts = Vec::with_capacity(hashes.len());
        for hash in hashes {
            receipts.push(self.check_transaction(*hash).await?);
        }
        Ok(receipts)
    }

    pub async fn block_number(&self) -> Result<u64> {
        Ok(rpc::block_number(&self.client, &self.eth_uri).await?)
    }

    /// Wait until the chain has advanced `blocks` past the current height.
    pub async fn wait_blocks(&self, blocks: u64) -> Result<()> {
        let target = self.block_number().await? + blocks;
        loop {
            if self.block_number().await? >= target {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn is_contract(&self, address: Address) -> Result<bool> {
        let code = rpc::get_code(&self.client, &self.eth_uri, address).await?;
        Ok(!code.is_empty())
    }

    pub async fn estimate_gas(
        &self,
        to: Option<Address>,
        data: &Bytes,
        value: U256,
    ) -> Result<u64, RpcError> {
        let from = self
            .signer
            .as_ref()
            .map(|s| s.address())
            .unwrap_or(Address::ZERO);
        rpc::estimate_gas(&self.client, &self.eth_uri, from, to, data, value).await
    }

    pub async fn eth_call(&self, to: Address, data: &Bytes) -> Result<Bytes> {
        Ok(rpc::eth_call(&self.client, &self.eth_uri, to, data).await?)
    }
}

/// Classify a node error as "we already sent this exact transaction".
/// Wording varies across geth, parity, and nethermind.
pub fn is_known_transaction(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("known transaction")
        || lower.contains("already known")
        || lower.contains("already imported")
}

/// Parse a user-supplied address. Single-case hex is accepted as-is; mixed
/// case must carry a valid EIP-55 checksum.
pub fn normalize_address(input: &str) -> Result<Address> {
    let hex_part = input.strip_prefix("0x").unwrap_or(input);
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Configuration(format!("invalid address: {input:?}")));
    }

    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        Address::parse_checksummed(format!("0x{hex_part}"), None)
            .map_err(|_| Error::Configuration(format!("bad address checksum: {input:?}")))
    } else {
        hex_part
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid address {input:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Minimal one-shot JSON-RPC stub: answers each HTTP POST with whatever
    /// the responder returns for its body, closing the connection after.
    async fn spawn_rpc_stub(responder: fn(&str) -> String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = Vec::new();
                let mut tmp = [0u8; 1024];
                let body = loop {
                    let n = socket.read(&mut tmp).await.unwrap_or(0);
                    if n == 0 {
                        break None;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                        let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                        let len = headers
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|value| value.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= pos + 4 + len {
                            break Some(
                                String::from_utf8_lossy(&buf[pos + 4..pos + 4 + len]).to_string(),
                            );
                        }
                    }
                };
                let Some(body) = body else { continue };
                let reply = responder(&body);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}")
    }

    fn network_at(eth_uri: &str) -> Network {
        NetworkDefinition {
            eth_uri: eth_uri.to_string(),
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

    fn test_network() -> Network {
        network_at("http://localhost:8545")
    }

    #[test]
    fn nonces_are_monotonic_without_gaps() {
        let mut network = test_network();
        let first = network.tx_options(true);
        let second = network.tx_options(true);
        let third = network.tx_options(false);
        let fourth = network.tx_options(false);
        assert_eq!(first.nonce, 0);
        assert_eq!(second.nonce, 1);
        assert_eq!(third.nonce, 2);
        assert_eq!(fourth.nonce, 2);
        assert_eq!(first.chain_id, 1337);
        assert_eq!(first.gas, 6_700_000);
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let mut network = test_network();
        let mut opts = network.tx_options(true);
        TxOverrides {
            gas: Some(100_000),
            gas_price: None,
            nonce: Some(7),
        }
        .apply(&mut opts);
        assert_eq!(opts.gas, 100_000);
        assert_eq!(opts.gas_price, 0);
        assert_eq!(opts.nonce, 7);
    }

    #[test]
    fn chain_parses_from_lowercase() {
        assert_eq!("home".parse::<Chain>().unwrap(), Chain::Home);
        assert_eq!("side".parse::<Chain>().unwrap(), Chain::Side);
        assert!("main".parse::<Chain>().is_err());
        assert_eq!(Chain::Side.to_string(), "side");
    }

    #[test]
    fn normalizes_single_case_addresses() {
        let lower = normalize_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let upper = normalize_address("0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn validates_mixed_case_checksums() {
        assert!(normalize_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
        assert!(normalize_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD").is_err());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(normalize_address("not an address").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("").is_err());
    }

    #[tokio::test]
    async fn failed_receipt_is_a_transaction_failure() {
        let uri = spawn_rpc_stub(|body| {
            if body.contains("eth_getTransactionReceipt") {
                r#"{"jsonrpc":"2.0","id":1,"result":{
                    "transactionHash":"0x1111111111111111111111111111111111111111111111111111111111111111",
                    "contractAddress":null,"gasUsed":"0x5208","status":"0x0","blockNumber":"0x1"}}"#
                    .to_string()
            } else {
                r#"{"jsonrpc":"2.0","id":1,"result":null}"#.to_string()
            }
        })
        .await;
        let network = network_at(&uri);

        let hash: B256 = "0x1111111111111111111111111111111111111111111111111111111111111111"
            .parse()
            .unwrap();
        match network.check_transaction(hash).await {
            Err(Error::TransactionFailure { hash: failed }) => assert_eq!(failed, hash),
            other => panic!("expected TransactionFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmined_transaction_times_out() {
        let uri = spawn_rpc_stub(|body| {
            assert!(body.contains("eth_getTransactionReceipt"));
            r#"{"jsonrpc":"2.0","id":1,"result":null}"#.to_string()
        })
        .await;
        let mut network = network_at(&uri);
        network.timeout = Duration::from_secs(0);

        let hash = B256::repeat_byte(0x22);
        match network.wait_for_transaction(hash).await {
            Err(Error::Timeout {
                hash: timed_out, ..
            }) => assert_eq!(timed_out, hash),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chain_id_mismatch_fails_preflight() {
        let uri = spawn_rpc_stub(|body| {
            assert!(body.contains("eth_chainId"));
            r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#.to_string()
        })
        .await;
        // network_at configures network id 1337; the node reports 1.
        let mut network = network_at(&uri);

        match network.connect(false).await {
            Err(Error::Connection(message)) => assert!(message.contains("mismatch")),
            other => panic!("expected Connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn known_transaction_send_returns_the_local_hash() {
        let uri = spawn_rpc_stub(|body| {
            assert!(body.contains("eth_sendRawTransaction"));
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"known transaction: deadbeef"}}"#
                .to_string()
        })
        .await;
        let network = network_at(&uri);

        let signed = SignedTransaction {
            hash: B256::repeat_byte(0x11),
            raw: Bytes::from(vec![1, 2, 3]),
        };
        let hash = network.send_transaction(&signed).await.unwrap();
        assert_eq!(hash, signed.hash);
    }

    #[tokio::test]
    async fn other_send_errors_propagate() {
        let uri = spawn_rpc_stub(|_| {
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"insufficient funds"}}"#
                .to_string()
        })
        .await;
        let network = network_at(&uri);

        let signed = SignedTransaction {
            hash: B256::repeat_byte(0x11),
            raw: Bytes::from(vec![1, 2, 3]),
        };
        assert!(matches!(
            network.send_transaction(&signed).await,
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn classifies_known_transaction_errors() {
        assert!(is_known_transaction("known transaction: 0xabc"));
        assert!(is_known_transaction("ALREADY KNOWN"));
        assert!(is_known_transaction("Transaction with the same hash was already imported."));
        assert!(!is_known_transaction("insufficient funds for gas * price + value"));
    }
}
