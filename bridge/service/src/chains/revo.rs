// Copyright (c) 2024 The Botho Foundation

//! REVO destination client.
//!
//! Signing and broadcast go through the chain's CLI binary so the minting key
//! never leaves its keyring. Sequence lookup, inclusion polling and the memo
//! search used for idempotency go through the Cosmos SDK REST API.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use revo_bridge_core::{
    BridgeError, BridgeResult, DestinationConfig, MintRequest, TxReceipt,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::{process::Command, time::Instant};
use tracing::{debug, info, trace};

use super::DestinationChain;
use crate::rpc::RpcThrottle;

const INCLUSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Results per page of the memo search.
const MINT_SEARCH_PAGE_SIZE: u32 = 100;

/// Pages of the minter's newest transactions searched for a memo.
const MINT_SEARCH_MAX_PAGES: u32 = 5;

/// A transaction result as returned by the CLI and the REST API.
#[derive(Debug, Clone, Default, Deserialize)]
struct TxResponse {
    #[serde(default)]
    txhash: String,
    #[serde(default, deserialize_with = "u64_from_any")]
    height: u64,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    codespace: String,
    #[serde(default)]
    raw_log: String,
}

#[derive(Debug, Default, Deserialize)]
struct TxSearchResponse {
    #[serde(default)]
    txs: Vec<Value>,
    #[serde(default)]
    tx_responses: Vec<TxResponse>,
}

#[derive(Debug, Deserialize)]
struct GetTxResponse {
    tx_response: TxResponse,
}

/// Cosmos encodes 64-bit integers as strings; older nodes use numbers.
fn u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Int(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Read the account sequence from an `auth/v1beta1/accounts` response.
///
/// Base accounts carry it directly; vesting and module accounts nest it under
/// `base_account`.
fn extract_sequence(body: &Value) -> Option<u64> {
    let account = body.get("account")?;
    let sequence = account
        .get("sequence")
        .or_else(|| account.get("base_account")?.get("sequence"))?;

    match sequence {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Find a successful transaction whose memo is `key`.
fn find_memo_match(response: &TxSearchResponse, key: &str) -> Option<TxReceipt> {
    response
        .txs
        .iter()
        .zip(&response.tx_responses)
        .find(|(tx, result)| {
            result.code == 0
                && tx
                    .pointer("/body/memo")
                    .and_then(Value::as_str)
                    .is_some_and(|memo| memo == key)
        })
        .map(|(_, result)| {
            TxReceipt::recovered(result.txhash.clone(), Some(result.height).filter(|h| *h > 0))
        })
}

/// Classify a non-zero ABCI result code from the `sdk` codespace.
pub fn classify_broadcast_code(codespace: &str, code: u32, raw_log: &str) -> BridgeError {
    let detail = format!("code {} ({}): {}", code, codespace, raw_log);
    if !codespace.is_empty() && codespace != "sdk" {
        return BridgeError::SubmissionFatal(detail);
    }

    match code {
        // ErrWrongSequence
        32 => BridgeError::sequence_conflict(detail),
        // ErrOutOfGas, ErrInsufficientFee, ErrTxInMempoolCache, ErrMempoolIsFull
        11 | 13 | 19 | 20 => BridgeError::transient(detail),
        // ErrUnauthorized, ErrInsufficientFunds, ErrInvalidAddress and anything else
        _ => BridgeError::SubmissionFatal(detail),
    }
}

/// Classify a CLI invocation that produced no parseable broadcast result.
pub fn classify_cli_failure(stderr: &str) -> BridgeError {
    let message = stderr.trim();
    let lower = message.to_lowercase();

    if lower.contains("account sequence mismatch") || lower.contains("incorrect account sequence")
    {
        BridgeError::sequence_conflict(message)
    } else if ["connection refused", "timed out", "deadline exceeded", "eof", "post failed"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        BridgeError::transient(message)
    } else {
        BridgeError::SubmissionFatal(message.to_string())
    }
}

/// Arguments for `<binary> tx bank send`.
fn send_args(config: &DestinationConfig, request: &MintRequest, sequence: u64) -> Vec<String> {
    let mut args: Vec<String> = [
        "tx",
        "bank",
        "send",
        config.minter_key.as_str(),
        request.recipient.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}{}", request.amount, config.denom));

    for (flag, value) in [
        ("--chain-id", config.chain_id.clone()),
        ("--node", config.rpc_url.clone()),
        ("--sequence", sequence.to_string()),
        ("--note", request.idempotency_key.clone()),
        ("--gas", "auto".to_string()),
        ("--gas-adjustment", config.gas_adjustment.to_string()),
        ("--gas-prices", config.gas_prices.clone()),
        ("--keyring-backend", config.keyring_backend.clone()),
        ("--broadcast-mode", "sync".to_string()),
        ("--output", "json".to_string()),
    ] {
        args.push(flag.to_string());
        args.push(value);
    }

    if let Some(dir) = &config.keyring_dir {
        args.push("--keyring-dir".to_string());
        args.push(dir.display().to_string());
    }
    args.push("--yes".to_string());
    args
}

/// Client for the REVO chain.
pub struct RevoChainClient {
    http: reqwest::Client,
    config: DestinationConfig,
    throttle: Arc<RpcThrottle>,
}

impl RevoChainClient {
    pub fn new(config: DestinationConfig, throttle: Arc<RpcThrottle>) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            throttle,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> BridgeResult<(u16, Value)> {
        self.throttle.wait().await;
        trace!("GET {}", url);

        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| BridgeError::RpcUnavailable(format!("GET {} failed: {}", url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .json()
            .await
            .unwrap_or(Value::Null);

        Ok((status, body))
    }

    /// Poll until `tx_hash` is committed, returning its height.
    async fn await_inclusion(&self, tx_hash: &str) -> BridgeResult<u64> {
        let url = self.api(&format!("/cosmos/tx/v1beta1/txs/{}", tx_hash));
        let deadline =
            Instant::now() + Duration::from_secs(self.config.inclusion_timeout_secs);

        loop {
            match self.get_json(&url, &[]).await {
                Ok((200, body)) => {
                    let result = serde_json::from_value::<GetTxResponse>(body)
                        .map_err(|e| {
                            BridgeError::RpcUnavailable(format!(
                                "Malformed tx response for {}: {}",
                                tx_hash, e
                            ))
                        })?
                        .tx_response;
                    if result.code != 0 {
                        return Err(classify_broadcast_code(
                            &result.codespace,
                            result.code,
                            &result.raw_log,
                        ));
                    }
                    return Ok(result.height);
                }
                Ok((status, _)) => trace!("{} not indexed yet ({})", tx_hash, status),
                Err(e) => debug!("Inclusion check for {} failed: {}", tx_hash, e),
            }

            if Instant::now() >= deadline {
                return Err(BridgeError::sequence_conflict(format!(
                    "{} not included within {}s",
                    tx_hash, self.config.inclusion_timeout_secs
                )));
            }
            tokio::time::sleep(INCLUSION_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl DestinationChain for RevoChainClient {
    async fn account_sequence(&self) -> BridgeResult<u64> {
        let url = self.api(&format!(
            "/cosmos/auth/v1beta1/accounts/{}",
            self.config.minter_address
        ));

        match self.get_json(&url, &[]).await? {
            (200, body) => extract_sequence(&body).ok_or_else(|| {
                BridgeError::RpcUnavailable(format!("No sequence in account response: {}", body))
            }),
            (404, _) => Err(BridgeError::SubmissionFatal(format!(
                "Minting account {} does not exist",
                self.config.minter_address
            ))),
            (status, body) => Err(BridgeError::RpcUnavailable(format!(
                "Account query returned {}: {}",
                status, body
            ))),
        }
    }

    async fn find_mint(&self, request: &MintRequest) -> BridgeResult<Option<TxReceipt>> {
        let url = self.api("/cosmos/tx/v1beta1/txs");
        let mut filters = vec![(
            "events",
            format!("message.sender='{}'", self.config.minter_address),
        )];
        // Transfer events carry bech32 recipients, so a hex recipient cannot
        // narrow the search; the memo alone identifies the mint.
        if !request.recipient.starts_with("0x") {
            filters.push((
                "events",
                format!("transfer.recipient='{}'", request.recipient),
            ));
        }

        for page in 1..=MINT_SEARCH_MAX_PAGES {
            let mut query = filters.clone();
            query.push(("order_by", "ORDER_BY_DESC".to_string()));
            query.push(("pagination.limit", MINT_SEARCH_PAGE_SIZE.to_string()));
            query.push(("page", page.to_string()));
            query.push(("limit", MINT_SEARCH_PAGE_SIZE.to_string()));

            let (status, body) = self.get_json(&url, &query).await?;
            if status != 200 {
                return Err(BridgeError::RpcUnavailable(format!(
                    "Tx search returned {}: {}",
                    status, body
                )));
            }

            let response: TxSearchResponse = serde_json::from_value(body).map_err(|e| {
                BridgeError::RpcUnavailable(format!("Malformed tx search response: {}", e))
            })?;
            if let Some(receipt) = find_memo_match(&response, &request.idempotency_key) {
                return Ok(Some(receipt));
            }
            if response.tx_responses.len() < MINT_SEARCH_PAGE_SIZE as usize {
                break;
            }
        }

        Ok(None)
    }

    async fn submit(&self, request: &MintRequest, sequence: u64) -> BridgeResult<TxReceipt> {
        let args = send_args(&self.config, request, sequence);
        info!(
            "Broadcasting {}{} to {} (sequence {}, key {})",
            request.amount,
            self.config.denom,
            request.recipient,
            sequence,
            request.idempotency_key
        );

        self.throttle.wait().await;
        let output = Command::new(&self.config.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                BridgeError::SubmissionFatal(format!("Failed to run {}: {}", self.config.binary, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let broadcast = stdout
            .find('{')
            .and_then(|start| serde_json::from_str::<TxResponse>(stdout[start..].trim()).ok());
        let Some(broadcast) = broadcast else {
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(classify_cli_failure(detail));
        };

        if broadcast.code != 0 {
            return Err(classify_broadcast_code(
                &broadcast.codespace,
                broadcast.code,
                &broadcast.raw_log,
            ));
        }
        if broadcast.txhash.is_empty() {
            return Err(BridgeError::transient("Broadcast returned no tx hash"));
        }

        debug!("Broadcast accepted as {}, waiting for inclusion", broadcast.txhash);
        let height = self.await_inclusion(&broadcast.txhash).await?;
        Ok(TxReceipt::submitted(broadcast.txhash, Some(height)))
    }
}
