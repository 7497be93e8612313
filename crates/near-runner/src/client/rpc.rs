//! JSON-RPC access to a NEAR node.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::RpcError;
use crate::types::{
    AccessKeyView, AccountId, AccountView, BlockView, FinalExecutionOutcome, Finality,
    ProtocolConfigView, PublicKey, SignedTransaction, TxExecutionStatus, ViewCodeResult,
    ViewFunctionResult, ViewStateResult,
};

/// Public testnet RPC endpoint.
pub const TESTNET_RPC_URL: &str = "https://rpc.testnet.near.org";

/// How many times a transient failure is retried, with doubling delays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Fail on the first error. Readiness polling runs its own loop.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Pause before retry number `retry` (0-based).
    fn backoff(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// RpcProvider
// ============================================================================

/// The node operations the account manager and sandbox supervisor use.
///
/// [`RpcClient`] talks to a real node. Unit tests substitute an in-memory
/// node.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn view_account(
        &self,
        account_id: &AccountId,
        finality: Finality,
    ) -> Result<AccountView, RpcError>;

    /// Mainly read for the key's nonce.
    async fn view_access_key(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
        finality: Finality,
    ) -> Result<AccessKeyView, RpcError>;

    /// Contract storage whose keys start with `prefix`.
    async fn view_state(
        &self,
        account_id: &AccountId,
        prefix: &[u8],
        finality: Finality,
    ) -> Result<ViewStateResult, RpcError>;

    async fn view_code(
        &self,
        account_id: &AccountId,
        finality: Finality,
    ) -> Result<ViewCodeResult, RpcError>;

    /// Run a view method. `args` are passed through as is.
    async fn call_function(
        &self,
        account_id: &AccountId,
        method_name: &str,
        args: &[u8],
        finality: Finality,
    ) -> Result<ViewFunctionResult, RpcError>;

    async fn block(&self, finality: Finality) -> Result<BlockView, RpcError>;

    async fn protocol_config(&self, finality: Finality) -> Result<ProtocolConfigView, RpcError>;

    /// Submit and wait until `wait_until`.
    async fn send_tx(
        &self,
        signed_tx: &SignedTransaction,
        wait_until: TxExecutionStatus,
    ) -> Result<FinalExecutionOutcome, RpcError>;

    /// Write state records directly. Only sandbox nodes accept this.
    async fn sandbox_patch_state(&self, records: Value) -> Result<(), RpcError>;
}

// ============================================================================
// Wire format
// ============================================================================

/// The `error` member of a response. NEAR nodes name the failure in
/// `cause.name` and put its fields in `cause.info`.
#[derive(Debug, Deserialize)]
struct ServerError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    cause: Cause,
}

#[derive(Debug, Default, Deserialize)]
struct Cause {
    #[serde(default)]
    name: String,
    #[serde(default)]
    info: Value,
}

impl Cause {
    fn field<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.info.get(key)?.as_str()?.parse().ok()
    }
}

impl ServerError {
    /// Lift the causes the runner handles into their own variants.
    fn into_rpc_error(self) -> RpcError {
        let cause = &self.cause;
        let typed = match cause.name.as_str() {
            "UNKNOWN_ACCOUNT" => cause
                .field("requested_account_id")
                .map(RpcError::AccountNotFound),
            "UNKNOWN_ACCESS_KEY" => cause
                .field("requested_account_id")
                .zip(cause.field("public_key"))
                .map(|(account_id, public_key)| RpcError::AccessKeyNotFound {
                    account_id,
                    public_key,
                }),
            "NO_CONTRACT_CODE" => cause
                .field("contract_account_id")
                .map(RpcError::ContractNotDeployed),
            "INVALID_TRANSACTION" => Some(
                self.data
                    .as_ref()
                    .and_then(invalid_nonce)
                    .unwrap_or_else(|| RpcError::InvalidTransaction {
                        message: self.message.clone(),
                        details: self.data.clone(),
                    }),
            ),
            _ => None,
        };
        typed.unwrap_or(RpcError::Server {
            cause: self.cause.name,
            code: self.code,
            message: self.message,
            data: self.data,
        })
    }
}

/// Finds `{"InvalidNonce": {"tx_nonce": .., "ak_nonce": ..}}` however deep
/// the node nests it.
fn invalid_nonce(data: &Value) -> Option<RpcError> {
    match data {
        Value::Object(map) => map.iter().find_map(|(key, inner)| {
            if key == "InvalidNonce" {
                Some(RpcError::InvalidNonce {
                    tx_nonce: inner.get("tx_nonce")?.as_u64()?,
                    ak_nonce: inner.get("ak_nonce")?.as_u64()?,
                })
            } else {
                invalid_nonce(inner)
            }
        }),
        _ => None,
    }
}

/// `call_function` reports contract failures inside a successful response.
#[derive(Deserialize)]
struct CallResult {
    #[serde(default)]
    result: Vec<u8>,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// RpcClient
// ============================================================================

/// [`RpcProvider`] over HTTP, retrying transient failures per [`RetryConfig`].
#[derive(Clone, Debug)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_retry_config(url, RetryConfig::default())
    }

    pub fn with_retry_config(url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            retry,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method`, retrying while the failure is transient.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        let mut retry = 0;
        loop {
            match self.call_once(method, &params).await {
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.backoff(retry);
                    debug!(method, retry, ?delay, error = %e, "Transient RPC failure, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn call_once<R: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<R, RpcError> {
        let transport = |source| RpcError::Transport {
            url: self.url.clone(),
            source,
        };
        let body = json!({
            "jsonrpc": "2.0",
            "id": "near-runner",
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(RpcError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let mut envelope: Value = serde_json::from_str(&text)?;
        if let Some(error) = envelope.get_mut("error").map(Value::take).filter(|e| !e.is_null()) {
            let error: ServerError = serde_json::from_value(error)?;
            return Err(error.into_rpc_error());
        }
        match envelope.get_mut("result").map(Value::take) {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Err(RpcError::InvalidResponse(format!(
                "{method}: response has neither result nor error"
            ))),
        }
    }

    async fn query<R: DeserializeOwned>(
        &self,
        request_type: &str,
        account_id: &AccountId,
        finality: Finality,
        extra: Value,
    ) -> Result<R, RpcError> {
        let mut params = json!({
            "request_type": request_type,
            "account_id": account_id,
            "finality": finality,
        });
        if let (Some(params), Value::Object(extra)) = (params.as_object_mut(), extra) {
            params.extend(extra);
        }
        self.call("query", params).await
    }
}

#[async_trait]
impl RpcProvider for RpcClient {
    async fn view_account(
        &self,
        account_id: &AccountId,
        finality: Finality,
    ) -> Result<AccountView, RpcError> {
        self.query("view_account", account_id, finality, Value::Null)
            .await
    }

    async fn view_access_key(
        &self,
        account_id: &AccountId,
        public_key: &PublicKey,
        finality: Finality,
    ) -> Result<AccessKeyView, RpcError> {
        self.query(
            "view_access_key",
            account_id,
            finality,
            json!({ "public_key": public_key }),
        )
        .await
    }

    async fn view_state(
        &self,
        account_id: &AccountId,
        prefix: &[u8],
        finality: Finality,
    ) -> Result<ViewStateResult, RpcError> {
        self.query(
            "view_state",
            account_id,
            finality,
            json!({ "prefix_base64": STANDARD.encode(prefix) }),
        )
        .await
    }

    async fn view_code(
        &self,
        account_id: &AccountId,
        finality: Finality,
    ) -> Result<ViewCodeResult, RpcError> {
        self.query("view_code", account_id, finality, Value::Null)
            .await
    }

    async fn call_function(
        &self,
        account_id: &AccountId,
        method_name: &str,
        args: &[u8],
        finality: Finality,
    ) -> Result<ViewFunctionResult, RpcError> {
        let call: CallResult = self
            .query(
                "call_function",
                account_id,
                finality,
                json!({ "method_name": method_name, "args_base64": STANDARD.encode(args) }),
            )
            .await?;
        match call.error {
            Some(message) if message.contains("CodeDoesNotExist") => {
                Err(RpcError::ContractNotDeployed(account_id.clone()))
            }
            Some(message) => Err(RpcError::ContractExecution {
                contract_id: account_id.clone(),
                method_name: method_name.to_string(),
                message,
            }),
            None => Ok(ViewFunctionResult {
                result: call.result,
                logs: call.logs,
            }),
        }
    }

    async fn block(&self, finality: Finality) -> Result<BlockView, RpcError> {
        self.call("block", json!({ "finality": finality })).await
    }

    async fn protocol_config(&self, finality: Finality) -> Result<ProtocolConfigView, RpcError> {
        self.call("EXPERIMENTAL_protocol_config", json!({ "finality": finality }))
            .await
    }

    async fn send_tx(
        &self,
        signed_tx: &SignedTransaction,
        wait_until: TxExecutionStatus,
    ) -> Result<FinalExecutionOutcome, RpcError> {
        let params = json!({
            "signed_tx_base64": signed_tx.to_base64(),
            "wait_until": wait_until,
        });
        self.call("send_tx", params).await
    }

    async fn sandbox_patch_state(&self, records: Value) -> Result<(), RpcError> {
        let params = json!({ "records": records });
        // The node sometimes drops account records from a single patch.
        for _ in 0..2 {
            self.call::<Value>("sandbox_patch_state", params.clone())
                .await?;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}
