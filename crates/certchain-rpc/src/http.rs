//! JSON-RPC node client.
//!
//! Requests go over HTTP. Push subscriptions need the node's WebSocket
//! endpoint and are opened through [`crate::subscriptions`].

use async_trait::async_trait;
use certchain_types::quantity::{self, format_data, format_quantity};
use certchain_types::{Address, GasPlan, Hash, PendingCall, TransactionReceipt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

use crate::client::{FilterKind, NodeClient, Subscription};
use crate::error::{RpcError, RpcResult};
use crate::subscriptions;

/// RPC request.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

/// RPC response.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// RPC error object.
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Events buffered per subscription before the reader applies backpressure.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Node client over HTTP JSON-RPC.
#[derive(Debug)]
pub struct HttpNodeClient {
    http: reqwest::Client,
    url: String,
    ws_url: Option<String>,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    /// Create a new client with the given request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> RpcResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: url.into(),
            ws_url: None,
            next_id: AtomicU64::new(1),
        })
    }

    /// Set the WebSocket endpoint used for subscriptions.
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make an RPC call.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> RpcResult<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        trace!(method, id = request.id, "rpc request");

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::node(error.code, error.message));
        }

        serde_json::from_value(response.result)
            .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }

    async fn request_u64(&self, method: &str, params: serde_json::Value) -> RpcResult<u64> {
        let hex: String = self.request(method, params).await?;
        Ok(quantity::parse_u64(&hex)?)
    }
}

/// Transaction object for `eth_call`, `eth_estimateGas` and `eth_sendTransaction`.
fn call_to_json(call: &PendingCall, plan: Option<&GasPlan>) -> serde_json::Value {
    let mut tx = serde_json::Map::new();
    tx.insert("from".to_string(), json!(call.from().to_string()));
    if let Some(to) = call.to() {
        tx.insert("to".to_string(), json!(to.to_string()));
    }
    tx.insert("data".to_string(), json!(format_data(call.data())));
    tx.insert("value".to_string(), json!(format_quantity(call.value())));

    if let Some(plan) = plan {
        tx.insert("gas".to_string(), json!(format_quantity(plan.limit() as u128)));
        tx.insert("gasPrice".to_string(), json!(format_quantity(plan.price())));
    }

    serde_json::Value::Object(tx)
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn list_accounts(&self) -> RpcResult<Vec<Address>> {
        self.request("eth_accounts", json!([])).await
    }

    async fn unlock_account(
        &self,
        address: Address,
        passphrase: &str,
        duration: Duration,
    ) -> RpcResult<bool> {
        self.request(
            "personal_unlockAccount",
            json!([address.to_string(), passphrase, duration.as_secs()]),
        )
        .await
    }

    async fn lock_account(&self, address: Address) -> RpcResult<bool> {
        self.request("personal_lockAccount", json!([address.to_string()]))
            .await
    }

    async fn gas_price(&self) -> RpcResult<u128> {
        let hex: String = self.request("eth_gasPrice", json!([])).await?;
        Ok(quantity::parse_u128(&hex)?)
    }

    async fn estimate_gas(&self, call: &PendingCall) -> RpcResult<u64> {
        self.request_u64("eth_estimateGas", json!([call_to_json(call, None)]))
            .await
    }

    async fn call(&self, call: &PendingCall) -> RpcResult<Vec<u8>> {
        let hex: String = self
            .request("eth_call", json!([call_to_json(call, None), "latest"]))
            .await?;
        Ok(quantity::parse_data(&hex)?)
    }

    async fn send_transaction(&self, call: &PendingCall, plan: &GasPlan) -> RpcResult<Hash> {
        self.request(
            "eth_sendTransaction",
            json!([call_to_json(call, Some(plan))]),
        )
        .await
    }

    async fn transaction_receipt(&self, hash: &Hash) -> RpcResult<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await
    }

    async fn pending_transaction_count(&self) -> RpcResult<u64> {
        self.request_u64(
            "eth_getBlockTransactionCountByNumber",
            json!(["pending"]),
        )
        .await
    }

    async fn is_mining(&self) -> RpcResult<bool> {
        self.request("eth_mining", json!([])).await
    }

    async fn start_mining(&self, threads: u32) -> RpcResult<()> {
        let _: serde_json::Value = self.request("miner_start", json!([threads])).await?;
        Ok(())
    }

    async fn stop_mining(&self) -> RpcResult<()> {
        let _: serde_json::Value = self.request("miner_stop", json!([])).await?;
        Ok(())
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.request_u64("eth_blockNumber", json!([])).await
    }

    async fn subscribe(&self, kind: FilterKind) -> RpcResult<Subscription> {
        let ws_url = self.ws_url.as_deref().ok_or_else(|| {
            RpcError::Subscription("no websocket endpoint configured".to_string())
        })?;
        subscriptions::open(ws_url, kind, SUBSCRIPTION_BUFFER).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Address {
        Address::from_bytes([0x11; 20])
    }

    #[test]
    fn test_client_creation() {
        let client = HttpNodeClient::new("http://localhost:8545", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url(), "http://localhost:8545");
        assert!(client.ws_url.is_none());
    }

    #[test]
    fn test_deploy_json_has_no_to() {
        let call = PendingCall::deploy(sender(), vec![0x60, 0x80]);
        let json = call_to_json(&call, None);

        assert!(json.get("to").is_none());
        assert_eq!(json["data"], "0x6080");
        assert_eq!(json["value"], "0x0");
        assert!(json.get("gas").is_none());
    }

    #[test]
    fn test_send_json_carries_gas_plan() {
        let target = Address::from_bytes([0x22; 20]);
        let call = PendingCall::method(sender(), target, "storeKey", vec![0xab]);
        let plan = GasPlan::for_call(&call, 1_000_000_000, 21_000);
        let json = call_to_json(&call, Some(&plan));

        assert_eq!(json["to"], target.to_string());
        assert_eq!(json["from"], sender().to_string());
        assert_eq!(json["gas"], "0x5208");
        assert_eq!(json["gasPrice"], "0x3b9aca00");
    }

    #[test]
    fn test_null_result_decodes_as_none() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        let receipt: Option<TransactionReceipt> = serde_json::from_value(response.result).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn test_error_response_is_parsed() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"could not decrypt key with given password"}}"#,
        )
        .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("decrypt"));
    }

    #[tokio::test]
    async fn test_subscribe_without_ws_endpoint() {
        let client = HttpNodeClient::new("http://localhost:8545", Duration::from_secs(5)).unwrap();
        let err = client.subscribe(FilterKind::Latest).await.unwrap_err();
        assert!(matches!(err, RpcError::Subscription(_)));
    }
}
