//! WebSocket push subscriptions.
//!
//! Supports `eth_subscribe` for:
//! - New block headers (`newHeads`)
//! - New pending transactions (`newPendingTransactions`)
//!
//! Each subscription owns one connection and one reader task. The reader
//! forwards notifications in arrival order and, when cancelled, sends
//! `eth_unsubscribe` before closing the socket.

use certchain_types::{quantity, Hash};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::str::FromStr;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::client::{ChainEvent, FilterKind, Subscription};
use crate::error::{RpcError, RpcResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscription ID assigned by the node (hex string).
pub type SubscriptionId = String;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;

/// Connect to `url` and subscribe to `kind`.
pub async fn open(url: &str, kind: FilterKind, capacity: usize) -> RpcResult<Subscription> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "eth_subscribe",
        "params": [kind.as_str()],
    });
    ws.send(Message::Text(request.to_string())).await?;

    let id = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(ack) = parse_ack(&text, SUBSCRIBE_REQUEST_ID) {
                    break ack?;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(RpcError::Subscription(format!(
                    "connection closed before {} was acknowledged",
                    kind.as_str()
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    };
    debug!(subscription = %id, kind = kind.as_str(), "subscribed");

    let (events_tx, events_rx) = mpsc::channel(capacity);
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let task = tokio::spawn(read_events(ws, id, kind, events_tx, cancel_rx));

    Ok(Subscription::with_task(kind, events_rx, cancel_tx, task))
}

async fn read_events(
    mut ws: WsStream,
    id: SubscriptionId,
    kind: FilterKind,
    events: mpsc::Sender<ChainEvent>,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut cancel => break,
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_notification(&text, &id, kind) {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(subscription = %id, "node closed the subscription connection");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(subscription = %id, "subscription connection failed: {}", e);
                    return;
                }
            }
        }
    }

    let request = json!({
        "jsonrpc": "2.0",
        "id": UNSUBSCRIBE_REQUEST_ID,
        "method": "eth_unsubscribe",
        "params": [id],
    });
    if let Err(e) = ws.send(Message::Text(request.to_string())).await {
        debug!(subscription = %id, "unsubscribe not delivered: {}", e);
    }
    let _ = ws.close(None).await;
    debug!(subscription = %id, "unsubscribed");
}

/// Parse the response to our subscribe request.
///
/// Returns `None` for messages that are not the response with `request_id`.
fn parse_ack(text: &str, request_id: u64) -> Option<RpcResult<SubscriptionId>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("id").and_then(|id| id.as_u64()) != Some(request_id) {
        return None;
    }

    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Some(Err(RpcError::node(code, message)));
    }

    Some(
        value
            .get("result")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode("subscribe response without id".to_string())),
    )
}

/// Parse an `eth_subscription` notification for subscription `id`.
fn parse_notification(text: &str, id: &str, kind: FilterKind) -> Option<ChainEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
        return None;
    }

    let params = value.get("params")?;
    if params.get("subscription").and_then(|s| s.as_str()) != Some(id) {
        return None;
    }
    let result = params.get("result")?;

    match kind {
        FilterKind::Latest => {
            let hash = Hash::from_str(result.get("hash")?.as_str()?).ok()?;
            let number = result
                .get("number")
                .and_then(|n| n.as_str())
                .and_then(|n| quantity::parse_u64(n).ok());
            Some(ChainEvent::NewBlock { hash, number })
        }
        FilterKind::Pending => {
            // full-transaction notifications carry an object with a hash field
            let hash = match result {
                serde_json::Value::String(s) => s.as_str(),
                other => other.get("hash")?.as_str()?,
            };
            Some(ChainEvent::PendingTransaction {
                hash: Hash::from_str(hash).ok()?,
            })
        }
    }
}
