// Solana JSON-RPC client: `getBalance` over HTTP and `accountSubscribe` over
// WebSocket, both reporting the slot the value was observed at.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::{future, SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;
use wallet_sync_core::{Address, NetworkClient, UpdateStream, ValueUpdate};

use crate::chain::Endpoints;

const BALANCE_REQUEST_ID: u64 = 1;
const SUBSCRIBE_REQUEST_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed RPC response: {0}")]
    Malformed(String),

    #[error("subscription socket closed by server")]
    Closed,
}

/// [`NetworkClient`] for one cluster. Balances are in lamports; the ordering
/// token is the context slot.
#[derive(Debug, Clone)]
pub struct SolanaRpcClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    commitment: String,
}

impl SolanaRpcClient {
    pub fn new(endpoints: Endpoints, commitment: impl Into<String>) -> Self {
        SolanaRpcClient {
            http: reqwest::Client::new(),
            endpoints,
            commitment: commitment.into(),
        }
    }
}

pub(crate) fn balance_request(address: &str, commitment: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": BALANCE_REQUEST_ID,
        "method": "getBalance",
        "params": [address, { "commitment": commitment }],
    })
}

pub(crate) fn subscribe_request(address: &str, commitment: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "accountSubscribe",
        "params": [address, { "encoding": "base64", "commitment": commitment }],
    })
}

fn rpc_error(response: &Value) -> Option<RpcError> {
    let err = response.get("error")?;
    Some(RpcError::Rpc {
        code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    })
}

/// `{"result":{"context":{"slot":N},"value":LAMPORTS}}`
pub(crate) fn parse_balance_response(response: &Value) -> Result<ValueUpdate<u64>, RpcError> {
    if let Some(err) = rpc_error(response) {
        return Err(err);
    }
    let result = response
        .get("result")
        .ok_or_else(|| RpcError::Malformed("missing result".into()))?;
    let slot = context_slot(result)?;
    let lamports = result
        .get("value")
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::Malformed("balance value is not an integer".into()))?;
    Ok(ValueUpdate::new(slot, lamports))
}

/// The reply to `accountSubscribe`, carrying the subscription id. Returns
/// `None` for any other message.
pub(crate) fn parse_subscribe_ack(message: &Value) -> Option<Result<u64, RpcError>> {
    if message.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
        return None;
    }
    if let Some(err) = rpc_error(message) {
        return Some(Err(err));
    }
    Some(
        message
            .get("result")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Malformed("subscription id is not an integer".into())),
    )
}

/// An `accountNotification` for `subscription`. Returns `None` for any other
/// message. A `null` account value means the account was closed, reported as
/// zero lamports.
pub(crate) fn parse_account_notification(
    message: &Value,
    subscription: u64,
) -> Option<Result<ValueUpdate<u64>, RpcError>> {
    if message.get("method").and_then(Value::as_str) != Some("accountNotification") {
        return None;
    }
    let params = message.get("params")?;
    if params.get("subscription").and_then(Value::as_u64) != Some(subscription) {
        return None;
    }
    let Some(result) = params.get("result") else {
        return Some(Err(RpcError::Malformed("notification without result".into())));
    };
    let slot = match context_slot(result) {
        Ok(slot) => slot,
        Err(e) => return Some(Err(e)),
    };
    let lamports = match result.get("value") {
        Some(Value::Null) | None => Some(0),
        Some(account) => account.get("lamports").and_then(Value::as_u64),
    };
    Some(
        lamports
            .map(|lamports| ValueUpdate::new(slot, lamports))
            .ok_or_else(|| RpcError::Malformed("account lamports is not an integer".into())),
    )
}

fn context_slot(result: &Value) -> Result<u64, RpcError> {
    result
        .get("context")
        .and_then(|c| c.get("slot"))
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::Malformed("missing context.slot".into()))
}

/// Turn the frames of an open subscription into balance updates. Frames that
/// are not notifications for `subscription` are skipped; a close frame or a
/// socket error becomes an `Err` item.
pub(crate) fn notification_stream<St>(
    frames: St,
    subscription: u64,
) -> impl Stream<Item = anyhow::Result<ValueUpdate<u64>>>
where
    St: Stream<Item = Result<Message, WsError>>,
{
    frames.filter_map(move |frame| {
        future::ready(match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(msg) => parse_account_notification(&msg, subscription)
                    .map(|r| r.map_err(anyhow::Error::from)),
                Err(e) => Some(Err(anyhow!("invalid JSON from subscription socket: {e}"))),
            },
            Ok(Message::Close(_)) => Some(Err(RpcError::Closed.into())),
            Ok(_) => None,
            Err(e) => Some(Err(anyhow::Error::from(e).context("subscription socket error"))),
        })
    })
}

#[async_trait]
impl NetworkClient for SolanaRpcClient {
    type Subject = Address;
    type Value = u64;

    async fn fetch_current_value(&self, address: &Address) -> anyhow::Result<ValueUpdate<u64>> {
        let response: Value = self
            .http
            .post(&self.endpoints.http)
            .json(&balance_request(address.as_str(), &self.commitment))
            .send()
            .await
            .context("getBalance request failed")?
            .error_for_status()
            .context("getBalance returned an error status")?
            .json()
            .await
            .context("getBalance response was not JSON")?;

        Ok(parse_balance_response(&response)?)
    }

    async fn subscribe_to_updates(&self, address: &Address) -> anyhow::Result<UpdateStream<u64>> {
        let (mut socket, _) = tokio_tungstenite::connect_async(self.endpoints.ws.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.endpoints.ws))?;

        let request = subscribe_request(address.as_str(), &self.commitment);
        socket
            .send(Message::Text(request.to_string().into()))
            .await
            .context("failed to send accountSubscribe")?;

        let subscription = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg: Value = serde_json::from_str(text.as_str())
                        .context("invalid JSON from subscription socket")?;
                    if let Some(ack) = parse_subscribe_ack(&msg) {
                        break ack?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => bail!(RpcError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("subscription handshake failed"),
            }
        };

        debug!(%address, subscription, "accountSubscribe confirmed");
        Ok(notification_stream(socket, subscription).boxed())
    }
}
