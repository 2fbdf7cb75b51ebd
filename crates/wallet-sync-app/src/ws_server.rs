// Local WebSocket endpoint for the wallet bridge: whatever process can see the
// user's wallets (a browser extension, a test harness) connects here and
// reports wallet snapshots and account choices.

use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::protocol::BridgeMessage;

/// Events emitted by the bridge server to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected { addr: String },
    Disconnected { addr: String },
    Message(BridgeMessage),
}

/// How a bridge connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The client closed or the socket failed; keep accepting.
    Client,
    /// The event loop is gone; stop serving.
    ReceiverGone,
}

/// Bind the bridge listener on `127.0.0.1:{port}`. Port 0 picks a free port.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(addr = %listener.local_addr()?, "wallet bridge listening");
    Ok(listener)
}

/// Accept bridge clients one at a time and forward their messages through
/// `tx`. Returns when `tx`'s receiver is dropped.
pub async fn serve(listener: TcpListener, tx: mpsc::Sender<BridgeEvent>) -> anyhow::Result<()> {
    loop {
        let (tcp, peer) = listener.accept().await?;
        let addr = peer.to_string();

        let socket = match tokio_tungstenite::accept_async(tcp).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(%addr, error = %e, "bridge handshake failed");
                continue;
            }
        };
        info!(%addr, "wallet bridge connected");

        if tx.send(BridgeEvent::Connected { addr: addr.clone() }).await.is_err() {
            return Ok(());
        }

        // The bridge never needs replies; only the read half is used.
        let (_write, read) = socket.split();
        let end = process_message_stream(read, &tx, &addr).await;

        info!(%addr, "wallet bridge disconnected");
        if end == StreamEnd::ReceiverGone
            || tx.send(BridgeEvent::Disconnected { addr }).await.is_err()
        {
            return Ok(());
        }
    }
}

/// Parse text frames from one client into [`BridgeMessage`]s and forward
/// them. Frames that do not parse are logged and skipped.
pub async fn process_message_stream<St>(
    mut frames: St,
    tx: &mpsc::Sender<BridgeEvent>,
    addr: &str,
) -> StreamEnd
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => match BridgeMessage::parse(text.as_str()) {
                Ok(msg) => {
                    debug!(%addr, ?msg, "bridge message");
                    if tx.send(BridgeEvent::Message(msg)).await.is_err() {
                        return StreamEnd::ReceiverGone;
                    }
                }
                Err(e) => warn!(%addr, error = %e, "ignoring malformed bridge message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%addr, error = %e, "bridge socket error");
                break;
            }
        }
    }
    StreamEnd::Client
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, SinkExt};

    fn frames(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    fn text(s: &str) -> Result<Message, WsError> {
        Ok(Message::Text(s.into()))
    }

    #[tokio::test]
    async fn valid_messages_forwarded_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let end = process_message_stream(
            frames(vec![
                text(r#"{"type":"CLEAR_SELECTION"}"#),
                text(r#"{"type":"SELECT_CHAIN","chain":"solana:testnet"}"#),
            ]),
            &tx,
            "test",
        )
        .await;

        assert_eq!(end, StreamEnd::Client);
        assert_eq!(
            rx.recv().await.unwrap(),
            BridgeEvent::Message(BridgeMessage::ClearSelection)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            BridgeEvent::Message(BridgeMessage::SelectChain {
                chain: "solana:testnet".into()
            })
        );
    }

    #[tokio::test]
    async fn malformed_messages_are_skipped() {
        let (tx, mut rx) = mpsc::channel(16);
        process_message_stream(
            frames(vec![
                text("garbage"),
                text(r#"{"type":"NOPE"}"#),
                text(r#"{"type":"CLEAR_SELECTION"}"#),
            ]),
            &tx,
            "test",
        )
        .await;
        drop(tx);

        assert_eq!(
            rx.recv().await.unwrap(),
            BridgeEvent::Message(BridgeMessage::ClearSelection)
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(16);
        process_message_stream(
            frames(vec![
                Ok(Message::Close(None)),
                text(r#"{"type":"CLEAR_SELECTION"}"#),
            ]),
            &tx,
            "test",
        )
        .await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn socket_error_stops_processing() {
        let (tx, _rx) = mpsc::channel(16);
        let end = process_message_stream(
            frames(vec![
                Err(WsError::ConnectionClosed),
                text(r#"{"type":"CLEAR_SELECTION"}"#),
            ]),
            &tx,
            "test",
        )
        .await;
        assert_eq!(end, StreamEnd::Client);
    }

    #[tokio::test]
    async fn dropped_receiver_reports_receiver_gone() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let end = process_message_stream(
            frames(vec![text(r#"{"type":"CLEAR_SELECTION"}"#)]),
            &tx,
            "test",
        )
        .await;
        assert_eq!(end, StreamEnd::ReceiverGone);
    }

    #[tokio::test]
    async fn serve_accepts_a_real_client() {
        let listener = bind(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let server = tokio::spawn(serve(listener, tx));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            BridgeEvent::Connected { .. }
        ));

        client
            .send(Message::Text(
                r#"{"type":"SELECT_ACCOUNT","wallet":"Phantom","address":"A1"}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            BridgeEvent::Message(BridgeMessage::SelectAccount {
                wallet: "Phantom".into(),
                address: "A1".into()
            })
        );

        client.close(None).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            BridgeEvent::Disconnected { .. }
        ));

        server.abort();
    }
}
