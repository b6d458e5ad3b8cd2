//! WebSocket session handling.
//!
//! One socket per device. The writer task drains the connection's outbound
//! queue; the reader loop feeds client frames to the relay. Whichever side
//! finishes first ends the session and starts the grace period.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::relay::Connection;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.config.max_frame_size())
        .on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let Connection {
        handle,
        peer,
        mut outbound,
    } = state.lifecycle.connect(addr.ip()).await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                debug!(handle = %handle, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let relay = state.relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => relay.handle_text(handle, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(handle = %handle, error = %e, "WebSocket receive failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    debug!(handle = %handle, peer = %peer.id, "WebSocket session ended");
    state.lifecycle.disconnect(handle).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use futures::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use peerdrop_shared::protocol::{ClientMessage, ServerMessage};
    use peerdrop_shared::types::{OutgoingPayload, PeerId, PeerRecord};

    use crate::api::{serve_on, AppState};
    use crate::clock::Clock;
    use crate::config::ServerConfig;
    use crate::lifecycle::Lifecycle;
    use crate::relay::Relay;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server(config: ServerConfig) -> (String, AppState) {
        let relay = Arc::new(Relay::new(&config, Clock::new()));
        let lifecycle = Arc::new(Lifecycle::new(relay.clone(), &config));
        let state = AppState {
            relay,
            lifecycle,
            config: Arc::new(config),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_on(state.clone(), listener));
        (format!("ws://{addr}/ws"), state)
    }

    async fn recv(client: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if let WsMessage::Text(text) = frame {
                return ServerMessage::from_text(&text).unwrap();
            }
        }
    }

    /// Skip frames until one matches.
    async fn recv_until<T>(
        client: &mut Client,
        mut pick: impl FnMut(ServerMessage) -> Option<T>,
    ) -> T {
        loop {
            if let Some(found) = pick(recv(client).await) {
                return found;
            }
        }
    }

    async fn send(client: &mut Client, message: ClientMessage) {
        client
            .send(WsMessage::Text(message.to_text().unwrap()))
            .await
            .unwrap();
    }

    async fn identity(client: &mut Client) -> PeerRecord {
        match recv(client).await {
            ServerMessage::Identity { peer } => peer,
            other => panic!("expected identity first, got {other:?}"),
        }
    }

    async fn fetch_peers(client: &mut Client) -> Vec<PeerRecord> {
        send(client, ClientMessage::FetchPeers).await;
        recv_until(client, |m| match m {
            ServerMessage::PresenceSnapshot { peers, .. } => Some(peers),
            _ => None,
        })
        .await
    }

    #[tokio::test]
    async fn test_end_to_end_exchange() {
        let mut config = ServerConfig::default();
        config.grace_period = Duration::from_millis(300);
        let (url, state) = start_server(config).await;

        let (mut a, _) = connect_async(url.as_str()).await.unwrap();
        let a_peer = identity(&mut a).await;
        assert!(a_peer.display_name.starts_with("User-"));
        assert_eq!(a_peer.address, "127.0.0.1");

        let (mut b, _) = connect_async(url.as_str()).await.unwrap();
        let b_peer = identity(&mut b).await;

        // A can see both peers.
        let ids: Vec<PeerId> = recv_until(&mut a, |m| match m {
            ServerMessage::PresenceSnapshot { peers, .. } if peers.len() == 2 => {
                Some(peers.into_iter().map(|p| p.id).collect())
            }
            _ => None,
        })
        .await;
        assert_eq!(ids, vec![a_peer.id, b_peer.id]);

        // A deposits a file for B.
        let content = vec![0x89u8; 1024];
        send(
            &mut a,
            ClientMessage::DepositPayload {
                target_id: b_peer.id,
                payload: OutgoingPayload {
                    name: "photo.png".into(),
                    mime_type: "image/png".into(),
                    content: content.clone().into(),
                },
            },
        )
        .await;

        let pushed = recv_until(&mut b, |m| match m {
            ServerMessage::PayloadPushed { payload } => Some(payload),
            _ => None,
        })
        .await;
        assert_eq!(pushed.name, "photo.png");
        assert_eq!(pushed.sender_id, a_peer.id);

        let mailbox = recv_until(&mut b, |m| match m {
            ServerMessage::MailboxUpdated { payloads, .. } => Some(payloads),
            _ => None,
        })
        .await;
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox[0].size_bytes, 1024);
        assert_eq!(&mailbox[0].content[..], &content[..]);

        recv_until(&mut a, |m| match m {
            ServerMessage::PayloadDeposited { recipient_id, .. } => {
                assert_eq!(recipient_id, b_peer.id);
                Some(())
            }
            _ => None,
        })
        .await;

        // B leaves: still visible during the grace period, gone after.
        b.close(None).await.unwrap();
        let during = recv_until(&mut a, |m| match m {
            ServerMessage::PresenceSnapshot { peers, .. }
                if peers.iter().any(|p| {
                    p.id == b_peer.id
                        && p.connection_state
                            == peerdrop_shared::types::ConnectionState::GracePeriod
                }) =>
            {
                Some(peers)
            }
            _ => None,
        })
        .await;
        assert_eq!(during.len(), 2);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let after = fetch_peers(&mut a).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, a_peer.id);

        // The payload outlives B's connection.
        assert_eq!(state.relay.fetch(&b_peer.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let (url, _state) = start_server(ServerConfig::default()).await;
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        identity(&mut client).await;

        client
            .send(WsMessage::Text("{\"type\":\"nope\"}".into()))
            .await
            .unwrap();
        recv_until(&mut client, |m| match m {
            ServerMessage::Error { .. } => Some(()),
            _ => None,
        })
        .await;

        // Content must be valid base64.
        let bogus = format!(
            r#"{{"type":"deposit-payload","targetId":"{}","payload":{{"name":"x","content":"{}!"}}}}"#,
            PeerId::new(),
            STANDARD.encode(b"abc")
        );
        client.send(WsMessage::Text(bogus)).await.unwrap();
        recv_until(&mut client, |m| match m {
            ServerMessage::Error { .. } => Some(()),
            _ => None,
        })
        .await;
    }
}
