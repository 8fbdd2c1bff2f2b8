use crate::{
    domain::{ClientId, ClientRequest, ServerFrame},
    error::{ErrorContext, ErrorSeverity, ServerError},
    relay::EventRelay,
    websocket::client_manager::{ClientManager, ClientSender},
};
use futures_util::{SinkExt, StreamExt};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};

/// One client connection: parses inbound frames and routes them to the relay.
/// Frames are handled one at a time, in arrival order.
pub struct Session {
    client_id: ClientId,
    clients: Arc<ClientManager>,
    relay: Arc<EventRelay>,
}

impl Session {
    /// Registers the client and queues the `connection_ack` frame.
    pub async fn open(
        client_id: ClientId,
        sender: ClientSender,
        clients: Arc<ClientManager>,
        relay: Arc<EventRelay>,
    ) -> Self {
        clients.add_client(client_id.clone(), sender).await;

        let session = Self {
            client_id,
            clients,
            relay,
        };
        session.send(&ServerFrame::connection_ack()).await;
        session
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns `Break` when the client asked to close.
    pub async fn handle_message(&self, msg: Message) -> ControlFlow<()> {
        if msg.is_text() {
            let text = msg.to_str().unwrap_or_default();
            debug!("Received text from {}: {}", self.client_id, text);
            self.handle_text(text).await;
        } else if msg.is_binary() {
            debug!(
                "Ignoring binary frame from {}: {} bytes",
                self.client_id,
                msg.as_bytes().len()
            );
        } else if msg.is_ping() {
            debug!("Received ping from {}", self.client_id);
            if let Err(e) = self
                .clients
                .send_to_client(&self.client_id, Message::pong(msg.into_bytes()))
                .await
            {
                debug!("Failed to answer ping from {}: {}", self.client_id, e);
            }
        } else if msg.is_close() {
            info!("Client {} requested close", self.client_id);
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(())
    }

    pub async fn handle_text(&self, text: &str) {
        let request = match ClientRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejected frame from {}: {}", self.client_id, e);
                self.send(&ServerFrame::error(rejection_message(e))).await;
                return;
            }
        };

        match request {
            ClientRequest::Subscribe(target) => {
                self.relay
                    .handle_subscribe_request(
                        &self.client_id,
                        &target.contract_address,
                        &target.event_name,
                    )
                    .await
            }
            ClientRequest::Unsubscribe(target) => {
                self.relay
                    .handle_unsubscribe_request(
                        &self.client_id,
                        &target.contract_address,
                        &target.event_name,
                    )
                    .await
            }
            ClientRequest::Unknown(kind) => {
                debug!("Unknown message type {} from {}", kind, self.client_id);
                self.send(&ServerFrame::unknown_type(kind)).await;
            }
        }
    }

    /// Unwinds the client's subscriptions and forgets the connection.
    pub async fn close(self) {
        info!("Client {} disconnecting", self.client_id);
        self.relay.handle_client_disconnect(&self.client_id).await;
        self.clients.remove_client(&self.client_id).await;
    }

    async fn send(&self, frame: &ServerFrame) {
        if let Err(e) = self.clients.send_frame(&self.client_id, frame).await {
            ErrorContext::new(format!("send to {}", self.client_id))
                .with_severity(ErrorSeverity::Info)
                .log(&e);
        }
    }
}

fn rejection_message(err: ServerError) -> String {
    match err {
        ServerError::MalformedFrame(message) | ServerError::MalformedRequestPayload(message) => {
            message
        }
        other => other.to_string(),
    }
}

pub async fn handle_connection(
    ws: WebSocket,
    client_id: ClientId,
    clients: Arc<ClientManager>,
    relay: Arc<EventRelay>,
) {
    info!("New WebSocket connection: {}", client_id);

    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let session = Session::open(client_id, tx, clients, relay).await;

    // Drains queued frames to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(msg) => {
                if session.handle_message(msg).await.is_break() {
                    break;
                }
            }
            Err(e) => {
                warn!("WebSocket error for client {}: {}", session.client_id(), e);
                break;
            }
        }
    }

    send_task.abort();
    session.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubscriptionKey;
    use crate::services::{AbiStore, InMemoryAbiStore};
    use crate::testing::{erc20_descriptor, MockChainProvider};
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    const ADDR: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    async fn session(id: &str) -> (Session, UnboundedReceiver<Message>, Arc<MockChainProvider>) {
        let provider = Arc::new(MockChainProvider::new());
        let store = Arc::new(InMemoryAbiStore::new());
        store.put_abi(ADDR, erc20_descriptor()).await.unwrap();

        let clients = Arc::new(ClientManager::new());
        let relay = EventRelay::new(store, provider.clone(), clients.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::open(id.to_string(), tx, clients, relay).await;
        (session, rx, provider)
    }

    fn next_frame(rx: &mut UnboundedReceiver<Message>) -> Value {
        let msg = rx.try_recv().unwrap();
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    fn subscribe_text(kind: &str, address: &str, event: &str) -> String {
        json!({
            "type": kind,
            "payload": { "contractAddress": address, "eventName": event }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_open_sends_connection_ack() {
        let (session, mut rx, _) = session("a").await;

        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "connection_ack");
        assert!(session.clients.is_connected("a").await);
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_session_open() {
        let (session, mut rx, _) = session("a").await;
        next_frame(&mut rx);

        session.handle_text("{oops").await;
        assert_eq!(
            next_frame(&mut rx),
            json!({ "type": "error", "message": "Invalid JSON." })
        );

        session
            .handle_text(&subscribe_text("SUBSCRIBE", ADDR, "Transfer"))
            .await;
        assert_eq!(next_frame(&mut rx)["type"], "SUBSCRIPTION_ACK");
    }

    #[tokio::test]
    async fn test_frame_without_type() {
        let (session, mut rx, _) = session("a").await;
        next_frame(&mut rx);

        session.handle_text("[1, 2, 3]").await;
        assert_eq!(
            next_frame(&mut rx),
            json!({ "type": "error", "message": "Invalid message format." })
        );
    }

    #[tokio::test]
    async fn test_missing_payload_fields_are_not_routed() {
        let (session, mut rx, provider) = session("a").await;
        next_frame(&mut rx);

        session
            .handle_text(&json!({ "type": "SUBSCRIBE", "payload": { "eventName": "Transfer" } }).to_string())
            .await;

        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(
            frame["message"],
            "SUBSCRIBE requires payload.contractAddress and payload.eventName."
        );
        assert_eq!(provider.attach_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let (session, mut rx, provider) = session("a").await;
        next_frame(&mut rx);

        session
            .handle_text(&subscribe_text("SUBSCRIBE", "0x1234", "Transfer"))
            .await;

        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["message"], "Invalid contract address: 0x1234");
        assert_eq!(provider.attach_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_acknowledged() {
        let (session, mut rx, _) = session("a").await;
        next_frame(&mut rx);

        session.handle_text(r#"{"type":"PING"}"#).await;
        assert_eq!(
            next_frame(&mut rx),
            json!({ "type": "message_ack", "info": "Unknown type.", "receivedType": "PING" })
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_route() {
        let (session, mut rx, _) = session("a").await;
        next_frame(&mut rx);

        session
            .handle_text(&subscribe_text("UNSUBSCRIBE", ADDR, "Transfer"))
            .await;

        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "UNSUBSCRIPTION_ACK");
        assert_eq!(frame["payload"]["status"], "not_subscribed_or_already_removed");
    }

    #[tokio::test]
    async fn test_binary_and_close_messages() {
        let (session, mut rx, _) = session("a").await;
        next_frame(&mut rx);

        assert!(session
            .handle_message(Message::binary(vec![1, 2, 3]))
            .await
            .is_continue());
        assert!(rx.try_recv().is_err());

        assert!(session.handle_message(Message::close()).await.is_break());
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (session, mut rx, _) = session("a").await;
        next_frame(&mut rx);

        assert!(session
            .handle_message(Message::ping(vec![7]))
            .await
            .is_continue());
        let msg = rx.try_recv().unwrap();
        assert!(msg.is_pong());
        assert_eq!(msg.as_bytes(), &[7]);
    }

    #[tokio::test]
    async fn test_close_unwinds_subscriptions() {
        let (session, mut rx, provider) = session("a").await;
        next_frame(&mut rx);

        session
            .handle_text(&subscribe_text("SUBSCRIBE", ADDR, "Transfer"))
            .await;
        session
            .handle_text(&subscribe_text("SUBSCRIBE", ADDR, "Approval"))
            .await;

        let relay = session.relay.clone();
        let clients = session.clients.clone();
        session.close().await;

        assert!(relay.directory().client_keys("a").await.is_empty());
        assert_eq!(
            relay
                .registry()
                .ref_count(&SubscriptionKey::new(ADDR, "Transfer"))
                .await,
            None
        );
        assert_eq!(provider.attached_count(), 0);
        assert_eq!(clients.get_client_count().await, 0);
    }
}
