use crate::{
    domain::{ClientId, ServerFrame},
    error::{Result, ServerError},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use warp::ws::Message;

pub type ClientSender = mpsc::UnboundedSender<Message>;

#[derive(Clone)]
pub struct Client {
    pub id: ClientId,
    pub sender: ClientSender,
    pub connected_at: Instant,
}

impl Client {
    pub fn new(id: ClientId, sender: ClientSender) -> Self {
        Self {
            id,
            sender,
            connected_at: Instant::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Live client connections, keyed by connection id. The relay refers to
/// clients only by id and looks them up here when sending.
#[derive(Default)]
pub struct ClientManager {
    clients: Arc<RwLock<HashMap<ClientId, Client>>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_client(&self, id: ClientId, sender: ClientSender) -> usize {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&id) {
            warn!("Client {} already exists, replacing", id);
        }

        clients.insert(id.clone(), Client::new(id.clone(), sender));
        info!("Client {} connected. Total clients: {}", id, clients.len());
        clients.len()
    }

    pub async fn remove_client(&self, id: &str) -> usize {
        let mut clients = self.clients.write().await;

        match clients.remove(id) {
            Some(client) => info!(
                "Client {} disconnected after {}s. Total clients: {}",
                id,
                client.connected_at.elapsed().as_secs(),
                clients.len()
            ),
            None => debug!("Client {} was not in the list", id),
        }

        clients.len()
    }

    pub async fn send_to_client(&self, id: &str, message: Message) -> Result<()> {
        let clients = self.clients.read().await;

        let client = clients
            .get(id)
            .filter(|client| client.is_open())
            .ok_or_else(|| ServerError::ClientDisconnected { id: id.to_string() })?;

        client
            .sender
            .send(message)
            .map_err(|_| ServerError::ClientDisconnected { id: id.to_string() })
    }

    pub async fn send_text(&self, id: &str, text: &str) -> Result<()> {
        self.send_to_client(id, Message::text(text)).await
    }

    pub async fn send_frame(&self, id: &str, frame: &ServerFrame) -> Result<()> {
        let text = frame.to_json()?;
        self.send_text(id, &text).await
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.clients
            .read()
            .await
            .get(id)
            .is_some_and(Client::is_open)
    }

    pub async fn get_client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn get_client_ids(&self) -> Vec<ClientId> {
        self.clients.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_manager() {
        let manager = ClientManager::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(manager.add_client("client1".to_string(), tx).await, 1);
        assert!(manager.is_connected("client1").await);

        manager.send_text("client1", "test message").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.to_str().unwrap(), "test message");

        assert_eq!(manager.remove_client("client1").await, 0);
        assert_eq!(manager.get_client_count().await, 0);
        assert!(manager.get_client_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_missing_or_closed_client() {
        let manager = ClientManager::new();

        let err = manager.send_text("ghost", "hello").await.unwrap_err();
        assert!(matches!(err, ServerError::ClientDisconnected { .. }));

        let (tx, rx) = mpsc::unbounded_channel();
        manager.add_client("client1".to_string(), tx).await;
        drop(rx);

        assert!(!manager.is_connected("client1").await);
        assert!(manager.send_text("client1", "hello").await.is_err());
    }

    #[tokio::test]
    async fn test_send_frame_serializes() {
        let manager = ClientManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_client("client1".to_string(), tx).await;

        manager
            .send_frame("client1", &ServerFrame::connection_ack())
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(msg.to_str().unwrap()).unwrap();
        assert_eq!(value["type"], "connection_ack");
    }
}
