pub mod api;
pub mod health;

use crate::{
    config::Config,
    relay::EventRelay,
    services::{AbiStore, ChainProvider},
    websocket::{handle_connection, ClientManager},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;
use warp::{
    http::StatusCode,
    reply::{self, Response},
    Filter, Rejection, Reply,
};

/// Everything a route handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clients: Arc<ClientManager>,
    pub relay: Arc<EventRelay>,
    pub abi_store: Arc<dyn AbiStore>,
    pub provider: Arc<dyn ChainProvider>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: Config,
        abi_store: Arc<dyn AbiStore>,
        provider: Arc<dyn ChainProvider>,
    ) -> Self {
        let clients = Arc::new(ClientManager::new());
        let relay = EventRelay::new(abi_store.clone(), provider.clone(), clients.clone());

        Self {
            config: Arc::new(config),
            clients,
            relay,
            abi_store,
            provider,
            started_at: Utc::now(),
        }
    }
}

pub fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// WebSocket upgrade, JSON API and health routes behind CORS.
pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let ws_route = warp::path(state.config.server.ws_path.clone())
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(state.clone()))
        .map(|ws: warp::ws::Ws, state: AppState| {
            ws.on_upgrade(move |socket| {
                let client_id = format!("client-{}", Uuid::new_v4());
                handle_connection(socket, client_id, state.clients, state.relay)
            })
        });

    ws_route
        .or(api::routes(state.clone()))
        .or(health::route(state.clone()))
        .with(cors(&state.config))
        .recover(handle_rejection)
}

fn cors(config: &Config) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    if config.allows_any_origin() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(config.server.cors_origins.iter().map(String::as_str))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn error_reply(
    status: StatusCode,
    code: &str,
    error: impl Into<String>,
    details: Option<Value>,
) -> Response {
    let body = ErrorBody {
        error_code: code.to_string(),
        error: error.into(),
        details,
    };
    reply::with_status(reply::json(&body), status).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let response = if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found.", None)
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        error_reply(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST_BODY",
            "Request body must be valid JSON.",
            Some(Value::String(e.to_string())),
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            "Request body is too large.",
            None,
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        error_reply(
            StatusCode::LENGTH_REQUIRED,
            "LENGTH_REQUIRED",
            "Content-Length header is required.",
            None,
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            "Method not allowed.",
            None,
        )
    } else {
        tracing::warn!("Unhandled rejection: {:?}", err);
        error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "Unhandled request error.",
            None,
        )
    };

    Ok(response)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::InMemoryAbiStore;
    use crate::testing::{erc20_descriptor, transfer_event, MockChainProvider};
    use alloy::primitives::{Address, U256};
    use serde_json::json;

    pub(crate) const ADDR: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    pub(crate) fn test_state() -> (AppState, Arc<MockChainProvider>) {
        let config = Config::from_lookup(|key| match key {
            "RPC_URL" => Some("http://localhost:8545".to_string()),
            _ => None,
        })
        .unwrap();
        let provider = Arc::new(MockChainProvider::new());
        let state = AppState::new(config, Arc::new(InMemoryAbiStore::new()), provider.clone());
        (state, provider)
    }

    fn frame(msg: warp::ws::Message) -> Value {
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (state, _) = test_state();
        let res = warp::test::request()
            .path("/nope")
            .reply(&routes(state))
            .await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["errorCode"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_websocket_session_end_to_end() {
        let (state, provider) = test_state();
        state.abi_store.put_abi(ADDR, erc20_descriptor()).await.unwrap();
        let relay = state.relay.clone();

        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(state))
            .await
            .expect("handshake");

        assert_eq!(frame(client.recv().await.unwrap())["type"], "connection_ack");

        client
            .send_text(
                json!({
                    "type": "SUBSCRIBE",
                    "payload": { "contractAddress": ADDR, "eventName": "Transfer" }
                })
                .to_string(),
            )
            .await;
        let ack = frame(client.recv().await.unwrap());
        assert_eq!(ack["type"], "SUBSCRIPTION_ACK");
        assert_eq!(ack["payload"]["status"], "subscribed");

        provider
            .fire(
                ADDR,
                "Transfer",
                transfer_event(Address::ZERO, Address::ZERO, U256::from(42)),
            )
            .await;
        let event = frame(client.recv().await.unwrap());
        assert_eq!(event["type"], "EVENT_DATA");
        assert_eq!(event["payload"]["args"]["value"], "42");

        client.send_text("not json").await;
        assert_eq!(
            frame(client.recv().await.unwrap()),
            json!({ "type": "error", "message": "Invalid JSON." })
        );

        drop(client);
        for _ in 0..50 {
            if relay.stats().await.live_listeners == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(relay.stats().await.live_listeners, 0);
        assert!(!provider.is_attached(ADDR, "Transfer"));
    }
}
