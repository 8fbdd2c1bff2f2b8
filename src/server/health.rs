use super::{with_state, AppState};
use std::convert::Infallible;
use warp::{
    reply::{self, Response},
    Filter, Rejection, Reply,
};

pub fn route(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let path = state.config.health.path.trim_start_matches('/').to_string();

    warp::path(path)
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .and_then(get_health)
}

async fn get_health(state: AppState) -> Result<Response, Infallible> {
    let stats = state.relay.stats().await;
    let registered_abis = state.abi_store.addresses().await.len();
    let now = chrono::Utc::now();

    let response = serde_json::json!({
        "status": "healthy",
        "timestamp": now.to_rfc3339(),
        "uptime_secs": (now - state.started_at).num_seconds(),
        "services": {
            "websocket": {
                "connected_clients": stats.connected_clients,
                "subscribed_clients": stats.subscribed_clients,
            },
            "relay": {
                "subscription_keys": stats.subscription_keys,
                "live_listeners": stats.live_listeners,
                "cached_handles": stats.cached_handles,
                "registered_abis": registered_abis,
            },
        },
    });

    Ok(reply::json(&response).into_response())
}
