use super::{error_reply, with_state, AppState};
use crate::{
    domain::{is_valid_address, AbiDescriptor},
    error::{ErrorContext, ErrorSeverity, ServerError},
    services::calls::{call_read_only, STANDARD_GETTERS},
};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use tracing::{info, warn};
use warp::{
    http::StatusCode,
    reply::{self, Response},
    Filter, Rejection, Reply,
};

const MAX_BODY_BYTES: u64 = 1024 * 1024;

type HandlerResult = std::result::Result<Response, Infallible>;

pub fn routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let test = warp::path!("api" / "test")
        .and(warp::get())
        .and_then(backend_test);

    let latest_block = warp::path!("api" / "latest-block")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(latest_block);

    let store_abi = warp::path!("api" / "contract" / "abi")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(store_abi);

    let get_abi = warp::path!("api" / "contract" / "abi" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_abi);

    let contract_data = warp::path!("api" / "contract" / "data" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(contract_data);

    let call_function = warp::path!("api" / "contract" / "call" / String)
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state))
        .and_then(call_function);

    test.or(latest_block)
        .unify()
        .or(store_abi)
        .unify()
        .or(get_abi)
        .unify()
        .or(contract_data)
        .unify()
        .or(call_function)
        .unify()
}

/// HTTP status for a failed request, keyed off the error's wire code.
fn status_for(err: &ServerError) -> StatusCode {
    match err {
        ServerError::AbiNotFound { .. } => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn from_error(err: &ServerError, message: &str) -> Response {
    error_reply(
        status_for(err),
        err.code(),
        message,
        Some(Value::String(err.to_string())),
    )
}

async fn backend_test() -> HandlerResult {
    info!("GET /api/test called");
    Ok(reply::json(&json!({ "message": "Backend is running!" })).into_response())
}

async fn latest_block(state: AppState) -> HandlerResult {
    match state.provider.block_number().await {
        Ok(number) => Ok(
            reply::json(&json!({ "latestBlockNumber": number.to_string() })).into_response(),
        ),
        Err(e) => {
            ErrorContext::new("latest_block").log(&e);
            Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "BLOCK_FETCH_FAILED",
                "Failed to fetch latest block number.",
                Some(Value::String(e.to_string())),
            ))
        }
    }
}

async fn store_abi(body: Value, state: AppState) -> HandlerResult {
    let address = body
        .get("address")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let abi = body.get("abi").filter(|v| !v.is_null());

    let (Some(address), Some(abi)) = (address, abi) else {
        warn!("POST /api/contract/abi missing address or ABI");
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "MISSING_PARAMETERS",
            "Contract address and ABI are required.",
            None,
        ));
    };

    if !is_valid_address(address) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "INVALID_ADDRESS",
            format!("Invalid contract address: {}", address),
            None,
        ));
    }

    let descriptor = match AbiDescriptor::parse(abi) {
        Ok(descriptor) => descriptor,
        Err(ServerError::MalformedRequestPayload(message)) => {
            warn!("Invalid ABI format for {}: {}", address, message);
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                "INVALID_ABI_FORMAT",
                message,
                None,
            ));
        }
        Err(e) => {
            warn!("Invalid ABI for {}: {}", address, e);
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                "INVALID_ABI_STRUCTURE",
                "Invalid ABI format or structure. Ensure it is a valid JSON ABI.",
                Some(Value::String(e.to_string())),
            ));
        }
    };

    if let Err(e) = state.abi_store.put_abi(address, descriptor).await {
        ErrorContext::new(format!("put_abi {}", address)).log(&e);
        return Ok(from_error(&e, "Failed to store ABI."));
    }

    Ok(reply::json(&json!({ "message": "ABI stored successfully.", "address": address }))
        .into_response())
}

async fn get_abi(address: String, state: AppState) -> HandlerResult {
    match state.abi_store.get_abi(&address).await {
        Some(abi) => Ok(reply::json(&json!({ "address": address, "abi": abi.raw() })).into_response()),
        None => Ok(error_reply(
            StatusCode::NOT_FOUND,
            "ABI_NOT_FOUND",
            "ABI not found for this address.",
            None,
        )),
    }
}

/// Queries the standard ERC-20 getters the ABI declares.
async fn contract_data(address: String, state: AppState) -> HandlerResult {
    let Some(abi) = state.abi_store.get_abi(&address).await else {
        return Ok(error_reply(
            StatusCode::NOT_FOUND,
            "ABI_NOT_FOUND",
            "ABI not found for this address. Please submit ABI first.",
            None,
        ));
    };

    let handle = match state.provider.make_contract_handle(&address, &abi) {
        Ok(handle) => handle,
        Err(e) => return Ok(from_error(&e, "Failed to interact with contract.")),
    };

    let mut data = Map::new();
    let mut errors = Map::new();

    for name in STANDARD_GETTERS {
        if abi.read_only_getter(name).is_none() {
            continue;
        }

        match call_read_only(state.provider.as_ref(), &handle, name, &[]).await {
            Ok(mut values) => {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Array(values)
                };
                data.insert(name.to_string(), value);
            }
            Err(e) => {
                ErrorContext::new(format!("{} on {}", name, address))
                    .with_severity(ErrorSeverity::Warning)
                    .log(&e);
                errors.insert(name.to_string(), Value::String(e.to_string()));
            }
        }
    }

    if data.is_empty() && !errors.is_empty() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "NO_DATA_FETCHED",
            "Failed to fetch any standard data. Contract might not implement common functions or calls failed.",
            Some(Value::Object(errors)),
        ));
    }

    let mut body = json!({ "address": address, "data": data });
    if !errors.is_empty() {
        body["errors"] = Value::Object(errors);
    }

    Ok(reply::json(&body).into_response())
}

async fn call_function(address: String, body: Value, state: AppState) -> HandlerResult {
    let Some(function_name) = body
        .get("functionName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    else {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "MISSING_PARAMETERS",
            "functionName is required.",
            None,
        ));
    };

    let args = match body.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(args)) => args.clone(),
        Some(_) => {
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENTS",
                "args must be an array.",
                None,
            ))
        }
    };

    let Some(abi) = state.abi_store.get_abi(&address).await else {
        return Ok(error_reply(
            StatusCode::NOT_FOUND,
            "ABI_NOT_FOUND",
            "ABI not found for this address. Please submit ABI first.",
            None,
        ));
    };

    let handle = match state.provider.make_contract_handle(&address, &abi) {
        Ok(handle) => handle,
        Err(e) => return Ok(from_error(&e, "Failed to interact with contract.")),
    };

    match call_read_only(state.provider.as_ref(), &handle, function_name, &args).await {
        Ok(result) => Ok(reply::json(&json!({
            "address": address,
            "functionName": function_name,
            "result": result,
        }))
        .into_response()),
        Err(e) => {
            ErrorContext::new(format!("call {} on {}", function_name, address))
                .with_severity(ErrorSeverity::Warning)
                .log(&e);
            Ok(from_error(&e, &format!("Call to {} failed.", function_name)))
        }
    }
}
