//! HTTP admin surface of the online node.
//!
//! Operators drive the coordinator through this API: inspect and hand over
//! operations, feed back processed ones, start DKG rounds, and propose
//! signings. Every response is a `{error_message, result}` envelope; 4xx for
//! malformed input, 5xx for internal failures.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use coldsign_types::{Message, Operation};

use crate::client::Client;
use crate::error::ClientError;

type Shared = Arc<Mutex<Client>>;
type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn success(result: impl serde::Serialize) -> ApiResult {
    Ok(Json(json!({ "result": result })))
}

fn failure(status: StatusCode, message: impl ToString) -> ApiResult {
    Err((
        status,
        Json(json!({ "error_message": message.to_string(), "result": null })),
    ))
}

fn status_for(err: &ClientError) -> StatusCode {
    match err {
        ClientError::UnknownOperation(_)
        | ClientError::UnknownRound(_)
        | ClientError::OperationMismatch(_)
        | ClientError::Serialization(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the admin router over the shared client.
pub fn router(client: Shared) -> Router {
    Router::new()
        .route("/getUsername", get(get_username))
        .route("/getPubKey", get(get_pub_key))
        .route("/getOperations", get(get_operations))
        .route("/getOperation/:operation_id", get(get_operation))
        .route("/getSignatures/:dkg_round_id", get(get_signatures))
        .route("/getSignatureByID/:dkg_round_id/:signing_id", get(get_signature_by_id))
        .route("/getFSMDump/:dkg_round_id", get(get_fsm_dump))
        .route("/sendMessage", post(send_message))
        .route("/handleProcessedOperation", post(handle_processed_operation))
        .route("/startDKG", post(start_dkg))
        .route("/proposeSignMessage", post(propose_sign_message))
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

/// Serve the admin API until the listener closes.
pub async fn serve(client: Shared, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(client)).await
}

async fn get_username(State(client): State<Shared>) -> ApiResult {
    let username = client.lock().username().to_owned();
    success(username)
}

async fn get_pub_key(State(client): State<Shared>) -> ApiResult {
    let pub_key = client.lock().public_key();
    success(hex::encode(pub_key))
}

async fn get_operations(State(client): State<Shared>) -> ApiResult {
    match client.lock().operations() {
        Ok(operations) => success(operations),
        Err(err) => failure(status_for(&err), err),
    }
}

async fn get_operation(
    State(client): State<Shared>,
    Path(operation_id): Path<String>,
) -> ApiResult {
    match client.lock().operation(&operation_id) {
        Ok(Some(operation)) => success(operation),
        Ok(None) => failure(StatusCode::NOT_FOUND, format!("operation {operation_id} not found")),
        Err(err) => failure(status_for(&err), err),
    }
}

async fn get_signatures(
    State(client): State<Shared>,
    Path(dkg_round_id): Path<String>,
) -> ApiResult {
    match client.lock().signatures(&dkg_round_id) {
        Ok(signatures) => success(signatures),
        Err(err) => failure(status_for(&err), err),
    }
}

async fn get_signature_by_id(
    State(client): State<Shared>,
    Path((dkg_round_id, signing_id)): Path<(String, String)>,
) -> ApiResult {
    match client.lock().signatures(&dkg_round_id) {
        Ok(mut signatures) => match signatures.remove(&signing_id) {
            Some(list) => success(list),
            None => failure(StatusCode::NOT_FOUND, format!("signature {signing_id} not found")),
        },
        Err(err) => failure(status_for(&err), err),
    }
}

async fn get_fsm_dump(
    State(client): State<Shared>,
    Path(dkg_round_id): Path<String>,
) -> ApiResult {
    match client.lock().fsm_dump(&dkg_round_id) {
        Ok(Some(dump)) => match serde_json::from_slice::<serde_json::Value>(&dump) {
            Ok(value) => success(value),
            Err(err) => failure(StatusCode::INTERNAL_SERVER_ERROR, err),
        },
        Ok(None) => failure(StatusCode::NOT_FOUND, format!("round {dkg_round_id} not found")),
        Err(err) => failure(status_for(&err), err),
    }
}

async fn send_message(State(client): State<Shared>, Json(message): Json<Message>) -> ApiResult {
    match client.lock().send_message(message) {
        Ok(offset) => success(offset),
        Err(err) => failure(status_for(&err), err),
    }
}

async fn handle_processed_operation(
    State(client): State<Shared>,
    Json(operation): Json<Operation>,
) -> ApiResult {
    match client.lock().handle_processed_operation(operation) {
        Ok(()) => success("ok"),
        Err(err) => failure(status_for(&err), err),
    }
}

async fn start_dkg(State(client): State<Shared>, body: Bytes) -> ApiResult {
    match client.lock().start_dkg(&body) {
        Ok(round_id) => success(round_id),
        Err(err) => failure(status_for(&err), err),
    }
}

#[derive(Deserialize)]
struct ProposeSignRequest {
    dkg_round_id: String,
    data: Vec<u8>,
}

async fn propose_sign_message(
    State(client): State<Shared>,
    Json(request): Json<ProposeSignRequest>,
) -> ApiResult {
    match client
        .lock()
        .propose_sign_message(&request.dkg_round_id, request.data)
    {
        Ok(signing_id) => success(signing_id),
        Err(err) => failure(status_for(&err), err),
    }
}
