//! Local stand-in for the GifFun API and the object storage upload host.
//!
//! Every API route answers with the `{"status", "msg"}` envelope plus a few
//! echo fields so tests can see exactly what the client sent.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Token the upload route rejects.
pub const BAD_TOKEN: &str = "bad-token";

/// How long `GET /slow` waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

/// A file accepted by the form upload at `POST /`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub size: usize,
}

#[derive(Clone, Default)]
pub struct ServerState {
    pub cached_hits: Arc<AtomicU64>,
    pub uploads: Arc<RwLock<HashMap<String, StoredFile>>>,
}

pub fn app() -> Router {
    app_with_state(ServerState::default())
}

pub fn app_with_state(state: ServerState) -> Router {
    Router::new()
        .route("/init", get(init))
        .route("/echo", post(echo).put(echo).delete(echo))
        .route("/status/{code}", get(status))
        .route("/malformed", get(malformed))
        .route("/empty", get(empty))
        .route("/cached", get(cached))
        .route("/slow", get(slow))
        .route("/", post(upload))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

fn echoed_headers(headers: &HeaderMap) -> Value {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    json!({
        "user_agent": get("user-agent"),
        "appv": get("appv"),
        "apps": get("apps"),
        "content_type": get("content-type"),
    })
}

async fn init(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({
        "status": 0,
        "msg": "ok",
        "params": params,
        "headers": echoed_headers(&headers),
    }))
}

async fn echo(
    method: Method,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Json<Value> {
    Json(json!({
        "status": 0,
        "msg": method.as_str(),
        "params": params,
        "headers": echoed_headers(&headers),
    }))
}

async fn status(Path(code): Path<u16>) -> Response {
    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (
        code,
        Json(json!({ "status": code.as_u16(), "msg": "forced status" })),
    )
        .into_response()
}

async fn malformed() -> (StatusCode, &'static str) {
    (StatusCode::OK, "{\"status\": 0, \"msg\": ")
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn cached(State(state): State<ServerState>) -> Response {
    let hits = state.cached_hits.fetch_add(1, Ordering::SeqCst) + 1;
    (
        [("cache-control", "public, max-age=60")],
        Json(json!({ "status": 0, "msg": "fresh", "hits": hits })),
    )
        .into_response()
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(SLOW_DELAY).await;
    Json(json!({ "status": 0, "msg": "slow" }))
}

async fn upload(State(state): State<ServerState>, mut multipart: Multipart) -> Response {
    let mut token = None;
    let mut key = None;
    let mut size = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return e.into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "token" => token = field.text().await.ok(),
            "key" => key = field.text().await.ok(),
            "file" => match field.bytes().await {
                Ok(bytes) => size = Some(bytes.len()),
                Err(e) => return e.into_response(),
            },
            _ => {}
        }
    }

    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return upload_error(StatusCode::UNAUTHORIZED, "token not specified");
    };
    if token == BAD_TOKEN {
        return upload_error(StatusCode::UNAUTHORIZED, "bad token");
    }
    let Some(size) = size else {
        return upload_error(StatusCode::BAD_REQUEST, "file is required");
    };
    let key = key
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    debug!(%key, size, "stored upload");
    state.uploads.write().await.insert(
        key.clone(),
        StoredFile {
            key: key.clone(),
            size,
        },
    );
    let req_id = Uuid::new_v4().simple().to_string();
    (
        [("x-reqid", req_id)],
        Json(json!({ "key": key, "hash": format!("h{size}"), "size": size })),
    )
        .into_response()
}

fn upload_error(code: StatusCode, message: &str) -> Response {
    let req_id = Uuid::new_v4().simple().to_string();
    (code, [("x-reqid", req_id)], Json(json!({ "error": message }))).into_response()
}
