//! In-process stand-in for the subset of the Consul KV HTTP API the client uses.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Clone)]
struct MockState {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    token: Option<String>,
}

pub struct MockConsul {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockConsul {
    pub async fn spawn() -> Self {
        Self::start(None).await
    }

    pub async fn spawn_with_token(token: &str) -> Self {
        Self::start(Some(token.to_string())).await
    }

    async fn start(token: Option<String>) -> Self {
        let state = MockState {
            data: Arc::new(Mutex::new(BTreeMap::new())),
            token,
        };
        let app = Router::new().fallback(handle_kv).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockConsul { addr, handle }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }
}

impl Drop for MockConsul {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn encode_pair(key: &str, value: &[u8]) -> Value {
    let encoded = if value.is_empty() {
        Value::Null
    } else {
        Value::String(STANDARD.encode(value))
    };
    json!({
        "Key": key,
        "Value": encoded,
        "Flags": 0,
        "CreateIndex": 1,
        "ModifyIndex": 1,
        "LockIndex": 0,
    })
}

async fn handle_kv(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(expected) = &state.token {
        let supplied = headers.get("X-Consul-Token").and_then(|v| v.to_str().ok());
        if supplied != Some(expected.as_str()) {
            return (StatusCode::FORBIDDEN, "Permission denied").into_response();
        }
    }

    let Some(key) = uri.path().strip_prefix("/v1/kv/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(
        uri.query().unwrap_or_default().as_bytes(),
    )
    .into_owned()
    .collect();
    let recurse = params.contains_key("recurse");

    let mut data = state.data.lock();
    match method {
        Method::GET => {
            let pairs: Vec<Value> = data
                .iter()
                .filter(|(k, _)| if recurse { k.starts_with(key) } else { *k == key })
                .map(|(k, v)| encode_pair(k, v))
                .collect();
            if pairs.is_empty() {
                StatusCode::NOT_FOUND.into_response()
            } else {
                Json(pairs).into_response()
            }
        }
        Method::PUT => {
            if params.get("cas").map(String::as_str) == Some("0") && data.contains_key(key) {
                return Json(false).into_response();
            }
            data.insert(key.to_string(), body.to_vec());
            Json(true).into_response()
        }
        Method::DELETE => {
            if recurse {
                data.retain(|k, _| !k.starts_with(key));
            } else {
                data.remove(key);
            }
            Json(true).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
