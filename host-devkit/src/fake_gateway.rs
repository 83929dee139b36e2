/*!
Fake chain gateway speaking the JSON API of `GatewayClient`

Keeps one host record in memory, optionally requires a bearer token, and can be
told to fail registration with a given error code.
*/

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct GatewayHost {
    pub registered: bool,
    pub api_url: String,
    pub staked_amount: String,
    pub models: Vec<String>,
    pub price_per_token: Option<u64>,
    pub allowance: String,
}

#[derive(Debug, Default)]
struct GatewayState {
    host: GatewayHost,
    token: Option<String>,
    register_failure: Option<Value>,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<GatewayState>>;

pub struct FakeGateway {
    addr: SocketAddr,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn spawn() -> Result<Self> {
        let state: Shared = Arc::new(Mutex::new(GatewayState::default()));

        let app = Router::new()
            .route("/api/hosts/{addr}", get(host_info))
            .route("/api/hosts/{addr}/status", get(status))
            .route("/api/hosts/{addr}/requirements", get(requirements))
            .route("/api/hosts/{addr}/register", post(register))
            .route("/api/hosts/{addr}/unregister", post(unregister))
            .route("/api/hosts/{addr}/allowance", get(allowance))
            .route("/api/hosts/{addr}/approve", post(approve))
            .route("/api/hosts/{addr}/stake", post(stake))
            .route("/api/hosts/{addr}/api-url", put(update_api_url))
            .route("/api/hosts/{addr}/models", put(update_models))
            .route("/api/hosts/{addr}/pricing", put(update_pricing))
            .route("/api/hosts/{addr}/model-pricing", put(model_pricing))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(e) = server.await {
                debug!(error = %e, "Fake gateway ended with error");
            }
        });

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Reject requests without this bearer token
    pub fn require_token(&self, token: &str) {
        self.state.lock().token = Some(token.to_string());
    }

    /// Registration answers 400 with `{code, message, ...extra}`
    pub fn fail_registration(&self, body: Value) {
        self.state.lock().register_failure = Some(body);
    }

    pub fn host(&self) -> GatewayHost {
        self.state.lock().host.clone()
    }

    /// `METHOD /path` of every request received
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// Log the request and enforce the bearer token
fn admit(state: &Shared, headers: &HeaderMap, request: String) -> Result<(), Response> {
    let mut state = state.lock();
    state.requests.push(request);

    let Some(expected) = &state.token else {
        return Ok(());
    };
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(error(
            StatusCode::UNAUTHORIZED,
            json!({ "code": "UNAUTHORIZED", "message": "missing or invalid gateway token" }),
        ))
    }
}

fn tx(name: &str) -> Response {
    Json(json!({ "transactionHash": format!("0x{}", name) })).into_response()
}

fn info_json(addr: &str, host: &GatewayHost) -> Value {
    json!({
        "address": addr,
        "apiUrl": host.api_url,
        "models": host.models,
        "stakedAmount": host.staked_amount,
        "isActive": host.registered,
        "pricePerToken": host.price_per_token,
    })
}

async fn host_info(State(state): State<Shared>, Path(addr): Path<String>, headers: HeaderMap) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("GET /hosts/{}", addr)) {
        return rejected;
    }
    let host = state.lock().host.clone();
    Json(info_json(&addr, &host)).into_response()
}

async fn status(State(state): State<Shared>, Path(addr): Path<String>, headers: HeaderMap) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("GET /hosts/{}/status", addr)) {
        return rejected;
    }
    let host = state.lock().host.clone();
    Json(json!({
        "isRegistered": host.registered,
        "hostAddress": addr,
        "apiUrl": host.api_url,
        "stakedAmount": host.staked_amount,
    }))
    .into_response()
}

async fn requirements(State(state): State<Shared>, Path(addr): Path<String>, headers: HeaderMap) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("GET /hosts/{}/requirements", addr)) {
        return rejected;
    }
    Json(json!({ "canRegister": true, "errors": [] })).into_response()
}

async fn register(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("POST /hosts/{}/register", addr)) {
        return rejected;
    }

    let mut guard = state.lock();
    if let Some(failure) = guard.register_failure.clone() {
        return error(StatusCode::BAD_REQUEST, failure);
    }

    guard.host.registered = true;
    guard.host.api_url = body["apiUrl"].as_str().unwrap_or_default().to_string();
    guard.host.staked_amount = body["stakeAmount"].as_str().unwrap_or_default().to_string();
    guard.host.models = serde_json::from_value(body["models"].clone()).unwrap_or_default();
    guard.host.price_per_token = body["pricePerToken"].as_u64();

    Json(json!({
        "success": true,
        "transactionHash": "0xregister",
        "hostInfo": info_json(&addr, &guard.host),
    }))
    .into_response()
}

async fn unregister(State(state): State<Shared>, Path(addr): Path<String>, headers: HeaderMap) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("POST /hosts/{}/unregister", addr)) {
        return rejected;
    }
    let mut guard = state.lock();
    guard.host.registered = false;
    guard.host.staked_amount = "0".to_string();
    tx("unregister")
}

async fn allowance(State(state): State<Shared>, Path(addr): Path<String>, headers: HeaderMap) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("GET /hosts/{}/allowance", addr)) {
        return rejected;
    }
    let mut allowance = state.lock().host.allowance.clone();
    if allowance.is_empty() {
        allowance = "0".to_string();
    }
    Json(json!({ "allowance": allowance })).into_response()
}

async fn approve(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("POST /hosts/{}/approve", addr)) {
        return rejected;
    }
    state.lock().host.allowance = body["amount"].as_str().unwrap_or_default().to_string();
    tx("approve")
}

async fn stake(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("POST /hosts/{}/stake", addr)) {
        return rejected;
    }
    let added: f64 = body["amount"].as_str().and_then(|a| a.parse().ok()).unwrap_or(0.0);
    let mut guard = state.lock();
    let current: f64 = guard.host.staked_amount.parse().unwrap_or(0.0);
    guard.host.staked_amount = (current + added).to_string();
    tx("stake")
}

async fn update_api_url(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("PUT /hosts/{}/api-url", addr)) {
        return rejected;
    }
    state.lock().host.api_url = body["apiUrl"].as_str().unwrap_or_default().to_string();
    tx("url")
}

async fn update_models(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("PUT /hosts/{}/models", addr)) {
        return rejected;
    }
    state.lock().host.models = serde_json::from_value(body["models"].clone()).unwrap_or_default();
    tx("models")
}

async fn update_pricing(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("PUT /hosts/{}/pricing", addr)) {
        return rejected;
    }
    state.lock().host.price_per_token = body["pricePerToken"].as_u64();
    tx("pricing")
}

async fn model_pricing(
    State(state): State<Shared>,
    Path(addr): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = admit(&state, &headers, format!("PUT /hosts/{}/model-pricing", addr)) {
        return rejected;
    }
    if body["priceType"] != "usdc" && body["priceType"] != "eth" {
        return error(
            StatusCode::BAD_REQUEST,
            json!({ "code": "INVALID_PRICE_TYPE", "message": "priceType must be usdc or eth" }),
        );
    }
    tx("modelpricing")
}
