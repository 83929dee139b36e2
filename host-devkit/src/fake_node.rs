/*!
Fake inference node serving `/health` on an ephemeral local port

Used to exercise the real `HttpProbe` without the inference binary.
*/

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct NodeState {
    health_hits: AtomicUsize,
    /// Requests answered 503 before the node reports healthy
    warmup_remaining: AtomicUsize,
    status_override: AtomicU16,
}

pub struct FakeNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FakeNode {
    /// Healthy from the first request
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with_warmup(0).await
    }

    /// Answers 503 to the first `warmup` health requests
    pub async fn spawn_with_warmup(warmup: usize) -> Result<Self> {
        let state = Arc::new(NodeState::default());
        state.warmup_remaining.store(warmup, Ordering::SeqCst);

        let app = Router::new()
            .route("/health", get(health))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(e) = server.await {
                debug!(error = %e, "Fake node server ended with error");
            }
        });

        debug!(%addr, warmup, "Fake node listening");
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

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn health_hits(&self) -> usize {
        self.state.health_hits.load(Ordering::SeqCst)
    }

    /// Every following health request gets this status
    pub fn respond_with(&self, status: StatusCode) {
        self.state.status_override.store(status.as_u16(), Ordering::SeqCst);
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

async fn health(State(state): State<Arc<NodeState>>) -> impl IntoResponse {
    state.health_hits.fetch_add(1, Ordering::SeqCst);

    let forced = state.status_override.load(Ordering::SeqCst);
    if forced != 0 {
        let status = StatusCode::from_u16(forced).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(serde_json::json!({ "status": "forced" })));
    }

    let warming = state
        .warmup_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if warming {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "loading" })),
        );
    }

    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" })))
}
