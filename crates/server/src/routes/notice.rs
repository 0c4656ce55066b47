// crates/server/src/routes/notice.rs
//! Browser-facing side of the notification bus.
//!
//! - GET /notice/stream - SSE stream of one client's notices
//! - POST /notice/types - Open/close message types for the acting user

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use toolbox_core::OnlineUserInfo;

use crate::routes::ActingUser;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    Xml,
}

impl WireFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("xml") => Self::Xml,
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypesRequest {
    /// Types to open. An empty list reopens every known type.
    pub open: Option<Vec<String>>,
    /// Types to close. An empty list forgets every type.
    pub close: Option<Vec<String>>,
}

/// SSE streams currently attached to each `(user, client id)`. Reconnecting
/// tabs may briefly hold two streams on one conduit.
#[derive(Debug, Default)]
pub struct AttachedStreams {
    counts: Mutex<HashMap<(String, String), usize>>,
}

impl AttachedStreams {
    fn attach(&self, user: &str, client_id: &str) {
        *self
            .lock()
            .entry((user.to_string(), client_id.to_string()))
            .or_default() += 1;
    }

    /// Returns true when the last stream of the client went away.
    fn detach(&self, user: &str, client_id: &str) -> bool {
        let mut counts = self.lock();
        let key = (user.to_string(), client_id.to_string());
        match counts.get_mut(&key) {
            Some(n) if *n > 1 => {
                *n -= 1;
                false
            }
            _ => {
                counts.remove(&key);
                true
            }
        }
    }

    pub fn count(&self, user: &str, client_id: &str) -> usize {
        self.lock()
            .get(&(user.to_string(), client_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), usize>> {
        self.counts.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned locking attached streams: {e}");
            e.into_inner()
        })
    }
}

/// Detaches one SSE stream when its response is dropped, closing the client
/// on the bus once no stream is left.
struct ClientGuard {
    state: Arc<AppState>,
    user: String,
    client_id: String,
}

impl ClientGuard {
    fn attach(state: Arc<AppState>, user: &str, client_id: &str) -> Self {
        state.streams.attach(user, client_id);
        Self {
            state,
            user: user.to_string(),
            client_id: client_id.to_string(),
        }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if self.state.streams.detach(&self.user, &self.client_id) {
            self.state.context.bus().close_client(&self.user, &self.client_id);
        }
    }
}

/// GET /api/notice/stream?clientID=&mode=json
///
/// The first event (`client`) carries the client id to use for later
/// requests; every following `message` event is one notice.
async fn stream_notices(
    State(state): State<Arc<AppState>>,
    ActingUser(user): ActingUser,
    Query(query): Query<StreamQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let bus = state.context.bus();
    let client = match query.client_id.as_deref().filter(|id| !id.is_empty()) {
        Some(client_id) => bus.recv(&user, client_id),
        None => bus.open_client(&user),
    };
    let format = WireFormat::parse(query.mode.as_deref());
    let guard = ClientGuard::attach(Arc::clone(&state), &user, client.client_id());

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("client").data(client.client_id()));

        while let Some(msg) = client.recv().await {
            let encoded = match format {
                WireFormat::Json => msg.to_json(),
                WireFormat::Xml => msg.to_xml(),
            };
            match encoded {
                Ok(data) => yield Ok(Event::default().event("message").data(data)),
                Err(e) => tracing::warn!(user = %user, error = %e, "Dropping unencodable notice"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/notice/types
async fn update_types(
    State(state): State<Arc<AppState>>,
    ActingUser(user): ActingUser,
    Json(req): Json<TypesRequest>,
) -> Json<OnlineUserInfo> {
    let bus = state.context.bus();
    if let Some(open) = req.open {
        bus.open_message(&user, open);
    }
    if let Some(close) = req.close {
        bus.close_message(&user, close);
    }
    let info = bus.get_ok(&user).unwrap_or_else(|| OnlineUserInfo {
        user: user.clone(),
        types: Vec::new(),
        clients: Vec::new(),
    });
    Json(info)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notice/stream", get(stream_notices))
        .route("/notice/types", post(update_types))
}
