use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, get_service, post};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::aggregate::chart::ChartPeriod;
use crate::aggregate::snapshot::{MetricsSnapshot, StreamConfig};
use crate::app::AppContext;
use crate::cache::StreamState;

pub fn create_router(ctx: AppContext) -> Router {
    let static_dir = ctx.config.http.static_dir.clone();

    let asset_service = get_service(ServeDir::new(static_dir));

    let api = Router::new()
        .route("/snapshot", get(get_snapshot).delete(delete_snapshot))
        .route("/refetch", post(post_refetch))
        .route("/notify", post(post_notify));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/api/v1", api)
        .fallback_service(asset_service)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Query shape shared by the snapshot endpoints.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    scope: String,
    /// Comma-separated counter families.
    #[serde(default = "StreamQuery::default_types")]
    types: String,
    #[serde(default)]
    period: ChartPeriod,
}

impl StreamQuery {
    fn default_types() -> String {
        "items,scoreResults".to_string()
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            scope_id: self.scope.clone(),
            record_types: self
                .types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            period: self.period,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum SnapshotResponse {
    Loading,
    Ready {
        snapshot: MetricsSnapshot,
        refreshing: bool,
    },
    Error {
        error: String,
    },
}

impl From<StreamState> for SnapshotResponse {
    fn from(state: StreamState) -> Self {
        match state {
            StreamState::Loading => SnapshotResponse::Loading,
            StreamState::Ready {
                snapshot,
                refreshing,
            } => SnapshotResponse::Ready {
                snapshot: (*snapshot).clone(),
                refreshing,
            },
            StreamState::Failed { error } => SnapshotResponse::Error { error },
        }
    }
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    let is_ready = ctx.cache.is_ready(Duration::from_secs(180)).await;

    if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Attach the caller to a metrics stream and return its current state.
///
/// The first call for a fingerprint starts the background refresh; later
/// calls share the cached entry and are served whatever is known right
/// now, including last-known-good data while a refresh runs.
async fn get_snapshot(
    State(ctx): State<AppContext>,
    Query(query): Query<StreamQuery>,
) -> Json<SnapshotResponse> {
    let config = query.stream_config();
    let state = ctx.cache.attach(&config).await;
    Json(state.into())
}

/// Detach one consumer from a metrics stream.
async fn delete_snapshot(
    State(ctx): State<AppContext>,
    Query(query): Query<StreamQuery>,
) -> StatusCode {
    let config = query.stream_config();
    ctx.cache.detach(&config.fingerprint()).await;
    StatusCode::NO_CONTENT
}

/// Explicit cache-bypassing refresh.
async fn post_refetch(
    State(ctx): State<AppContext>,
    Query(query): Query<StreamQuery>,
) -> StatusCode {
    let config = query.stream_config();
    ctx.cache.refetch(&config).await;
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeNotice {
    scope_id: String,
    record_type: String,
}

/// Webhook for the counter store's optional push channel. Absence of a
/// notifier degrades the service to pure interval polling.
async fn post_notify(
    State(ctx): State<AppContext>,
    Json(notice): Json<ChangeNotice>,
) -> StatusCode {
    ctx.cache
        .notify_change(&notice.scope_id, &notice.record_type)
        .await;
    StatusCode::ACCEPTED
}
