//! REST API handlers.
//!
//! Pool views combine the configured spec, the last checkpoint from the
//! `StateStore` and the latest pushed sample. All JSON bodies use the
//! `{ success, data, error }` envelope.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::debug;

use nodepool_core::{LoadSample, PoolSpec, PoolState, Timestamp};
use nodepool_metrics::PushRejected;

use crate::ApiState;

/// Default and maximum number of events returned by the events route.
const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 256;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn pool_not_found() -> axum::response::Response {
    error_response("pool not found", StatusCode::NOT_FOUND).into_response()
}

// ── Pools ──────────────────────────────────────────────────────

/// A pool as seen through the API.
#[derive(Debug, Serialize)]
pub struct PoolView {
    pub spec: PoolSpec,
    /// Last checkpointed reconciler state; absent before the first tick.
    pub state: Option<PoolState>,
    pub saved_at: Option<Timestamp>,
    pub latest_sample: Option<LoadSample>,
}

async fn pool_view(state: &ApiState, spec: &PoolSpec) -> Result<PoolView, String> {
    let checkpoint = state
        .store
        .get_pool_state(&spec.id)
        .map_err(|e| e.to_string())?;
    let latest_sample = state.samples.latest(&spec.id).await;
    Ok(PoolView {
        spec: spec.clone(),
        saved_at: checkpoint.as_ref().map(|c| c.saved_at),
        state: checkpoint.map(|c| c.state),
        latest_sample,
    })
}

/// GET /api/v1/pools
pub async fn list_pools(State(state): State<ApiState>) -> impl IntoResponse {
    let mut views = Vec::with_capacity(state.pools.len());
    for spec in state.pools.iter() {
        match pool_view(&state, spec).await {
            Ok(view) => views.push(view),
            Err(e) => {
                return error_response(&e, StatusCode::INTERNAL_SERVER_ERROR).into_response();
            }
        }
    }
    ApiResponse::ok(views).into_response()
}

/// GET /api/v1/pools/{id}
pub async fn get_pool(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(spec) = state.pool(&id) else {
        return pool_not_found();
    };
    match pool_view(&state, spec).await {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => error_response(&e, StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Samples ────────────────────────────────────────────────────

/// Sample push body. A missing timestamp means "now".
#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    pub timestamp: Option<Timestamp>,
    pub utilization: f64,
    #[serde(default)]
    pub pending_work_units: u64,
}

/// POST /api/v1/pools/{id}/samples
pub async fn push_sample(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SampleRequest>,
) -> impl IntoResponse {
    if state.pool(&id).is_none() {
        return pool_not_found();
    }
    if !req.utilization.is_finite() || !(0.0..=1.0).contains(&req.utilization) {
        return error_response(
            &format!("utilization {} is outside [0, 1]", req.utilization),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    let now = epoch_secs();
    let sample = LoadSample {
        timestamp: req.timestamp.unwrap_or(now),
        utilization: req.utilization,
        pending_work_units: req.pending_work_units,
    };
    if sample.is_from_future(now) {
        return error_response(
            &format!("timestamp {} is ahead of now {now}", sample.timestamp),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    match state.samples.push(&id, sample).await {
        Ok(()) => {
            debug!(
                pool = %id,
                timestamp = sample.timestamp,
                utilization = sample.utilization,
                pending_work = sample.pending_work_units,
                "sample accepted"
            );
            (StatusCode::ACCEPTED, ApiResponse::ok(sample)).into_response()
        }
        Err(PushRejected::UnknownPool) => pool_not_found(),
        Err(e @ PushRejected::OutOfOrder { .. }) => {
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
    }
}

// ── Events ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/pools/{id}/events
pub async fn list_events(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    if state.pool(&id).is_none() {
        return pool_not_found();
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    match state.store.list_events(&id, limit) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshots = state.metrics.snapshot().await;
    let body = nodepool_metrics::render_prometheus(&snapshots);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn epoch_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use nodepool_core::{Outcome, ScaleIntent, ScaleReason};
    use nodepool_metrics::{ReconcilerMetrics, SampleRegistry};
    use nodepool_state::{ScaleEvent, StateStore};

    fn test_pool(id: &str) -> PoolSpec {
        PoolSpec {
            id: id.to_string(),
            min_size: 2,
            max_size: 6,
            desired_size: 2,
            scale_up_cooldown_secs: 60,
            scale_down_cooldown_secs: 300,
            target_utilization: 0.7,
            assumed_node_capacity: 10,
        }
    }

    async fn test_state() -> ApiState {
        let samples = SampleRegistry::new();
        let metrics = ReconcilerMetrics::new();
        let pools = vec![test_pool("general"), test_pool("gpu")];
        for pool in &pools {
            samples.register(&pool.id).await;
            metrics.register(&pool.id).await;
        }
        ApiState {
            store: StateStore::open_in_memory().unwrap(),
            pools: Arc::new(pools),
            samples,
            metrics,
        }
    }

    fn sample_request(timestamp: Option<Timestamp>, utilization: f64) -> SampleRequest {
        SampleRequest {
            timestamp,
            utilization,
            pending_work_units: 0,
        }
    }

    #[tokio::test]
    async fn list_pools_without_checkpoints() {
        let state = test_state().await;
        let resp = list_pools(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_known_and_unknown_pool() {
        let state = test_state().await;
        state
            .store
            .put_pool_state("general", &PoolState::new(3), 1000)
            .unwrap();

        let resp = get_pool(State(state.clone()), Path("general".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_pool(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn push_sample_is_stored() {
        let state = test_state().await;
        let resp = push_sample(
            State(state.clone()),
            Path("general".to_string()),
            Json(sample_request(Some(1000), 0.9)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let latest = state.samples.latest("general").await.unwrap();
        assert_eq!(latest.timestamp, 1000);
        assert_eq!(latest.utilization, 0.9);
    }

    #[tokio::test]
    async fn push_sample_defaults_timestamp_to_now() {
        let state = test_state().await;
        let before = epoch_secs();
        push_sample(
            State(state.clone()),
            Path("general".to_string()),
            Json(sample_request(None, 0.5)),
        )
        .await;

        let latest = state.samples.latest("general").await.unwrap();
        assert!(latest.timestamp >= before);
    }

    #[tokio::test]
    async fn push_sample_rejects_bad_utilization() {
        let state = test_state().await;
        for utilization in [1.5, -0.1, f64::NAN] {
            let resp = push_sample(
                State(state.clone()),
                Path("general".to_string()),
                Json(sample_request(Some(1000), utilization)),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert!(state.samples.latest("general").await.is_none());
    }

    #[tokio::test]
    async fn push_sample_rejects_future_timestamp() {
        let state = test_state().await;
        // Milliseconds sent where seconds are expected.
        let millis = epoch_secs() * 1000;
        let resp = push_sample(
            State(state.clone()),
            Path("general".to_string()),
            Json(sample_request(Some(millis), 0.5)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.samples.latest("general").await.is_none());

        // A correctly dated sample is still accepted afterwards.
        let resp = push_sample(
            State(state.clone()),
            Path("general".to_string()),
            Json(sample_request(Some(epoch_secs()), 0.5)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn push_sample_unknown_pool() {
        let state = test_state().await;
        let resp = push_sample(
            State(state),
            Path("nope".to_string()),
            Json(sample_request(Some(1000), 0.5)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn push_sample_out_of_order_conflicts() {
        let state = test_state().await;
        push_sample(
            State(state.clone()),
            Path("general".to_string()),
            Json(sample_request(Some(2000), 0.5)),
        )
        .await;

        let resp = push_sample(
            State(state),
            Path("general".to_string()),
            Json(sample_request(Some(1000), 0.5)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn list_events_for_pool() {
        let state = test_state().await;
        state
            .store
            .append_event(&ScaleEvent {
                pool_id: "general".to_string(),
                at: 1000,
                intent: ScaleIntent::up(1, ScaleReason::HighUtilization),
                from_size: 2,
                target_size: 3,
                outcome: Outcome::Succeeded { new_size: 3 },
            })
            .unwrap();

        let resp = list_events(
            State(state.clone()),
            Path("general".to_string()),
            Query(EventsQuery { limit: Some(10) }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_events(
            State(state),
            Path("nope".to_string()),
            Query(EventsQuery::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state().await;
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
