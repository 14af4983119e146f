//! nodepool-api — REST API for the capacity reconciler.
//!
//! Exposes pool status and scale history from the checkpoint store,
//! accepts pushed load samples, and serves Prometheus metrics.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/pools` | List pools with spec and checkpointed state |
//! | GET | `/api/v1/pools/{id}` | Get one pool |
//! | POST | `/api/v1/pools/{id}/samples` | Push a load sample |
//! | GET | `/api/v1/pools/{id}/events` | Recent scale events |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use nodepool_core::PoolSpec;
use nodepool_metrics::{ReconcilerMetrics, SampleRegistry};
use nodepool_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    /// Configured pools, in configuration order.
    pub pools: Arc<Vec<PoolSpec>>,
    pub samples: SampleRegistry,
    pub metrics: ReconcilerMetrics,
}

impl ApiState {
    fn pool(&self, id: &str) -> Option<&PoolSpec> {
        self.pools.iter().find(|p| p.id == id)
    }
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/pools", get(handlers::list_pools))
        .route("/pools/{id}", get(handlers::get_pool))
        .route("/pools/{id}/samples", post(handlers::push_sample))
        .route("/pools/{id}/events", get(handlers::list_events))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
