//! cdrc-cr library interface
//!
//! Clustering side: periodically snapshots the coredump corpus, has the
//! external clusterer label it, and reconciles the labels with the persisted
//! clusters so cluster ids stay stable across runs.

pub mod api;
pub mod clusterer;
pub mod config;
pub mod error;
pub mod naming;
pub mod offline;
pub mod partition;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod trigger;

pub use crate::error::{ClusterError, ClusterResult, ClustererError, PartitionError};

use axum::Router;
use chrono::{DateTime, Utc};
use service::ClusteringService;
use std::sync::Arc;

/// State shared with HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ClusteringService>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<ClusteringService>) -> Self {
        Self {
            service,
            startup_time: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new().merge(api::health_routes()).with_state(state)
}
