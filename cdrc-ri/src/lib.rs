//! cdrc-ri library interface
//!
//! Receiver and ingest side: coredump fragments arrive over MQTT, are
//! reassembled per device, written to disk and registered in the shared
//! database with a decoded report.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{IngestError, IngestResult, ParserError, ProtocolError};

use axum::Router;
use chrono::{DateTime, Utc};
use services::SessionStore;
use std::sync::Arc;

/// State shared with HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self {
            sessions,
            startup_time: Utc::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new().merge(api::health_routes()).with_state(state)
}
