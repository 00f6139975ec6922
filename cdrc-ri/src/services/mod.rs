//! Ingest services

pub mod artifact_store;
pub mod dispatch_queue;
pub mod dispatcher;
pub mod mqtt;
pub mod parser;
pub mod payload;
pub mod receiver;
pub mod registration;
pub mod session_store;
pub mod topic;

pub use artifact_store::ArtifactStore;
pub use dispatch_queue::DispatchQueue;
pub use dispatcher::{DispatchOutcome, IngestionDispatcher, UnregisteredReason};
pub use parser::{DockerReportParser, ReportParser};
pub use payload::PayloadNormalizer;
pub use receiver::{CoredumpReceiver, Handled};
pub use session_store::SessionStore;
