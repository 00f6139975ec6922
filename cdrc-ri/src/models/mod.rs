//! In-memory ingest models

pub mod session;

pub use session::{AssembledArtifact, IndexBase, PartOutcome, Session};
