//! Shared building blocks for the coredump receiver and the clustering service
//!
//! Both binaries open the same root folder and SQLite database, so the
//! configuration model, schema, typed records and the repository used by the
//! ingest and reconciliation paths all live here.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
