//! Database schema, typed records and the repository

pub mod init;
pub mod models;
pub mod repository;
pub mod retry;

pub use init::*;
pub use models::*;
pub use repository::*;
pub use retry::retry_on_lock;
