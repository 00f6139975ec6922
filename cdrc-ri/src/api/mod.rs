//! HTTP surface of the receiver

pub mod health;

pub use health::health_routes;
