//! HTTP surface of the clustering service

pub mod health;

pub use health::health_routes;
