//! service-core: Shared infrastructure for the payment collection services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use mongodb;
pub use tower;
pub use tower_http;
pub use tracing;
pub use validator;
