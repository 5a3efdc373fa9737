//! Product catalog API with end-to-end request telemetry.

pub mod catalog;
pub mod config;
pub mod export;
pub mod http;
pub mod instrumentation;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::Telemetry;
