//! Product catalog domain.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → service.rs (business span, validation, operation histogram)
//!     → repository.rs (Client span per store round trip)
//!     → store.rs (in-process product storage)
//! ```

pub mod error;
pub mod model;
pub mod repository;
pub mod service;
pub mod store;

pub use error::CatalogError;
pub use model::{CreateProductRequest, Product, SlowReport};
pub use repository::ProductRepository;
pub use service::CatalogService;
pub use store::{ProductStore, StoreError};
