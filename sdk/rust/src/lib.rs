//! HTTP client for the catalog API.

mod client;

pub use client::{
    CatalogClient, ClientError, CreatedProduct, ErrorBody, Health, NewProduct, Product,
    SlowReport,
};
