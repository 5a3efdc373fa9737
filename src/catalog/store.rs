//! In-process product store.
//!
//! Stands in for the relational database: every call pays a configurable
//! round-trip latency, and failures can be injected for tests.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::model::Product;
use crate::observability::ReportableError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("product store unavailable")]
    Unavailable,
}

impl ReportableError for StoreError {
    fn error_type(&self) -> &'static str {
        match self {
            StoreError::Unavailable => "StoreUnavailable",
        }
    }
}

pub struct ProductStore {
    products: DashMap<i64, Product>,
    next_id: AtomicI64,
    latency: Duration,
    failures_remaining: AtomicU32,
}

impl ProductStore {
    pub fn new(latency: Duration) -> Self {
        Self {
            products: DashMap::new(),
            next_id: AtomicI64::new(1),
            latency,
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` calls with `StoreError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Up to `limit` products, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Product>, StoreError> {
        self.round_trip().await?;
        let mut products: Vec<Product> = self.products.iter().map(|p| p.value().clone()).collect();
        products.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        products.truncate(limit);
        Ok(products)
    }

    pub async fn find(&self, id: i64) -> Result<Option<Product>, StoreError> {
        self.round_trip().await?;
        Ok(self.products.get(&id).map(|p| p.value().clone()))
    }

    /// Insert a product, assigning its id and creation time.
    pub async fn insert(&self, name: &str, price: f64) -> Result<Product, StoreError> {
        self.round_trip().await?;
        let product = Product {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            price,
            created_at: Utc::now(),
        };
        self.products.insert(product.id, product.clone());
        Ok(product)
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.round_trip().await?;
        Ok(self.products.len() as u64)
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = ProductStore::new(Duration::ZERO);
        let a = store.insert("Keyboard", 49.5).await.unwrap();
        let b = store.insert("Mouse", 19.0).await.unwrap();
        assert!(a.id > 0);
        assert!(b.id > a.id);
        assert_eq!(store.find(a.id).await.unwrap(), Some(a));
        assert_eq!(store.find(999).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_recent_newest_first_and_limited() {
        let store = ProductStore::new(Duration::ZERO);
        for i in 0..5 {
            store.insert(&format!("p{}", i), 1.0).await.unwrap();
        }
        let recent = store.list_recent(3).await.unwrap();
        let names: Vec<&str> = recent.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p4", "p3", "p2"]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = ProductStore::new(Duration::ZERO);
        store.fail_next(1);
        assert_eq!(store.count().await, Err(StoreError::Unavailable));
        assert_eq!(store.count().await, Ok(0));
    }
}
