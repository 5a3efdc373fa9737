//! Instrumented access to the product store.
//!
//! Every method is one store round trip wrapped in a Client span.

use std::sync::Arc;

use crate::catalog::model::Product;
use crate::catalog::store::{ProductStore, StoreError};
use crate::instrumentation::{DataInstrumentation, DbStatement};
use crate::observability::TraceScope;

const PRODUCTS: &str = "products";

#[derive(Clone)]
pub struct ProductRepository {
    store: Arc<ProductStore>,
    data: DataInstrumentation,
}

impl ProductRepository {
    pub fn new(store: Arc<ProductStore>, data: DataInstrumentation) -> Self {
        Self { store, data }
    }

    pub async fn list_recent(
        &self,
        scope: &TraceScope,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        let statement = DbStatement::new(
            "SELECT",
            PRODUCTS,
            format!(
                "SELECT p.id, p.name, p.price, p.created_at FROM products AS p \
                 ORDER BY p.created_at DESC LIMIT {}",
                limit
            ),
        );
        self.data
            .instrument(scope, statement, self.store.list_recent(limit))
            .await
    }

    pub async fn find(&self, scope: &TraceScope, id: i64) -> Result<Option<Product>, StoreError> {
        let statement = DbStatement::new(
            "SELECT",
            PRODUCTS,
            "SELECT p.id, p.name, p.price, p.created_at FROM products AS p WHERE p.id = @id LIMIT 1",
        );
        self.data
            .instrument(scope, statement, self.store.find(id))
            .await
    }

    pub async fn insert(
        &self,
        scope: &TraceScope,
        name: &str,
        price: f64,
    ) -> Result<Product, StoreError> {
        let statement = DbStatement::new(
            "INSERT",
            PRODUCTS,
            "INSERT INTO products (name, price, created_at) VALUES (@name, @price, @created_at) \
             RETURNING id",
        );
        self.data
            .instrument(scope, statement, self.store.insert(name, price))
            .await
    }

    pub async fn count(&self, scope: &TraceScope) -> Result<u64, StoreError> {
        let statement = DbStatement::new("SELECT", PRODUCTS, "SELECT COUNT(*) FROM products AS p");
        self.data
            .instrument(scope, statement, self.store.count())
            .await
    }
}
