use reqwest::{header::{HeaderMap, HeaderValue}, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowReport {
    pub message: String,
    pub total_products: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// A created product and its `Location` header.
#[derive(Debug, Clone)]
pub struct CreatedProduct {
    pub product: Product,
    pub location: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status; `body` is the parsed error body when there is one.
    #[error("API returned {status}: {}", .body.as_ref().map(|b| b.error.as_str()).unwrap_or("<no body>"))]
    Status {
        status: StatusCode,
        body: Option<ErrorBody>,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
        }
    }
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl CatalogClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Send a W3C `traceparent` with every request.
    /// Invalid header values are ignored.
    pub fn with_traceparent(mut self, traceparent: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(traceparent) {
            self.headers.insert("traceparent", value);
        }
        self
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, ClientError> {
        decode(self.get("/api/products").await?).await
    }

    /// `None` when the product does not exist.
    pub async fn get_product(&self, id: i64) -> Result<Option<Product>, ClientError> {
        let response = self.get(&format!("/api/products/{}", id)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    pub async fn create_product(&self, name: &str, price: f64) -> Result<CreatedProduct, ClientError> {
        let response = self
            .client
            .post(self.url("/api/products"))
            .headers(self.headers.clone())
            .json(&NewProduct {
                name: name.to_string(),
                price,
            })
            .send()
            .await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let location = header("location");
        let request_id = header("x-request-id");

        Ok(CreatedProduct {
            product: decode(response).await?,
            location,
            request_id,
        })
    }

    pub async fn slow(&self) -> Result<SlowReport, ClientError> {
        decode(self.get("/api/products/slow").await?).await
    }

    /// Call the endpoint that always fails; returns its error body.
    pub async fn trigger_error(&self) -> Result<ErrorBody, ClientError> {
        match decode::<serde_json::Value>(self.get("/api/products/error").await?).await {
            Err(ClientError::Status {
                body: Some(body), ..
            }) => Ok(body),
            Err(e) => Err(e),
            Ok(_) => Err(ClientError::Status {
                status: StatusCode::OK,
                body: None,
            }),
        }
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        decode(self.get("/health").await?).await
    }

    /// Raw metric registry snapshot.
    pub async fn telemetry_metrics(&self) -> Result<serde_json::Value, ClientError> {
        decode(self.get("/api/telemetry/metrics").await?).await
    }

    /// Perform a GET with the client's headers.
    pub async fn get(&self, path: &str) -> Result<Response, reqwest::Error> {
        self.client
            .get(self.url(path))
            .headers(self.headers.clone())
            .send()
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.json::<ErrorBody>().await.ok();
        return Err(ClientError::Status { status, body });
    }
    Ok(response.json::<T>().await?)
}
