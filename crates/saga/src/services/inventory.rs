//! Inventory service: product lookup and stock reservation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::ProductId;
use domain::{DomainError, Money, Product, StockLedgerEntry};
use reqwest::StatusCode;
use resilience::{ResilientCall, RetryPolicy};
use serde::{Deserialize, Serialize};

use super::http::{ErrorBody, HttpEndpoint, decode, transport_error, unexpected_status};
use crate::error::{Resource, SagaError, ServiceError};

/// Transport to the inventory service.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Returns the product snapshot.
    async fn product(&self, product_id: ProductId) -> Result<Product, ServiceError>;

    /// Atomically decrements stock by `quantity`, returning the new count.
    async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError>;

    /// Increments stock by `quantity`, returning the new count.
    async fn release(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProductBody {
    id: ProductId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(with = "domain::money::major_units")]
    price: Money,
    stock: u32,
}

impl From<ProductBody> for Product {
    fn from(body: ProductBody) -> Self {
        Product {
            id: body.id,
            name: body.name,
            description: body.description,
            price: body.price,
            stock: body.stock,
        }
    }
}

#[derive(Debug, Serialize)]
struct StockUpdate {
    /// Positive decrements, negative increments.
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct StockUpdated {
    new_stock: u32,
}

/// Inventory service over HTTP.
///
/// `PUT /products/{id}/stock` subtracts `quantity` from the stock; a release
/// sends the negated quantity.
#[derive(Debug, Clone)]
pub struct HttpInventoryService {
    endpoint: HttpEndpoint,
}

impl HttpInventoryService {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }

    async fn update_stock(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<u32, ServiceError> {
        let response = self
            .endpoint
            .client()
            .put(self.endpoint.url(&format!("/products/{product_id}/stock")))
            .json(&StockUpdate { quantity })
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(decode::<StockUpdated>(response).await?.new_stock),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(Resource::Product(product_id))),
            StatusCode::BAD_REQUEST => {
                let body = ErrorBody::read(response).await;
                match body.available {
                    Some(available) => Err(ServiceError::InsufficientStock {
                        product_id,
                        available,
                        requested: u32::try_from(quantity).unwrap_or(0),
                    }),
                    None => Err(ServiceError::Validation(body.message(StatusCode::BAD_REQUEST))),
                }
            }
            _ => Err(unexpected_status(response).await),
        }
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    async fn product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        let response = self
            .endpoint
            .client()
            .get(self.endpoint.url(&format!("/products/{product_id}")))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(decode::<ProductBody>(response).await?.into()),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(Resource::Product(product_id))),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError> {
        self.update_stock(product_id, i64::from(quantity)).await
    }

    async fn release(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError> {
        self.update_stock(product_id, -i64::from(quantity)).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ProductRow {
    product: Product,
    ledger: StockLedgerEntry,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    rows: HashMap<ProductId, ProductRow>,
    unavailable: bool,
    reserve_calls: u32,
    release_calls: u32,
}

/// In-memory inventory for tests and local runs.
///
/// All rows sit behind one mutex, so every reservation is a single atomic
/// check-and-decrement.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryInventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a product.
    pub fn insert_product(&self, product: Product) {
        let ledger = StockLedgerEntry::new(product.id, product.stock);
        self.lock()
            .rows
            .insert(product.id, ProductRow { product, ledger });
    }

    /// Current stock count of a product.
    pub fn stock(&self, product_id: ProductId) -> Option<u32> {
        self.lock().rows.get(&product_id).map(|row| row.ledger.stock_count)
    }

    /// Makes every call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Number of reservation requests that reached the service.
    pub fn reserve_calls(&self) -> u32 {
        self.lock().reserve_calls
    }

    pub fn release_calls(&self) -> u32 {
        self.lock().release_calls
    }

    fn check_available(state: &InMemoryInventoryState) -> Result<(), ServiceError> {
        if state.unavailable {
            return Err(ServiceError::Transient("inventory service unavailable".to_string()));
        }
        Ok(())
    }
}

fn ledger_error(err: DomainError) -> ServiceError {
    match err {
        DomainError::InsufficientStock {
            product_id,
            available,
            requested,
        } => ServiceError::InsufficientStock {
            product_id,
            available,
            requested,
        },
        other => ServiceError::Validation(other.to_string()),
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        let state = self.lock();
        Self::check_available(&state)?;
        let row = state
            .rows
            .get(&product_id)
            .ok_or(ServiceError::NotFound(Resource::Product(product_id)))?;
        Ok(Product {
            stock: row.ledger.stock_count,
            ..row.product.clone()
        })
    }

    async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError> {
        let mut state = self.lock();
        state.reserve_calls += 1;
        Self::check_available(&state)?;
        let row = state
            .rows
            .get_mut(&product_id)
            .ok_or(ServiceError::NotFound(Resource::Product(product_id)))?;
        row.ledger.reserve(quantity).map_err(ledger_error)
    }

    async fn release(&self, product_id: ProductId, quantity: u32) -> Result<u32, ServiceError> {
        let mut state = self.lock();
        state.release_calls += 1;
        Self::check_available(&state)?;
        let row = state
            .rows
            .get_mut(&product_id)
            .ok_or(ServiceError::NotFound(Resource::Product(product_id)))?;
        row.ledger.release(quantity).map_err(ledger_error)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Inventory adapter used by the saga: every request goes through the
/// inventory dependency's [`ResilientCall`].
#[derive(Clone)]
pub struct InventoryClient {
    service: Arc<dyn InventoryService>,
    call: ResilientCall,
}

impl std::fmt::Debug for InventoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryClient")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

impl InventoryClient {
    pub const SERVICE: &'static str = "inventory";

    pub fn new(service: Arc<dyn InventoryService>, call: ResilientCall) -> Self {
        Self { service, call }
    }

    /// The inventory dependency's circuit and counters.
    pub fn call(&self) -> &ResilientCall {
        &self.call
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product, SagaError> {
        self.call
            .invoke(|| self.service.product(product_id))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }

    pub async fn reserve(&self, product_id: ProductId, quantity: u32) -> Result<u32, SagaError> {
        self.call
            .invoke(|| self.service.reserve(product_id, quantity))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }

    /// Returns reserved stock under `policy`, normally the compensation policy.
    pub async fn release(
        &self,
        product_id: ProductId,
        quantity: u32,
        policy: &RetryPolicy,
    ) -> Result<u32, SagaError> {
        self.call
            .invoke_with(policy, || self.service.release(product_id, quantity))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget(stock: u32) -> Product {
        Product {
            id: ProductId::new(1),
            name: "Widget".to_string(),
            description: String::new(),
            price: Money::from_cents(1999),
            stock,
        }
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let service = InMemoryInventoryService::new();
        service.insert_product(widget(10));

        assert_eq!(service.reserve(ProductId::new(1), 4).await.unwrap(), 6);
        assert_eq!(service.release(ProductId::new(1), 4).await.unwrap(), 10);
        assert_eq!(service.product(ProductId::new(1)).await.unwrap().stock, 10);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_ledger_unchanged() {
        let service = InMemoryInventoryService::new();
        service.insert_product(widget(3));

        let err = service.reserve(ProductId::new(1), 5).await.unwrap_err();

        assert!(matches!(
            err,
            ServiceError::InsufficientStock {
                available: 3,
                requested: 5,
                ..
            }
        ));
        assert_eq!(service.stock(ProductId::new(1)), Some(3));
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let service = InMemoryInventoryService::new();
        let err = service.product(ProductId::new(42)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(Resource::Product(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_oversell() {
        let service = InMemoryInventoryService::new();
        service.insert_product(widget(10));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.reserve(ProductId::new(1), 3).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(service.stock(ProductId::new(1)), Some(1));
    }

    #[tokio::test]
    async fn test_client_translates_business_rejection() {
        let service = InMemoryInventoryService::new();
        service.insert_product(widget(2));
        let client = InventoryClient::new(
            Arc::new(service.clone()),
            ResilientCall::with_defaults(InventoryClient::SERVICE),
        );

        let err = client.reserve(ProductId::new(1), 5).await.unwrap_err();

        assert!(matches!(err, SagaError::InsufficientStock { .. }));
        assert_eq!(service.reserve_calls(), 1);
        assert_eq!(client.call().snapshot().failure_count, 0);
    }
}
