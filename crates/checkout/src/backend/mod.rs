//! GAPA backend REST client.
//!
//! # Architecture
//!
//! - The backend is the source of truth for carts, products, delivery price
//!   tables and orders - no local sync, direct API calls
//! - In-memory caching via `moka` for product details and price tables
//! - Response shapes vary between endpoints (and sometimes between calls),
//!   so payloads are read as `serde_json::Value` and normalized in [`rows`]
//!
//! # Example
//!
//! ```rust,ignore
//! use gapa_checkout::backend::BackendClient;
//!
//! let client = BackendClient::new(&config)?;
//! let regions = client.get_regions().await?;
//! let table = client.get_price_table(&regions[0].id).await?;
//! ```

pub mod rows;

use std::sync::Arc;
use std::time::Duration;

use gapa_core::{Address, DeliveryLocation, ProductId, Quantity, Region, RegionId, UserId};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::config::CheckoutConfig;

/// Endpoint paths, relative to the configured base URL.
mod paths {
    pub const CART_BY_USER: &str = "cart/getCartByUser/";
    pub const ADD_TO_CART: &str = "cart/addToCart";
    pub const REMOVE_CART_ITEM: &str = "cart/removeCartItem";
    pub const PRODUCT_BY_ID: &str = "product/getProductById/";
    pub const STATES: &str = "location/getAllStates";
    pub const PRICE_BY_STATE: &str = "location/getPriceByState/";
    pub const USER_BY_ID: &str = "user/getUserById/";
    pub const UPDATE_DELIVERY_ADDRESS: &str = "user/updateDeliveryAddress";
    pub const PAYMENT_SUCCESS: &str = "payment/paymentSuccessfull";
}

/// Errors that can occur when talking to the GAPA backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Body of the add-to-cart call.
#[derive(Debug, Serialize)]
struct AddToCartRequest<'a> {
    user_id: &'a UserId,
    product_id: &'a ProductId,
    quantity: u8,
}

/// Body of the remove-cart-item call.
#[derive(Debug, Serialize)]
struct RemoveCartItemRequest<'a> {
    user_id: &'a UserId,
    product_id: &'a ProductId,
}

/// Body of the delivery address update.
#[derive(Debug, Serialize)]
struct DeliveryAddressRequest<'a> {
    user_id: &'a UserId,
    full_name: &'a str,
    email: &'a str,
    phone: &'a str,
    address: &'a str,
    region: &'a str,
    region_id: Option<&'a RegionId>,
    country: &'a str,
    postcode: &'a str,
}

/// Order confirmation reported after a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmation {
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_cost: Decimal,
    pub full_address_string: String,
    pub user_id: Option<UserId>,
    pub transaction_reference: String,
    pub pickup_location_id: Option<String>,
}

/// Client for the GAPA backend.
///
/// Cheaply cloneable; clones share the HTTP connection pool and caches.
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<BackendClientInner>,
}

struct BackendClientInner {
    client: reqwest::Client,
    base_url: Url,
    products: Cache<ProductId, Value>,
    price_tables: Cache<RegionId, Vec<DeliveryLocation>>,
}

impl BackendClient {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &CheckoutConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let products = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300))
            .build();

        let price_tables = Cache::builder()
            .max_capacity(100)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Ok(Self {
            inner: Arc::new(BackendClientInner {
                client,
                base_url: config.api_base_url.clone(),
                products,
                price_tables,
            }),
        })
    }

    fn endpoint(&self, path: &str, id: Option<&str>) -> Result<Url, BackendError> {
        let path = match id {
            Some(id) => format!("{path}{}", urlencoding::encode(id)),
            None => path.to_owned(),
        };
        Ok(self.inner.base_url.join(&path)?)
    }

    /// Send a request and return its JSON body, mapping error statuses.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(BackendError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(body.chars().take(200).collect()));
        }

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "GAPA backend returned non-success status"
            );
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse GAPA backend response"
            );
            BackendError::Parse(e.to_string())
        })
    }

    async fn get(&self, url: Url) -> Result<Value, BackendError> {
        self.execute(self.inner.client.get(url)).await
    }

    async fn post<B: Serialize + Sync>(&self, url: Url, body: &B) -> Result<Value, BackendError> {
        self.execute(self.inner.client.post(url).json(body)).await
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Fetch the raw cart rows stored for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body holds no row list.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_cart_rows(&self, user_id: &UserId) -> Result<Vec<Value>, BackendError> {
        let body = self
            .get(self.endpoint(paths::CART_BY_USER, Some(user_id.as_str()))?)
            .await?;
        rows::extract_list(&body, &["cart", "data", "items", "cartItems"])
            .ok_or_else(|| BackendError::Parse("cart response holds no row list".to_owned()))
    }

    /// Add a product to a user's server cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn add_to_cart(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> Result<(), BackendError> {
        let body = AddToCartRequest {
            user_id,
            product_id,
            quantity: quantity.get(),
        };
        self.post(self.endpoint(paths::ADD_TO_CART, None)?, &body)
            .await?;
        Ok(())
    }

    /// Remove a product's row from a user's server cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn remove_cart_item(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<(), BackendError> {
        let body = RemoveCartItemRequest {
            user_id,
            product_id,
        };
        self.post(self.endpoint(paths::REMOVE_CART_ITEM, None)?, &body)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Fetch a product's details as a raw JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if the product is not found or the request fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(&self, product_id: &ProductId) -> Result<Value, BackendError> {
        if let Some(product) = self.inner.products.get(product_id).await {
            debug!("Cache hit for product");
            return Ok(product);
        }

        let body = self
            .get(self.endpoint(paths::PRODUCT_BY_ID, Some(product_id.as_str()))?)
            .await?;
        let product = rows::extract_object(&body, &["product", "data", "part"])
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("product {product_id}")))?;

        self.inner
            .products
            .insert(product_id.clone(), product.clone())
            .await;
        Ok(product)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// List the regions (states) the store ships to.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self))]
    pub async fn get_regions(&self) -> Result<Vec<Region>, BackendError> {
        let body = self.get(self.endpoint(paths::STATES, None)?).await?;
        let list = rows::extract_list(&body, &["states", "data"])
            .ok_or_else(|| BackendError::Parse("states response holds no list".to_owned()))?;
        Ok(list.iter().filter_map(rows::region_from).collect())
    }

    /// Fetch the flat-rate price table for a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self), fields(region_id = %region_id))]
    pub async fn get_price_table(
        &self,
        region_id: &RegionId,
    ) -> Result<Vec<DeliveryLocation>, BackendError> {
        if let Some(table) = self.inner.price_tables.get(region_id).await {
            debug!("Cache hit for price table");
            return Ok(table);
        }

        let body = self
            .get(self.endpoint(paths::PRICE_BY_STATE, Some(region_id.as_str()))?)
            .await?;
        // An empty or missing list means the region has no delivery points.
        let table: Vec<DeliveryLocation> = rows::extract_list(&body, &["data", "locations", "prices"])
            .unwrap_or_default()
            .iter()
            .filter_map(rows::location_from)
            .collect();

        self.inner
            .price_tables
            .insert(region_id.clone(), table.clone())
            .await;
        Ok(table)
    }

    // =========================================================================
    // Account & Orders
    // =========================================================================

    /// Fetch the profile of a user as an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_profile(&self, user_id: &UserId) -> Result<Address, BackendError> {
        let body = self
            .get(self.endpoint(paths::USER_BY_ID, Some(user_id.as_str()))?)
            .await?;
        let user = rows::extract_object(&body, &["user", "data"])
            .ok_or_else(|| BackendError::NotFound(format!("user {user_id}")))?;
        Ok(rows::address_from_profile(user))
    }

    /// Store the delivery address on the user's account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, address, full_address), fields(user_id = %user_id))]
    pub async fn update_delivery_address(
        &self,
        user_id: &UserId,
        address: &Address,
        full_address: &str,
    ) -> Result<(), BackendError> {
        let body = DeliveryAddressRequest {
            user_id,
            full_name: &address.full_name,
            email: &address.email,
            phone: &address.phone,
            address: full_address,
            region: &address.region,
            region_id: address.region_id.as_ref(),
            country: &address.country,
            postcode: &address.postcode,
        };
        self.post(self.endpoint(paths::UPDATE_DELIVERY_ADDRESS, None)?, &body)
            .await?;
        Ok(())
    }

    /// Report a completed payment so the backend can create the order.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self, confirmation), fields(reference = %confirmation.transaction_reference))]
    pub async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(), BackendError> {
        self.post(self.endpoint(paths::PAYMENT_SUCCESS, None)?, confirmation)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> BackendClient {
        let config = CheckoutConfig::new(Url::parse("http://127.0.0.1:1/api").unwrap());
        BackendClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_ids() {
        let url = client()
            .endpoint(paths::PRODUCT_BY_ID, Some("A/B 1"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:1/api/product/getProductById/A%2FB%201"
        );
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 500 - boom");
    }

    #[test]
    fn test_confirmation_wire_shape() {
        let confirmation = PaymentConfirmation {
            shipping_cost: Decimal::from(1500),
            full_address_string: "12 Allen Avenue".into(),
            user_id: None,
            transaction_reference: "GAPA_PSK_1".into(),
            pickup_location_id: Some("7".into()),
        };
        let json = serde_json::to_value(&confirmation).unwrap();
        assert_eq!(json["transaction_reference"], "GAPA_PSK_1");
        assert_eq!(json["shipping_cost"], 1500.0);
        assert!(json["user_id"].is_null());
    }
}
