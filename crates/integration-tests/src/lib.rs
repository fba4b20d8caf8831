//! Integration test harness for the GAPA checkout engine.
//!
//! [`FakeGapa`] serves, on an ephemeral local port, the GAPA backend routes
//! the engine calls plus stand-ins for the GIG price endpoint, the
//! exchange-rate service and Nominatim. POST bodies are recorded so tests
//! can assert on what the engine sent.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p gapa-integration-tests
//! ```
//!
//! # Fixtures
//!
//! - Products `P1` (brake pad, 40000, 2.5kg) and `P2` (oil filter, 3500)
//! - Member `42` with two `P1` in the server cart
//! - Regions Lagos (1, one location at 1500), Abuja (2, two locations) and
//!   Kano (3, no locations)

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use gapa_checkout::CheckoutConfig;
use gapa_checkout::config::PaymentConfig;
use gapa_checkout::payment::{CheckoutHost, GatewayRequest, PopupOutcome};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

/// Member whose server cart holds two brake pads.
pub const MEMBER_ID: &str = "42";

/// Request bodies received by the fake, by route name.
#[derive(Debug, Default)]
pub struct Recorded {
    requests: Mutex<Vec<(&'static str, Value)>>,
}

impl Recorded {
    fn push(&self, route: &'static str, body: Value) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((route, body));
    }

    /// Bodies posted to `route`, oldest first.
    #[must_use]
    pub fn bodies(&self, route: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| *name == route)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

/// A running fake backend.
pub struct FakeGapa {
    base_url: Url,
    pub recorded: Arc<Recorded>,
}

impl FakeGapa {
    /// Bind to `127.0.0.1:0` and serve in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn spawn() -> std::io::Result<Self> {
        let recorded = Arc::new(Recorded::default());
        let app = router(Arc::clone(&recorded));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let base_url = Url::parse(&format!("http://{addr}/")).map_err(std::io::Error::other)?;
        Ok(Self { base_url, recorded })
    }

    /// Absolute URL of `path` on the fake.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    /// Engine configuration pointing every endpoint at the fake.
    #[must_use]
    pub fn config(&self) -> CheckoutConfig {
        let mut config = CheckoutConfig::new(self.url("api/"));
        config.gig.quote_url = self.url("gig/price");
        config.exchange_rate_url = self.url("fx/");
        config.geocoding.nominatim_url = self.url("nominatim/search");
        config.payment = PaymentConfig {
            paystack_public_key: Some("pk_test_gapa".to_owned()),
            flutterwave_public_key: Some("FLWPUBK_TEST-gapa".to_owned()),
        };
        config.timing.quote_debounce = Duration::from_millis(10);
        config.timing.geolocation_timeout = Duration::from_millis(50);
        config
    }
}

fn router(recorded: Arc<Recorded>) -> Router {
    Router::new()
        .route("/api/cart/getCartByUser/{user_id}", get(cart_by_user))
        .route("/api/cart/addToCart", post(add_to_cart))
        .route("/api/cart/removeCartItem", post(remove_cart_item))
        .route("/api/product/getProductById/{product_id}", get(product))
        .route("/api/location/getAllStates", get(states))
        .route("/api/location/getPriceByState/{region_id}", get(price_by_state))
        .route("/api/user/getUserById/{user_id}", get(user))
        .route("/api/user/updateDeliveryAddress", post(update_delivery_address))
        .route("/api/payment/paymentSuccessfull", post(payment_success))
        .route("/gig/price", post(gig_price))
        .route("/fx/{base}", get(latest_rates))
        .route("/nominatim/search", get(nominatim))
        .with_state(recorded)
}

type Shared = State<Arc<Recorded>>;

fn catalog(product_id: &str) -> Option<Value> {
    match product_id {
        "P1" => Some(json!({
            "id": "P1",
            "product_name": "Brake pad",
            "selling_price": "40,000",
            "weight": "2.5",
            "images": [{ "url": "https://cdn.gapa.test/p1.jpg" }]
        })),
        "P2" => Some(json!({ "id": "P2", "name": "Oil filter", "price": 3500 })),
        _ => None,
    }
}

async fn cart_by_user(Path(user_id): Path<String>) -> Json<Value> {
    let rows = if user_id == MEMBER_ID {
        json!([{ "id": 900, "product_id": "P1", "quantity": 2, "product": catalog("P1") }])
    } else {
        json!([])
    };
    Json(json!({ "status": "success", "cart": rows }))
}

async fn add_to_cart(State(recorded): Shared, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("addToCart", body);
    Json(json!({ "status": "success" }))
}

async fn remove_cart_item(State(recorded): Shared, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("removeCartItem", body);
    Json(json!({ "status": "success" }))
}

async fn product(Path(product_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    catalog(&product_id)
        .map(|product| Json(json!({ "product": product })))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn states() -> Json<Value> {
    Json(json!({
        "states": [
            { "id": 1, "name": "Lagos" },
            { "id": 2, "name": "Abuja" },
            { "id": 3, "name": "Kano" }
        ]
    }))
}

async fn price_by_state(Path(region_id): Path<String>) -> Json<Value> {
    let locations = match region_id.as_str() {
        "1" => json!([{ "id": 7, "location": "Ikeja", "price": 1500 }]),
        "2" => json!([
            { "id": 11, "location": "Wuse", "price": "2,000" },
            { "id": 12, "location": "Garki", "price": 2500 }
        ]),
        _ => json!([]),
    };
    Json(json!({ "data": locations }))
}

async fn user(Path(user_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if user_id != MEMBER_ID {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({
        "user": {
            "id": 42,
            "first_name": "Chidi",
            "last_name": "Okeke",
            "email": "chidi@example.com",
            "phone_number": "08020000000",
            "address": "5 Awolowo Road",
            "city": "Ikoyi",
            "state": "Lagos",
            "state_id": 1
        }
    })))
}

async fn update_delivery_address(State(recorded): Shared, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("updateDeliveryAddress", body);
    Json(json!({ "status": "success" }))
}

async fn payment_success(State(recorded): Shared, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("paymentSuccessfull", body);
    Json(json!({ "status": "success", "message": "Order created" }))
}

/// Prices 1200 per kilogram; "Sokoto" has no service.
async fn gig_price(State(recorded): Shared, Json(body): Json<Value>) -> Json<Value> {
    let unserved = body["destination_state"] == "Sokoto";
    let weight = body["weight_kg"].as_f64().unwrap_or_default();
    recorded.push("gigPrice", body);
    if unserved {
        return Json(json!({ "data": { "amount": 0 } }));
    }
    Json(json!({ "data": { "amount": weight * 1200.0 } }))
}

async fn latest_rates(Path(base): Path<String>) -> Json<Value> {
    if base != "NGN" {
        return Json(json!({ "result": "error", "error-type": "unsupported-code" }));
    }
    Json(json!({
        "result": "success",
        "base_code": "NGN",
        "rates": { "NGN": 1, "USD": 0.00065, "GBP": 0.0005 }
    }))
}

async fn nominatim() -> Json<Value> {
    Json(json!([{
        "place_id": 123_456,
        "display_name": "12 Allen Avenue, Ikeja, Lagos State, Nigeria",
        "lat": "6.6018",
        "lon": "3.3515",
        "address": {
            "house_number": "12",
            "road": "Allen Avenue",
            "city": "Ikeja",
            "state": "Lagos State",
            "postcode": "100271",
            "country": "Nigeria"
        }
    }]))
}

/// Host whose popup always ends the same way.
pub struct ScriptedHost {
    outcome: PopupOutcome,
    opened: Mutex<Vec<GatewayRequest>>,
}

impl ScriptedHost {
    #[must_use]
    pub const fn new(outcome: PopupOutcome) -> Self {
        Self {
            outcome,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Requests the popup was opened with.
    #[must_use]
    pub fn opened(&self) -> Vec<GatewayRequest> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CheckoutHost for ScriptedHost {
    async fn load_script(&self, _url: &str) -> Result<(), String> {
        Ok(())
    }

    async fn open_checkout(&self, request: &GatewayRequest) -> PopupOutcome {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.outcome.clone()
    }
}
