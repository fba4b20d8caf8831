//! End-to-end checkout sessions against the fake GAPA backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use gapa_checkout::geolocation::NoLocation;
use gapa_checkout::notify::{ToastLevel, ToastLog};
use gapa_checkout::payment::PopupOutcome;
use gapa_checkout::storage::{PersistenceGateway, StorageKey};
use gapa_checkout::{CheckoutSession, SessionParts, SessionUser};
use gapa_core::{
    AddressField, CheckoutStep, DeliveryMethod, GuestCart, LocationId, PaymentMethod, ProductId,
    Quantity, RegionId, UserId,
};
use gapa_integration_tests::{FakeGapa, MEMBER_ID, ScriptedHost};
use rust_decimal::Decimal;

struct Checkout {
    fake: FakeGapa,
    host: Arc<ScriptedHost>,
    store: PersistenceGateway,
    toasts: ToastLog,
    parts: SessionParts,
}

async fn checkout(outcome: PopupOutcome) -> Checkout {
    let fake = FakeGapa::spawn().await.unwrap();
    let host = Arc::new(ScriptedHost::new(outcome));
    let store = PersistenceGateway::in_memory();
    let toasts = ToastLog::new();
    let parts = SessionParts::from_config(
        &fake.config(),
        host.clone(),
        Arc::new(NoLocation),
        store.clone(),
        Arc::new(toasts.clone()),
    )
    .unwrap();
    Checkout {
        fake,
        host,
        store,
        toasts,
        parts,
    }
}

fn member() -> SessionUser {
    SessionUser {
        id: UserId::new(MEMBER_ID),
        email: Some("chidi@example.com".to_owned()),
    }
}

fn seed_guest_cart(store: &PersistenceGateway, items: &[(&str, u8)]) {
    let mut cart = GuestCart::default();
    for (id, qty) in items {
        cart.add(ProductId::new(*id), Quantity::new(*qty));
    }
    store.save(StorageKey::GuestCart, &cart).unwrap();
}

async fn fill_contact(session: &mut CheckoutSession) {
    session.update_address(AddressField::FullName, "Ada Obi").await;
    session.update_address(AddressField::Email, "ada@example.com").await;
    session.update_address(AddressField::Phone, "08030000000").await;
    session.update_address(AddressField::Address1, "12 Allen Avenue").await;
}

#[tokio::test]
async fn test_guest_pays_with_paystack() {
    let c = checkout(PopupOutcome::Success {
        reference: "GAPA_PSK_1700000000000".into(),
    })
    .await;
    seed_guest_cart(&c.store, &[("P1", 2)]);

    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();
    assert_eq!(session.lines().len(), 1);
    assert_eq!(session.lines()[0].name, "Brake pad");
    assert_eq!(session.lines()[0].price, Decimal::from(40_000));

    assert_eq!(session.next().await, Ok(CheckoutStep::Login));
    assert!(session.continue_as_guest());
    fill_contact(&mut session).await;
    session.select_region(&RegionId::new("1")).await.unwrap();

    let totals = session.totals();
    assert_eq!(totals.subtotal, Decimal::from(80_000));
    assert_eq!(totals.vat, Decimal::from(6000));
    assert_eq!(totals.delivery, Decimal::from(1500));
    assert_eq!(totals.total, Decimal::from(87_500));

    assert_eq!(session.next().await, Ok(CheckoutStep::Payment));
    assert_eq!(session.next().await, Ok(CheckoutStep::Review));
    let redirect = session.place_order().await.unwrap();
    assert_eq!(
        redirect.query_string(),
        "?ref=GAPA_PSK_1700000000000&amount=87500"
    );

    // Paystack charges in kobo.
    let popup = &c.host.opened()[0];
    assert_eq!(popup.amount, Decimal::from(8_750_000));
    assert_eq!(popup.public_key, "pk_test_gapa");

    let confirmations = c.fake.recorded.bodies("paymentSuccessfull");
    assert_eq!(confirmations.len(), 1);
    assert_eq!(
        confirmations[0]["transaction_reference"],
        "GAPA_PSK_1700000000000"
    );
    assert_eq!(confirmations[0]["shipping_cost"], 1500.0);
    assert_eq!(confirmations[0]["pickup_location_id"], "7");
    assert!(confirmations[0]["user_id"].is_null());

    // Guests never write their address to the backend.
    assert!(c.fake.recorded.bodies("updateDeliveryAddress").is_empty());
    assert!(c.store.guest_cart().unwrap().is_empty());
    assert!(session.lines().is_empty());
}

#[tokio::test]
async fn test_member_checkout_uses_server_cart_and_profile() {
    let c = checkout(PopupOutcome::Success {
        reference: String::new(),
    })
    .await;

    let mut session = CheckoutSession::new(c.parts.clone(), Some(member()));
    session.set_payment_method(PaymentMethod::Flutterwave);
    session.open().await.unwrap();

    assert_eq!(session.lines()[0].quantity.get(), 2);
    assert_eq!(session.address().full_name, "Chidi Okeke");
    assert_eq!(session.address().region, "Lagos");
    // The profile's region resolves its single location straight away.
    assert_eq!(
        session.address().delivery_location_id,
        Some(LocationId::new("7"))
    );
    assert!(session.address_valid());

    assert_eq!(session.next().await, Ok(CheckoutStep::Address));
    assert_eq!(session.next().await, Ok(CheckoutStep::Payment));
    let saved = c.fake.recorded.bodies("updateDeliveryAddress");
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["user_id"], MEMBER_ID);

    assert_eq!(session.next().await, Ok(CheckoutStep::Review));
    let redirect = session.place_order().await.unwrap();
    assert!(redirect.reference.as_str().starts_with("GAPA_FLW_"));

    // Flutterwave charges in naira.
    assert_eq!(c.host.opened()[0].amount, Decimal::from(87_500));
    let confirmation = &c.fake.recorded.bodies("paymentSuccessfull")[0];
    assert_eq!(confirmation["user_id"], MEMBER_ID);
    assert_eq!(
        confirmation["transaction_reference"],
        redirect.reference.as_str()
    );
}

#[tokio::test]
async fn test_member_cart_edits_reach_backend() {
    let c = checkout(PopupOutcome::Closed).await;
    let mut session = CheckoutSession::new(c.parts.clone(), Some(member()));
    session.open().await.unwrap();

    session
        .add_to_cart(&ProductId::new("P2"), Quantity::new(1))
        .await
        .unwrap();
    session.remove_from_cart(&ProductId::new("P1")).await.unwrap();

    let adds = c.fake.recorded.bodies("addToCart");
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0]["product_id"], "P2");
    assert_eq!(c.fake.recorded.bodies("removeCartItem").len(), 1);
}

#[tokio::test]
async fn test_unknown_guest_product_shows_placeholder() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P2", 3), ("GONE", 1)]);

    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();

    let lines = session.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].name, "Oil filter");
    assert_eq!(lines[1].price, Decimal::ZERO);
    assert_eq!(session.totals().subtotal, Decimal::from(10_500));
}

#[tokio::test]
async fn test_kano_is_served_by_gig_only() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P1", 1)]);
    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();

    // Kano is outside the flat-rate regions; GIG is the only way there.
    assert!(session.select_region(&RegionId::new("3")).await.is_err());
    session.switch_delivery_method(DeliveryMethod::Gig).await;
    assert_eq!(session.regions().len(), 3);
    assert!(session.select_region(&RegionId::new("3")).await.is_ok());
}

#[tokio::test]
async fn test_abuja_needs_a_location_pick() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P1", 1)]);
    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();
    fill_contact(&mut session).await;

    session.select_region(&RegionId::new("2")).await.unwrap();
    assert!(!session.address_valid());
    assert!(session.select_location(&LocationId::new("99")).is_err());

    session.select_location(&LocationId::new("11")).unwrap();
    assert!(session.address_valid());
    assert_eq!(session.totals().delivery, Decimal::from(2000));
}

#[tokio::test]
async fn test_gig_quote_prices_by_weight() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P1", 2)]);
    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();
    fill_contact(&mut session).await;

    session.switch_delivery_method(DeliveryMethod::Gig).await;
    session.select_region(&RegionId::new("3")).await.unwrap();

    let mut quote = session.delivery().live().unwrap().subscribe();
    let settled = quote.wait_for(|q| !q.loading).await.unwrap().clone();
    assert_eq!(settled.amount, Decimal::from(6000));
    assert!(session.address_valid());
    assert_eq!(session.totals().delivery, Decimal::from(6000));

    let sent = c.fake.recorded.bodies("gigPrice");
    let last = sent.last().unwrap();
    assert_eq!(last["destination_state"], "Kano");
    assert_eq!(last["weight_kg"], 5.0);
    assert_eq!(last["receiver_station_id"], 4);
}

#[tokio::test]
async fn test_cancelled_payment_keeps_cart() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P1", 1)]);
    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();
    session.next().await.unwrap();
    session.continue_as_guest();
    fill_contact(&mut session).await;
    session.select_region(&RegionId::new("1")).await.unwrap();
    session.next().await.unwrap();
    session.next().await.unwrap();

    assert!(session.place_order().await.is_err());
    assert_eq!(session.step(), CheckoutStep::Review);
    assert_eq!(session.lines().len(), 1);
    assert!(!c.store.guest_cart().unwrap().is_empty());
    assert!(c.fake.recorded.bodies("paymentSuccessfull").is_empty());
    assert_eq!(c.toasts.drain().last().unwrap().level, ToastLevel::Error);
}

#[tokio::test]
async fn test_drafts_survive_a_new_session() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P1", 1)]);
    {
        let mut session = CheckoutSession::new(c.parts.clone(), None);
        session.open().await.unwrap();
        fill_contact(&mut session).await;
        session.select_region(&RegionId::new("2")).await.unwrap();
        session.select_location(&LocationId::new("12")).unwrap();
        session.set_payment_method(PaymentMethod::Flutterwave);
    }

    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();
    assert_eq!(session.address().full_name, "Ada Obi");
    assert_eq!(session.payment_method(), PaymentMethod::Flutterwave);
    assert_eq!(session.totals().delivery, Decimal::from(2500));
}

#[tokio::test]
async fn test_address_suggestion_prices_delivery() {
    let c = checkout(PopupOutcome::Closed).await;
    seed_guest_cart(&c.store, &[("P1", 1)]);
    let mut session = CheckoutSession::new(c.parts.clone(), None);
    session.open().await.unwrap();

    let suggestions = session.suggest_addresses("12 Allen").await.unwrap();
    assert_eq!(suggestions[0].provider, "nominatim");
    session.apply_suggestion(&suggestions[0]).await.unwrap();

    let address = session.address();
    assert_eq!(address.address1, "12 Allen Avenue");
    assert_eq!(address.city, "Ikeja");
    assert_eq!(address.region_id, Some(RegionId::new("1")));
    assert_eq!(session.totals().delivery, Decimal::from(1500));
}
