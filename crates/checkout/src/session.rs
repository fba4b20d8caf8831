//! A customer's checkout session.
//!
//! Ties the cart, the wizard, the delivery strategy and payment together and
//! keeps the drafts in storage current. Every customer-facing failure is
//! shown through the [`Notifier`] before it is returned, so hosts may ignore
//! the `Err` values if they only render toasts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gapa_core::{
    Address, AddressField, CartLineItem, CheckoutStep, CheckoutTotals, DeliveryMethod, LocationId,
    PaymentMethod, ProductId, Quantity, Region, RegionId, UserId,
};
use tokio::sync::watch;
use tracing::instrument;

use crate::backend::{BackendClient, BackendError};
use crate::cart::{CartAggregator, CartBackend, CartOwner};
use crate::config::CheckoutConfig;
use crate::delivery::{DeliveryResolver, DeliveryState, FlatRateQuote, FlatRateResolver, GigClient};
use crate::error::{CheckoutError, Result, clear_sentry_user, set_sentry_user};
use crate::geocode::{GeocodeCascade, Prediction, RECENT_PROVIDER, SuggestionFeed};
use crate::geolocation::{self, Coordinates, LocationSource};
use crate::notify::{Notifier, Toast};
use crate::payment::{CheckoutHost, OrderRequest, PaymentDispatcher, SuccessRedirect};
use crate::steps::{Blocked, StepController, StepGates};
use crate::storage::{PersistenceGateway, StorageKey};

/// Account and catalog calls the session makes besides the cart.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    async fn regions(&self) -> std::result::Result<Vec<Region>, BackendError>;

    async fn profile(&self, user_id: &UserId) -> std::result::Result<Address, BackendError>;

    async fn save_delivery_address(
        &self,
        user_id: &UserId,
        address: &Address,
        full_address: &str,
    ) -> std::result::Result<(), BackendError>;
}

#[async_trait]
impl AccountBackend for BackendClient {
    async fn regions(&self) -> std::result::Result<Vec<Region>, BackendError> {
        self.get_regions().await
    }

    async fn profile(&self, user_id: &UserId) -> std::result::Result<Address, BackendError> {
        self.get_profile(user_id).await
    }

    async fn save_delivery_address(
        &self,
        user_id: &UserId,
        address: &Address,
        full_address: &str,
    ) -> std::result::Result<(), BackendError> {
        self.update_delivery_address(user_id, address, full_address)
            .await
    }
}

/// A signed-in customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub email: Option<String>,
}

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionParts {
    pub cart_backend: Arc<dyn CartBackend>,
    pub account: Arc<dyn AccountBackend>,
    pub delivery: DeliveryResolver,
    pub payments: Arc<PaymentDispatcher>,
    pub suggestions: SuggestionFeed,
    pub location: Arc<dyn LocationSource>,
    pub geolocation_timeout: Duration,
    pub store: PersistenceGateway,
    pub notifier: Arc<dyn Notifier>,
}

impl SessionParts {
    /// Wire the production clients from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client fails to build.
    pub fn from_config(
        config: &CheckoutConfig,
        host: Arc<dyn CheckoutHost>,
        location: Arc<dyn LocationSource>,
        store: PersistenceGateway,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let backend = BackendClient::new(config)?;
        let gig = GigClient::new(&config.gig)?;
        let cascade = GeocodeCascade::from_config(&config.geocoding)?;
        let backend_arc = Arc::new(backend);

        let delivery = DeliveryResolver::new(
            FlatRateResolver::new(backend_arc.clone(), config.flat_rate_regions.clone()),
            Arc::new(gig),
            Arc::clone(&notifier),
            config.timing.quote_debounce,
            config.gig.receiver_station_id,
        );
        let payments = Arc::new(PaymentDispatcher::new(
            host,
            backend_arc.clone(),
            store.clone(),
            config.payment.clone(),
            config.currency.clone(),
        ));

        Ok(Self {
            cart_backend: backend_arc.clone(),
            account: backend_arc,
            delivery,
            payments,
            suggestions: SuggestionFeed::new(Arc::new(cascade)),
            location,
            geolocation_timeout: config.timing.geolocation_timeout,
            store,
            notifier,
        })
    }
}

/// State of one checkout.
pub struct CheckoutSession {
    parts: SessionParts,
    cart: CartAggregator,
    steps: StepController,
    user: Option<SessionUser>,
    continued_as_guest: bool,
    address: Address,
    payment_method: PaymentMethod,
    delivery: DeliveryState,
    regions: Vec<Region>,
    coordinates: Option<Coordinates>,
    located: bool,
    position: Arc<watch::Sender<Option<Coordinates>>>,
}

impl CheckoutSession {
    /// Start a session, restoring drafts from storage.
    #[must_use]
    pub fn new(parts: SessionParts, user: Option<SessionUser>) -> Self {
        let owner = user
            .as_ref()
            .map_or(CartOwner::Guest, |u| CartOwner::Member(u.id.clone()));
        let cart = CartAggregator::new(
            Arc::clone(&parts.cart_backend),
            parts.store.clone(),
            Arc::clone(&parts.notifier),
            owner,
        );

        let address: Address = restore(&parts.store, StorageKey::DraftAddress);
        let payment_method: PaymentMethod = restore(&parts.store, StorageKey::DraftPaymentMethod);
        let delivery_method: DeliveryMethod = restore(&parts.store, StorageKey::DraftDeliveryMethod);
        let delivery = parts.delivery.fresh(delivery_method);

        if let Some(user) = &user {
            set_sentry_user(&user.id, user.email.as_deref());
        }

        Self {
            steps: StepController::new(user.is_some()),
            cart,
            user,
            continued_as_guest: false,
            address,
            payment_method,
            delivery,
            regions: Vec::new(),
            coordinates: None,
            located: false,
            position: Arc::new(watch::channel(None).0),
            parts,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn lines(&self) -> &[CartLineItem] {
        self.cart.lines()
    }

    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    #[must_use]
    pub const fn delivery(&self) -> &DeliveryState {
        &self.delivery
    }

    #[must_use]
    pub const fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        self.steps.current()
    }

    #[must_use]
    pub const fn steps(&self) -> &StepController {
        &self.steps
    }

    #[must_use]
    pub const fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    /// Regions offered under the active delivery method.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        match self.delivery.method() {
            DeliveryMethod::Gapa => self
                .parts
                .delivery
                .flat_rate()
                .filter_regions(self.regions.clone()),
            DeliveryMethod::Gig => self.regions.clone(),
        }
    }

    /// Totals from the current cart and delivery price.
    #[must_use]
    pub fn totals(&self) -> CheckoutTotals {
        CheckoutTotals::compute(self.cart.lines(), self.delivery.effective_price())
    }

    /// Required fields are filled in and the delivery price is settled.
    #[must_use]
    pub fn address_valid(&self) -> bool {
        self.address.has_required_fields() && self.delivery.is_settled()
    }

    fn gates(&self) -> StepGates {
        StepGates {
            cart_ready: !self.cart.is_empty(),
            identity_ready: self.user.is_some() || self.continued_as_guest,
            address_valid: self.address_valid(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the cart, the regions and the profile, and re-resolve delivery
    /// for a restored draft.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart cannot be loaded.
    #[instrument(skip(self))]
    pub async fn open(&mut self) -> Result<()> {
        if let Err(e) = self.cart.load().await {
            self.fail(&e);
            return Err(e);
        }
        self.load_regions().await;
        self.hydrate_profile().await;
        self.resolve_delivery().await;
        Ok(())
    }

    /// Fetch the region list. Failures leave it empty and show a toast.
    pub async fn load_regions(&mut self) {
        match self.parts.account.regions().await {
            Ok(regions) => self.regions = regions,
            Err(e) => self.fail(&CheckoutError::from(e)),
        }
    }

    /// Pre-fill blank address fields from the member's profile.
    async fn hydrate_profile(&mut self) {
        let Some(user) = &self.user else {
            return;
        };
        match self.parts.account.profile(&user.id).await {
            Ok(profile) => {
                self.address.fill_missing_from(&profile);
                self.save_draft(StorageKey::DraftAddress);
            }
            Err(e) => tracing::warn!(error = %e, "Profile hydration failed"),
        }
    }

    /// Switch to a signed-in member.
    ///
    /// # Errors
    ///
    /// Returns an error if the member's cart cannot be loaded.
    pub async fn sign_in(&mut self, user: SessionUser) -> Result<()> {
        set_sentry_user(&user.id, user.email.as_deref());
        self.cart.set_owner(CartOwner::Member(user.id.clone()));
        self.user = Some(user);
        self.steps.set_authenticated(true);
        self.hydrate_profile().await;
        let loaded = self.cart.load().await.map(|_| ());
        if let Err(e) = &loaded {
            self.fail(e);
        }
        self.resolve_delivery().await;
        loaded
    }

    /// Leave the Login step without an account.
    pub fn continue_as_guest(&mut self) -> bool {
        self.continued_as_guest = true;
        self.steps.continue_as_guest()
    }

    /// Sign out and forget checkout drafts.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be cleared or the guest cart
    /// cannot be loaded.
    pub async fn logout(&mut self) -> Result<()> {
        clear_sentry_user();
        self.parts.store.clear_on_logout()?;
        self.user = None;
        self.continued_as_guest = false;
        self.address = Address::default();
        self.payment_method = PaymentMethod::default();
        if let DeliveryState::Gig(quoter) = &self.delivery {
            quoter.reset();
        }
        self.delivery = self.parts.delivery.fresh(self.delivery.method());
        self.steps.set_authenticated(false);
        self.cart.set_owner(CartOwner::Guest);
        self.cart.load().await?;
        Ok(())
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Increment a line and re-quote.
    ///
    /// # Errors
    ///
    /// Returns the cart error after it has been shown.
    pub async fn increment(&mut self, product_id: &ProductId) -> Result<()> {
        let result = self.cart.increment(product_id).await;
        self.refresh_live_quote();
        result
    }

    /// Decrement a line and re-quote.
    ///
    /// # Errors
    ///
    /// Returns the cart error after it has been shown.
    pub async fn decrement(&mut self, product_id: &ProductId) -> Result<()> {
        let result = self.cart.decrement(product_id).await;
        self.refresh_live_quote();
        result
    }

    /// Add a product and re-quote.
    ///
    /// # Errors
    ///
    /// Returns the cart error after it has been shown.
    pub async fn add_to_cart(&mut self, product_id: &ProductId, quantity: Quantity) -> Result<()> {
        let result = self.cart.add(product_id, quantity).await;
        self.refresh_live_quote();
        result
    }

    /// Remove a line and re-quote.
    ///
    /// # Errors
    ///
    /// Returns the cart error after it has been shown.
    pub async fn remove_from_cart(&mut self, product_id: &ProductId) -> Result<()> {
        let result = self.cart.remove(product_id).await;
        self.refresh_live_quote();
        result
    }

    // =========================================================================
    // Address & delivery
    // =========================================================================

    /// Edit one address field, persisting the draft.
    pub async fn update_address(&mut self, field: AddressField, value: impl Into<String> + Send) {
        if !self.address.set(field, value) {
            return;
        }
        if field == AddressField::Region {
            // Typed region names lose their id until one is picked again.
            self.address.region_id = None;
            self.address.clear_delivery_location();
        }
        self.save_draft(StorageKey::DraftAddress);
        if field == AddressField::Region {
            self.resolve_delivery().await;
        } else if field.affects_quote() {
            self.refresh_live_quote();
        }
    }

    /// Apply a whole address, e.g. one resolved from a suggestion.
    pub async fn replace_address(&mut self, address: Address) {
        if address == self.address {
            return;
        }
        let region_changed = address.region_id != self.address.region_id;
        self.address = address;
        self.save_draft(StorageKey::DraftAddress);
        if region_changed {
            self.resolve_delivery().await;
        } else {
            self.refresh_live_quote();
        }
    }

    /// Address suggestions for what the customer has typed so far.
    ///
    /// Returns `None` when a newer lookup superseded this one.
    pub async fn suggest_addresses(&self, query: &str) -> Option<Vec<Prediction>> {
        let recent = self.parts.store.recent_addresses().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read recent addresses");
            Vec::new()
        });
        self.parts.suggestions.suggest(query, &recent).await
    }

    /// Fill the address from a chosen suggestion.
    ///
    /// A recent address goes into the first address line as it was typed;
    /// provider suggestions are resolved into structured fields. A region
    /// name without an id is matched against the region list, and dropped
    /// when GAPA delivery does not serve it.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider lookup fails. The address is left
    /// unchanged.
    pub async fn apply_suggestion(&mut self, prediction: &Prediction) -> Result<()> {
        let mut address = self.address.clone();
        if prediction.provider == RECENT_PROVIDER {
            address.address1.clone_from(&prediction.description);
        } else {
            let details = match self.parts.suggestions.cascade().details(prediction).await {
                Ok(details) => details,
                Err(e) => {
                    let err = CheckoutError::from(e);
                    self.fail(&err);
                    return Err(err);
                }
            };
            details.apply_to(&mut address);
            if let Some(coordinates) = details.coordinates {
                self.coordinates = Some(coordinates);
                self.located = true;
            }
        }

        if address.region_id.is_none()
            && let Some(region) = self
                .regions
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(address.region.trim()))
        {
            address.region.clone_from(&region.name);
            address.region_id = Some(region.id.clone());
        }
        if self.delivery.method() == DeliveryMethod::Gapa
            && !address.region.is_empty()
            && !self.parts.delivery.flat_rate().is_allowed(&address.region)
        {
            address.clear_region();
        }

        self.replace_address(address).await;
        Ok(())
    }

    /// Pick a region from [`Self::regions`].
    ///
    /// # Errors
    ///
    /// Returns an error if the region is unknown, not served by GAPA
    /// delivery, or its price table cannot be fetched.
    #[instrument(skip(self), fields(region_id = %region_id))]
    pub async fn select_region(&mut self, region_id: &RegionId) -> Result<()> {
        let Some(region) = self.regions.iter().find(|r| &r.id == region_id).cloned() else {
            let err = CheckoutError::InvalidState("Please choose a region from the list".to_string());
            self.fail(&err);
            return Err(err);
        };
        if self.delivery.method() == DeliveryMethod::Gapa
            && !self.parts.delivery.flat_rate().is_allowed(&region.name)
        {
            let err = CheckoutError::InvalidState(format!(
                "GAPA delivery is only available in {}",
                self.parts.delivery.flat_rate().allowed_regions().join(", ")
            ));
            self.fail(&err);
            return Err(err);
        }

        self.address.clear_region();
        self.address.region = region.name;
        self.address.region_id = Some(region.id);
        self.save_draft(StorageKey::DraftAddress);
        self.resolve_delivery().await;
        Ok(())
    }

    /// Pick a location from the flat-rate table.
    ///
    /// # Errors
    ///
    /// Returns an error if GAPA delivery is not active or the location is
    /// not in the current table.
    pub fn select_location(&mut self, location_id: &LocationId) -> Result<()> {
        let selected = self.delivery.flat_rate_mut().and_then(|quote| {
            if quote.select(location_id) {
                quote.selected.clone()
            } else {
                None
            }
        });
        let Some(location) = selected else {
            let err = CheckoutError::InvalidState("That delivery location is not available".to_string());
            self.fail(&err);
            return Err(err);
        };
        self.address.delivery_location_id = Some(location.id);
        self.address.delivery_location_name = Some(location.name);
        self.save_draft(StorageKey::DraftAddress);
        Ok(())
    }

    /// Change the delivery method, resetting the previous method's state.
    pub async fn switch_delivery_method(&mut self, method: DeliveryMethod) {
        if !self.parts.delivery.switch(&mut self.delivery, method) {
            return;
        }
        self.save_draft(StorageKey::DraftDeliveryMethod);
        self.address.clear_delivery_location();
        if method == DeliveryMethod::Gapa
            && !self.address.region.is_empty()
            && !self.parts.delivery.flat_rate().is_allowed(&self.address.region)
        {
            self.address.clear_region();
        }
        self.save_draft(StorageKey::DraftAddress);
        self.resolve_delivery().await;
    }

    /// Recompute the active strategy's price from the current address.
    async fn resolve_delivery(&mut self) {
        match self.delivery.method() {
            DeliveryMethod::Gapa => self.resolve_flat_rate().await,
            DeliveryMethod::Gig => self.refresh_live_quote(),
        }
    }

    async fn resolve_flat_rate(&mut self) {
        let Some(region_id) = self.address.region_id.clone() else {
            self.delivery = DeliveryState::Gapa(FlatRateQuote::default());
            return;
        };
        if !self.parts.delivery.flat_rate().is_allowed(&self.address.region) {
            tracing::info!(region = %self.address.region, "Region not served by GAPA delivery");
            self.parts.notifier.notify(Toast::info(format!(
                "GAPA delivery is only available in {}",
                self.parts.delivery.flat_rate().allowed_regions().join(", ")
            )));
            self.address.clear_region();
            self.save_draft(StorageKey::DraftAddress);
            self.delivery = DeliveryState::Gapa(FlatRateQuote::default());
            return;
        }
        self.delivery = DeliveryState::Gapa(FlatRateQuote::pending(region_id.clone()));

        match self.parts.delivery.flat_rate().resolve(&region_id).await {
            Ok(mut quote) => {
                if quote.unavailable {
                    self.parts
                        .notifier
                        .notify(Toast::error("We can't ship to this location"));
                }
                // Keep a restored pickup choice if the table still has it.
                if quote.selected.is_none()
                    && let Some(saved) = &self.address.delivery_location_id
                {
                    quote.select(saved);
                }
                match &quote.selected {
                    Some(location) => {
                        self.address.delivery_location_id = Some(location.id.clone());
                        self.address.delivery_location_name = Some(location.name.clone());
                    }
                    None => self.address.clear_delivery_location(),
                }
                self.save_draft(StorageKey::DraftAddress);
                self.delivery = DeliveryState::Gapa(quote);
            }
            Err(e) => {
                self.delivery = DeliveryState::Gapa(FlatRateQuote::default());
                self.fail(&CheckoutError::from(e));
            }
        }
    }

    /// Schedule a live quote if GIG is active.
    ///
    /// The first call also starts a device location lookup in the
    /// background; the quote goes out without coordinates and is re-sent
    /// with them once they arrive.
    fn refresh_live_quote(&mut self) {
        if self.delivery.method() != DeliveryMethod::Gig {
            return;
        }
        if self.coordinates.is_none() {
            self.coordinates = *self.position.borrow();
        }
        let request = self.parts.delivery.quote_request(
            self.cart.lines(),
            &self.address,
            self.coordinates,
            self.user.as_ref().map(|u| &u.id),
        );
        if let Some(quoter) = self.delivery.live() {
            quoter.schedule(request);
        }
        if !self.located {
            self.located = true;
            self.spawn_locate();
        }
    }

    fn spawn_locate(&self) {
        let Some(quoter) = self.delivery.live().cloned() else {
            return;
        };
        let source = Arc::clone(&self.parts.location);
        let timeout = self.parts.geolocation_timeout;
        let position = Arc::clone(&self.position);

        tokio::spawn(async move {
            if let Some(coords) = geolocation::locate(source.as_ref(), timeout).await {
                position.send_replace(Some(coords));
                quoter.requote_at(coords);
            }
        });
    }

    // =========================================================================
    // Navigation & payment
    // =========================================================================

    /// Move forward if the current step allows it.
    ///
    /// Leaving the Address step also saves the address (best effort).
    ///
    /// # Errors
    ///
    /// Returns why the step cannot be left; nothing changes.
    pub async fn next(&mut self) -> std::result::Result<CheckoutStep, Blocked> {
        let leaving = self.steps.current();
        let next = self.steps.advance(self.gates())?;
        if leaving == CheckoutStep::Address {
            self.submit_address().await;
        }
        Ok(next)
    }

    pub fn back(&mut self) -> bool {
        self.steps.go_back()
    }

    pub fn jump_to(&mut self, index: usize) -> bool {
        self.steps.jump_to(index)
    }

    pub fn set_payment_method(&mut self, method: PaymentMethod) {
        if self.payment_method != method {
            self.payment_method = method;
            self.save_draft(StorageKey::DraftPaymentMethod);
        }
    }

    fn full_address_string(&self) -> String {
        self.address
            .full_address_string(self.delivery.method().label())
    }

    /// Remember the address and store it on the account. Never fails.
    async fn submit_address(&self) {
        let full_address = self.full_address_string();
        if let Err(e) = self.parts.store.push_recent_address(&self.address.street_line()) {
            tracing::warn!(error = %e, "Failed to remember address");
        }
        if let Some(user) = &self.user
            && let Err(e) = self
                .parts
                .account
                .save_delivery_address(&user.id, &self.address, &full_address)
                .await
        {
            tracing::warn!(error = %e, "Saving delivery address failed");
        }
    }

    /// Pay for the order from the Review step.
    ///
    /// # Errors
    ///
    /// Returns an error if not on Review or the payment does not complete.
    /// The session stays on Review with cart and drafts intact.
    #[instrument(skip(self), fields(method = %self.payment_method))]
    pub async fn place_order(&mut self) -> Result<SuccessRedirect> {
        if self.steps.current() != CheckoutStep::Review || !self.address_valid() {
            let err = CheckoutError::InvalidState("Please complete checkout before paying".to_string());
            self.fail(&err);
            return Err(err);
        }

        let totals = self.totals();
        let order = OrderRequest {
            method: self.payment_method,
            total: totals.total,
            shipping_cost: totals.delivery,
            full_address_string: self.full_address_string(),
            user_id: self.user.as_ref().map(|u| u.id.clone()),
            pickup_location_id: self
                .delivery
                .flat_rate()
                .and_then(|q| q.selected.as_ref())
                .map(|l| l.id.to_string()),
            email: self.address.email.clone(),
            customer_name: self.address.full_name.clone(),
            phone: self.address.phone.clone(),
        };

        match self.parts.payments.pay(&order).await {
            Ok(redirect) => {
                if let Err(e) = self.cart.clear_after_order() {
                    tracing::warn!(error = %e, "Failed to clear cart after order");
                }
                self.parts
                    .notifier
                    .notify(Toast::success("Payment successful, thank you for your order"));
                Ok(redirect)
            }
            Err(e) => {
                let err = CheckoutError::from(e);
                self.fail(&err);
                Err(err)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn fail(&self, err: &CheckoutError) {
        err.report();
        self.parts.notifier.notify(Toast::error(err.user_message()));
    }

    fn save_draft(&self, key: StorageKey) {
        let saved = match key {
            StorageKey::DraftAddress => self.parts.store.save(key, &self.address),
            StorageKey::DraftPaymentMethod => self.parts.store.save(key, &self.payment_method),
            StorageKey::DraftDeliveryMethod => self.parts.store.save(key, &self.delivery.method()),
            _ => Ok(()),
        };
        if let Err(e) = saved {
            tracing::warn!(key = key.as_str(), error = %e, "Failed to save checkout draft");
        }
    }
}

fn restore<T: serde::de::DeserializeOwned + Default>(store: &PersistenceGateway, key: StorageKey) -> T {
    store.load(key).ok().flatten().unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use gapa_core::{CurrencyCode, GuestCart};
    use rust_decimal::Decimal;

    use super::*;
    use crate::cart::tests::FakeCartBackend;
    use crate::delivery::flat_rate::tests::tables;
    use crate::delivery::{Carrier, LiveQuote, QuoteError, QuoteRequest};
    use crate::geocode::tests::FakeProvider;
    use crate::geolocation::{LocationError, NoLocation};
    use crate::notify::{ToastLevel, ToastLog};
    use crate::payment::gateway::tests::FakeHost;
    use crate::payment::tests::{FakeConfirmer, keys};
    use crate::payment::PopupOutcome;

    #[derive(Default)]
    struct FakeAccount {
        saved: Mutex<Vec<String>>,
        fail_save: bool,
        profile_region: Option<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl AccountBackend for FakeAccount {
        async fn regions(&self) -> std::result::Result<Vec<Region>, BackendError> {
            Ok(vec![
                Region {
                    id: RegionId::new("1"),
                    name: "Lagos".into(),
                },
                Region {
                    id: RegionId::new("2"),
                    name: "Abuja".into(),
                },
                Region {
                    id: RegionId::new("3"),
                    name: "Kano".into(),
                },
            ])
        }

        async fn profile(&self, _: &UserId) -> std::result::Result<Address, BackendError> {
            let (region, region_id) = self
                .profile_region
                .map_or((String::new(), None), |(id, name)| {
                    (name.to_owned(), Some(RegionId::new(id)))
                });
            Ok(Address {
                full_name: "Profile Name".into(),
                email: "member@example.com".into(),
                phone: "08011111111".into(),
                address1: "5 Awolowo Road".into(),
                region,
                region_id,
                ..Address::default()
            })
        }

        async fn save_delivery_address(
            &self,
            _: &UserId,
            _: &Address,
            full_address: &str,
        ) -> std::result::Result<(), BackendError> {
            if self.fail_save {
                return Err(BackendError::Api {
                    status: 500,
                    message: "down".into(),
                });
            }
            self.saved.lock().unwrap().push(full_address.to_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FixedCarrier {
        requests: Mutex<Vec<QuoteRequest>>,
    }

    #[async_trait]
    impl Carrier for FixedCarrier {
        async fn quote(&self, request: &QuoteRequest) -> std::result::Result<Decimal, QuoteError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(Decimal::from(3200))
        }
    }

    struct NeverLocates;

    #[async_trait]
    impl LocationSource for NeverLocates {
        async fn current_position(&self) -> std::result::Result<Coordinates, LocationError> {
            std::future::pending().await
        }
    }

    struct SlowLocation(Coordinates);

    #[async_trait]
    impl LocationSource for SlowLocation {
        async fn current_position(&self) -> std::result::Result<Coordinates, LocationError> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(self.0)
        }
    }

    struct Harness {
        store: PersistenceGateway,
        toasts: ToastLog,
        account: Arc<FakeAccount>,
        confirmer: Arc<FakeConfirmer>,
        carrier: Arc<FixedCarrier>,
        parts: SessionParts,
    }

    fn harness(outcome: PopupOutcome) -> Harness {
        let store = PersistenceGateway::in_memory();
        let toasts = ToastLog::new();
        let notifier: Arc<dyn Notifier> = Arc::new(toasts.clone());
        let account = Arc::new(FakeAccount::default());
        let confirmer = Arc::new(FakeConfirmer::default());
        let carrier = Arc::new(FixedCarrier::default());
        let cart_backend = FakeCartBackend::default().with_product("P1", "Brake pad", 40_000);
        let parts = SessionParts {
            cart_backend: Arc::new(cart_backend),
            account: account.clone(),
            delivery: DeliveryResolver::new(
                FlatRateResolver::new(Arc::new(tables()), vec!["Lagos".into(), "Abuja".into()]),
                carrier.clone(),
                Arc::clone(&notifier),
                Duration::from_millis(400),
                4,
            ),
            payments: Arc::new(PaymentDispatcher::new(
                Arc::new(FakeHost::new(outcome)),
                confirmer.clone(),
                store.clone(),
                keys(),
                CurrencyCode::ngn(),
            )),
            suggestions: SuggestionFeed::new(Arc::new(GeocodeCascade::new(vec![
                FakeProvider::answering("nominatim", vec!["Allen Avenue"]),
            ]))),
            location: Arc::new(NoLocation),
            geolocation_timeout: Duration::from_secs(8),
            store: store.clone(),
            notifier,
        };
        Harness {
            store,
            toasts,
            account,
            confirmer,
            carrier,
            parts,
        }
    }

    fn member_with_region(h: &mut Harness, region: (&'static str, &'static str)) {
        h.account = Arc::new(FakeAccount {
            profile_region: Some(region),
            ..FakeAccount::default()
        });
        h.parts.account = h.account.clone();
    }

    fn member() -> SessionUser {
        SessionUser {
            id: UserId::new("u1"),
            email: None,
        }
    }

    fn seed_guest_cart(store: &PersistenceGateway) {
        let mut cart = GuestCart::default();
        cart.add(ProductId::new("P1"), Quantity::new(2));
        store.save(StorageKey::GuestCart, &cart).unwrap();
    }

    async fn fill_contact(session: &mut CheckoutSession) {
        session.update_address(AddressField::FullName, "Ada Obi").await;
        session.update_address(AddressField::Email, "ada@example.com").await;
        session.update_address(AddressField::Phone, "08030000000").await;
        session.update_address(AddressField::Address1, "12 Allen Avenue").await;
    }

    #[tokio::test]
    async fn test_guest_checkout_scenario() {
        let h = harness(PopupOutcome::Success {
            reference: "GAPA_PSK_42".into(),
        });
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();

        assert_eq!(session.next().await, Ok(CheckoutStep::Login));
        assert!(session.continue_as_guest());
        fill_contact(&mut session).await;
        assert!(!session.address_valid());

        session.select_region(&RegionId::new("1")).await.unwrap();
        assert!(session.address_valid());
        let totals = session.totals();
        assert_eq!(totals.subtotal, Decimal::from(80_000));
        assert_eq!(totals.vat, Decimal::from(6000));
        assert_eq!(totals.delivery, Decimal::from(1500));
        assert_eq!(totals.total, Decimal::from(87_500));

        assert_eq!(session.next().await, Ok(CheckoutStep::Payment));
        assert_eq!(session.next().await, Ok(CheckoutStep::Review));
        let redirect = session.place_order().await.unwrap();
        assert_eq!(redirect.query_string(), "?ref=GAPA_PSK_42&amount=87500");

        let confirmed = h.confirmer.confirmed.lock().unwrap()[0].clone();
        assert_eq!(confirmed.transaction_reference, "GAPA_PSK_42");
        assert_eq!(confirmed.pickup_location_id.as_deref(), Some("7"));
        assert!(confirmed.full_address_string.ends_with("| Delivery: GAPA Delivery"));
        assert_eq!(h.store.guest_cart().unwrap(), GuestCart::default());
        assert_eq!(
            h.store.recent_addresses().unwrap(),
            vec!["12 Allen Avenue, Lagos".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_suggestion_resolves_region_and_price() {
        let h = harness(PopupOutcome::Closed);
        seed_guest_cart(&h.store);
        h.store.push_recent_address("12 Allen Avenue, Lagos").unwrap();
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();

        let suggestions = session.suggest_addresses("allen").await.unwrap();
        assert_eq!(suggestions[0].provider, RECENT_PROVIDER);
        assert_eq!(suggestions[1].provider, "nominatim");

        session.apply_suggestion(&suggestions[1]).await.unwrap();
        assert_eq!(session.address().address1, "Allen Avenue");
        assert_eq!(session.address().region_id, Some(RegionId::new("1")));
        assert_eq!(session.delivery().effective_price(), Decimal::from(1500));

        session.apply_suggestion(&suggestions[0]).await.unwrap();
        assert_eq!(session.address().address1, "12 Allen Avenue, Lagos");
        assert_eq!(session.address().region, "Lagos");
    }

    #[tokio::test]
    async fn test_region_outside_allow_list_refused() {
        let h = harness(PopupOutcome::Closed);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        assert_eq!(session.regions().len(), 2);

        assert!(session.select_region(&RegionId::new("3")).await.is_err());
        assert!(session.address().region.is_empty());
        assert_eq!(h.toasts.drain().last().unwrap().level, ToastLevel::Error);
    }

    #[tokio::test]
    async fn test_several_locations_need_a_pick() {
        let h = harness(PopupOutcome::Closed);
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        fill_contact(&mut session).await;

        session.select_region(&RegionId::new("2")).await.unwrap();
        assert_eq!(session.delivery().effective_price(), Decimal::ZERO);
        assert!(!session.address_valid());

        session.select_location(&LocationId::new("9")).unwrap();
        assert_eq!(session.delivery().effective_price(), Decimal::from(2500));
        assert!(session.address_valid());
        assert_eq!(session.address().delivery_location_name.as_deref(), Some("Hub 9"));
    }

    #[tokio::test]
    async fn test_switch_to_gig_resets_quote_and_clears_pickup() {
        let h = harness(PopupOutcome::Closed);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        session.select_region(&RegionId::new("1")).await.unwrap();
        assert_eq!(session.delivery().effective_price(), Decimal::from(1500));

        // Empty cart: nothing to quote, so the fresh state stays untouched.
        session.switch_delivery_method(DeliveryMethod::Gig).await;
        assert_eq!(session.delivery().live().unwrap().current(), LiveQuote::default());
        assert!(session.address().delivery_location_id.is_none());
        assert!(!session.address_valid());

        let restored = CheckoutSession::new(h.parts.clone(), None);
        assert_eq!(restored.delivery().method(), DeliveryMethod::Gig);
    }

    #[tokio::test]
    async fn test_switch_to_gapa_clears_disallowed_region() {
        let h = harness(PopupOutcome::Closed);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        session.switch_delivery_method(DeliveryMethod::Gig).await;
        session.select_region(&RegionId::new("3")).await.unwrap();
        assert_eq!(session.address().region, "Kano");

        session.switch_delivery_method(DeliveryMethod::Gapa).await;
        assert!(session.address().region.is_empty());
        assert!(session.address().region_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gig_quote_gates_address_step() {
        let h = harness(PopupOutcome::Closed);
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        session.switch_delivery_method(DeliveryMethod::Gig).await;
        fill_contact(&mut session).await;
        session.select_region(&RegionId::new("3")).await.unwrap();

        // Scheduled but not yet settled.
        assert!(session.delivery().live().unwrap().current().loading);
        assert!(!session.address_valid());

        let mut state = session.delivery().live().unwrap().subscribe();
        state.wait_for(LiveQuote::is_settled).await.unwrap();
        assert!(session.address_valid());
        assert_eq!(session.totals().delivery, Decimal::from(3200));
    }

    #[tokio::test]
    async fn test_member_profile_prefills_without_overwriting() {
        let h = harness(PopupOutcome::Closed);
        h.store
            .save(
                StorageKey::DraftAddress,
                &Address {
                    full_name: "Typed Name".into(),
                    ..Address::default()
                },
            )
            .unwrap();
        let user = SessionUser {
            id: UserId::new("u1"),
            email: None,
        };
        let mut session = CheckoutSession::new(h.parts.clone(), Some(user));
        session.open().await.unwrap();
        assert_eq!(session.address().full_name, "Typed Name");
        assert_eq!(session.address().email, "member@example.com");
        assert_eq!(session.steps().steps().len(), 4);
    }

    #[tokio::test]
    async fn test_address_save_failure_is_swallowed() {
        let mut h = harness(PopupOutcome::Closed);
        h.account = Arc::new(FakeAccount {
            fail_save: true,
            ..FakeAccount::default()
        });
        h.parts.account = h.account.clone();
        let user = SessionUser {
            id: UserId::new("u1"),
            email: None,
        };
        let mut session = CheckoutSession::new(h.parts.clone(), Some(user));
        session.open().await.unwrap();
        session.cart.add(&ProductId::new("P1"), Quantity::new(1)).await.unwrap();
        session.update_address(AddressField::Address1, "12 Allen Avenue").await;
        session.select_region(&RegionId::new("1")).await.unwrap();

        assert_eq!(session.next().await, Ok(CheckoutStep::Address));
        assert_eq!(session.next().await, Ok(CheckoutStep::Payment));
        assert!(h.account.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_payment_stays_on_review() {
        let h = harness(PopupOutcome::Closed);
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        session.next().await.unwrap();
        session.continue_as_guest();
        fill_contact(&mut session).await;
        session.select_region(&RegionId::new("1")).await.unwrap();
        session.next().await.unwrap();
        session.next().await.unwrap();

        assert!(session.place_order().await.is_err());
        assert_eq!(session.step(), CheckoutStep::Review);
        assert!(!h.store.guest_cart().unwrap().is_empty());
        assert_eq!(h.toasts.drain().last().unwrap().message, "Payment was cancelled");
    }

    #[tokio::test]
    async fn test_logout_keeps_whitelisted_keys() {
        let h = harness(PopupOutcome::Closed);
        seed_guest_cart(&h.store);
        let user = SessionUser {
            id: UserId::new("u1"),
            email: None,
        };
        let mut session = CheckoutSession::new(h.parts.clone(), Some(user));
        session.open().await.unwrap();
        session.set_payment_method(PaymentMethod::Flutterwave);
        session.logout().await.unwrap();

        assert!(h.store.load::<Address>(StorageKey::DraftAddress).unwrap().is_none());
        assert!(
            h.store
                .load::<PaymentMethod>(StorageKey::DraftPaymentMethod)
                .unwrap()
                .is_none()
        );
        assert!(!h.store.guest_cart().unwrap().is_empty());
        assert_eq!(session.step(), CheckoutStep::Cart);
        assert_eq!(session.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_typed_region_drops_previous_quote() {
        let h = harness(PopupOutcome::Success {
            reference: "GAPA_PSK_1".into(),
        });
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        session.next().await.unwrap();
        session.continue_as_guest();
        fill_contact(&mut session).await;
        session.select_region(&RegionId::new("1")).await.unwrap();
        assert!(session.address_valid());

        session.update_address(AddressField::Region, "Kano").await;
        assert_eq!(session.address().region, "Kano");
        assert_eq!(session.delivery().effective_price(), Decimal::ZERO);
        assert!(session.delivery().flat_rate().unwrap().selected.is_none());
        assert!(session.address().delivery_location_id.is_none());
        assert!(!session.address_valid());
        assert!(session.next().await.is_err());
        assert_eq!(session.step(), CheckoutStep::Address);
        assert!(h.confirmer.confirmed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profile_region_outside_allow_list_not_priced() {
        let mut h = harness(PopupOutcome::Closed);
        member_with_region(&mut h, ("3", "Kano"));
        let mut session = CheckoutSession::new(h.parts.clone(), Some(member()));
        session.open().await.unwrap();

        assert!(session.address().region.is_empty());
        assert!(session.address().region_id.is_none());
        assert_eq!(session.delivery().flat_rate(), Some(&FlatRateQuote::default()));
        assert!(!session.address_valid());

        let notice = h.toasts.drain().pop().unwrap();
        assert_eq!(notice.level, ToastLevel::Info);
        assert_eq!(notice.message, "GAPA delivery is only available in Lagos, Abuja");
    }

    #[tokio::test]
    async fn test_sign_in_prices_profile_region() {
        let mut h = harness(PopupOutcome::Closed);
        member_with_region(&mut h, ("1", "Lagos"));
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        assert_eq!(session.delivery().effective_price(), Decimal::ZERO);

        session.sign_in(member()).await.unwrap();
        assert_eq!(session.address().region_id, Some(RegionId::new("1")));
        assert_eq!(session.delivery().effective_price(), Decimal::from(1500));
        assert_eq!(
            session.address().delivery_location_id,
            Some(LocationId::new("7"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_gig_does_not_wait_for_location() {
        let mut h = harness(PopupOutcome::Closed);
        h.parts.location = Arc::new(NeverLocates);
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        fill_contact(&mut session).await;
        session.update_address(AddressField::Region, "Kano").await;

        let started = tokio::time::Instant::now();
        session.switch_delivery_method(DeliveryMethod::Gig).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(session.delivery().live().unwrap().current().loading);

        let mut state = session.delivery().live().unwrap().subscribe();
        state.wait_for(LiveQuote::is_settled).await.unwrap();
        assert!(started.elapsed() < h.parts.geolocation_timeout);
        assert_eq!(session.totals().delivery, Decimal::from(3200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_location_requotes_when_it_arrives() {
        let here = Coordinates {
            latitude: 6.6018,
            longitude: 3.3515,
        };
        let mut h = harness(PopupOutcome::Closed);
        h.parts.location = Arc::new(SlowLocation(here));
        seed_guest_cart(&h.store);
        let mut session = CheckoutSession::new(h.parts.clone(), None);
        session.open().await.unwrap();
        fill_contact(&mut session).await;
        session.switch_delivery_method(DeliveryMethod::Gig).await;
        session.update_address(AddressField::Region, "Kano").await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        let requests = h.carrier.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].receiver_latitude, None);
        assert_eq!(requests[1].receiver_latitude, Some(here.latitude));
        assert_eq!(requests[1].receiver_longitude, Some(here.longitude));

        // Later edits keep the position.
        session.update_address(AddressField::City, "Nassarawa").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let last = h.carrier.requests.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.destination_city, "Nassarawa");
        assert_eq!(last.receiver_latitude, Some(here.latitude));
    }
}
