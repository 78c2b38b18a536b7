//! Four-step checkout state machine.
//!
//! `CustomerInfo → Shipping → Payment → Confirmation`. The orchestrator
//! works on a snapshot of the cart taken by [`CheckoutOrchestrator::start`]
//! and only moves forward when the gate of every step it crosses passes.
//! Step events (`customer_info_updated`, `shipping_address_updated`,
//! `shipping_method_selected`, `payment_method_selected`,
//! `payment_succeeded`) are the only way data enters the state.
//!
//! Field errors are namespaced by section: `customer.*`, `address.*`,
//! `shipping_method`, `payment_method` and `payment`.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::backend::{CheckoutApi, PaymentGateway, StartCheckoutRequest, StockQuery};
use crate::cart::{CartItem, CartSummary, Coupon};
use crate::checkout::payment::{GatewayAnswer, PaymentForm, PaymentGatewayAdapter, PaymentOutcome};
use crate::checkout::state::{CheckoutState, CheckoutStep, InFlight, PaymentMethod};
use crate::checkout::{CustomerInfo, OrderLine, OrderRequest, ShippingAddress};
use crate::config::{CommerceConfig, PricingConfig};
use crate::error::{CommerceError, FieldErrors};
use crate::ids::{OrderId, ShippingOptionId};
use crate::money::Money;
use crate::shipping::{QuoteKey, ShippingQuote, ShippingRateEngine};

/// Handle for one shipping quote request.
///
/// A ticket goes stale when a newer quote is requested, when the address or
/// cart weight changes, or when the customer navigates back out of the
/// shipping step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteTicket {
    generation: u64,
    key: QuoteKey,
}

impl QuoteTicket {
    pub fn key(&self) -> &QuoteKey {
        &self.key
    }
}

pub struct CheckoutOrchestrator {
    state: CheckoutState,
    api: Arc<dyn CheckoutApi>,
    payment: PaymentGatewayAdapter,
    rates: ShippingRateEngine,
    pricing: PricingConfig,
    quote: Option<ShippingQuote>,
    quote_generation: u64,
}

impl std::fmt::Debug for CheckoutOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("step", &self.state.current_step)
            .field("checkout_token", &self.state.checkout_token)
            .field("payment", &self.payment)
            .finish_non_exhaustive()
    }
}

impl CheckoutOrchestrator {
    pub fn new(
        config: &CommerceConfig,
        api: Arc<dyn CheckoutApi>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let in_progress = InFlight::new();
        Self {
            state: CheckoutState::with_flag(in_progress.clone()),
            payment: PaymentGatewayAdapter::new(
                Arc::clone(&api),
                gateway,
                config.payment.form_token_ttl(),
                in_progress,
            ),
            api,
            rates: ShippingRateEngine::from_config(&config.shipping, config.pricing.currency),
            pricing: config.pricing.clone(),
            quote: None,
            quote_generation: 0,
        }
    }

    /// Use one backend for both the checkout API and the gateway.
    pub fn with_backend<B>(config: &CommerceConfig, backend: Arc<B>) -> Self
    where
        B: CheckoutApi + PaymentGateway + 'static,
    {
        Self::new(config, backend.clone(), backend)
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    pub fn current_step(&self) -> CheckoutStep {
        self.state.current_step
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.state.errors
    }

    pub fn summary(&self) -> Option<&CartSummary> {
        self.state.summary.as_ref()
    }

    /// The current shipping quote, if it still matches the address and cart.
    pub fn quote(&self) -> Option<&ShippingQuote> {
        let key = self.current_quote_key()?;
        self.quote.as_ref().filter(|q| q.is_current_for(&key))
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.in_progress()
    }

    pub fn payment(&self) -> &PaymentGatewayAdapter {
        &self.payment
    }

    pub fn rates(&self) -> &ShippingRateEngine {
        &self.rates
    }

    /// Enter checkout with a snapshot of the cart.
    ///
    /// An empty snapshot is refused; the caller should send the customer
    /// back to the cart view.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn start(
        &mut self,
        items: Vec<CartItem>,
        coupon: Option<Coupon>,
    ) -> Result<(), CommerceError> {
        if items.is_empty() {
            error!("checkout started with an empty cart");
            return Err(CommerceError::InvariantViolation(
                "cannot start checkout with an empty cart".into(),
            ));
        }
        let _guard = self.state.in_progress.acquire("checkout")?;
        self.reset_state();
        self.payment.reset();

        let summary = CartSummary::compute(&items, coupon.as_ref(), None, &self.pricing)?;
        let request = StartCheckoutRequest {
            items: items
                .iter()
                .map(|item| StockQuery {
                    product_id: item.product_id.clone(),
                    variation_id: item.variation_id.clone(),
                    quantity: item.quantity,
                })
                .collect(),
            coupon_code: coupon.as_ref().map(|c| c.code.clone()),
        };
        let token = self.api.start_checkout(&request).await.map_err(|e| {
            warn!(error = %e, "checkout could not start");
            e
        })?;

        info!(checkout_token = %token, total = %summary.total.display(), "checkout started");
        self.state.items = items;
        self.state.coupon = coupon;
        self.state.summary = Some(summary);
        self.state.checkout_token = Some(token);
        Ok(())
    }

    /// Step 1 data. Advances to shipping when valid and at step 1.
    pub fn customer_info_updated(&mut self, info: CustomerInfo) -> Result<(), CommerceError> {
        self.ensure_editable()?;
        let errors = info.validate().with_prefix("customer.");
        self.state.customer_info = Some(info);
        self.state.errors.clear_prefix("customer.");
        if !errors.is_empty() {
            debug!(fields = errors.len(), "customer info incomplete");
            self.state.errors.extend(errors.clone());
            return Err(CommerceError::StepIncomplete {
                step: CheckoutStep::CustomerInfo,
                errors,
            });
        }

        if self.state.current_step == CheckoutStep::CustomerInfo {
            self.advance_to(CheckoutStep::Shipping)?;
        }
        Ok(())
    }

    /// Step 2 address. Validates it and re-quotes shipping.
    pub fn shipping_address_updated(
        &mut self,
        address: ShippingAddress,
    ) -> Result<ShippingQuote, CommerceError> {
        self.ensure_editable()?;
        self.state.errors.clear_prefix("address.");
        self.state.errors.clear_prefix("shipping_method");

        let errors = address.validate().with_prefix("address.");
        self.state.shipping_address = Some(address);
        if !errors.is_empty() {
            self.discard_quote()?;
            self.state.errors.extend(errors.clone());
            return Err(CommerceError::StepIncomplete {
                step: CheckoutStep::Shipping,
                errors,
            });
        }

        let ticket = self.request_quote()?;
        match self.compute_quote() {
            Ok(quote) => {
                self.apply_quote(&ticket, quote.clone())?;
                Ok(quote)
            }
            Err(CommerceError::UnknownDistrict(destination)) => {
                self.discard_quote()?;
                let mut errors = FieldErrors::new();
                errors.insert("address.district", format!("We do not deliver to {destination}"));
                self.state.errors.extend(errors.clone());
                Err(CommerceError::StepIncomplete {
                    step: CheckoutStep::Shipping,
                    errors,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Start a quote for the current address and cart.
    ///
    /// Any earlier ticket becomes stale.
    pub fn request_quote(&mut self) -> Result<QuoteTicket, CommerceError> {
        let key = self.current_quote_key().ok_or_else(|| {
            CommerceError::InvariantViolation("no shipping address to quote".into())
        })?;
        self.quote_generation += 1;
        Ok(QuoteTicket {
            generation: self.quote_generation,
            key,
        })
    }

    /// Install a quote computed for `ticket`.
    ///
    /// Returns `false` and leaves the state untouched when the ticket is stale.
    /// The previous selection is kept when the new quote still offers it,
    /// otherwise the quote's default option is selected.
    pub fn apply_quote(
        &mut self,
        ticket: &QuoteTicket,
        quote: ShippingQuote,
    ) -> Result<bool, CommerceError> {
        let current = self.current_quote_key();
        if ticket.generation != self.quote_generation
            || !quote.is_current_for(&ticket.key)
            || current.as_ref() != Some(&ticket.key)
        {
            debug!(generation = ticket.generation, "stale shipping quote discarded");
            return Ok(false);
        }

        let selection = self
            .state
            .shipping_method
            .as_ref()
            .and_then(|selected| quote.option(&selected.id))
            .or_else(|| quote.default_selection())
            .cloned();
        debug!(
            zone = %quote.zone,
            selected = ?selection.as_ref().map(|o| &o.id),
            "shipping quote applied"
        );
        self.state.shipping_method = selection;
        self.quote = Some(quote);
        self.recompute()?;
        Ok(true)
    }

    /// Step 2 choice. Advances to payment when at step 2 and the gate passes.
    pub fn shipping_method_selected(&mut self, id: &ShippingOptionId) -> Result<(), CommerceError> {
        self.ensure_editable()?;
        self.state.errors.clear_prefix("shipping_method");

        let Some(quote) = self.quote() else {
            let mut errors = FieldErrors::new();
            errors.insert("shipping_method", "Enter a delivery address first");
            self.state.errors.extend(errors.clone());
            return Err(CommerceError::StepIncomplete {
                step: CheckoutStep::Shipping,
                errors,
            });
        };
        let option = quote
            .option(id)
            .cloned()
            .ok_or_else(|| CommerceError::UnknownShippingOption(id.to_string()))?;

        info!(option = %id, price = %option.price.display(), "shipping method selected");
        self.state.shipping_method = Some(option);
        self.recompute()?;

        if self.state.current_step == CheckoutStep::Shipping {
            self.advance_to(CheckoutStep::Payment)?;
        }
        Ok(())
    }

    pub fn payment_method_selected(&mut self, method: PaymentMethod) -> Result<(), CommerceError> {
        self.ensure_editable()?;
        self.state.errors.clear_prefix("payment_method");
        self.state.payment_method = Some(method);
        debug!(method = method.as_str(), "payment method selected");
        Ok(())
    }

    /// Create the order and obtain the widget's form token.
    pub async fn prepare_payment(&mut self) -> Result<PaymentForm, CommerceError> {
        self.ensure_started()?;
        if self.state.current_step != CheckoutStep::Payment {
            return Err(CommerceError::InvalidCheckoutTransition {
                from: self.state.current_step,
                to: CheckoutStep::Payment,
            });
        }
        for step in [CheckoutStep::CustomerInfo, CheckoutStep::Shipping] {
            let errors = self.gate(step);
            if !errors.is_empty() {
                self.state.errors.extend(errors.clone());
                return Err(CommerceError::StepIncomplete { step, errors });
            }
        }
        let Some(method) = self.state.payment_method else {
            let mut errors = FieldErrors::new();
            errors.insert("payment_method", "Choose a payment method");
            self.state.errors.extend(errors.clone());
            return Err(CommerceError::StepIncomplete {
                step: CheckoutStep::Payment,
                errors,
            });
        };

        let request = self.order_request(method)?;
        self.state.errors.clear_prefix("payment");
        self.payment.prepare(&request).await
    }

    /// Feed the widget's signed answer through validation.
    pub async fn payment_callback(
        &mut self,
        answer: &GatewayAnswer,
    ) -> Result<PaymentOutcome, CommerceError> {
        match self.payment.handle_callback(answer).await {
            Ok(outcome) => {
                if let PaymentOutcome::Paid { order_id, .. } = &outcome {
                    self.payment_succeeded(order_id.clone())?;
                }
                Ok(outcome)
            }
            Err(e) => {
                if let CommerceError::GatewayRejection { message, .. } = &e {
                    self.state.errors.clear_prefix("payment");
                    self.state.errors.insert("payment", message.clone());
                }
                Err(e)
            }
        }
    }

    /// Step 3 completion. Only accepted for the order the adapter validated.
    pub fn payment_succeeded(&mut self, order_id: OrderId) -> Result<(), CommerceError> {
        if self.payment.validated_order() != Some(&order_id) {
            error!(order_id = %order_id, "payment success for an order that was not validated");
            return Err(CommerceError::InvariantViolation(format!(
                "order {order_id} has no validated payment"
            )));
        }
        info!(order_id = %order_id, from = %self.state.current_step, "payment succeeded");
        self.state.order_id = Some(order_id);
        self.state.errors = FieldErrors::new();
        self.state.current_step = CheckoutStep::Confirmation;
        Ok(())
    }

    /// Navigate to `target`.
    ///
    /// Going back is always allowed and keeps the data. Going forward
    /// re-validates every step crossed.
    pub fn go_to(&mut self, target: CheckoutStep) -> Result<(), CommerceError> {
        self.ensure_started()?;
        if self.is_in_progress() {
            return Err(CommerceError::FlowInProgress("checkout"));
        }
        let current = self.state.current_step;
        if target == current {
            return Ok(());
        }
        if current.is_terminal() {
            return Err(CommerceError::InvalidCheckoutTransition {
                from: current,
                to: target,
            });
        }
        if target < current {
            if current == CheckoutStep::Shipping {
                self.cancel_pending_quote();
            }
            debug!(from = %current, to = %target, "checkout moved back");
            self.state.current_step = target;
            return Ok(());
        }
        self.advance_to(target)
    }

    pub fn go_back(&mut self) -> Result<CheckoutStep, CommerceError> {
        let previous = self.state.current_step.previous().ok_or_else(|| {
            CommerceError::InvalidCheckoutTransition {
                from: self.state.current_step,
                to: self.state.current_step,
            }
        })?;
        self.go_to(previous)?;
        Ok(previous)
    }

    /// Abandon the checkout.
    pub fn cancel(&mut self) {
        info!(step = %self.state.current_step, "checkout cancelled");
        self.reset_state();
        self.payment.reset();
    }

    /// Leave the confirmation step, returning the paid order id.
    pub fn finish(&mut self) -> Result<OrderId, CommerceError> {
        let step = self.state.current_step;
        let order_id = match (&self.state.order_id, step) {
            (Some(order_id), CheckoutStep::Confirmation) => order_id.clone(),
            _ => {
                return Err(CommerceError::InvalidCheckoutTransition {
                    from: step,
                    to: CheckoutStep::Confirmation,
                })
            }
        };
        info!(order_id = %order_id, "checkout finished");
        self.reset_state();
        self.payment.settle();
        Ok(order_id)
    }

    fn advance_to(&mut self, target: CheckoutStep) -> Result<(), CommerceError> {
        let from = self.state.current_step;
        for step in CheckoutStep::ALL
            .into_iter()
            .filter(|step| *step >= from && *step < target)
        {
            let errors = self.gate(step);
            if !errors.is_empty() {
                debug!(step = %step, fields = errors.len(), "checkout gate failed");
                self.state.errors.extend(errors.clone());
                return Err(CommerceError::StepIncomplete { step, errors });
            }
        }
        info!(from = %from, to = %target, "checkout advanced");
        self.state.current_step = target;
        Ok(())
    }

    /// Errors that keep the customer from leaving `step`.
    fn gate(&self, step: CheckoutStep) -> FieldErrors {
        match step {
            CheckoutStep::CustomerInfo => self
                .state
                .customer_info
                .as_ref()
                .map_or_else(|| CustomerInfo::default().validate(), CustomerInfo::validate)
                .with_prefix("customer."),
            CheckoutStep::Shipping => {
                let mut errors = self
                    .state
                    .shipping_address
                    .as_ref()
                    .map_or_else(|| ShippingAddress::default().validate(), ShippingAddress::validate)
                    .with_prefix("address.");
                let offered = match (self.quote(), &self.state.shipping_method) {
                    (Some(quote), Some(selected)) => quote.option(&selected.id).is_some(),
                    _ => false,
                };
                if !offered {
                    errors.insert("shipping_method", "Choose a shipping method");
                }
                errors
            }
            CheckoutStep::Payment => {
                let mut errors = FieldErrors::new();
                if self.state.order_id.is_none() {
                    errors.insert("payment", "Payment has not been completed");
                }
                errors
            }
            CheckoutStep::Confirmation => FieldErrors::new(),
        }
    }

    fn ensure_started(&self) -> Result<(), CommerceError> {
        if self.state.is_started() {
            Ok(())
        } else {
            Err(CommerceError::InvariantViolation("checkout has not started".into()))
        }
    }

    fn ensure_editable(&self) -> Result<(), CommerceError> {
        self.ensure_started()?;
        if self.state.current_step.is_terminal() {
            return Err(CommerceError::InvariantViolation(
                "checkout is already confirmed".into(),
            ));
        }
        Ok(())
    }

    fn current_quote_key(&self) -> Option<QuoteKey> {
        let address = self.state.shipping_address.as_ref()?;
        let weight: f64 = self.state.items.iter().map(CartItem::total_weight).sum();
        let value = self
            .state
            .summary
            .as_ref()
            .map_or_else(|| Money::zero(self.pricing.currency), |s| s.subtotal);
        Some(QuoteKey::new(address, weight, value))
    }

    fn compute_quote(&self) -> Result<ShippingQuote, CommerceError> {
        let address = self.state.shipping_address.as_ref().ok_or_else(|| {
            CommerceError::InvariantViolation("no shipping address to quote".into())
        })?;
        let weight: f64 = self.state.items.iter().map(CartItem::total_weight).sum();
        let value = self
            .state
            .summary
            .as_ref()
            .map_or_else(|| Money::zero(self.pricing.currency), |s| s.subtotal);
        let previous = self.state.shipping_method.as_ref().map(|o| &o.id);
        self.rates.quote(address, weight, value, previous)
    }

    fn cancel_pending_quote(&mut self) {
        self.quote_generation += 1;
        debug!(generation = self.quote_generation, "pending shipping quote cancelled");
    }

    fn discard_quote(&mut self) -> Result<(), CommerceError> {
        self.cancel_pending_quote();
        self.quote = None;
        self.state.shipping_method = None;
        self.recompute()
    }

    fn recompute(&mut self) -> Result<(), CommerceError> {
        let shipping = self.state.shipping_method.as_ref().map(|o| o.price);
        self.state.summary = Some(CartSummary::compute(
            &self.state.items,
            self.state.coupon.as_ref(),
            shipping,
            &self.pricing,
        )?);
        Ok(())
    }

    fn reset_state(&mut self) {
        let in_progress = self.state.in_progress.clone();
        self.state = CheckoutState::with_flag(in_progress);
        self.quote = None;
        self.cancel_pending_quote();
    }

    fn order_request(&self, method: PaymentMethod) -> Result<OrderRequest, CommerceError> {
        let missing = |what: &str| CommerceError::InvariantViolation(format!("{what} missing at payment"));
        let summary = self.state.summary.as_ref().ok_or_else(|| missing("summary"))?;
        Ok(OrderRequest {
            checkout_token: self
                .state
                .checkout_token
                .clone()
                .ok_or_else(|| missing("checkout token"))?,
            customer: self
                .state
                .customer_info
                .clone()
                .ok_or_else(|| missing("customer info"))?,
            shipping_address: self
                .state
                .shipping_address
                .clone()
                .ok_or_else(|| missing("shipping address"))?,
            shipping_method: self
                .state
                .shipping_method
                .clone()
                .ok_or_else(|| missing("shipping method"))?,
            payment_method: method,
            items: self.state.items.iter().map(OrderLine::from).collect(),
            coupon_code: self.state.coupon.as_ref().map(|c| c.code.clone()),
            subtotal: summary.subtotal,
            discount: summary.total_discounts,
            shipping: summary.shipping_cost,
            tax: summary.taxes,
            total: summary.total,
            currency: summary.currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cart::ProductListing;
    use crate::checkout::DocumentType;
    use crate::money::Currency;
    use std::time::Duration;

    fn items() -> Vec<CartItem> {
        let listing = ProductListing::new("prod-polo", "Polo Algodón", Money::from_units(100, Currency::PEN))
            .with_weight(0.5);
        vec![CartItem::from_listing(&listing, None, 3, 10).unwrap()]
    }

    fn customer() -> CustomerInfo {
        CustomerInfo {
            first_name: "Lucía".into(),
            last_name: "Fernández".into(),
            email: "lucia@example.pe".into(),
            phone: "912345678".into(),
            document_type: DocumentType::Dni,
            document_number: "70123456".into(),
        }
    }

    fn miraflores() -> ShippingAddress {
        ShippingAddress::new("Lima", "Lima", "Miraflores", "Av. Larco 1234")
    }

    async fn started() -> (CheckoutOrchestrator, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let mut checkout = CheckoutOrchestrator::with_backend(&CommerceConfig::default(), backend.clone());
        checkout.start(items(), None).await.unwrap();
        (checkout, backend)
    }

    async fn at_payment() -> (CheckoutOrchestrator, Arc<InMemoryBackend>) {
        let (mut checkout, backend) = started().await;
        checkout.customer_info_updated(customer()).unwrap();
        checkout.shipping_address_updated(miraflores()).unwrap();
        checkout
            .shipping_method_selected(&ShippingOptionId::new("metropolitana-express"))
            .unwrap();
        checkout.payment_method_selected(PaymentMethod::Card).unwrap();
        (checkout, backend)
    }

    #[tokio::test]
    async fn test_empty_cart_refused() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut checkout = CheckoutOrchestrator::with_backend(&CommerceConfig::default(), backend);
        let err = checkout.start(Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, CommerceError::InvariantViolation(_)));
        assert!(!checkout.state().is_started());
    }

    #[tokio::test]
    async fn test_start_snapshots_summary() {
        let (checkout, _) = started().await;
        let summary = checkout.summary().unwrap();
        assert_eq!(summary.subtotal.amount_cents, 30000);
        assert_eq!(summary.taxes.amount_cents, 5400);
        assert!(checkout.state().checkout_token.is_some());
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);
    }

    #[tokio::test]
    async fn test_step_two_requires_customer_info() {
        let (mut checkout, _) = started().await;

        let err = checkout.go_to(CheckoutStep::Shipping).unwrap_err();
        assert!(matches!(
            err,
            CommerceError::StepIncomplete { step: CheckoutStep::CustomerInfo, .. }
        ));
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);
        assert_eq!(checkout.errors().get("customer.email"), Some("is required"));

        checkout.customer_info_updated(customer()).unwrap();
        assert_eq!(checkout.current_step(), CheckoutStep::Shipping);
        assert!(!checkout.errors().contains("customer.email"));
    }

    #[tokio::test]
    async fn test_invalid_customer_info_stays_on_step_one() {
        let (mut checkout, _) = started().await;
        let mut info = customer();
        info.phone = "123".into();

        let err = checkout.customer_info_updated(info).unwrap_err();
        assert_eq!(err.field_errors().unwrap().get("customer.phone"), Some("must be 9 digits"));
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);
        assert!(checkout.state().customer_info.is_some());
    }

    #[tokio::test]
    async fn test_address_quotes_and_selects_cheapest() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();

        let quote = checkout.shipping_address_updated(miraflores()).unwrap();
        assert_eq!(quote.options.len(), 3);
        // 1.5 kg: express 15 + 5, standard 10 + 3, economic 8 + 2
        let prices: Vec<i64> = quote.options.iter().map(|o| o.price.amount_cents).collect();
        assert_eq!(prices, vec![2000, 1300, 1000]);

        let selected = checkout.state().shipping_method.as_ref().unwrap();
        assert_eq!(selected.id.as_str(), "metropolitana-economic");
        assert_eq!(checkout.summary().unwrap().shipping_cost.amount_cents, 1000);
        assert_eq!(checkout.current_step(), CheckoutStep::Shipping);
    }

    #[tokio::test]
    async fn test_method_selection_advances_to_payment() {
        let (checkout, _) = at_payment().await;
        assert_eq!(checkout.current_step(), CheckoutStep::Payment);
        let summary = checkout.summary().unwrap();
        assert_eq!(summary.shipping_cost.amount_cents, 2000);
        assert_eq!(summary.total.amount_cents, 30000 + 5400 + 2000);
    }

    #[tokio::test]
    async fn test_unknown_district_is_a_field_error() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();

        let err = checkout
            .shipping_address_updated(ShippingAddress::new("Lima", "Lima", "Atlantida", "Calle 1 234"))
            .unwrap_err();
        assert!(err.field_errors().unwrap().contains("address.district"));
        assert!(checkout.quote().is_none());
        assert!(checkout.state().shipping_method.is_none());
    }

    #[tokio::test]
    async fn test_unknown_option_rejected() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();
        checkout.shipping_address_updated(miraflores()).unwrap();

        let err = checkout
            .shipping_method_selected(&ShippingOptionId::new("rural-express"))
            .unwrap_err();
        assert!(matches!(err, CommerceError::UnknownShippingOption(_)));
        assert_eq!(checkout.current_step(), CheckoutStep::Shipping);
    }

    #[tokio::test]
    async fn test_going_back_cancels_pending_quote() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();
        checkout.shipping_address_updated(miraflores()).unwrap();

        let ticket = checkout.request_quote().unwrap();
        let quote = checkout.rates().quote(&miraflores(), 1.5, Money::from_units(300, Currency::PEN), None).unwrap();
        checkout.go_back().unwrap();
        assert!(!checkout.apply_quote(&ticket, quote).unwrap());
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);
        assert!(checkout.state().shipping_address.is_some());
    }

    #[tokio::test]
    async fn test_superseded_ticket_is_stale() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();
        checkout.shipping_address_updated(miraflores()).unwrap();

        let first = checkout.request_quote().unwrap();
        let second = checkout.request_quote().unwrap();
        let quote = checkout.rates().quote(&miraflores(), 1.5, Money::from_units(300, Currency::PEN), None).unwrap();
        assert!(!checkout.apply_quote(&first, quote.clone()).unwrap());
        assert!(checkout.apply_quote(&second, quote).unwrap());
    }

    #[tokio::test]
    async fn test_jump_revalidates_intervening_steps() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();
        checkout.go_back().unwrap();

        let err = checkout.go_to(CheckoutStep::Payment).unwrap_err();
        assert!(matches!(
            err,
            CommerceError::StepIncomplete { step: CheckoutStep::Shipping, .. }
        ));
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);

        checkout.go_to(CheckoutStep::Shipping).unwrap();
        checkout.shipping_address_updated(miraflores()).unwrap();
        checkout.go_to(CheckoutStep::CustomerInfo).unwrap();
        checkout.go_to(CheckoutStep::Payment).unwrap();
        assert_eq!(checkout.current_step(), CheckoutStep::Payment);
    }

    #[tokio::test]
    async fn test_confirmation_requires_payment() {
        let (mut checkout, _) = at_payment().await;
        let err = checkout.go_to(CheckoutStep::Confirmation).unwrap_err();
        assert!(matches!(
            err,
            CommerceError::StepIncomplete { step: CheckoutStep::Payment, .. }
        ));
        assert!(checkout.payment_succeeded(OrderId::new("ord-forged")).is_err());
        assert_eq!(checkout.current_step(), CheckoutStep::Payment);
    }

    #[tokio::test]
    async fn test_payment_requires_method() {
        let (mut checkout, _) = started().await;
        checkout.customer_info_updated(customer()).unwrap();
        checkout.shipping_address_updated(miraflores()).unwrap();
        checkout
            .shipping_method_selected(&ShippingOptionId::new("metropolitana-standard"))
            .unwrap();

        let err = checkout.prepare_payment().await.unwrap_err();
        assert!(err.field_errors().unwrap().contains("payment_method"));
    }

    #[tokio::test]
    async fn test_paid_callback_confirms_once() {
        let (mut checkout, backend) = at_payment().await;
        let form = checkout.prepare_payment().await.unwrap();
        assert_eq!(form.amount.amount_cents, 37400);

        let answer = GatewayAnswer::new(r#"{"orderStatus":"PAID"}"#, "sig");
        let outcome = checkout.payment_callback(&answer).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::Paid { .. }));
        assert_eq!(checkout.current_step(), CheckoutStep::Confirmation);
        assert_eq!(checkout.state().order_id.as_ref(), Some(&form.order_id));

        let again = checkout.payment_callback(&answer).await.unwrap();
        assert!(matches!(again, PaymentOutcome::AlreadyValidated { .. }));
        assert_eq!(checkout.current_step(), CheckoutStep::Confirmation);
        assert_eq!(backend.orders_created(), 1);

        let order_id = checkout.finish().unwrap();
        assert_eq!(order_id, form.order_id);
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);
        assert!(!checkout.state().is_started());

        let late = checkout.payment_callback(&answer).await.unwrap();
        assert!(matches!(late, PaymentOutcome::AlreadyValidated { .. }));
    }

    #[tokio::test]
    async fn test_rejected_payment_stays_on_payment() {
        let (mut checkout, backend) = at_payment().await;
        checkout.prepare_payment().await.unwrap();

        backend.script_payment_status("UNPAID");
        let err = checkout
            .payment_callback(&GatewayAnswer::new("{}", "sig"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::GatewayRejection);
        assert_eq!(checkout.current_step(), CheckoutStep::Payment);
        assert!(checkout.errors().contains("payment"));

        backend.script_payment_status("PAID");
        checkout.prepare_payment().await.unwrap();
        checkout
            .payment_callback(&GatewayAnswer::new("{}", "sig"))
            .await
            .unwrap();
        assert_eq!(checkout.current_step(), CheckoutStep::Confirmation);
        assert_eq!(backend.orders_created(), 1);
    }

    #[tokio::test]
    async fn test_order_creation_failure_is_recoverable() {
        let (mut checkout, backend) = at_payment().await;
        backend.set_offline(true);
        let err = checkout.prepare_payment().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
        assert!(checkout.payment().order().is_none());
        assert_eq!(checkout.current_step(), CheckoutStep::Payment);

        backend.set_offline(false);
        assert!(checkout.prepare_payment().await.is_ok());
    }

    #[tokio::test]
    async fn test_timed_out_payment_creates_one_order() {
        let (mut checkout, backend) = at_payment().await;
        backend.set_latency(Duration::from_millis(200));

        let attempt =
            tokio::time::timeout(Duration::from_millis(10), checkout.prepare_payment()).await;
        assert!(attempt.is_err());
        assert!(!checkout.is_in_progress());

        backend.set_latency(Duration::ZERO);
        let form = checkout.prepare_payment().await.unwrap();
        assert_eq!(backend.orders_created(), 1);
        assert_eq!(checkout.payment().order().map(|o| &o.id), Some(&form.order_id));
        assert!(!checkout.is_in_progress());
        assert!(checkout.go_back().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_resets() {
        let (mut checkout, _) = at_payment().await;
        checkout.cancel();
        assert_eq!(checkout.current_step(), CheckoutStep::CustomerInfo);
        assert!(checkout.state().customer_info.is_none());
        assert!(matches!(
            checkout.customer_info_updated(customer()),
            Err(CommerceError::InvariantViolation(_))
        ));
    }
}
