//! A shopper's cart and checkout wired together.
//!
//! The checkout works on a snapshot of the cart, so the two only meet at
//! the edges: [`ShopSession::begin_checkout`] hands the current items over
//! and [`ShopSession::complete_payment`] empties the cart once the gateway
//! has confirmed the payment.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{CartApi, CheckoutApi, CouponCatalog, PaymentGateway};
use crate::cart::CartStore;
use crate::checkout::{CheckoutOrchestrator, GatewayAnswer, PaymentOutcome};
use crate::config::CommerceConfig;
use crate::error::CommerceError;
use crate::ids::OrderId;

#[derive(Debug)]
pub struct ShopSession {
    cart: CartStore,
    checkout: CheckoutOrchestrator,
}

impl ShopSession {
    pub fn new(cart: CartStore, checkout: CheckoutOrchestrator) -> Self {
        Self { cart, checkout }
    }

    /// Open the configured cart and use `backend` for every remote call.
    pub fn with_backend<B>(config: &CommerceConfig, backend: Arc<B>) -> Result<Self, CommerceError>
    where
        B: CartApi + CouponCatalog + CheckoutApi + PaymentGateway + 'static,
    {
        let api: Arc<dyn CartApi> = backend.clone();
        let coupons: Arc<dyn CouponCatalog> = backend.clone();
        let cart = CartStore::open(config)?.with_api(api).with_coupons(coupons);
        let checkout = CheckoutOrchestrator::with_backend(config, backend);
        Ok(Self::new(cart, checkout))
    }

    pub fn cart(&self) -> &CartStore {
        &self.cart
    }

    pub fn cart_mut(&mut self) -> &mut CartStore {
        &mut self.cart
    }

    pub fn checkout(&self) -> &CheckoutOrchestrator {
        &self.checkout
    }

    pub fn checkout_mut(&mut self) -> &mut CheckoutOrchestrator {
        &mut self.checkout
    }

    /// Start checkout with the cart as it is now.
    ///
    /// Later cart edits do not reach the running checkout.
    pub async fn begin_checkout(&mut self) -> Result<(), CommerceError> {
        let snapshot = self.cart.snapshot();
        self.checkout.start(snapshot.items, snapshot.coupon).await
    }

    /// Validate the widget's answer; a fresh payment empties the cart.
    pub async fn complete_payment(
        &mut self,
        answer: &GatewayAnswer,
    ) -> Result<PaymentOutcome, CommerceError> {
        let outcome = self.checkout.payment_callback(answer).await?;
        if let PaymentOutcome::Paid { order_id, .. } = &outcome {
            info!(order_id = %order_id, "order paid; emptying cart");
            if let Err(e) = self.cart.clear().await {
                warn!(order_id = %order_id, error = %e, "cart could not be cleared after payment");
            }
        }
        Ok(outcome)
    }

    /// Leave the confirmation step.
    pub fn finish_checkout(&mut self) -> Result<OrderId, CommerceError> {
        self.checkout.finish()
    }
}
