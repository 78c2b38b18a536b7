//! Seams to the services the engine consumes.
//!
//! Every remote collaborator sits behind an `async_trait` so the cart store
//! and checkout can run against [`InMemoryBackend`] in tests and offline
//! demos, or against [`HttpBackend`] (feature `http`) in production.

use async_trait::async_trait;

use crate::cart::{CartCommand, Coupon};
use crate::checkout::{Order, OrderRequest};
use crate::error::CommerceError;
use crate::ids::CheckoutToken;

#[cfg(feature = "http")]
mod http;
mod memory;
mod types;

#[cfg(feature = "http")]
pub use http::{endpoints, HttpBackend};
pub use memory::InMemoryBackend;
pub use types::{
    CheckoutSession, CouponLookup, CouponLookupRequest, FormTokenRequest, FormTokenResponse, PaymentValidation, RemoteCart,
    RemoteCartItem, StartCheckoutRequest, StockLevel, StockQuery, ValidatePaymentRequest,
};

/// Server-side cart.
#[async_trait]
pub trait CartApi: Send + Sync {
    /// `GET /carrito`.
    async fn fetch_cart(&self) -> Result<RemoteCart, CommerceError>;

    /// Apply one mutation and return the resulting cart.
    async fn execute(&self, command: &CartCommand) -> Result<RemoteCart, CommerceError>;

    /// `POST /carrito/verificar-stock`.
    async fn verify_stock(&self, items: &[StockQuery]) -> Result<Vec<StockLevel>, CommerceError>;
}

/// Source of coupon definitions and redemption counts.
#[async_trait]
pub trait CouponCatalog: Send + Sync {
    /// Look up a coupon by its normalized code.
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, CommerceError>;

    /// How many times the coupon has been redeemed.
    async fn usage_count(&self, code: &str) -> Result<u32, CommerceError>;
}

/// Checkout session and order creation.
#[async_trait]
pub trait CheckoutApi: Send + Sync {
    /// `POST /checkout/iniciar`.
    async fn start_checkout(
        &self,
        request: &StartCheckoutRequest,
    ) -> Result<CheckoutToken, CommerceError>;

    /// `POST /checkout/procesar-pedido`.
    async fn create_order(&self, request: &OrderRequest) -> Result<Order, CommerceError>;
}

/// External card processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Obtain a short-lived form token for the embedded payment widget.
    async fn create_form_token(
        &self,
        request: &FormTokenRequest,
    ) -> Result<FormTokenResponse, CommerceError>;

    /// Verify the signed result the widget called back with.
    async fn validate_payment(
        &self,
        request: &ValidatePaymentRequest,
    ) -> Result<PaymentValidation, CommerceError>;
}
