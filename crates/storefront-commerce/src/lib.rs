//! Cart pricing and checkout orchestration for the storefront.
//!
//! This crate holds the shopper-side commerce engine:
//!
//! - **Cart**: items, coupons and a price summary recomputed on every
//!   mutation, persisted locally and mirrored to the cart API
//! - **Shipping**: zone resolution and tiered rate quotes
//! - **Checkout**: the four-step state machine and the payment gateway adapter
//! - **Backend**: async seams to the storefront API, with in-memory and HTTP
//!   implementations
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storefront_commerce::prelude::*;
//!
//! let backend = Arc::new(InMemoryBackend::new());
//! let mut session = ShopSession::with_backend(&CommerceConfig::default(), backend)?;
//!
//! let polo = ProductListing::new("prod-polo", "Polo", Money::from_units(49, Currency::PEN))
//!     .with_stock(12)
//!     .with_weight(0.3);
//! session.cart_mut().add_item(&polo, None, 2).await?;
//! println!("Total: {}", session.cart().summary().total.display());
//!
//! session.begin_checkout().await?;
//! ```

pub mod error;
pub mod ids;
pub mod money;

pub mod config;
pub mod telemetry;

pub mod backend;
pub mod cart;
pub mod checkout;
pub mod session;
pub mod shipping;

pub use config::CommerceConfig;
pub use error::{CommerceError, ErrorKind, FieldErrors};
pub use ids::*;
pub use money::{Currency, Money};
pub use session::ShopSession;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::CommerceConfig;
    pub use crate::error::{CommerceError, ErrorKind, FieldErrors};
    pub use crate::ids::*;
    pub use crate::money::{Currency, Money};
    pub use crate::session::ShopSession;

    // Cart
    pub use crate::cart::{
        CartEvent, CartItem, CartSnapshot, CartStore, CartSummary, Coupon, CouponValidation,
        ProductListing,
    };

    // Shipping
    pub use crate::shipping::{ShippingOption, ShippingQuote, ShippingTier, Zone};

    // Checkout
    pub use crate::checkout::{
        CheckoutOrchestrator, CheckoutStep, CustomerInfo, DocumentType, GatewayAnswer, Order,
        OrderStatus, PaymentForm, PaymentMethod, PaymentOutcome, ShippingAddress,
    };

    // Backends
    #[cfg(feature = "http")]
    pub use crate::backend::HttpBackend;
    pub use crate::backend::InMemoryBackend;
}
