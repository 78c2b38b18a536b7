//! Commerce error types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkout::CheckoutStep;
use crate::money::Currency;

/// Errors that can occur in cart, shipping and checkout operations.
#[derive(Error, Debug)]
pub enum CommerceError {
    /// Quantity outside the accepted range.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// Product has no stock left.
    #[error("Product out of stock: {0}")]
    OutOfStock(String),

    /// Item not in cart.
    #[error("Item not in cart: {0}")]
    ItemNotInCart(String),

    /// Coupon failed validation.
    #[error("Invalid coupon {code}: {reason}")]
    InvalidCoupon { code: String, reason: String },

    /// A checkout step gate did not pass.
    #[error("Step {step} incomplete: {errors}")]
    StepIncomplete {
        step: CheckoutStep,
        errors: FieldErrors,
    },

    /// District not present in the address directory.
    #[error("Unknown district: {0}")]
    UnknownDistrict(String),

    /// Shipping option not offered by the current quote.
    #[error("Unknown shipping option: {0}")]
    UnknownShippingOption(String),

    /// Currency mismatch.
    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    /// Arithmetic overflow.
    #[error("Arithmetic overflow in money calculation")]
    Overflow,

    /// The remote service could not be reached or gave no usable answer.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service answered and refused the request.
    #[error("Rejected by server: {message}")]
    Rejected {
        message: String,
        errors: Vec<String>,
    },

    /// The payment gateway did not approve the payment.
    #[error("Payment {status}: {message}")]
    GatewayRejection { status: String, message: String },

    /// An operation was called in a state where it can never succeed.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Another call of the same flow is still outstanding.
    #[error("{0} already in progress")]
    FlowInProgress(&'static str),

    /// Invalid checkout state transition.
    #[error("Invalid checkout transition from {from} to {to}")]
    InvalidCheckoutTransition { from: CheckoutStep, to: CheckoutStep },

    /// Durable storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input; shown next to the offending field.
    Validation,
    /// Transport failure; retry later.
    Network,
    /// The gateway refused the payment; shown verbatim.
    GatewayRejection,
    /// Programming or sequencing error.
    InvariantViolation,
    /// Storage, serialization or configuration failure.
    Internal,
}

impl CommerceError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommerceError::InvalidQuantity(_)
            | CommerceError::OutOfStock(_)
            | CommerceError::ItemNotInCart(_)
            | CommerceError::InvalidCoupon { .. }
            | CommerceError::StepIncomplete { .. }
            | CommerceError::UnknownDistrict(_)
            | CommerceError::UnknownShippingOption(_)
            | CommerceError::Rejected { .. } => ErrorKind::Validation,
            CommerceError::Network(_) => ErrorKind::Network,
            CommerceError::GatewayRejection { .. } => ErrorKind::GatewayRejection,
            CommerceError::InvariantViolation(_)
            | CommerceError::FlowInProgress(_)
            | CommerceError::InvalidCheckoutTransition { .. }
            | CommerceError::CurrencyMismatch { .. }
            | CommerceError::Overflow => ErrorKind::InvariantViolation,
            CommerceError::Storage(_)
            | CommerceError::Serialization(_)
            | CommerceError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether the user can fix or retry the failed operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Network | ErrorKind::GatewayRejection
        )
    }

    /// Field messages carried by a failed step gate.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            CommerceError::StepIncomplete { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

/// Field name to message map produced by validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `field`. The first message per field wins.
    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge another set of errors into this one.
    pub fn extend(&mut self, other: FieldErrors) {
        for (field, message) in other.0 {
            self.insert(field, message);
        }
    }

    /// Namespace every field, e.g. `email` becomes `customer.email`.
    pub fn with_prefix(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(field, message)| (format!("{prefix}{field}"), message))
                .collect(),
        )
    }

    /// Drop every message whose field starts with `prefix`.
    pub fn clear_prefix(&mut self, prefix: &str) {
        self.0.retain(|field, _| !field.starts_with(prefix));
    }

    /// `Ok(())` when empty, otherwise a `StepIncomplete` for `step`.
    pub fn into_result(self, step: CheckoutStep) -> Result<(), CommerceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CommerceError::StepIncomplete { step, errors: self })
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl From<storefront_cache::CacheError> for CommerceError {
    fn from(e: storefront_cache::CacheError) -> Self {
        CommerceError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CommerceError {
    fn from(e: serde_json::Error) -> Self {
        CommerceError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CommerceError {
    fn from(e: toml::de::Error) -> Self {
        CommerceError::Config(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<storefront_data::FetchError> for CommerceError {
    fn from(e: storefront_data::FetchError) -> Self {
        use storefront_data::FetchError;

        if e.is_transport() {
            return CommerceError::Network(e.to_string());
        }
        match e {
            FetchError::Rejected { message, errors } => CommerceError::Rejected { message, errors },
            FetchError::HttpError { message, .. } => CommerceError::Rejected {
                message,
                errors: Vec::new(),
            },
            // The server answered; its reply was unusable.
            other => CommerceError::Rejected {
                message: other.to_string(),
                errors: Vec::new(),
            },
        }
    }
}
