//! Checkout steps and the checkout-scoped state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cart::{CartItem, CartSummary, Coupon};
use crate::checkout::{CustomerInfo, ShippingAddress};
use crate::error::{CommerceError, FieldErrors};
use crate::ids::{CheckoutToken, OrderId};
use crate::shipping::ShippingOption;

/// Steps in the checkout flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    /// Personal data.
    #[default]
    CustomerInfo,
    /// Address, shipping method and order summary.
    Shipping,
    /// Payment widget.
    Payment,
    /// Order placed and paid.
    Confirmation,
}

impl CheckoutStep {
    pub const ALL: [CheckoutStep; 4] = [
        CheckoutStep::CustomerInfo,
        CheckoutStep::Shipping,
        CheckoutStep::Payment,
        CheckoutStep::Confirmation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::CustomerInfo => "customer_info",
            CheckoutStep::Shipping => "shipping",
            CheckoutStep::Payment => "payment",
            CheckoutStep::Confirmation => "confirmation",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CheckoutStep::CustomerInfo => "Customer information",
            CheckoutStep::Shipping => "Shipping",
            CheckoutStep::Payment => "Payment",
            CheckoutStep::Confirmation => "Confirmation",
        }
    }

    /// Get the step number (1-indexed).
    pub fn number(&self) -> u8 {
        match self {
            CheckoutStep::CustomerInfo => 1,
            CheckoutStep::Shipping => 2,
            CheckoutStep::Payment => 3,
            CheckoutStep::Confirmation => 4,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.number() == number)
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    pub fn previous(&self) -> Option<Self> {
        self.number().checked_sub(1).and_then(Self::from_number)
    }

    pub fn is_terminal(&self) -> bool {
        *self == CheckoutStep::Confirmation
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.as_str())
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card through the embedded gateway widget.
    #[default]
    Card,
    /// Yape wallet, also served by the gateway widget.
    Yape,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Yape => "yape",
        }
    }
}

/// Shared flag raised while a checkout network call is outstanding.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the flag for `flow`, failing if it is already raised.
    pub fn acquire(&self, flow: &'static str) -> Result<InFlightGuard, CommerceError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CommerceError::FlowInProgress(flow))?;
        Ok(InFlightGuard(Arc::clone(&self.0)))
    }
}

/// Lowers the [`InFlight`] flag on drop, including when the owning future
/// is dropped mid-await.
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything collected between checkout entry and confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutState {
    pub current_step: CheckoutStep,
    pub customer_info: Option<CustomerInfo>,
    pub shipping_address: Option<ShippingAddress>,
    pub shipping_method: Option<ShippingOption>,
    pub payment_method: Option<PaymentMethod>,
    /// Cart items as they were when checkout started.
    pub items: Vec<CartItem>,
    pub coupon: Option<Coupon>,
    pub summary: Option<CartSummary>,
    pub checkout_token: Option<CheckoutToken>,
    /// Field name to message for the gates that failed last.
    pub errors: FieldErrors,
    /// Set once the payment is validated.
    pub order_id: Option<OrderId>,
    #[serde(skip)]
    pub(crate) in_progress: InFlight,
}

impl CheckoutState {
    /// Empty state sharing `in_progress` with the payment adapter.
    pub(crate) fn with_flag(in_progress: InFlight) -> Self {
        Self {
            in_progress,
            ..Self::default()
        }
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.is_active()
    }

    pub fn is_started(&self) -> bool {
        self.checkout_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_numbers() {
        assert_eq!(CheckoutStep::CustomerInfo.number(), 1);
        assert_eq!(CheckoutStep::from_number(3), Some(CheckoutStep::Payment));
        assert_eq!(CheckoutStep::from_number(0), None);
        assert_eq!(CheckoutStep::from_number(5), None);
        assert_eq!(CheckoutStep::Shipping.next(), Some(CheckoutStep::Payment));
        assert_eq!(CheckoutStep::Confirmation.next(), None);
        assert_eq!(CheckoutStep::CustomerInfo.previous(), None);
        assert!(CheckoutStep::Payment > CheckoutStep::Shipping);
        assert_eq!(CheckoutStep::Shipping.to_string(), "2 (shipping)");
    }

    #[test]
    fn test_in_flight_guard() {
        let flag = InFlight::new();
        let guard = flag.acquire("payment").unwrap();
        assert!(flag.is_active());
        assert!(matches!(
            flag.acquire("payment"),
            Err(CommerceError::FlowInProgress("payment"))
        ));
        drop(guard);
        assert!(!flag.is_active());
        assert!(flag.acquire("payment").is_ok());
    }

    #[test]
    fn test_state_shares_flag() {
        let flag = InFlight::new();
        let state = CheckoutState::with_flag(flag.clone());
        let _guard = flag.acquire("checkout").unwrap();
        assert!(state.in_progress());
        assert!(!state.is_started());
    }
}
