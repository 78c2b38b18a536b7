//! Derived price summary.

use serde::{Deserialize, Serialize};

use crate::cart::{CartItem, Coupon};
use crate::config::PricingConfig;
use crate::error::CommerceError;
use crate::money::{Currency, Money};

/// Why shipping costs nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingWaiver {
    /// A free-shipping coupon is attached and eligible.
    Coupon,
    /// The subtotal reached the configured threshold.
    Threshold,
}

/// Price summary derived from the current items, coupon and shipping choice.
///
/// Never stored on its own: it is recomputed from item state on every
/// mutation and whenever a persisted cart is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    /// Sum of quantities.
    pub item_count: i64,
    /// Sum of item subtotals at effective prices.
    pub subtotal: Money,
    /// Sum of `(unit_price − sale_price) × quantity` over discounted items.
    pub item_discounts: Money,
    pub coupon_discount: Money,
    pub total_discounts: Money,
    pub taxes: Money,
    pub shipping_cost: Money,
    pub total: Money,
    /// Kilograms.
    pub total_weight: f64,
    #[serde(default)]
    pub shipping_waived: Option<ShippingWaiver>,
    pub currency: Currency,
}

impl CartSummary {
    /// Summary of an empty cart.
    pub fn empty(currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            item_count: 0,
            subtotal: zero,
            item_discounts: zero,
            coupon_discount: zero,
            total_discounts: zero,
            taxes: zero,
            shipping_cost: zero,
            total: zero,
            total_weight: 0.0,
            shipping_waived: None,
            currency,
        }
    }

    /// Compute the summary.
    ///
    /// `shipping` is the price of the selected option, if any.
    pub fn compute(
        items: &[CartItem],
        coupon: Option<&Coupon>,
        shipping: Option<Money>,
        pricing: &PricingConfig,
    ) -> Result<Self, CommerceError> {
        let currency = pricing.currency;
        let zero = Money::zero(currency);

        let mut summary = Self::empty(currency);
        for item in items {
            summary.item_count = summary
                .item_count
                .checked_add(item.quantity)
                .ok_or(CommerceError::Overflow)?;
            summary.subtotal = summary.subtotal.try_add(&item.subtotal)?;
            summary.item_discounts = summary.item_discounts.try_add(&item.discount()?)?;
            summary.total_weight += item.total_weight();
        }

        summary.coupon_discount = match coupon {
            Some(coupon) => coupon.discount_for(&summary.subtotal)?,
            None => zero,
        };
        summary.total_discounts = summary.item_discounts.try_add(&summary.coupon_discount)?;

        summary.taxes = if pricing.tax_enabled {
            summary
                .subtotal
                .try_sub(&summary.total_discounts)?
                .non_negative()
                .multiply_decimal(pricing.tax_rate)
        } else {
            zero
        };

        summary.shipping_waived = if coupon.is_some_and(|c| c.waives_shipping(&summary.subtotal)) {
            Some(ShippingWaiver::Coupon)
        } else if pricing
            .free_shipping_minimum()
            .is_some_and(|min| !items.is_empty() && summary.subtotal.amount_cents >= min.amount_cents)
        {
            Some(ShippingWaiver::Threshold)
        } else {
            None
        };

        summary.shipping_cost = match (shipping, summary.shipping_waived) {
            (Some(price), None) => {
                if price.currency != currency {
                    return Err(CommerceError::CurrencyMismatch {
                        expected: currency,
                        got: price.currency,
                    });
                }
                price
            }
            _ => zero,
        };

        // Item discounts come off a subtotal already at sale prices.
        summary.total = summary
            .subtotal
            .try_sub(&summary.total_discounts)?
            .try_add(&summary.taxes)?
            .try_add(&summary.shipping_cost)?
            .non_negative();

        Ok(summary)
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }
}
