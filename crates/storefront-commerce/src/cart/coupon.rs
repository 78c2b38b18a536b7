//! Coupons and the coupon validator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::backend::CouponCatalog;
use crate::cart::{CartItem, CartSummary};
use crate::error::CommerceError;
use crate::ids::{CategoryId, ProductId};
use crate::money::Money;

/// What a coupon takes off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CouponValue {
    /// Percentage off the subtotal (0.0 - 100.0).
    Percentage(f64),
    /// Fixed amount off, never more than the subtotal.
    FixedAmount(Money),
    /// Shipping is waived; no amount off.
    FreeShipping,
}

/// Which carts a coupon applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "ids", rename_all = "snake_case")]
pub enum CouponScope {
    #[default]
    All,
    /// At least one of these products must be in the cart.
    Products(Vec<ProductId>),
    /// At least one product of these categories must be in the cart.
    Categories(Vec<CategoryId>),
}

impl CouponScope {
    fn accepts(&self, items: &[CartItem]) -> bool {
        match self {
            CouponScope::All => true,
            CouponScope::Products(ids) => items.iter().any(|i| ids.contains(&i.product_id)),
            CouponScope::Categories(ids) => items
                .iter()
                .any(|i| i.category_id.as_ref().is_some_and(|c| ids.contains(c))),
        }
    }
}

/// A discount code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    /// Upper-cased code.
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub value: CouponValue,
    /// Subtotal required for the discount to apply.
    #[serde(default)]
    pub min_amount: Option<Money>,
    /// Cap on a percentage discount.
    #[serde(default)]
    pub max_amount: Option<Money>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    /// Total redemptions allowed (None = unlimited).
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub applies_to: CouponScope,
    pub active: bool,
}

impl Coupon {
    fn with_value(code: &str, value: CouponValue) -> Self {
        Self {
            code: normalize_code(code),
            description: None,
            value,
            min_amount: None,
            max_amount: None,
            valid_from: None,
            valid_to: None,
            usage_limit: None,
            applies_to: CouponScope::All,
            active: true,
        }
    }

    /// Create a percentage coupon.
    pub fn percentage(code: &str, percent: f64) -> Self {
        Self::with_value(code, CouponValue::Percentage(percent))
    }

    /// Create a fixed amount coupon.
    pub fn fixed_amount(code: &str, amount: Money) -> Self {
        Self::with_value(code, CouponValue::FixedAmount(amount))
    }

    /// Create a free shipping coupon.
    pub fn free_shipping(code: &str) -> Self {
        Self::with_value(code, CouponValue::FreeShipping)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_min_amount(mut self, amount: Money) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn with_max_amount(mut self, amount: Money) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn valid_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_to = Some(to);
        self
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn for_products(mut self, products: Vec<ProductId>) -> Self {
        self.applies_to = CouponScope::Products(products);
        self
    }

    pub fn for_categories(mut self, categories: Vec<CategoryId>) -> Self {
        self.applies_to = CouponScope::Categories(categories);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| now >= from)
            && self.valid_to.map_or(true, |to| now <= to)
    }

    /// Whether `subtotal` reaches the minimum purchase.
    pub fn meets_minimum(&self, subtotal: &Money) -> bool {
        self.min_amount
            .map_or(true, |min| subtotal.amount_cents >= min.amount_cents)
    }

    /// Discount against `subtotal`; zero while the minimum is not met.
    pub fn discount_for(&self, subtotal: &Money) -> Result<Money, CommerceError> {
        if !self.meets_minimum(subtotal) {
            return Ok(Money::zero(subtotal.currency));
        }
        let discount = match &self.value {
            CouponValue::Percentage(percent) => {
                let raw = subtotal.percentage(percent.clamp(0.0, 100.0));
                match &self.max_amount {
                    Some(cap) => raw.try_min(cap)?,
                    None => raw,
                }
            }
            CouponValue::FixedAmount(amount) => amount.try_min(subtotal)?,
            CouponValue::FreeShipping => Money::zero(subtotal.currency),
        };
        Ok(discount.non_negative())
    }

    /// Whether this coupon waives shipping for `subtotal`.
    pub fn waives_shipping(&self, subtotal: &Money) -> bool {
        matches!(self.value, CouponValue::FreeShipping) && self.meets_minimum(subtotal)
    }
}

/// Normalize a coupon code for lookup and storage.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Result of validating a coupon against the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    pub code: String,
    pub valid: bool,
    pub discount_amount: Money,
    pub message: String,
    pub shipping_waived: bool,
    /// The coupon to attach when valid.
    #[serde(default)]
    pub coupon: Option<Coupon>,
}

impl CouponValidation {
    fn rejected(code: &str, summary: &CartSummary, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            valid: false,
            discount_amount: Money::zero(summary.currency),
            message: message.into(),
            shipping_waived: false,
            coupon: None,
        }
    }
}

/// Decides whether a code applies to the current cart.
#[derive(Clone)]
pub struct CouponValidator {
    catalog: Arc<dyn CouponCatalog>,
}

impl std::fmt::Debug for CouponValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouponValidator").finish_non_exhaustive()
    }
}

impl CouponValidator {
    pub fn new(catalog: Arc<dyn CouponCatalog>) -> Self {
        Self { catalog }
    }

    /// Validate `code` against the cart as of now.
    pub async fn validate(
        &self,
        code: &str,
        summary: &CartSummary,
        items: &[CartItem],
    ) -> Result<CouponValidation, CommerceError> {
        self.validate_at(code, summary, items, Utc::now()).await
    }

    /// Validate `code` against the cart at `now`.
    ///
    /// Only catalog lookups fail with `Err`; every business rule produces an
    /// invalid `CouponValidation` with a message.
    #[instrument(skip(self, summary, items), fields(subtotal = summary.subtotal.amount_cents))]
    pub async fn validate_at(
        &self,
        code: &str,
        summary: &CartSummary,
        items: &[CartItem],
        now: DateTime<Utc>,
    ) -> Result<CouponValidation, CommerceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(CouponValidation::rejected(&code, summary, "Enter a coupon code"));
        }

        let Some(coupon) = self.catalog.find_coupon(&code).await? else {
            return Ok(CouponValidation::rejected(&code, summary, "Coupon does not exist"));
        };
        if !coupon.active {
            return Ok(CouponValidation::rejected(&code, summary, "Coupon is not active"));
        }
        if !coupon.is_within_window(now) {
            return Ok(CouponValidation::rejected(
                &code,
                summary,
                "Coupon is not valid at this time",
            ));
        }
        if !coupon.meets_minimum(&summary.subtotal) {
            let min = coupon.min_amount.map(|m| m.display()).unwrap_or_default();
            return Ok(CouponValidation::rejected(
                &code,
                summary,
                format!("Minimum purchase of {min} required"),
            ));
        }
        if let Some(limit) = coupon.usage_limit {
            let used = self.catalog.usage_count(&code).await?;
            if used >= limit {
                return Ok(CouponValidation::rejected(
                    &code,
                    summary,
                    "Coupon usage limit reached",
                ));
            }
        }
        if !coupon.applies_to.accepts(items) {
            return Ok(CouponValidation::rejected(
                &code,
                summary,
                "Coupon does not apply to the products in your cart",
            ));
        }

        let discount_amount = coupon.discount_for(&summary.subtotal)?;
        let shipping_waived = coupon.waives_shipping(&summary.subtotal);
        let message = if shipping_waived {
            "Free shipping applied".to_string()
        } else {
            format!("Discount of {} applied", discount_amount.display())
        };
        debug!(%code, discount = discount_amount.amount_cents, shipping_waived, "coupon accepted");

        Ok(CouponValidation {
            code,
            valid: true,
            discount_amount,
            message,
            shipping_waived,
            coupon: Some(coupon),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cart::ProductListing;
    use crate::config::PricingConfig;
    use crate::money::Currency;
    use chrono::Duration;

    fn pen(units: i64) -> Money {
        Money::from_units(units, Currency::PEN)
    }

    fn cart_of(units: i64) -> (Vec<CartItem>, CartSummary) {
        let listing = ProductListing::new("prod-1", "Mochila", pen(units)).in_category("bolsos");
        let items = vec![CartItem::from_listing(&listing, None, 1, 10).unwrap()];
        let pricing = PricingConfig {
            tax_enabled: false,
            ..PricingConfig::default()
        };
        let summary = CartSummary::compute(&items, None, None, &pricing).unwrap();
        (items, summary)
    }

    fn validator(coupons: Vec<Coupon>) -> (Arc<InMemoryBackend>, CouponValidator) {
        let backend = Arc::new(InMemoryBackend::new());
        for coupon in coupons {
            backend.add_coupon(coupon);
        }
        let validator = CouponValidator::new(backend.clone());
        (backend, validator)
    }

    #[test]
    fn test_fixed_amount_never_exceeds_subtotal() {
        let coupon = Coupon::fixed_amount("save50", pen(50));
        assert_eq!(coupon.code, "SAVE50");
        assert_eq!(coupon.discount_for(&pen(300)).unwrap(), pen(50));
        assert_eq!(coupon.discount_for(&pen(30)).unwrap(), pen(30));
    }

    #[test]
    fn test_percentage_capped() {
        let coupon = Coupon::percentage("DIEZ", 10.0).with_max_amount(pen(25));
        assert_eq!(coupon.discount_for(&pen(100)).unwrap(), pen(10));
        assert_eq!(coupon.discount_for(&pen(400)).unwrap(), pen(25));
    }

    #[test]
    fn test_discount_zero_below_minimum() {
        let coupon = Coupon::percentage("DIEZ", 10.0).with_min_amount(pen(100));
        assert!(coupon.discount_for(&pen(99)).unwrap().is_zero());
        assert_eq!(coupon.discount_for(&pen(100)).unwrap(), pen(10));
    }

    #[tokio::test]
    async fn test_validate_fixed_coupon() {
        let (_, validator) = validator(vec![Coupon::fixed_amount("SAVE50", pen(50))]);
        let (items, summary) = cart_of(300);

        let result = validator.validate(" save50 ", &summary, &items).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.code, "SAVE50");
        assert_eq!(result.discount_amount, pen(50));
        assert!(result.coupon.is_some());
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_codes() {
        let (_, validator) = validator(vec![Coupon::percentage("OLD", 5.0).deactivated()]);
        let (items, summary) = cart_of(100);

        let result = validator.validate("NOPE", &summary, &items).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.message, "Coupon does not exist");

        let result = validator.validate("OLD", &summary, &items).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.message, "Coupon is not active");
    }

    #[tokio::test]
    async fn test_validity_window() {
        let now = Utc::now();
        let coupon = Coupon::percentage("VERANO", 15.0)
            .valid_between(now - Duration::days(10), now - Duration::days(1));
        let (_, validator) = validator(vec![coupon]);
        let (items, summary) = cart_of(100);

        let result = validator
            .validate_at("VERANO", &summary, &items, now)
            .await
            .unwrap();
        assert!(!result.valid);

        let result = validator
            .validate_at("VERANO", &summary, &items, now - Duration::days(5))
            .await
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.discount_amount, pen(15));
    }

    #[tokio::test]
    async fn test_minimum_and_usage_limit() {
        let (backend, validator) = validator(vec![
            Coupon::fixed_amount("MIN200", pen(20)).with_min_amount(pen(200)),
            Coupon::fixed_amount("LIMITED", pen(5)).with_usage_limit(2),
        ]);
        let (items, summary) = cart_of(100);

        let result = validator.validate("MIN200", &summary, &items).await.unwrap();
        assert!(!result.valid);
        assert!(result.message.contains("S/ 200.00"));

        assert!(validator.validate("LIMITED", &summary, &items).await.unwrap().valid);
        backend.set_coupon_usage("LIMITED", 2);
        let result = validator.validate("LIMITED", &summary, &items).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.message, "Coupon usage limit reached");
    }

    #[tokio::test]
    async fn test_product_and_category_scope() {
        let (_, validator) = validator(vec![
            Coupon::percentage("ZAPATOS", 10.0).for_products(vec![ProductId::new("prod-9")]),
            Coupon::percentage("BOLSOS", 10.0).for_categories(vec![CategoryId::new("bolsos")]),
        ]);
        let (items, summary) = cart_of(100);

        assert!(!validator.validate("ZAPATOS", &summary, &items).await.unwrap().valid);
        assert!(validator.validate("BOLSOS", &summary, &items).await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_free_shipping_coupon() {
        let (_, validator) = validator(vec![Coupon::free_shipping("ENVIOGRATIS")]);
        let (items, summary) = cart_of(100);

        let result = validator.validate("enviogratis", &summary, &items).await.unwrap();
        assert!(result.valid);
        assert!(result.shipping_waived);
        assert!(result.discount_amount.is_zero());
    }

    #[tokio::test]
    async fn test_catalog_failure_is_an_error() {
        let (backend, validator) = validator(vec![Coupon::free_shipping("ENVIOGRATIS")]);
        backend.set_offline(true);
        let (items, summary) = cart_of(100);

        let err = validator
            .validate("ENVIOGRATIS", &summary, &items)
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Network(_)));
    }
}
