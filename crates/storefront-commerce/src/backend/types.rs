//! Wire types exchanged with the storefront API and the payment gateway.
//!
//! Field names are camelCase on the wire. Amounts travel as decimal numbers
//! in whole currency units and are converted to `Money` at the boundary.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cart::{clamp_quantity, CartItem, Coupon};
use crate::error::CommerceError;
use crate::ids::{CategoryId, CheckoutToken, ItemId, OrderId, ProductId, VariationId};
use crate::money::{Currency, Money};

/// The server's view of the cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCart {
    #[serde(default)]
    pub items: Vec<RemoteCartItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCartItem {
    pub id: ItemId,
    pub product_id: ProductId,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
    pub name: String,
    pub unit_price: f64,
    #[serde(default)]
    pub sale_price: Option<f64>,
    pub quantity: i64,
    pub stock: i64,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl RemoteCartItem {
    pub fn from_item(item: &CartItem) -> Self {
        Self {
            id: item.id.clone(),
            product_id: item.product_id.clone(),
            variation_id: item.variation_id.clone(),
            name: item.name.clone(),
            unit_price: item.unit_price.to_decimal(),
            sale_price: item.sale_price.map(|p| p.to_decimal()),
            quantity: item.quantity,
            stock: item.available_stock,
            weight: item.weight_kg,
            category_id: item.category_id.clone(),
        }
    }

    /// Convert to a cart line, clamping the quantity to local limits.
    pub fn into_item(self, currency: Currency, max_per_item: i64) -> Result<CartItem, CommerceError> {
        let now = Utc::now();
        let unit_price = Money::from_decimal(self.unit_price, currency);
        let sale_price = self.sale_price.map(|p| Money::from_decimal(p, currency));
        let quantity = clamp_quantity(self.quantity, self.stock, max_per_item);
        let mut item = CartItem {
            id: self.id,
            product_id: self.product_id,
            variation_id: self.variation_id,
            name: self.name,
            unit_price,
            sale_price,
            quantity,
            available_stock: self.stock,
            weight_kg: self.weight,
            category_id: self.category_id,
            subtotal: Money::zero(currency),
            added_at: now,
            modified_at: now,
        };
        item.subtotal = item.effective_price().try_multiply(quantity)?;
        Ok(item)
    }
}

/// One line of a stock verification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuery {
    pub product_id: ProductId,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_id: ProductId,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
    pub available_stock: i64,
}

/// Body of `POST /checkout/iniciar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCheckoutRequest {
    pub items: Vec<StockQuery>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub checkout_token: CheckoutToken,
}

/// Body of `POST /checkout/aplicar-cupon`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponLookupRequest {
    /// Normalized code.
    pub code: String,
}

/// A coupon definition and how often it has been redeemed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponLookup {
    #[serde(default)]
    pub coupon: Option<Coupon>,
    #[serde(default)]
    pub usage_count: u32,
}

/// Body of `POST /checkout/izipay/generar-formtoken`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTokenRequest {
    pub order_id: OrderId,
    pub amount: f64,
    pub currency: Currency,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTokenResponse {
    pub form_token: String,
    pub public_key: String,
    pub endpoint: String,
}

/// Body of `POST /checkout/izipay/validar-pago`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePaymentRequest {
    pub kr_answer: String,
    pub kr_hash: String,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentValidation {
    /// Gateway status, `PAID` on success.
    pub order_status: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PaymentValidation {
    pub fn is_paid(&self) -> bool {
        self.order_status.eq_ignore_ascii_case("PAID")
    }

    pub fn is_expired(&self) -> bool {
        self.order_status.eq_ignore_ascii_case("EXPIRED")
    }
}
