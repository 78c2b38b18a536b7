//! Order and payment types.
//!
//! Orders are created by the external order service and are immutable from
//! this crate's point of view; the checkout keeps only their identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::CartItem;
use crate::checkout::{CustomerInfo, PaymentMethod, ShippingAddress};
use crate::ids::{CheckoutToken, OrderId, PaymentId, ProductId, VariationId};
use crate::money::{Currency, Money};
use crate::shipping::ShippingOption;

/// Order status as reported by the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, awaiting payment.
    #[default]
    Pending,
    /// Payment approved.
    Approved,
    /// Payment rejected.
    Rejected,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
    /// Payment under review.
    InProcess,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
            OrderStatus::InProcess => "in_process",
        }
    }

    /// Check if order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected
                | OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::Returned
        )
    }

    /// Whether the order may still be paid.
    pub fn awaits_payment(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::InProcess)
    }
}

/// An order as returned by the order service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
    pub status: OrderStatus,
    pub customer: CustomerInfo,
    pub shipping_address: ShippingAddress,
    pub shipping_method: ShippingOption,
    pub payment_method: PaymentMethod,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build the order the service would create for `request`.
    pub fn from_request(id: OrderId, order_number: impl Into<String>, request: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            order_number: order_number.into(),
            subtotal: request.subtotal,
            discount: request.discount,
            shipping: request.shipping,
            tax: request.tax,
            total: request.total,
            status: OrderStatus::Pending,
            customer: request.customer.clone(),
            shipping_address: request.shipping_address.clone(),
            shipping_method: request.shipping_method.clone(),
            payment_method: request.payment_method,
            currency: request.currency,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this order was created for the same amounts as `request`.
    pub fn matches_request(&self, request: &OrderRequest) -> bool {
        self.total == request.total
            && self.shipping == request.shipping
            && self.shipping_method.id == request.shipping_method.id
            && self.payment_method == request.payment_method
    }
}

/// A line of the order being placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
    pub name: String,
    pub quantity: i64,
    /// Effective price of one unit.
    pub unit_price: Money,
    pub subtotal: Money,
}

impl From<&CartItem> for OrderLine {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            variation_id: item.variation_id.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.effective_price(),
            subtotal: item.subtotal,
        }
    }
}

/// Body of `POST /checkout/procesar-pedido`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub checkout_token: CheckoutToken,
    pub customer: CustomerInfo,
    pub shipping_address: ShippingAddress,
    pub shipping_method: ShippingOption,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
    pub currency: Currency,
}

/// Payment status as reported by the payment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    /// Paid after the order expired.
    Late,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Late => "late",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Money was captured.
    pub fn is_captured(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Late)
    }

    /// Map a gateway status string.
    pub fn from_gateway(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "PAID" => PaymentStatus::Paid,
            "RUNNING" | "PENDING" => PaymentStatus::Pending,
            "CANCELLED" | "ABANDONED" => PaymentStatus::Cancelled,
            "REFUNDED" => PaymentStatus::Refunded,
            _ => PaymentStatus::Failed,
        }
    }
}

/// A payment recorded against an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub fee: Money,
    pub status: PaymentStatus,
    /// Transaction id assigned by the gateway.
    pub gateway_reference: String,
}
