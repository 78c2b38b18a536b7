//! In-process backend.
//!
//! Plays the storefront API, the coupon catalog and the payment gateway from
//! memory. Used by tests and offline demos; failure modes (offline, latency,
//! gateway statuses) can be scripted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{
    CartApi, CheckoutApi, CouponCatalog, FormTokenRequest, FormTokenResponse, PaymentGateway,
    PaymentValidation, RemoteCart, RemoteCartItem, StartCheckoutRequest, StockLevel, StockQuery,
    ValidatePaymentRequest,
};
use crate::cart::{normalize_code, CartCommand, Coupon, ProductListing};
use crate::checkout::{Order, OrderRequest, OrderStatus, Payment, PaymentStatus};
use crate::error::CommerceError;
use crate::ids::{CheckoutToken, ItemId, OrderId, PaymentId, ProductId, VariationId};
use crate::money::Money;

#[derive(Debug)]
struct Inner {
    offline: bool,
    latency: Option<Duration>,
    products: HashMap<ProductId, ProductListing>,
    cart: Vec<RemoteCartItem>,
    next_line: u64,
    coupons: HashMap<String, Coupon>,
    coupon_usage: HashMap<String, u32>,
    checkouts: usize,
    orders: Vec<Order>,
    form_tokens: usize,
    fail_next_form_token: bool,
    payment_status: String,
    validations: usize,
    payments: Vec<Payment>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            offline: false,
            latency: None,
            products: HashMap::new(),
            cart: Vec::new(),
            next_line: 0,
            coupons: HashMap::new(),
            coupon_usage: HashMap::new(),
            checkouts: 0,
            orders: Vec::new(),
            form_tokens: 0,
            fail_next_form_token: false,
            payment_status: "PAID".to_string(),
            validations: 0,
            payments: Vec::new(),
        }
    }
}

/// Backend that keeps every remote collaborator in memory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a product the server cart may hold.
    pub fn add_product(&self, listing: ProductListing) {
        self.lock().products.insert(listing.product_id.clone(), listing);
    }

    pub fn add_coupon(&self, coupon: Coupon) {
        self.lock().coupons.insert(normalize_code(&coupon.code), coupon);
    }

    pub fn set_coupon_usage(&self, code: &str, count: u32) {
        self.lock().coupon_usage.insert(normalize_code(code), count);
    }

    /// Make every call fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub fn set_stock(&self, product_id: &ProductId, stock: i64) {
        let mut inner = self.lock();
        if let Some(listing) = inner.products.get_mut(product_id) {
            listing.available_stock = stock;
        }
        for line in inner.cart.iter_mut().filter(|l| &l.product_id == product_id) {
            line.stock = stock;
        }
    }

    /// Status the next validations report, `PAID` by default.
    pub fn script_payment_status(&self, status: &str) {
        self.lock().payment_status = status.to_string();
    }

    /// Fail the next form token request with a network error.
    pub fn fail_next_form_token(&self) {
        self.lock().fail_next_form_token = true;
    }

    pub fn server_cart(&self) -> RemoteCart {
        RemoteCart {
            items: self.lock().cart.clone(),
        }
    }

    pub fn checkouts_started(&self) -> usize {
        self.lock().checkouts
    }

    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    pub fn orders_created(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn form_tokens_issued(&self) -> usize {
        self.lock().form_tokens
    }

    pub fn validations(&self) -> usize {
        self.lock().validations
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.lock().payments.clone()
    }

    /// Apply latency and the offline switch.
    async fn round_trip(&self, operation: &str) -> Result<(), CommerceError> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.lock().offline {
            debug!(operation, "in-memory backend offline");
            return Err(CommerceError::Network(format!("{operation}: backend unreachable")));
        }
        Ok(())
    }
}

fn rejected(message: &str) -> CommerceError {
    CommerceError::Rejected {
        message: message.to_string(),
        errors: Vec::new(),
    }
}

impl Inner {
    fn line_position(
        &self,
        item_id: Option<&ItemId>,
        product_id: &ProductId,
        variation_id: Option<&VariationId>,
    ) -> Option<usize> {
        item_id
            .and_then(|id| self.cart.iter().position(|l| &l.id == id))
            .or_else(|| {
                self.cart.iter().position(|l| {
                    &l.product_id == product_id && l.variation_id.as_ref() == variation_id
                })
            })
    }

    fn execute(&mut self, command: &CartCommand) -> Result<(), CommerceError> {
        match command {
            CartCommand::Add {
                product_id,
                variation_id,
                quantity,
            } => {
                let listing = self
                    .products
                    .get(product_id)
                    .cloned()
                    .ok_or_else(|| rejected("Producto no encontrado"))?;
                if listing.available_stock <= 0 {
                    return Err(rejected("Producto sin stock"));
                }
                match self.line_position(None, product_id, variation_id.as_ref()) {
                    Some(index) => {
                        let line = &mut self.cart[index];
                        line.quantity = (line.quantity + quantity).min(listing.available_stock);
                    }
                    None => {
                        self.next_line += 1;
                        self.cart.push(RemoteCartItem {
                            id: ItemId::new(format!("srv-{}", self.next_line)),
                            product_id: listing.product_id.clone(),
                            variation_id: variation_id.clone(),
                            name: listing.name.clone(),
                            unit_price: listing.unit_price.to_decimal(),
                            sale_price: listing.sale_price.map(|p| p.to_decimal()),
                            quantity: (*quantity).min(listing.available_stock),
                            stock: listing.available_stock,
                            weight: listing.weight_kg,
                            category_id: listing.category_id.clone(),
                        });
                    }
                }
            }
            CartCommand::Update {
                item_id,
                product_id,
                variation_id,
                quantity,
            } => {
                let index = self
                    .line_position(Some(item_id), product_id, variation_id.as_ref())
                    .ok_or_else(|| rejected("Item no encontrado en el carrito"))?;
                let line = &mut self.cart[index];
                line.quantity = (*quantity).min(line.stock).max(1);
            }
            CartCommand::Remove {
                item_id,
                product_id,
                variation_id,
            } => {
                if let Some(index) = self.line_position(Some(item_id), product_id, variation_id.as_ref()) {
                    self.cart.remove(index);
                }
            }
            CartCommand::Clear => self.cart.clear(),
        }
        Ok(())
    }
}

#[async_trait]
impl CartApi for InMemoryBackend {
    async fn fetch_cart(&self) -> Result<RemoteCart, CommerceError> {
        self.round_trip("fetch_cart").await?;
        Ok(self.server_cart())
    }

    async fn execute(&self, command: &CartCommand) -> Result<RemoteCart, CommerceError> {
        self.round_trip(command.name()).await?;
        let mut inner = self.lock();
        inner.execute(command)?;
        Ok(RemoteCart {
            items: inner.cart.clone(),
        })
    }

    async fn verify_stock(&self, items: &[StockQuery]) -> Result<Vec<StockLevel>, CommerceError> {
        self.round_trip("verify_stock").await?;
        let inner = self.lock();
        Ok(items
            .iter()
            .map(|query| StockLevel {
                product_id: query.product_id.clone(),
                variation_id: query.variation_id.clone(),
                available_stock: inner
                    .products
                    .get(&query.product_id)
                    .map_or(0, |p| p.available_stock),
            })
            .collect())
    }
}

#[async_trait]
impl CouponCatalog for InMemoryBackend {
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, CommerceError> {
        self.round_trip("find_coupon").await?;
        Ok(self.lock().coupons.get(&normalize_code(code)).cloned())
    }

    async fn usage_count(&self, code: &str) -> Result<u32, CommerceError> {
        self.round_trip("usage_count").await?;
        Ok(self
            .lock()
            .coupon_usage
            .get(&normalize_code(code))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl CheckoutApi for InMemoryBackend {
    async fn start_checkout(
        &self,
        request: &StartCheckoutRequest,
    ) -> Result<CheckoutToken, CommerceError> {
        self.round_trip("start_checkout").await?;
        let mut inner = self.lock();
        if request.items.is_empty() {
            return Err(rejected("El carrito está vacío"));
        }
        for query in &request.items {
            if let Some(listing) = inner.products.get(&query.product_id) {
                if query.quantity > listing.available_stock {
                    return Err(CommerceError::Rejected {
                        message: "Stock insuficiente".to_string(),
                        errors: vec![format!("{}: disponible {}", listing.name, listing.available_stock)],
                    });
                }
            }
        }
        inner.checkouts += 1;
        Ok(CheckoutToken::generate())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order, CommerceError> {
        self.round_trip("create_order").await?;
        let mut inner = self.lock();
        let number = format!("PED-{:06}", inner.orders.len() + 1);
        let order = Order::from_request(OrderId::generate(), number, request);
        inner.orders.push(order.clone());
        Ok(order)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryBackend {
    async fn create_form_token(
        &self,
        request: &FormTokenRequest,
    ) -> Result<FormTokenResponse, CommerceError> {
        self.round_trip("create_form_token").await?;
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_form_token) {
            return Err(CommerceError::Network("form token service unavailable".into()));
        }
        if !inner.orders.iter().any(|o| o.id == request.order_id) {
            return Err(rejected("Pedido no encontrado"));
        }
        inner.form_tokens += 1;
        Ok(FormTokenResponse {
            form_token: format!("ft-{}-{}", request.order_id, inner.form_tokens),
            public_key: "test-public-key".to_string(),
            endpoint: "https://static.micuentaweb.pe".to_string(),
        })
    }

    async fn validate_payment(
        &self,
        request: &ValidatePaymentRequest,
    ) -> Result<PaymentValidation, CommerceError> {
        self.round_trip("validate_payment").await?;
        let mut inner = self.lock();
        inner.validations += 1;
        let status = inner.payment_status.clone();
        let transaction_id = format!("tx-{}", inner.validations);

        let order = inner
            .orders
            .iter_mut()
            .find(|o| o.id == request.order_id)
            .ok_or_else(|| rejected("Pedido no encontrado"))?;
        let amount = order.total;
        let payment_status = PaymentStatus::from_gateway(&status);
        if payment_status == PaymentStatus::Paid {
            order.status = OrderStatus::Approved;
        }
        inner.payments.push(Payment {
            id: PaymentId::generate(),
            order_id: request.order_id.clone(),
            amount,
            fee: Money::zero(amount.currency),
            status: payment_status,
            gateway_reference: transaction_id.clone(),
        });

        let paid = payment_status == PaymentStatus::Paid;
        Ok(PaymentValidation {
            order_status: status,
            transaction_id: paid.then_some(transaction_id),
            amount: Some(amount.to_decimal()),
            message: (!paid).then(|| "Pago rechazado".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn polo() -> ProductListing {
        ProductListing::new("prod-polo", "Polo", Money::from_units(40, Currency::PEN)).with_stock(3)
    }

    #[tokio::test]
    async fn test_server_cart_clamps_to_stock() {
        let backend = InMemoryBackend::new();
        backend.add_product(polo());

        let cart = backend
            .execute(&CartCommand::Add {
                product_id: "prod-polo".into(),
                variation_id: None,
                quantity: 5,
            })
            .await
            .unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.items[0].id.as_str(), "srv-1");
    }

    #[tokio::test]
    async fn test_unknown_product_rejected() {
        let backend = InMemoryBackend::new();
        let err = backend
            .execute(&CartCommand::Add {
                product_id: "prod-x".into(),
                variation_id: None,
                quantity: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_update_falls_back_to_product() {
        let backend = InMemoryBackend::new();
        backend.add_product(polo());
        backend
            .execute(&CartCommand::Add {
                product_id: "prod-polo".into(),
                variation_id: None,
                quantity: 1,
            })
            .await
            .unwrap();

        let cart = backend
            .execute(&CartCommand::Update {
                item_id: ItemId::new("item_local"),
                product_id: "prod-polo".into(),
                variation_id: None,
                quantity: 2,
            })
            .await
            .unwrap();
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_offline_is_a_network_error() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);
        let err = backend.fetch_cart().await.unwrap_err();
        assert!(matches!(err, CommerceError::Network(_)));
    }
}
