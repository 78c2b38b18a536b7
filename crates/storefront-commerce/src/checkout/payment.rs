//! Payment gateway adapter.
//!
//! Runs the sequenced payment protocol for the embedded gateway widget:
//!
//! 1. create the preliminary order (once per checkout),
//! 2. obtain a short-lived form token for that order,
//! 3. hand token and public key to the widget and wait for its callback,
//! 4. validate the signed answer with the gateway.
//!
//! Every step awaits the previous one and the whole protocol is
//! single-flight: a second call while one is outstanding fails with
//! [`CommerceError::FlowInProgress`].
//!
//! Order creation runs on its own task. A caller that gives up on
//! [`PaymentGatewayAdapter::prepare`] does not cancel it; the next call
//! collects the order instead of creating another one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::backend::{CheckoutApi, FormTokenRequest, PaymentGateway, ValidatePaymentRequest};
use crate::checkout::state::InFlight;
use crate::checkout::{Order, OrderRequest};
use crate::error::CommerceError;
use crate::ids::OrderId;
use crate::money::Money;

/// A form token issued by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormToken {
    pub token: String,
    pub public_key: String,
    pub endpoint: String,
    /// Order the token was issued for.
    pub order_id: OrderId,
    pub issued_at: DateTime<Utc>,
}

impl FormToken {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.issued_at >= ttl
    }
}

/// What the embedded widget needs to collect a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentForm {
    pub order_id: OrderId,
    pub order_number: String,
    pub form_token: String,
    pub public_key: String,
    pub endpoint: String,
    pub amount: Money,
}

/// Signed answer posted back by the widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAnswer {
    pub kr_answer: String,
    pub kr_hash: String,
}

impl GatewayAnswer {
    pub fn new(kr_answer: impl Into<String>, kr_hash: impl Into<String>) -> Self {
        Self {
            kr_answer: kr_answer.into(),
            kr_hash: kr_hash.into(),
        }
    }
}

/// Result of a successful callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The gateway reported `PAID`.
    Paid {
        order_id: OrderId,
        transaction_id: Option<String>,
    },
    /// The order was already validated; nothing changed.
    AlreadyValidated { order_id: OrderId },
}

impl PaymentOutcome {
    pub fn order_id(&self) -> &OrderId {
        match self {
            PaymentOutcome::Paid { order_id, .. } | PaymentOutcome::AlreadyValidated { order_id } => {
                order_id
            }
        }
    }
}

/// Drives order creation, token acquisition and payment validation.
pub struct PaymentGatewayAdapter {
    checkout: Arc<dyn CheckoutApi>,
    gateway: Arc<dyn PaymentGateway>,
    token_ttl: Duration,
    in_flight: InFlight,
    order: Option<Order>,
    /// Order creation still running for an abandoned `prepare`.
    creating: Option<JoinHandle<Result<Order, CommerceError>>>,
    token: Option<FormToken>,
    /// Order awaiting the widget callback.
    pending: Option<OrderId>,
    validated: Option<OrderId>,
}

impl std::fmt::Debug for PaymentGatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGatewayAdapter")
            .field("order", &self.order.as_ref().map(|o| &o.id))
            .field("creating", &self.creating.is_some())
            .field("pending", &self.pending)
            .field("validated", &self.validated)
            .finish_non_exhaustive()
    }
}

impl PaymentGatewayAdapter {
    pub fn new(
        checkout: Arc<dyn CheckoutApi>,
        gateway: Arc<dyn PaymentGateway>,
        token_ttl: Duration,
        in_flight: InFlight,
    ) -> Self {
        Self {
            checkout,
            gateway,
            token_ttl,
            in_flight,
            order: None,
            creating: None,
            token: None,
            pending: None,
            validated: None,
        }
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn form_token(&self) -> Option<&FormToken> {
        self.token.as_ref()
    }

    pub fn pending_order(&self) -> Option<&OrderId> {
        self.pending.as_ref()
    }

    pub fn validated_order(&self) -> Option<&OrderId> {
        self.validated.as_ref()
    }

    /// Steps 1 to 3: make sure an order and a live form token exist and
    /// register the order as awaiting a callback.
    #[instrument(skip(self, request), fields(checkout_token = %request.checkout_token))]
    pub async fn prepare(&mut self, request: &OrderRequest) -> Result<PaymentForm, CommerceError> {
        let _guard = self.in_flight.acquire("payment")?;
        if let Some(order_id) = &self.validated {
            return Err(CommerceError::InvariantViolation(format!(
                "order {order_id} is already paid"
            )));
        }

        if self.creating.is_some() {
            match self.finish_creation().await {
                Ok(order) => {
                    info!(order_id = %order.id, "collected order from an earlier attempt");
                    self.order = Some(order);
                }
                Err(e) => warn!(error = %e, "earlier order creation failed"),
            }
        }

        let order = match self.order.take() {
            Some(order) if order.matches_request(request) => {
                info!(order_id = %order.id, "reusing existing order");
                order
            }
            previous => {
                if let Some(previous) = previous {
                    info!(order_id = %previous.id, "checkout changed, creating a new order");
                    self.token = None;
                }
                info!(total = %request.total.display(), "creating order");
                let checkout = Arc::clone(&self.checkout);
                let body = request.clone();
                self.creating = Some(tokio::spawn(async move { checkout.create_order(&body).await }));
                let order = self.finish_creation().await.map_err(|e| {
                    warn!(error = %e, "order creation failed");
                    e
                })?;
                info!(order_id = %order.id, order_number = %order.order_number, "order created");
                order
            }
        };
        self.order = Some(order.clone());

        let now = Utc::now();
        let token = match &self.token {
            Some(token) if token.order_id == order.id && !token.is_expired(self.token_ttl, now) => {
                token.clone()
            }
            _ => {
                let response = self
                    .gateway
                    .create_form_token(&FormTokenRequest {
                        order_id: order.id.clone(),
                        amount: order.total.to_decimal(),
                        currency: order.currency,
                        email: request.customer.email.clone(),
                    })
                    .await
                    .map_err(|e| {
                        warn!(order_id = %order.id, error = %e, "form token request failed");
                        e
                    })?;
                let token = FormToken {
                    token: response.form_token,
                    public_key: response.public_key,
                    endpoint: response.endpoint,
                    order_id: order.id.clone(),
                    issued_at: now,
                };
                self.token = Some(token.clone());
                token
            }
        };

        self.pending = Some(order.id.clone());
        Ok(PaymentForm {
            order_id: order.id,
            order_number: order.order_number,
            form_token: token.token,
            public_key: token.public_key,
            endpoint: token.endpoint,
            amount: order.total,
        })
    }

    /// Step 4: validate the widget's signed answer.
    #[instrument(skip(self, answer))]
    pub async fn handle_callback(
        &mut self,
        answer: &GatewayAnswer,
    ) -> Result<PaymentOutcome, CommerceError> {
        if let Some(order_id) = &self.validated {
            info!(order_id = %order_id, "duplicate payment callback ignored");
            return Ok(PaymentOutcome::AlreadyValidated {
                order_id: order_id.clone(),
            });
        }
        let _guard = self.in_flight.acquire("payment validation")?;
        let Some(order_id) = self.pending.clone() else {
            error!("payment callback without a pending order");
            return Err(CommerceError::InvariantViolation(
                "payment callback without a pending order".into(),
            ));
        };

        let result = self
            .gateway
            .validate_payment(&ValidatePaymentRequest {
                kr_answer: answer.kr_answer.clone(),
                kr_hash: answer.kr_hash.clone(),
                order_id: order_id.clone(),
            })
            .await?;

        if result.is_paid() {
            info!(order_id = %order_id, transaction_id = ?result.transaction_id, "payment validated");
            self.validated = Some(order_id.clone());
            self.pending = None;
            self.token = None;
            return Ok(PaymentOutcome::Paid {
                order_id,
                transaction_id: result.transaction_id,
            });
        }

        let token_expired = result.is_expired()
            || self
                .token
                .as_ref()
                .map_or(true, |t| t.is_expired(self.token_ttl, Utc::now()));
        if token_expired {
            self.token = None;
        }
        warn!(
            order_id = %order_id,
            status = %result.order_status,
            token_expired,
            "payment not approved"
        );
        Err(CommerceError::GatewayRejection {
            status: result.order_status,
            message: result
                .message
                .unwrap_or_else(|| "The payment was not approved".to_string()),
        })
    }

    /// Wait for the running order creation.
    ///
    /// The handle is only released once the task has finished, so dropping
    /// this future leaves it for the next caller.
    async fn finish_creation(&mut self) -> Result<Order, CommerceError> {
        let Some(handle) = self.creating.as_mut() else {
            return Err(CommerceError::InvariantViolation(
                "no order creation running".into(),
            ));
        };
        let joined = handle.await;
        self.creating = None;
        joined.map_err(|e| {
            error!(error = %e, "order creation task failed");
            CommerceError::InvariantViolation(format!("order creation task failed: {e}"))
        })?
    }

    /// Whether the next [`prepare`](Self::prepare) has to request a new token.
    pub fn needs_new_token(&self) -> bool {
        self.token
            .as_ref()
            .map_or(true, |t| t.is_expired(self.token_ttl, Utc::now()))
    }

    /// Drop the finished order but remember it was validated, so a late
    /// duplicate callback stays a no-op.
    pub fn settle(&mut self) {
        self.order = None;
        self.token = None;
        self.pending = None;
    }

    /// Forget the order, token and callback registration.
    ///
    /// An order creation still running is left to finish on its own.
    pub fn reset(&mut self) {
        self.order = None;
        self.creating = None;
        self.token = None;
        self.pending = None;
        self.validated = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::checkout::{CustomerInfo, PaymentMethod, ShippingAddress};
    use crate::ids::CheckoutToken;
    use crate::money::Currency;
    use crate::shipping::{ShippingOption, ShippingTier, Zone};

    fn request() -> OrderRequest {
        let pen = |units| Money::from_units(units, Currency::PEN);
        OrderRequest {
            checkout_token: CheckoutToken::new("chk-1"),
            customer: CustomerInfo {
                email: "ana@example.pe".into(),
                ..CustomerInfo::default()
            },
            shipping_address: ShippingAddress::new("Lima", "Lima", "Lince", "Av. Arequipa 2450"),
            shipping_method: ShippingOption {
                id: ShippingOption::id_for(Zone::Metropolitana, ShippingTier::Economic),
                tier: ShippingTier::Economic,
                zone: Zone::Metropolitana,
                name: "Economic".into(),
                price: pen(9),
                min_days: 3,
                max_days: 5,
                carrier: "Serpost".into(),
                has_insurance: false,
                has_tracking: false,
            },
            payment_method: PaymentMethod::Card,
            items: Vec::new(),
            coupon_code: None,
            subtotal: pen(100),
            discount: pen(0),
            shipping: pen(9),
            tax: pen(18),
            total: pen(127),
            currency: Currency::PEN,
        }
    }

    fn adapter(backend: &Arc<InMemoryBackend>) -> PaymentGatewayAdapter {
        PaymentGatewayAdapter::new(
            backend.clone(),
            backend.clone(),
            Duration::minutes(15),
            InFlight::new(),
        )
    }

    #[tokio::test]
    async fn test_prepare_creates_order_and_token() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);

        let form = adapter.prepare(&request()).await.unwrap();
        assert_eq!(form.amount.amount_cents, 12700);
        assert_eq!(adapter.pending_order(), Some(&form.order_id));
        assert_eq!(backend.orders_created(), 1);
        assert_eq!(backend.form_tokens_issued(), 1);
    }

    #[tokio::test]
    async fn test_prepare_reuses_order_and_live_token() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);

        let first = adapter.prepare(&request()).await.unwrap();
        let second = adapter.prepare(&request()).await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(first.form_token, second.form_token);
        assert_eq!(backend.orders_created(), 1);
        assert_eq!(backend.form_tokens_issued(), 1);
    }

    #[tokio::test]
    async fn test_token_failure_keeps_order() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);

        backend.fail_next_form_token();
        let err = adapter.prepare(&request()).await.unwrap_err();
        assert!(matches!(err, CommerceError::Network(_)));
        assert!(adapter.order().is_some());
        assert!(adapter.pending_order().is_none());

        let form = adapter.prepare(&request()).await.unwrap();
        assert_eq!(Some(&form.order_id), adapter.order().map(|o| &o.id));
        assert_eq!(backend.orders_created(), 1);
    }

    #[tokio::test]
    async fn test_paid_callback_then_duplicate() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);
        let form = adapter.prepare(&request()).await.unwrap();

        let answer = GatewayAnswer::new(r#"{"orderStatus":"PAID"}"#, "hash");
        let outcome = adapter.handle_callback(&answer).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::Paid { .. }));
        assert_eq!(outcome.order_id(), &form.order_id);

        let again = adapter.handle_callback(&answer).await.unwrap();
        assert_eq!(
            again,
            PaymentOutcome::AlreadyValidated {
                order_id: form.order_id.clone()
            }
        );
        assert_eq!(backend.validations(), 1);
        assert_eq!(backend.orders_created(), 1);
    }

    #[tokio::test]
    async fn test_rejected_payment_keeps_order_and_token() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);
        let form = adapter.prepare(&request()).await.unwrap();

        backend.script_payment_status("UNPAID");
        let err = adapter
            .handle_callback(&GatewayAnswer::new("{}", "hash"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::GatewayRejection { ref status, .. } if status == "UNPAID"));
        assert_eq!(adapter.pending_order(), Some(&form.order_id));
        assert!(!adapter.needs_new_token());

        let retry = adapter.prepare(&request()).await.unwrap();
        assert_eq!(retry.form_token, form.form_token);
        assert_eq!(backend.orders_created(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);
        let form = adapter.prepare(&request()).await.unwrap();

        backend.script_payment_status("EXPIRED");
        assert!(adapter
            .handle_callback(&GatewayAnswer::new("{}", "hash"))
            .await
            .is_err());
        assert!(adapter.needs_new_token());

        let retry = adapter.prepare(&request()).await.unwrap();
        assert_eq!(retry.order_id, form.order_id);
        assert_ne!(retry.form_token, form.form_token);
        assert_eq!(backend.form_tokens_issued(), 2);
    }

    #[tokio::test]
    async fn test_callback_without_pending_order() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut adapter = adapter(&backend);
        let err = adapter
            .handle_callback(&GatewayAnswer::new("{}", "hash"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::InvariantViolation(_)));
    }

    /// Records the order right away and answers late.
    struct SlowOrders {
        inner: Arc<InMemoryBackend>,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl CheckoutApi for SlowOrders {
        async fn start_checkout(
            &self,
            request: &crate::backend::StartCheckoutRequest,
        ) -> Result<CheckoutToken, CommerceError> {
            self.inner.start_checkout(request).await
        }

        async fn create_order(&self, request: &OrderRequest) -> Result<Order, CommerceError> {
            let order = self.inner.create_order(request).await?;
            tokio::time::sleep(self.delay).await;
            Ok(order)
        }
    }

    #[tokio::test]
    async fn test_abandoned_prepare_keeps_its_order() {
        let backend = Arc::new(InMemoryBackend::new());
        let slow = Arc::new(SlowOrders {
            inner: backend.clone(),
            delay: std::time::Duration::from_millis(200),
        });
        let flag = InFlight::new();
        let mut adapter =
            PaymentGatewayAdapter::new(slow, backend.clone(), Duration::minutes(15), flag.clone());

        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            adapter.prepare(&request()),
        )
        .await;
        assert!(attempt.is_err());
        assert!(!flag.is_active());
        assert!(adapter.order().is_none());

        let form = adapter.prepare(&request()).await.unwrap();
        assert_eq!(backend.orders_created(), 1);
        assert_eq!(backend.orders()[0].id, form.order_id);
        assert_eq!(adapter.pending_order(), Some(&form.order_id));
    }

    #[tokio::test]
    async fn test_prepare_refused_while_in_flight() {
        let backend = Arc::new(InMemoryBackend::new());
        let flag = InFlight::new();
        let mut adapter = PaymentGatewayAdapter::new(
            backend.clone(),
            backend.clone(),
            Duration::minutes(15),
            flag.clone(),
        );
        let _guard = flag.acquire("checkout").unwrap();
        let err = adapter.prepare(&request()).await.unwrap_err();
        assert!(matches!(err, CommerceError::FlowInProgress("payment")));
        assert_eq!(backend.orders_created(), 0);
    }
}
