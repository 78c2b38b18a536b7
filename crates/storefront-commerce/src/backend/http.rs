//! Storefront API and payment gateway over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use storefront_data::{ClientRequestBuilder, FetchClient};
use tracing::{debug, instrument};

use crate::backend::{
    CartApi, CheckoutApi, CheckoutSession, CouponCatalog, CouponLookup, CouponLookupRequest,
    FormTokenRequest, FormTokenResponse, PaymentGateway,
    PaymentValidation, RemoteCart, StartCheckoutRequest, StockLevel, StockQuery,
    ValidatePaymentRequest,
};
use crate::cart::{normalize_code, CartCommand, Coupon};
use crate::checkout::{Order, OrderRequest};
use crate::config::ApiConfig;
use crate::error::CommerceError;
use crate::ids::{CheckoutToken, ItemId, ProductId, VariationId};

/// Paths of the storefront API.
pub mod endpoints {
    use crate::ids::ItemId;

    pub const CART: &str = "/carrito";
    pub const CART_ADD: &str = "/carrito/agregar";
    pub const CART_UPDATE: &str = "/carrito/actualizar";
    pub const CART_REMOVE: &str = "/carrito/remover";
    pub const CART_CLEAR: &str = "/carrito/limpiar";
    pub const CART_VERIFY_STOCK: &str = "/carrito/verificar-stock";

    pub const CHECKOUT_START: &str = "/checkout/iniciar";
    pub const CHECKOUT_VALIDATE_CUSTOMER: &str = "/checkout/validar-datos-personales";
    pub const CHECKOUT_VALIDATE_ADDRESS: &str = "/checkout/validar-direccion-envio";
    pub const CHECKOUT_SHIPPING_QUOTE: &str = "/checkout/calcular-envio";
    pub const CHECKOUT_APPLY_COUPON: &str = "/checkout/aplicar-cupon";
    pub const CHECKOUT_PLACE_ORDER: &str = "/checkout/procesar-pedido";
    pub const CHECKOUT_SUMMARY: &str = "/checkout/resumen";
    pub const CHECKOUT_SETTINGS: &str = "/checkout/configuracion";
    pub const CHECKOUT_PAYMENT_METHODS: &str = "/checkout/metodos-pago";

    pub const PAYMENT_FORM_TOKEN: &str = "/checkout/izipay/generar-formtoken";
    pub const PAYMENT_VALIDATE: &str = "/checkout/izipay/validar-pago";

    /// `DELETE /carrito/remover/{id}`.
    pub fn cart_remove(item_id: &ItemId) -> String {
        format!("{CART_REMOVE}/{item_id}")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddItemBody<'a> {
    product_id: &'a ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation_id: Option<&'a VariationId>,
    quantity: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateItemBody<'a> {
    item_id: &'a ItemId,
    product_id: &'a ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    variation_id: Option<&'a VariationId>,
    quantity: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyStockBody<'a> {
    items: &'a [StockQuery],
}

/// Backend talking to the storefront API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: FetchClient,
}

impl HttpBackend {
    /// Build a client for `config.base_url`.
    pub fn new(config: &ApiConfig) -> Result<Self, CommerceError> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CommerceError::Config("api.base_url is required".to_string()))?;

        let mut client = FetchClient::with_timeout(Duration::from_secs(config.timeout_secs))?
            .with_base_url(base_url);
        if let Some(token) = &config.auth_token {
            client = client.with_default_header("Authorization", format!("Bearer {token}"));
        }
        Ok(Self { client })
    }

    pub fn from_client(client: FetchClient) -> Self {
        Self { client }
    }

    /// The request a cart command maps to.
    pub fn cart_request(&self, command: &CartCommand) -> Result<ClientRequestBuilder, CommerceError> {
        let request = match command {
            CartCommand::Add {
                product_id,
                variation_id,
                quantity,
            } => self.client.post(endpoints::CART_ADD).json(&AddItemBody {
                product_id,
                variation_id: variation_id.as_ref(),
                quantity: *quantity,
            })?,
            CartCommand::Update {
                item_id,
                product_id,
                variation_id,
                quantity,
            } => self.client.put(endpoints::CART_UPDATE).json(&UpdateItemBody {
                item_id,
                product_id,
                variation_id: variation_id.as_ref(),
                quantity: *quantity,
            })?,
            CartCommand::Remove { item_id, .. } => {
                self.client.delete(endpoints::cart_remove(item_id))
            }
            CartCommand::Clear => self.client.delete(endpoints::CART_CLEAR),
        };
        Ok(request)
    }

    /// The request that looks up coupon `code`.
    pub fn coupon_request(&self, code: &str) -> Result<ClientRequestBuilder, CommerceError> {
        Ok(self
            .client
            .post(endpoints::CHECKOUT_APPLY_COUPON)
            .json(&CouponLookupRequest {
                code: normalize_code(code),
            })?)
    }

    /// An unknown code comes back as a rejection and reads as no coupon.
    async fn lookup_coupon(&self, code: &str) -> Result<CouponLookup, CommerceError> {
        match self.call::<CouponLookup>(self.coupon_request(code)?).await {
            Err(CommerceError::Rejected { message, .. }) => {
                debug!(code, %message, "coupon unknown to the server");
                Ok(CouponLookup::default())
            }
            other => other,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: ClientRequestBuilder,
    ) -> Result<T, CommerceError> {
        let response = request.send().await?;
        Ok(response.envelope::<T>()?)
    }
}

#[async_trait]
impl CartApi for HttpBackend {
    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<RemoteCart, CommerceError> {
        self.call(self.client.get(endpoints::CART)).await
    }

    #[instrument(skip(self, command), fields(op = command.name()))]
    async fn execute(&self, command: &CartCommand) -> Result<RemoteCart, CommerceError> {
        let request = self.cart_request(command)?;
        self.call(request).await
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn verify_stock(&self, items: &[StockQuery]) -> Result<Vec<StockLevel>, CommerceError> {
        let request = self
            .client
            .post(endpoints::CART_VERIFY_STOCK)
            .json(&VerifyStockBody { items })?;
        self.call(request).await
    }
}

#[async_trait]
impl CouponCatalog for HttpBackend {
    #[instrument(skip(self))]
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, CommerceError> {
        Ok(self.lookup_coupon(code).await?.coupon)
    }

    #[instrument(skip(self))]
    async fn usage_count(&self, code: &str) -> Result<u32, CommerceError> {
        Ok(self.lookup_coupon(code).await?.usage_count)
    }
}

#[async_trait]
impl CheckoutApi for HttpBackend {
    #[instrument(skip(self, request))]
    async fn start_checkout(
        &self,
        request: &StartCheckoutRequest,
    ) -> Result<CheckoutToken, CommerceError> {
        let body = self.client.post(endpoints::CHECKOUT_START).json(request)?;
        let session: CheckoutSession = self.call(body).await?;
        Ok(session.checkout_token)
    }

    #[instrument(skip(self, request), fields(checkout_token = %request.checkout_token))]
    async fn create_order(&self, request: &OrderRequest) -> Result<Order, CommerceError> {
        let body = self
            .client
            .post(endpoints::CHECKOUT_PLACE_ORDER)
            .json(request)?;
        self.call(body).await
    }
}

#[async_trait]
impl PaymentGateway for HttpBackend {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_form_token(
        &self,
        request: &FormTokenRequest,
    ) -> Result<FormTokenResponse, CommerceError> {
        let body = self
            .client
            .post(endpoints::PAYMENT_FORM_TOKEN)
            .json(request)?;
        self.call(body).await
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn validate_payment(
        &self,
        request: &ValidatePaymentRequest,
    ) -> Result<PaymentValidation, CommerceError> {
        let body = self.client.post(endpoints::PAYMENT_VALIDATE).json(request)?;
        self.call(body).await
    }
}
