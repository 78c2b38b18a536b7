//! The cart store.
//!
//! Owns the cart items and the attached coupon, keeps the price summary in
//! step with them, persists a durable local record and mirrors every
//! mutation to the cart API when one is configured.
//!
//! Mutations are optimistic: the local change is applied, persisted and
//! announced before the network call. When the call fails for transport
//! reasons the command is queued and later commands queue behind it.
//! [`CartStore::synchronize`] delivers the queue by comparing the local lines
//! with the server cart and sending target quantities, which makes a
//! repeated delivery harmless.
//!
//! Every network call carries a sequence number. An acknowledgement replaces
//! the local items with the server's view unless a newer one has already
//! been applied.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_cache::{Cache, CacheError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{CartApi, CouponCatalog, RemoteCart, StockQuery};
use crate::cart::{
    CartCommand, CartEvent, CartItem, CartSummary, Coupon, CouponValidation, CouponValidator,
    ProductListing,
};
use crate::config::{CommerceConfig, PricingConfig};
use crate::error::{CommerceError, ErrorKind};
use crate::ids::{ItemId, VariationId};

const EVENT_CAPACITY: usize = 64;

/// The durable local cart record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCart {
    pub items: Vec<CartItem>,
    pub summary: CartSummary,
    #[serde(default)]
    pub applied_coupon: Option<Coupon>,
    pub saved_at: DateTime<Utc>,
    pub synchronized: bool,
    /// Commands not yet delivered to the cart API.
    #[serde(default)]
    pub pending: VecDeque<CartCommand>,
}

/// Items, coupon and summary at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub items: Vec<CartItem>,
    pub coupon: Option<Coupon>,
    pub summary: CartSummary,
}

/// A quantity changed by stock verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub item_id: ItemId,
    pub name: String,
    pub previous_quantity: i64,
    pub quantity: i64,
    pub available_stock: i64,
}

impl StockAdjustment {
    pub fn is_out_of_stock(&self) -> bool {
        self.available_stock <= 0
    }
}

/// Authoritative cart state.
pub struct CartStore {
    items: Vec<CartItem>,
    coupon: Option<Coupon>,
    summary: CartSummary,
    pricing: PricingConfig,
    cache: Cache,
    cart_key: String,
    api: Option<Arc<dyn CartApi>>,
    coupons: Option<CouponValidator>,
    events: broadcast::Sender<CartEvent>,
    pending: VecDeque<CartCommand>,
    synchronized: bool,
    next_seq: u64,
    applied_seq: u64,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("items", &self.items.len())
            .field("coupon", &self.coupon.as_ref().map(|c| c.code.as_str()))
            .field("synchronized", &self.synchronized)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl CartStore {
    fn empty(cache: Cache, config: &CommerceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            items: Vec::new(),
            coupon: None,
            summary: CartSummary::empty(config.pricing.currency),
            pricing: config.pricing.clone(),
            cache,
            cart_key: config.storage.cart_key.clone(),
            api: None,
            coupons: None,
            events,
            pending: VecDeque::new(),
            synchronized: true,
            next_seq: 0,
            applied_seq: 0,
        }
    }

    /// Load the persisted cart from `cache`, or start empty.
    ///
    /// An unreadable record is discarded with a warning.
    pub fn load(cache: Cache, config: &CommerceConfig) -> Result<Self, CommerceError> {
        let mut store = Self::empty(cache, config);
        match store.cache.get::<PersistedCart>(&store.cart_key) {
            Ok(Some(record)) => store.restore(record),
            Ok(None) => debug!(key = %store.cart_key, "no persisted cart"),
            Err(CacheError::SerializeError(e)) => {
                warn!(key = %store.cart_key, error = %e, "discarding unreadable cart record");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(store)
    }

    /// Open the store configured in `config.storage`.
    pub fn open(config: &CommerceConfig) -> Result<Self, CommerceError> {
        let cache = match &config.storage.path {
            Some(path) => Cache::open(path)?,
            None => Cache::in_memory(),
        };
        Self::load(cache, config)
    }

    /// A fresh store backed by an in-memory record.
    pub fn in_memory(config: &CommerceConfig) -> Self {
        Self::empty(Cache::in_memory(), config)
    }

    /// Mirror mutations to `api`.
    pub fn with_api(mut self, api: Arc<dyn CartApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Validate coupons against `catalog`.
    pub fn with_coupons(mut self, catalog: Arc<dyn CouponCatalog>) -> Self {
        self.coupons = Some(CouponValidator::new(catalog));
        self
    }

    fn restore(&mut self, record: PersistedCart) {
        let max = self.pricing.max_quantity_per_item;
        let mut items = record.items;
        for item in &mut items {
            if let Err(e) = item.normalize(max) {
                warn!(key = %self.cart_key, error = %e, "discarding persisted cart");
                return;
            }
        }
        if let Err(e) = self.commit(items, record.applied_coupon) {
            warn!(key = %self.cart_key, error = %e, "discarding persisted cart");
            return;
        }
        self.pending = record.pending;
        self.synchronized = record.synchronized && self.pending.is_empty();
        info!(
            key = %self.cart_key,
            items = self.items.len(),
            pending = self.pending.len(),
            "cart restored"
        );
    }

    /// Subscribe to cart events.
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.events.subscribe()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.id == item_id)
    }

    pub fn summary(&self) -> &CartSummary {
        &self.summary
    }

    pub fn coupon(&self) -> Option<&Coupon> {
        self.coupon.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether every local change has reached the server.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Number of commands waiting for [`CartStore::synchronize`].
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            items: self.items.clone(),
            coupon: self.coupon.clone(),
            summary: self.summary.clone(),
        }
    }

    /// Add `quantity` units of a product, merging with an existing line.
    ///
    /// Returns the id of the line holding the product.
    pub async fn add_item(
        &mut self,
        listing: &ProductListing,
        variation_id: Option<VariationId>,
        quantity: i64,
    ) -> Result<ItemId, CommerceError> {
        if quantity <= 0 {
            return Err(CommerceError::InvalidQuantity(quantity));
        }
        if listing.available_stock <= 0 {
            return Err(CommerceError::OutOfStock(listing.name.clone()));
        }
        if listing.unit_price.currency != self.pricing.currency {
            return Err(CommerceError::CurrencyMismatch {
                expected: self.pricing.currency,
                got: listing.unit_price.currency,
            });
        }

        let max = self.pricing.max_quantity_per_item;
        let mut items = self.items.clone();
        let existing = items
            .iter_mut()
            .find(|i| i.matches(&listing.product_id, variation_id.as_ref()));
        let (item_id, applied) = match existing {
            Some(line) => {
                line.unit_price = listing.unit_price;
                line.sale_price = listing.sale_price;
                line.available_stock = listing.available_stock;
                let requested = line
                    .quantity
                    .checked_add(quantity)
                    .ok_or(CommerceError::Overflow)?;
                line.set_quantity(requested, max)?;
                (line.id.clone(), line.quantity)
            }
            None => {
                let line = CartItem::from_listing(listing, variation_id.clone(), quantity, max)?;
                let added = (line.id.clone(), line.quantity);
                items.push(line);
                added
            }
        };
        let coupon = self.coupon.clone();
        self.commit(items, coupon)?;

        info!(
            item_id = %item_id,
            product_id = %listing.product_id,
            quantity = applied,
            "item added to cart"
        );
        self.persist();
        self.emit(CartEvent::ItemAdded {
            item_id: item_id.clone(),
            product_id: listing.product_id.clone(),
            quantity: applied,
        });

        self.push(CartCommand::Add {
            product_id: listing.product_id.clone(),
            variation_id: variation_id.clone(),
            quantity,
        })
        .await?;

        // The server's acknowledgement may have renamed the line.
        Ok(self
            .items
            .iter()
            .find(|i| i.matches(&listing.product_id, variation_id.as_ref()))
            .map(|i| i.id.clone())
            .unwrap_or(item_id))
    }

    /// Set a line's quantity; `quantity <= 0` removes the line.
    pub async fn update_quantity(
        &mut self,
        item_id: &ItemId,
        quantity: i64,
    ) -> Result<(), CommerceError> {
        if quantity <= 0 {
            return self.remove_item(item_id).await;
        }

        let max = self.pricing.max_quantity_per_item;
        let mut items = self.items.clone();
        let line = items
            .iter_mut()
            .find(|i| &i.id == item_id)
            .ok_or_else(|| CommerceError::ItemNotInCart(item_id.to_string()))?;
        line.set_quantity(quantity, max)?;
        let command = CartCommand::Update {
            item_id: item_id.clone(),
            product_id: line.product_id.clone(),
            variation_id: line.variation_id.clone(),
            quantity: line.quantity,
        };
        let applied = line.quantity;
        let coupon = self.coupon.clone();
        self.commit(items, coupon)?;

        info!(item_id = %item_id, requested = quantity, quantity = applied, "cart quantity changed");
        self.persist();
        self.emit(CartEvent::QuantityChanged {
            item_id: item_id.clone(),
            quantity: applied,
        });
        self.push(command).await
    }

    /// Remove a line.
    pub async fn remove_item(&mut self, item_id: &ItemId) -> Result<(), CommerceError> {
        let position = self
            .items
            .iter()
            .position(|i| &i.id == item_id)
            .ok_or_else(|| CommerceError::ItemNotInCart(item_id.to_string()))?;

        let mut items = self.items.clone();
        let removed = items.remove(position);
        let coupon = self.coupon.clone();
        self.commit(items, coupon)?;

        info!(item_id = %item_id, product_id = %removed.product_id, "item removed from cart");
        self.persist();
        self.emit(CartEvent::ItemRemoved {
            item_id: item_id.clone(),
        });
        self.push(CartCommand::Remove {
            item_id: removed.id,
            product_id: removed.product_id,
            variation_id: removed.variation_id,
        })
        .await
    }

    /// Remove every line and the coupon.
    pub async fn clear(&mut self) -> Result<(), CommerceError> {
        self.commit(Vec::new(), None)?;
        info!("cart cleared");
        self.persist();
        self.emit(CartEvent::CartCleared);
        self.push(CartCommand::Clear).await
    }

    /// Validate `code` and attach it, replacing any previous coupon.
    pub async fn apply_coupon(&mut self, code: &str) -> Result<CouponValidation, CommerceError> {
        let validator = self.coupons.clone().ok_or_else(|| {
            CommerceError::InvariantViolation("no coupon catalog configured".to_string())
        })?;

        let validation = validator.validate(code, &self.summary, &self.items).await?;
        if !validation.valid {
            info!(code = %validation.code, reason = %validation.message, "coupon rejected");
            return Err(CommerceError::InvalidCoupon {
                code: validation.code,
                reason: validation.message,
            });
        }
        let coupon = validation.coupon.clone().ok_or_else(|| {
            CommerceError::InvariantViolation("valid coupon without definition".to_string())
        })?;

        let items = self.items.clone();
        self.commit(items, Some(coupon))?;

        info!(
            code = %validation.code,
            discount = self.summary.coupon_discount.amount_cents,
            "coupon applied"
        );
        self.persist();
        self.emit(CartEvent::CouponApplied {
            code: validation.code.clone(),
            discount: self.summary.coupon_discount,
        });
        Ok(validation)
    }

    /// Detach the coupon, returning it.
    pub fn remove_coupon(&mut self) -> Result<Option<Coupon>, CommerceError> {
        let Some(coupon) = self.coupon.clone() else {
            return Ok(None);
        };
        let items = self.items.clone();
        self.commit(items, None)?;

        info!(code = %coupon.code, "coupon removed");
        self.persist();
        self.emit(CartEvent::CouponRemoved {
            code: coupon.code.clone(),
        });
        Ok(Some(coupon))
    }

    /// Reserve the next request sequence number.
    pub fn issue_sequence(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Apply the server's view of the cart for request `seq`.
    ///
    /// Returns `false` when a newer acknowledgement was already applied.
    /// While commands are still queued only the sequence is recorded, so
    /// undelivered local changes stay visible.
    pub fn acknowledge(&mut self, seq: u64, remote: RemoteCart) -> bool {
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "discarding stale cart acknowledgement");
            return false;
        }
        self.applied_seq = seq;
        if !self.pending.is_empty() {
            debug!(seq, pending = self.pending.len(), "acknowledgement recorded behind queued changes");
            return true;
        }

        let currency = self.pricing.currency;
        let max = self.pricing.max_quantity_per_item;
        let mut items = Vec::with_capacity(remote.items.len());
        for remote_item in remote.items {
            match remote_item.into_item(currency, max) {
                Ok(mut item) => {
                    if let Some(local) = self
                        .items
                        .iter()
                        .find(|l| l.matches(&item.product_id, item.variation_id.as_ref()))
                    {
                        item.added_at = local.added_at;
                    }
                    items.push(item);
                }
                Err(e) => warn!(error = %e, "skipping unreadable server cart line"),
            }
        }

        let coupon = self.coupon.clone();
        if let Err(e) = self.commit(items, coupon) {
            warn!(seq, error = %e, "server cart could not be priced; keeping local cart");
            return false;
        }
        self.synchronized = true;
        debug!(seq, items = self.items.len(), "server cart applied");
        self.persist();
        true
    }

    /// Deliver queued changes to the cart API.
    ///
    /// The server cart is fetched first and the local lines are sent as
    /// absolute quantities against it, so a change the server already
    /// applied (its acknowledgement lost in transit) is not applied twice.
    /// Stops at the first transport failure, keeping the queue. Commands the
    /// server rejects are dropped. Returns how many commands were delivered.
    #[instrument(skip(self), fields(pending = self.pending.len()))]
    pub async fn synchronize(&mut self) -> Result<usize, CommerceError> {
        let Some(api) = self.api.clone() else {
            return Ok(0);
        };
        if self.pending.is_empty() {
            if !self.synchronized {
                self.reload_from_server(api.as_ref()).await?;
            }
            self.emit(CartEvent::Synchronized { replayed: 0 });
            return Ok(0);
        }

        let remote = match api.fetch_cart().await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "server cart unavailable; keeping queued changes");
                self.persist();
                return Err(e);
            }
        };

        let mut replayed = 0;
        for command in reconcile(&self.items, &remote) {
            match api.execute(&command).await {
                Ok(_) => replayed += 1,
                Err(e) if e.kind() == ErrorKind::Network => {
                    warn!(op = command.name(), error = %e, replayed, "cart synchronization interrupted");
                    self.persist();
                    return Err(e);
                }
                Err(e) => {
                    warn!(op = command.name(), error = %e, "server rejected queued cart change; dropping it");
                }
            }
        }

        self.pending.clear();
        self.reload_from_server(api.as_ref()).await?;
        self.synchronized = true;
        self.persist();
        info!(replayed, "cart synchronized");
        self.emit(CartEvent::Synchronized { replayed });
        Ok(replayed)
    }

    /// Replace the local cart with the server's, after flushing queued changes.
    pub async fn refresh(&mut self) -> Result<(), CommerceError> {
        let Some(api) = self.api.clone() else {
            return Ok(());
        };
        if !self.pending.is_empty() {
            self.synchronize().await?;
        }
        self.reload_from_server(api.as_ref()).await
    }

    /// Refresh stock levels from the server and re-clamp quantities.
    #[instrument(skip(self), fields(items = self.items.len()))]
    pub async fn verify_stock(&mut self) -> Result<Vec<StockAdjustment>, CommerceError> {
        let Some(api) = self.api.clone() else {
            return Ok(Vec::new());
        };
        let queries: Vec<StockQuery> = self
            .items
            .iter()
            .map(|i| StockQuery {
                product_id: i.product_id.clone(),
                variation_id: i.variation_id.clone(),
                quantity: i.quantity,
            })
            .collect();
        let levels = api.verify_stock(&queries).await?;

        let max = self.pricing.max_quantity_per_item;
        let mut items = self.items.clone();
        let mut adjustments = Vec::new();
        for item in &mut items {
            let Some(level) = levels
                .iter()
                .find(|l| item.matches(&l.product_id, l.variation_id.as_ref()))
            else {
                continue;
            };
            let previous_quantity = item.quantity;
            item.available_stock = level.available_stock;
            item.set_quantity(previous_quantity, max)?;
            if item.quantity != previous_quantity || level.available_stock <= 0 {
                adjustments.push(StockAdjustment {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    previous_quantity,
                    quantity: item.quantity,
                    available_stock: level.available_stock,
                });
            }
        }
        let coupon = self.coupon.clone();
        self.commit(items, coupon)?;
        self.persist();

        for adjustment in &adjustments {
            warn!(
                item_id = %adjustment.item_id,
                previous = adjustment.previous_quantity,
                quantity = adjustment.quantity,
                stock = adjustment.available_stock,
                "cart quantity adjusted to stock"
            );
            if adjustment.quantity != adjustment.previous_quantity {
                self.emit(CartEvent::QuantityChanged {
                    item_id: adjustment.item_id.clone(),
                    quantity: adjustment.quantity,
                });
            }
        }
        Ok(adjustments)
    }

    fn commit(&mut self, items: Vec<CartItem>, coupon: Option<Coupon>) -> Result<(), CommerceError> {
        let summary = CartSummary::compute(&items, coupon.as_ref(), None, &self.pricing)?;
        self.items = items;
        self.coupon = coupon;
        self.summary = summary;
        Ok(())
    }

    fn persist(&self) {
        let record = PersistedCart {
            items: self.items.clone(),
            summary: self.summary.clone(),
            applied_coupon: self.coupon.clone(),
            saved_at: Utc::now(),
            synchronized: self.synchronized,
            pending: self.pending.clone(),
        };
        if let Err(e) = self.cache.set(&self.cart_key, &record) {
            error!(key = %self.cart_key, error = %e, "failed to persist cart");
        }
    }

    fn emit(&self, event: CartEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn push(&mut self, command: CartCommand) -> Result<(), CommerceError> {
        let Some(api) = self.api.clone() else {
            return Ok(());
        };
        if !self.pending.is_empty() {
            debug!(op = command.name(), queued = self.pending.len(), "queueing behind unsynchronized changes");
            self.enqueue(command);
            return Ok(());
        }

        let seq = self.issue_sequence();
        match api.execute(&command).await {
            Ok(remote) => {
                self.acknowledge(seq, remote);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::Network => {
                warn!(op = command.name(), error = %e, "cart change kept locally until synchronization");
                self.enqueue(command);
                Ok(())
            }
            Err(e) => {
                warn!(op = command.name(), error = %e, "server rejected cart change; restoring server cart");
                if let Err(reload) = self.reload_from_server(api.as_ref()).await {
                    warn!(error = %reload, "could not restore server cart");
                }
                Err(e)
            }
        }
    }

    fn enqueue(&mut self, command: CartCommand) {
        self.pending.push_back(command);
        self.synchronized = false;
        self.persist();
    }

    async fn reload_from_server(&mut self, api: &dyn CartApi) -> Result<(), CommerceError> {
        let seq = self.issue_sequence();
        match api.fetch_cart().await {
            Ok(remote) => {
                self.acknowledge(seq, remote);
                Ok(())
            }
            Err(e) => {
                self.synchronized = false;
                self.persist();
                Err(e)
            }
        }
    }
}

/// Commands that turn the server cart `remote` into `local`.
///
/// Every command carries the target quantity, never a delta.
fn reconcile(local: &[CartItem], remote: &RemoteCart) -> Vec<CartCommand> {
    let mut commands = Vec::new();
    for line in &remote.items {
        if !local
            .iter()
            .any(|item| item.matches(&line.product_id, line.variation_id.as_ref()))
        {
            commands.push(CartCommand::Remove {
                item_id: line.id.clone(),
                product_id: line.product_id.clone(),
                variation_id: line.variation_id.clone(),
            });
        }
    }
    for item in local {
        let line = remote
            .items
            .iter()
            .find(|line| item.matches(&line.product_id, line.variation_id.as_ref()));
        match line {
            Some(line) if line.quantity == item.quantity => {}
            Some(line) => commands.push(CartCommand::Update {
                item_id: line.id.clone(),
                product_id: item.product_id.clone(),
                variation_id: item.variation_id.clone(),
                quantity: item.quantity,
            }),
            None => commands.push(CartCommand::Add {
                product_id: item.product_id.clone(),
                variation_id: item.variation_id.clone(),
                quantity: item.quantity,
            }),
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, RemoteCartItem};
    use crate::money::{Currency, Money};

    fn pen(units: i64) -> Money {
        Money::from_units(units, Currency::PEN)
    }

    fn config() -> CommerceConfig {
        let mut config = CommerceConfig::default();
        config.pricing.tax_enabled = false;
        config
    }

    fn polo() -> ProductListing {
        ProductListing::new("prod-polo", "Polo", pen(40))
            .with_stock(5)
            .with_weight(0.3)
    }

    fn jean() -> ProductListing {
        ProductListing::new("prod-jean", "Jean", pen(120)).with_stock(20)
    }

    fn fresh_subtotal(store: &CartStore) -> i64 {
        store
            .items()
            .iter()
            .map(|i| i.effective_price().amount_cents * i.quantity)
            .sum()
    }

    #[tokio::test]
    async fn test_add_merges_lines_and_clamps() {
        let mut store = CartStore::in_memory(&config());
        let first = store.add_item(&polo(), None, 2).await.unwrap();
        let second = store.add_item(&polo(), None, 4).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].quantity, 5);
        assert_eq!(store.summary().subtotal, pen(200));
    }

    #[tokio::test]
    async fn test_variations_are_separate_lines() {
        let mut store = CartStore::in_memory(&config());
        store
            .add_item(&polo(), Some(VariationId::new("talla-s")), 1)
            .await
            .unwrap();
        store
            .add_item(&polo(), Some(VariationId::new("talla-m")), 1)
            .await
            .unwrap();
        assert_eq!(store.items().len(), 2);
        assert_eq!(store.summary().item_count, 2);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_input() {
        let mut store = CartStore::in_memory(&config());
        assert!(matches!(
            store.add_item(&polo(), None, 0).await,
            Err(CommerceError::InvalidQuantity(0))
        ));
        assert!(matches!(
            store.add_item(&polo().with_stock(0), None, 1).await,
            Err(CommerceError::OutOfStock(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_summary_tracks_every_mutation() {
        let mut store = CartStore::in_memory(&config());
        let polo_id = store.add_item(&polo(), None, 2).await.unwrap();
        assert_eq!(store.summary().subtotal.amount_cents, fresh_subtotal(&store));

        let jean_id = store.add_item(&jean(), None, 1).await.unwrap();
        assert_eq!(store.summary().subtotal.amount_cents, fresh_subtotal(&store));

        store.update_quantity(&jean_id, 3).await.unwrap();
        assert_eq!(store.summary().subtotal.amount_cents, fresh_subtotal(&store));

        store.remove_item(&polo_id).await.unwrap();
        assert_eq!(store.summary().subtotal.amount_cents, fresh_subtotal(&store));
        assert_eq!(store.summary().subtotal, pen(360));
    }

    #[tokio::test]
    async fn test_update_to_zero_removes() {
        let mut store = CartStore::in_memory(&config());
        let id = store.add_item(&polo(), None, 2).await.unwrap();
        let mut events = store.subscribe();

        store.update_quantity(&id, 0).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            CartEvent::ItemRemoved { item_id: id }
        );
    }

    #[tokio::test]
    async fn test_unknown_item() {
        let mut store = CartStore::in_memory(&config());
        let missing = ItemId::new("item-x");
        assert!(matches!(
            store.update_quantity(&missing, 2).await,
            Err(CommerceError::ItemNotInCart(_))
        ));
        assert!(matches!(
            store.remove_item(&missing).await,
            Err(CommerceError::ItemNotInCart(_))
        ));
    }

    #[tokio::test]
    async fn test_coupon_application_and_recompute() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_coupon(Coupon::fixed_amount("SAVE50", pen(50)));
        let mut store = CartStore::in_memory(&config()).with_coupons(backend.clone());

        let id = store.add_item(&jean(), None, 3).await.unwrap();
        let validation = store.apply_coupon("save50").await.unwrap();
        assert_eq!(validation.discount_amount, pen(50));
        assert_eq!(store.summary().coupon_discount, pen(50));
        assert_eq!(store.summary().total, pen(310));

        // Still attached, discount follows the new subtotal.
        store.update_quantity(&id, 1).await.unwrap();
        assert_eq!(store.summary().coupon_discount, pen(50));

        let removed = store.remove_coupon().unwrap().unwrap();
        assert_eq!(removed.code, "SAVE50");
        assert!(store.summary().coupon_discount.is_zero());
    }

    #[tokio::test]
    async fn test_invalid_coupon_not_attached() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut store = CartStore::in_memory(&config()).with_coupons(backend);
        store.add_item(&jean(), None, 1).await.unwrap();

        let err = store.apply_coupon("NOEXISTE").await.unwrap_err();
        assert!(matches!(err, CommerceError::InvalidCoupon { .. }));
        assert!(store.coupon().is_none());
    }

    #[tokio::test]
    async fn test_single_coupon_policy() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_coupon(Coupon::fixed_amount("SAVE50", pen(50)));
        backend.add_coupon(Coupon::percentage("DIEZ", 10.0));
        let mut store = CartStore::in_memory(&config()).with_coupons(backend);
        store.add_item(&jean(), None, 1).await.unwrap();

        store.apply_coupon("SAVE50").await.unwrap();
        store.apply_coupon("DIEZ").await.unwrap();
        assert_eq!(store.coupon().unwrap().code, "DIEZ");
        assert_eq!(store.summary().coupon_discount, pen(12));
    }

    #[tokio::test]
    async fn test_clear_emits_event_and_drops_coupon() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_coupon(Coupon::percentage("DIEZ", 10.0));
        let mut store = CartStore::in_memory(&config()).with_coupons(backend);
        store.add_item(&jean(), None, 1).await.unwrap();
        store.apply_coupon("DIEZ").await.unwrap();

        let mut events = store.subscribe();
        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(store.coupon().is_none());
        assert_eq!(events.recv().await.unwrap(), CartEvent::CartCleared);
    }

    #[tokio::test]
    async fn test_persisted_record_survives_reload() {
        let cache = Cache::in_memory();
        let config = config();
        {
            let mut store = CartStore::load(cache.clone(), &config).unwrap();
            store.add_item(&polo(), None, 2).await.unwrap();
        }

        let record: PersistedCart = cache.get("cart").unwrap().unwrap();
        assert_eq!(record.items.len(), 1);
        assert!(record.synchronized);

        let store = CartStore::load(cache, &config).unwrap();
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.summary().subtotal, pen(80));
    }

    #[tokio::test]
    async fn test_unreadable_record_is_discarded() {
        let cache = Cache::in_memory();
        cache.set("cart", &serde_json::json!({"items": "nope"})).unwrap();
        let store = CartStore::load(cache, &config()).unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stale_acknowledgement_discarded() {
        let mut store = CartStore::in_memory(&config());
        let older = store.issue_sequence();
        let newer = store.issue_sequence();

        let line = |qty: i64| RemoteCart {
            items: vec![RemoteCartItem {
                id: ItemId::new("srv-1"),
                product_id: "prod-jean".into(),
                variation_id: None,
                name: "Jean".into(),
                unit_price: 120.0,
                sale_price: None,
                quantity: qty,
                stock: 20,
                weight: 0.8,
                category_id: None,
            }],
        };

        assert!(store.acknowledge(newer, line(3)));
        assert!(!store.acknowledge(older, line(1)));
        assert_eq!(store.items()[0].quantity, 3);
        assert_eq!(store.summary().subtotal, pen(360));
    }

    fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_product(polo());
        backend.add_product(jean());
        backend
    }

    #[tokio::test]
    async fn test_remote_mirror_and_server_ids() {
        let backend = backend();
        let mut store = CartStore::in_memory(&config()).with_api(backend.clone());

        let id = store.add_item(&jean(), None, 2).await.unwrap();
        assert!(store.is_synchronized());
        assert_eq!(backend.server_cart().items.len(), 1);
        assert_eq!(store.item(&id).unwrap().quantity, 2);

        store.update_quantity(&id, 4).await.unwrap();
        assert_eq!(backend.server_cart().items[0].quantity, 4);
    }

    #[tokio::test]
    async fn test_offline_changes_queue_and_replay() {
        let backend = backend();
        let mut store = CartStore::in_memory(&config()).with_api(backend.clone());

        backend.set_offline(true);
        store.add_item(&jean(), None, 1).await.unwrap();
        store.add_item(&polo(), None, 2).await.unwrap();
        assert!(!store.is_synchronized());
        assert_eq!(store.pending_commands(), 2);
        assert_eq!(store.items().len(), 2);

        assert!(matches!(
            store.synchronize().await,
            Err(CommerceError::Network(_))
        ));
        assert_eq!(store.pending_commands(), 2);

        backend.set_offline(false);
        let mut events = store.subscribe();
        assert_eq!(store.synchronize().await.unwrap(), 2);
        assert!(store.is_synchronized());
        assert_eq!(backend.server_cart().items.len(), 2);
        assert_eq!(store.summary().subtotal, pen(200));
        assert_eq!(
            events.recv().await.unwrap(),
            CartEvent::Synchronized { replayed: 2 }
        );
    }

    /// Applies every command, then loses the reply while `drop_reply` is set.
    struct LostReplyApi {
        inner: Arc<InMemoryBackend>,
        drop_reply: std::sync::atomic::AtomicBool,
    }

    impl LostReplyApi {
        fn new(inner: Arc<InMemoryBackend>) -> Self {
            Self {
                inner,
                drop_reply: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn lose_next_reply(&self) {
            self.drop_reply.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl CartApi for LostReplyApi {
        async fn fetch_cart(&self) -> Result<RemoteCart, CommerceError> {
            self.inner.fetch_cart().await
        }

        async fn execute(&self, command: &CartCommand) -> Result<RemoteCart, CommerceError> {
            let remote = self.inner.execute(command).await?;
            if self.drop_reply.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(CommerceError::Network("connection reset".into()));
            }
            Ok(remote)
        }

        async fn verify_stock(
            &self,
            items: &[StockQuery],
        ) -> Result<Vec<crate::backend::StockLevel>, CommerceError> {
            self.inner.verify_stock(items).await
        }
    }

    #[tokio::test]
    async fn test_lost_reply_is_not_applied_twice() {
        let backend = backend();
        let api = Arc::new(LostReplyApi::new(backend.clone()));
        let mut store = CartStore::in_memory(&config()).with_api(api.clone());

        api.lose_next_reply();
        store.add_item(&jean(), None, 2).await.unwrap();
        assert_eq!(store.pending_commands(), 1);
        assert_eq!(backend.server_cart().items[0].quantity, 2);

        assert_eq!(store.synchronize().await.unwrap(), 0);
        assert!(store.is_synchronized());
        assert_eq!(store.pending_commands(), 0);
        assert_eq!(backend.server_cart().items.len(), 1);
        assert_eq!(backend.server_cart().items[0].quantity, 2);
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].quantity, 2);
        assert_eq!(store.summary().subtotal, pen(240));

        // A later change whose reply is lost lands once as well.
        let id = store.items()[0].id.clone();
        api.lose_next_reply();
        store.update_quantity(&id, 5).await.unwrap();
        store.synchronize().await.unwrap();
        assert_eq!(backend.server_cart().items[0].quantity, 5);
        assert_eq!(store.items()[0].quantity, 5);
    }

    #[test]
    fn test_reconcile_sends_target_quantities() {
        let mut kept = CartItem::from_listing(&jean(), None, 3, 10).unwrap();
        kept.id = ItemId::new("local-1");
        let added = CartItem::from_listing(&polo(), None, 2, 10).unwrap();

        let mut server_jean = RemoteCartItem::from_item(&kept);
        server_jean.id = ItemId::new("srv-1");
        server_jean.quantity = 1;
        let mut server_other = RemoteCartItem::from_item(&added);
        server_other.id = ItemId::new("srv-2");
        server_other.product_id = "prod-gorra".into();
        let remote = RemoteCart {
            items: vec![server_jean, server_other],
        };

        let commands = reconcile(&[kept, added], &remote);
        assert_eq!(
            commands,
            vec![
                CartCommand::Remove {
                    item_id: ItemId::new("srv-2"),
                    product_id: "prod-gorra".into(),
                    variation_id: None,
                },
                CartCommand::Update {
                    item_id: ItemId::new("srv-1"),
                    product_id: "prod-jean".into(),
                    variation_id: None,
                    quantity: 3,
                },
                CartCommand::Add {
                    product_id: "prod-polo".into(),
                    variation_id: None,
                    quantity: 2,
                },
            ]
        );

        let settled = RemoteCart {
            items: vec![remote.items[0].clone()],
        };
        let mut same = CartItem::from_listing(&jean(), None, 1, 10).unwrap();
        same.id = ItemId::new("srv-1");
        assert!(reconcile(&[same], &settled).is_empty());
    }

    #[tokio::test]
    async fn test_verify_stock_reclamps() {
        let backend = backend();
        let mut store = CartStore::in_memory(&config()).with_api(backend.clone());
        let id = store.add_item(&jean(), None, 6).await.unwrap();

        backend.set_stock(&"prod-jean".into(), 4);
        let adjustments = store.verify_stock().await.unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].previous_quantity, 6);
        assert_eq!(adjustments[0].quantity, 4);
        assert_eq!(store.item(&id).unwrap().quantity, 4);
        assert_eq!(store.summary().subtotal, pen(480));
    }
}
