//! Cart line items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommerceError;
use crate::ids::{CategoryId, ItemId, ProductId, VariationId};
use crate::money::Money;

/// Catalog facts needed to put a product in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListing {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    #[serde(default)]
    pub sale_price: Option<Money>,
    pub available_stock: i64,
    /// Weight of one unit in kilograms.
    pub weight_kg: f64,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl ProductListing {
    pub fn new(product_id: impl Into<ProductId>, name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            unit_price,
            sale_price: None,
            available_stock: 100,
            weight_kg: 0.0,
            category_id: None,
        }
    }

    pub fn with_sale_price(mut self, sale_price: Money) -> Self {
        self.sale_price = Some(sale_price);
        self
    }

    pub fn with_stock(mut self, available_stock: i64) -> Self {
        self.available_stock = available_stock;
        self
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = weight_kg;
        self
    }

    pub fn in_category(mut self, category_id: impl Into<CategoryId>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }
}

/// A product line in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: ItemId,
    pub product_id: ProductId,
    #[serde(default)]
    pub variation_id: Option<VariationId>,
    pub name: String,
    pub unit_price: Money,
    #[serde(default)]
    pub sale_price: Option<Money>,
    pub quantity: i64,
    pub available_stock: i64,
    pub weight_kg: f64,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// `quantity × effective_price()`, kept in step by every mutation.
    pub subtotal: Money,
    pub added_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CartItem {
    /// Build a new line from a listing.
    ///
    /// Fails when the product has no stock or `quantity` is not positive; an
    /// excessive quantity is clamped.
    pub fn from_listing(
        listing: &ProductListing,
        variation_id: Option<VariationId>,
        quantity: i64,
        max_per_item: i64,
    ) -> Result<Self, CommerceError> {
        if quantity <= 0 {
            return Err(CommerceError::InvalidQuantity(quantity));
        }
        if listing.available_stock <= 0 {
            return Err(CommerceError::OutOfStock(listing.name.clone()));
        }

        let now = Utc::now();
        let mut item = Self {
            id: ItemId::generate(),
            product_id: listing.product_id.clone(),
            variation_id,
            name: listing.name.clone(),
            unit_price: listing.unit_price,
            sale_price: listing.sale_price,
            quantity: 0,
            available_stock: listing.available_stock,
            weight_kg: listing.weight_kg,
            category_id: listing.category_id.clone(),
            subtotal: Money::zero(listing.unit_price.currency),
            added_at: now,
            modified_at: now,
        };
        item.set_quantity(quantity, max_per_item)?;
        Ok(item)
    }

    /// Whether this line holds `product_id` in `variation_id`.
    pub fn matches(&self, product_id: &ProductId, variation_id: Option<&VariationId>) -> bool {
        &self.product_id == product_id && self.variation_id.as_ref() == variation_id
    }

    /// Sale price when it undercuts the unit price, otherwise the unit price.
    pub fn effective_price(&self) -> Money {
        match self.sale_price {
            Some(sale)
                if sale.currency == self.unit_price.currency
                    && sale.amount_cents < self.unit_price.amount_cents =>
            {
                sale
            }
            _ => self.unit_price,
        }
    }

    pub fn has_discount(&self) -> bool {
        self.effective_price() != self.unit_price
    }

    /// `(unit_price − sale_price) × quantity`, zero without a sale.
    pub fn discount(&self) -> Result<Money, CommerceError> {
        self.unit_price
            .try_sub(&self.effective_price())?
            .try_multiply(self.quantity)
    }

    /// Largest quantity this line may hold.
    pub fn max_quantity(&self, max_per_item: i64) -> i64 {
        self.available_stock.min(max_per_item)
    }

    /// Set the quantity, clamped to `[1, min(stock, max_per_item)]`.
    pub fn set_quantity(&mut self, quantity: i64, max_per_item: i64) -> Result<(), CommerceError> {
        self.quantity = quantity;
        self.normalize(max_per_item)?;
        self.modified_at = Utc::now();
        Ok(())
    }

    /// Re-clamp the quantity and recompute the subtotal from prices.
    pub(crate) fn normalize(&mut self, max_per_item: i64) -> Result<(), CommerceError> {
        self.quantity = clamp_quantity(self.quantity, self.available_stock, max_per_item);
        self.subtotal = self.effective_price().try_multiply(self.quantity)?;
        Ok(())
    }

    pub fn total_weight(&self) -> f64 {
        self.weight_kg * self.quantity as f64
    }
}

/// Clamp a requested quantity into `[1, min(stock, max_per_item)]`.
pub fn clamp_quantity(requested: i64, available_stock: i64, max_per_item: i64) -> i64 {
    let upper = available_stock.min(max_per_item).max(1);
    requested.clamp(1, upper)
}
