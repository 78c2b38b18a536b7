//! Shopping cart: items, coupons, the derived summary and the cart store.

mod command;
mod coupon;
mod events;
mod item;
mod store;
mod summary;

pub use command::CartCommand;
pub use coupon::{normalize_code, Coupon, CouponScope, CouponValidation, CouponValidator, CouponValue};
pub use events::CartEvent;
pub use item::{clamp_quantity, CartItem, ProductListing};
pub use store::{CartSnapshot, CartStore, PersistedCart, StockAdjustment};
pub use summary::{CartSummary, ShippingWaiver};
