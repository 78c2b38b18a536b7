//! Cart domain events.

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, ProductId};
use crate::money::Money;

/// Emitted by the cart store after each successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded {
        item_id: ItemId,
        product_id: ProductId,
        quantity: i64,
    },
    ItemRemoved {
        item_id: ItemId,
    },
    QuantityChanged {
        item_id: ItemId,
        quantity: i64,
    },
    CouponApplied {
        code: String,
        discount: Money,
    },
    CouponRemoved {
        code: String,
    },
    CartCleared,
    /// Queued commands reached the server.
    Synchronized {
        replayed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = CartEvent::QuantityChanged {
            item_id: ItemId::new("item-1"),
            quantity: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "quantity_changed");
        assert_eq!(json["item_id"], "item-1");
        assert_eq!(
            serde_json::to_value(CartEvent::CartCleared).unwrap()["type"],
            "cart_cleared"
        );
    }
}
