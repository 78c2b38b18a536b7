//! Cart mutations as sent to the cart API.
//!
//! Commands that could not be delivered are queued in the persisted cart
//! record and replayed in order by `CartStore::synchronize`.

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, ProductId, VariationId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CartCommand {
    Add {
        product_id: ProductId,
        #[serde(default)]
        variation_id: Option<VariationId>,
        quantity: i64,
    },
    Update {
        item_id: ItemId,
        product_id: ProductId,
        #[serde(default)]
        variation_id: Option<VariationId>,
        quantity: i64,
    },
    Remove {
        item_id: ItemId,
        product_id: ProductId,
        #[serde(default)]
        variation_id: Option<VariationId>,
    },
    Clear,
}

impl CartCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CartCommand::Add { .. } => "add",
            CartCommand::Update { .. } => "update",
            CartCommand::Remove { .. } => "remove",
            CartCommand::Clear => "clear",
        }
    }
}
