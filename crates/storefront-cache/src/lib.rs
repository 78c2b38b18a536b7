//! Type-safe key-value store for storefront client state.
//!
//! Provides a small API for keeping serializable records (the local cart,
//! checkout drafts) in a durable store with automatic JSON serialization.
//!
//! # Example
//!
//! ```rust
//! use storefront_cache::Cache;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Draft {
//!     items: Vec<String>,
//! }
//!
//! let cache = Cache::in_memory();
//! let draft = Draft { items: vec!["sku-1".to_string()] };
//!
//! cache.set("cart:guest", &draft).unwrap();
//! let loaded: Option<Draft> = cache.get("cart:guest").unwrap();
//! assert_eq!(loaded, Some(draft));
//!
//! cache.delete("cart:guest").unwrap();
//! assert!(!cache.exists("cart:guest").unwrap());
//! ```

mod error;
mod kv;

pub use error::CacheError;
pub use kv::{Cache, FileStore, KvStore, MemoryStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{Cache, CacheError, KvStore};
}
