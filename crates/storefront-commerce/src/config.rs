//! Engine configuration.
//!
//! Loaded from TOML (or JSON when the file ends in `.json`). Every section
//! has defaults so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CommerceError;
use crate::money::{Currency, Money};
use crate::shipping::{AddressDirectory, TariffTable};

/// Engine configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommerceConfig {
    /// Currency, taxes and quantity limits.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Durable cart record.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Storefront API connection.
    #[serde(default)]
    pub api: ApiConfig,

    /// Payment gateway settings.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Shipping tariffs and address directory.
    #[serde(default)]
    pub shipping: ShippingConfig,
}

impl CommerceConfig {
    /// Load config from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CommerceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CommerceError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| {
                CommerceError::Config(format!("Failed to parse JSON config {}: {}", path.display(), e))
            })?
        } else {
            Self::from_toml_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, CommerceError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), CommerceError> {
        let pricing = &self.pricing;
        if !(0.0..=1.0).contains(&pricing.tax_rate) {
            return Err(CommerceError::Config(format!(
                "pricing.tax_rate must be between 0 and 1, got {}",
                pricing.tax_rate
            )));
        }
        if pricing.max_quantity_per_item < 1 {
            return Err(CommerceError::Config(
                "pricing.max_quantity_per_item must be at least 1".to_string(),
            ));
        }
        if pricing.free_shipping_threshold.is_some_and(|t| t < 0.0) {
            return Err(CommerceError::Config(
                "pricing.free_shipping_threshold cannot be negative".to_string(),
            ));
        }
        if self.storage.cart_key.trim().is_empty() {
            return Err(CommerceError::Config(
                "storage.cart_key cannot be empty".to_string(),
            ));
        }
        if self.payment.form_token_ttl_secs == 0 {
            return Err(CommerceError::Config(
                "payment.form_token_ttl_secs must be positive".to_string(),
            ));
        }
        self.shipping.tariffs.validate()
    }
}

/// Pricing rules applied by the cart summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub currency: Currency,
    pub tax_enabled: bool,
    /// Fraction, e.g. `0.18` for 18%.
    pub tax_rate: f64,
    pub max_quantity_per_item: i64,
    /// Subtotal (in whole currency units) from which shipping is free.
    pub free_shipping_threshold: Option<f64>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: Currency::PEN,
            tax_enabled: true,
            tax_rate: 0.18,
            max_quantity_per_item: 10,
            free_shipping_threshold: None,
        }
    }
}

impl PricingConfig {
    /// The free shipping threshold as money.
    pub fn free_shipping_minimum(&self) -> Option<Money> {
        self.free_shipping_threshold
            .map(|units| Money::from_decimal(units, self.currency))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key of the durable cart record.
    pub cart_key: String,
    /// Directory for the file-backed store. In-memory when absent.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cart_key: "cart".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Bearer token of the authenticated customer, if any.
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Lifetime of a gateway form token.
    pub form_token_ttl_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            form_token_ttl_secs: 15 * 60,
        }
    }
}

impl PaymentConfig {
    pub fn form_token_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.form_token_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1_000))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingConfig {
    pub tariffs: TariffTable,
    pub directory: AddressDirectory,
}
