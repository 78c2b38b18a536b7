//! Priced shipping options.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ShippingOptionId;
use crate::money::Money;
use crate::shipping::Zone;

/// Service level of a shipping option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingTier {
    Express,
    Standard,
    Economic,
}

impl ShippingTier {
    /// Tiers from fastest to cheapest.
    pub const ALL: [ShippingTier; 3] = [
        ShippingTier::Express,
        ShippingTier::Standard,
        ShippingTier::Economic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingTier::Express => "express",
            ShippingTier::Standard => "standard",
            ShippingTier::Economic => "economic",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ShippingTier::Express => "Express",
            ShippingTier::Standard => "Standard",
            ShippingTier::Economic => "Economic",
        }
    }
}

impl fmt::Display for ShippingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shipping option offered for one destination and weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOption {
    /// Stable per zone and tier, e.g. `metropolitana-express`.
    pub id: ShippingOptionId,
    pub tier: ShippingTier,
    pub zone: Zone,
    pub name: String,
    pub price: Money,
    /// Minimum delivery time in business days.
    pub min_days: u32,
    /// Maximum delivery time in business days.
    pub max_days: u32,
    pub carrier: String,
    pub has_insurance: bool,
    pub has_tracking: bool,
}

impl ShippingOption {
    /// Option id for a zone and tier.
    pub fn id_for(zone: Zone, tier: ShippingTier) -> ShippingOptionId {
        ShippingOptionId::new(format!("{}-{}", zone.as_str(), tier.as_str()))
    }

    /// Get delivery estimate string.
    pub fn delivery_estimate(&self) -> String {
        if self.min_days == self.max_days {
            if self.min_days == 1 {
                "1 business day".to_string()
            } else {
                format!("{} business days", self.min_days)
            }
        } else {
            format!("{}-{} business days", self.min_days, self.max_days)
        }
    }
}
