//! Shipping rate engine.
//!
//! Resolves a destination to a delivery zone and prices express, standard and
//! economic options from a configurable tariff table.

mod option;
mod rates;
mod zones;

pub use option::{ShippingOption, ShippingTier};
pub use rates::{
    QuoteKey, ShippingQuote, ShippingRateEngine, TariffTable, TierTariff, WeightFactors,
    ZoneTariffs,
};
pub use zones::{AddressDirectory, Department, District, Province, ResolvedDestination, Zone};
