//! Tariff table and the rate engine.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkout::ShippingAddress;
use crate::config::ShippingConfig;
use crate::error::CommerceError;
use crate::ids::ShippingOptionId;
use crate::money::{Currency, Money};
use crate::shipping::zones::fold_name;
use crate::shipping::{AddressDirectory, ShippingOption, ShippingTier, Zone};

/// Terms of one tier within a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTariff {
    /// Base price in whole currency units.
    pub base: i64,
    pub min_days: u32,
    pub max_days: u32,
    pub carrier: String,
    #[serde(default)]
    pub has_insurance: bool,
    #[serde(default = "default_true")]
    pub has_tracking: bool,
}

fn default_true() -> bool {
    true
}

impl TierTariff {
    fn new(base: i64, min_days: u32, max_days: u32, carrier: &str) -> Self {
        Self {
            base,
            min_days,
            max_days,
            carrier: carrier.to_string(),
            has_insurance: false,
            has_tracking: true,
        }
    }

    fn insured(mut self) -> Self {
        self.has_insurance = true;
        self
    }

    fn untracked(mut self) -> Self {
        self.has_tracking = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneTariffs {
    pub express: TierTariff,
    pub standard: TierTariff,
    pub economic: TierTariff,
}

impl ZoneTariffs {
    pub fn tier(&self, tier: ShippingTier) -> &TierTariff {
        match tier {
            ShippingTier::Express => &self.express,
            ShippingTier::Standard => &self.standard,
            ShippingTier::Economic => &self.economic,
        }
    }
}

/// Per-kilogram multipliers, decreasing from express to economic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightFactors {
    pub express: f64,
    pub standard: f64,
    pub economic: f64,
}

impl WeightFactors {
    pub fn tier(&self, tier: ShippingTier) -> f64 {
        match tier {
            ShippingTier::Express => self.express,
            ShippingTier::Standard => self.standard,
            ShippingTier::Economic => self.economic,
        }
    }
}

impl Default for WeightFactors {
    fn default() -> Self {
        Self {
            express: 3.0,
            standard: 2.0,
            economic: 1.0,
        }
    }
}

/// Shipping tariffs for every zone and tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TariffTable {
    pub metropolitana: ZoneTariffs,
    pub urbana: ZoneTariffs,
    pub rural: ZoneTariffs,
    pub factors: WeightFactors,
    /// Declared value (whole units) from which every option is insured.
    pub insured_value_threshold: Option<f64>,
}

impl Default for TariffTable {
    fn default() -> Self {
        Self {
            metropolitana: ZoneTariffs {
                express: TierTariff::new(15, 1, 1, "Olva Courier").insured(),
                standard: TierTariff::new(10, 2, 3, "Olva Courier"),
                economic: TierTariff::new(8, 3, 5, "Serpost").untracked(),
            },
            urbana: ZoneTariffs {
                express: TierTariff::new(20, 1, 2, "Olva Courier").insured(),
                standard: TierTariff::new(15, 3, 5, "Olva Courier"),
                economic: TierTariff::new(12, 5, 7, "Serpost").untracked(),
            },
            rural: ZoneTariffs {
                express: TierTariff::new(30, 3, 4, "Shalom").insured(),
                standard: TierTariff::new(22, 5, 7, "Shalom"),
                economic: TierTariff::new(18, 7, 10, "Serpost").untracked(),
            },
            factors: WeightFactors::default(),
            insured_value_threshold: Some(500.0),
        }
    }
}

impl TariffTable {
    pub fn zone(&self, zone: Zone) -> &ZoneTariffs {
        match zone {
            Zone::Metropolitana => &self.metropolitana,
            Zone::Urbana => &self.urbana,
            Zone::Rural => &self.rural,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CommerceError> {
        let f = &self.factors;
        if [f.express, f.standard, f.economic]
            .iter()
            .any(|factor| !factor.is_finite() || *factor < 0.0)
        {
            return Err(CommerceError::Config(
                "shipping.tariffs.factors must be non-negative".to_string(),
            ));
        }
        for zone in Zone::ALL {
            for tier in ShippingTier::ALL {
                let tariff = self.zone(zone).tier(tier);
                if tariff.base < 0 || tariff.min_days > tariff.max_days {
                    return Err(CommerceError::Config(format!(
                        "shipping.tariffs.{zone}.{tier} is inconsistent"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Inputs a quote was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteKey {
    /// Folded `department/province/district`.
    pub destination: String,
    pub weight_grams: i64,
    pub value_cents: i64,
}

impl QuoteKey {
    pub fn new(address: &ShippingAddress, total_weight: f64, total_value: Money) -> Self {
        Self {
            destination: format!(
                "{}/{}/{}",
                fold_name(&address.department),
                fold_name(&address.province),
                fold_name(&address.district)
            ),
            weight_grams: (total_weight.max(0.0) * 1000.0).round() as i64,
            value_cents: total_value.amount_cents,
        }
    }
}

/// Options priced for one destination, weight and value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingQuote {
    pub key: QuoteKey,
    pub zone: Zone,
    pub postal_code: Option<String>,
    /// Express, standard and economic, in that order.
    pub options: Vec<ShippingOption>,
    pub default_option: ShippingOptionId,
}

impl ShippingQuote {
    pub fn option(&self, id: &ShippingOptionId) -> Option<&ShippingOption> {
        self.options.iter().find(|o| &o.id == id)
    }

    pub fn cheapest(&self) -> Option<&ShippingOption> {
        self.options
            .iter()
            .min_by_key(|o| o.price.amount_cents)
    }

    pub fn default_selection(&self) -> Option<&ShippingOption> {
        self.option(&self.default_option)
    }

    /// Whether this quote was computed for these exact inputs.
    pub fn is_current_for(&self, key: &QuoteKey) -> bool {
        &self.key == key
    }
}

/// Prices shipping options from the tariff table.
#[derive(Debug, Clone)]
pub struct ShippingRateEngine {
    tariffs: TariffTable,
    directory: AddressDirectory,
    currency: Currency,
}

impl ShippingRateEngine {
    pub fn new(tariffs: TariffTable, directory: AddressDirectory, currency: Currency) -> Self {
        Self {
            tariffs,
            directory,
            currency,
        }
    }

    pub fn from_config(config: &ShippingConfig, currency: Currency) -> Self {
        Self::new(config.tariffs.clone(), config.directory.clone(), currency)
    }

    pub fn directory(&self) -> &AddressDirectory {
        &self.directory
    }

    pub fn tariffs(&self) -> &TariffTable {
        &self.tariffs
    }

    /// Price every tier for `address`.
    ///
    /// `previous` is kept as the default selection when still offered,
    /// otherwise the cheapest option is selected.
    pub fn quote(
        &self,
        address: &ShippingAddress,
        total_weight: f64,
        total_value: Money,
        previous: Option<&ShippingOptionId>,
    ) -> Result<ShippingQuote, CommerceError> {
        if !total_weight.is_finite() {
            return Err(CommerceError::InvariantViolation(format!(
                "cart weight is not a number: {total_weight}"
            )));
        }
        let weight = total_weight.max(0.0);
        let destination =
            self.directory
                .resolve(&address.department, &address.province, &address.district)?;
        let zone_tariffs = self.tariffs.zone(destination.zone);
        let insured_by_value = self
            .tariffs
            .insured_value_threshold
            .is_some_and(|threshold| total_value.to_decimal() >= threshold);

        let mut options = Vec::with_capacity(ShippingTier::ALL.len());
        for tier in ShippingTier::ALL {
            let tariff = zone_tariffs.tier(tier);
            let units = tariff
                .base
                .checked_add(weight_surcharge(weight, self.tariffs.factors.tier(tier)))
                .ok_or(CommerceError::Overflow)?;

            options.push(ShippingOption {
                id: ShippingOption::id_for(destination.zone, tier),
                tier,
                zone: destination.zone,
                name: tier.display_name().to_string(),
                price: Money::from_units(units, self.currency),
                min_days: tariff.min_days,
                max_days: tariff.max_days,
                carrier: tariff.carrier.clone(),
                has_insurance: tariff.has_insurance || insured_by_value,
                has_tracking: tariff.has_tracking,
            });
        }

        let default_option = previous
            .filter(|id| options.iter().any(|o| &o.id == *id))
            .cloned()
            .or_else(|| {
                options
                    .iter()
                    .min_by_key(|o| o.price.amount_cents)
                    .map(|o| o.id.clone())
            })
            .ok_or_else(|| CommerceError::InvariantViolation("no shipping tiers".to_string()))?;

        debug!(
            zone = %destination.zone,
            weight,
            default = %default_option,
            "shipping quote computed"
        );

        Ok(ShippingQuote {
            key: QuoteKey::new(address, weight, total_value),
            zone: destination.zone,
            postal_code: destination.postal_code,
            options,
            default_option,
        })
    }
}

/// `ceil(weight × factor)` in whole units.
///
/// The product is rounded to six decimals first so that float noise such as
/// `4.500000000000001` does not add a unit.
fn weight_surcharge(weight: f64, factor: f64) -> i64 {
    let raw = weight * factor;
    let rounded = (raw * 1_000_000.0).round() / 1_000_000.0;
    rounded.ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ShippingRateEngine {
        ShippingRateEngine::new(
            TariffTable::default(),
            AddressDirectory::peru(),
            Currency::PEN,
        )
    }

    fn address(department: &str, province: &str, district: &str) -> ShippingAddress {
        ShippingAddress::new(department, province, district, "Av. Larco 1234")
    }

    fn price_of(quote: &ShippingQuote, tier: ShippingTier) -> i64 {
        quote
            .options
            .iter()
            .find(|o| o.tier == tier)
            .unwrap()
            .price
            .amount_cents
    }

    #[test]
    fn test_metropolitan_express_price() {
        // 0.5 kg x 3 units = 1.5 kg; express: 15 + ceil(1.5 * 3.0) = 20.
        let quote = engine()
            .quote(
                &address("Lima", "Lima", "Miraflores"),
                1.5,
                Money::from_units(100, Currency::PEN),
                None,
            )
            .unwrap();

        assert_eq!(quote.zone, Zone::Metropolitana);
        assert_eq!(price_of(&quote, ShippingTier::Express), 2000);
        assert_eq!(price_of(&quote, ShippingTier::Standard), 1300);
        assert_eq!(price_of(&quote, ShippingTier::Economic), 1000);
        assert_eq!(quote.default_option.as_str(), "metropolitana-economic");
    }

    #[test]
    fn test_quote_is_idempotent() {
        let engine = engine();
        let addr = address("Cusco", "Cusco", "Wanchaq");
        let total = Money::from_units(80, Currency::PEN);
        let a = engine.quote(&addr, 2.3, total, None).unwrap();
        let b = engine.quote(&addr, 2.3, total, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_previous_selection_kept_when_offered() {
        let engine = engine();
        let addr = address("Lima", "Lima", "San Isidro");
        let express = ShippingOptionId::new("metropolitana-express");
        let quote = engine
            .quote(&addr, 1.0, Money::zero(Currency::PEN), Some(&express))
            .unwrap();
        assert_eq!(quote.default_option, express);

        // Not offered in a rural zone, so the cheapest is chosen.
        let rural = address("Lima", "Huaral", "Huaral");
        let quote = engine
            .quote(&rural, 1.0, Money::zero(Currency::PEN), Some(&express))
            .unwrap();
        assert_eq!(quote.default_option.as_str(), "rural-economic");
    }

    #[test]
    fn test_float_noise_does_not_round_up() {
        assert_eq!(weight_surcharge(1.5, 3.0), 5);
        assert_eq!(weight_surcharge(0.1 * 3.0, 10.0), 3);
        assert_eq!(weight_surcharge(0.0, 3.0), 0);
        assert_eq!(weight_surcharge(0.01, 1.0), 1);
    }

    #[test]
    fn test_unknown_district_rejected() {
        let err = engine()
            .quote(
                &address("Lima", "Lima", "Nowhere"),
                1.0,
                Money::zero(Currency::PEN),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CommerceError::UnknownDistrict(_)));
    }

    #[test]
    fn test_high_value_is_insured() {
        let engine = engine();
        let addr = address("Piura", "Piura", "Castilla");
        let quote = engine
            .quote(&addr, 1.0, Money::from_units(600, Currency::PEN), None)
            .unwrap();
        assert!(quote.options.iter().all(|o| o.has_insurance));

        let quote = engine
            .quote(&addr, 1.0, Money::from_units(100, Currency::PEN), None)
            .unwrap();
        assert!(!quote.options.iter().all(|o| o.has_insurance));
    }

    #[test]
    fn test_key_tracks_inputs() {
        let addr = address("Lima", "Lima", "Lince");
        let quote = engine()
            .quote(&addr, 1.0, Money::zero(Currency::PEN), None)
            .unwrap();
        assert!(quote.is_current_for(&QuoteKey::new(&addr, 1.0, Money::zero(Currency::PEN))));
        assert!(!quote.is_current_for(&QuoteKey::new(&addr, 1.2, Money::zero(Currency::PEN))));
    }

    #[test]
    fn test_tariffs_from_toml() {
        let table: TariffTable = toml::from_str(
            r#"
            insured_value_threshold = 1000.0

            [factors]
            express = 4.0
            standard = 2.5
            economic = 1.0

            [metropolitana.express]
            base = 12
            min_days = 1
            max_days = 1
            carrier = "Urbaner"

            [metropolitana.standard]
            base = 9
            min_days = 2
            max_days = 3
            carrier = "Urbaner"

            [metropolitana.economic]
            base = 7
            min_days = 3
            max_days = 5
            carrier = "Serpost"
            has_tracking = false
            "#,
        )
        .unwrap();

        assert_eq!(table.metropolitana.express.base, 12);
        assert!(table.metropolitana.express.has_tracking);
        assert_eq!(table.urbana.express.base, 20);
        assert_eq!(table.factors.express, 4.0);
        assert!(table.validate().is_ok());
    }
}
