//! Shipping address.

use serde::{Deserialize, Serialize};

use crate::error::FieldErrors;

/// Minimum length of the street line.
pub const MIN_ADDRESS_LENGTH: usize = 5;

/// A delivery address in the department → province → district hierarchy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub department: String,
    pub province: String,
    pub district: String,
    /// Street, number, apartment.
    pub address: String,
    /// Landmark for the courier.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl ShippingAddress {
    pub fn new(
        department: impl Into<String>,
        province: impl Into<String>,
        district: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            department: department.into(),
            province: province.into(),
            district: district.into(),
            address: address.into(),
            reference: None,
            postal_code: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Format as single line.
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.address.trim().to_string()];
        if let Some(reference) = self.reference.as_deref().filter(|r| !r.trim().is_empty()) {
            parts.push(format!("({})", reference.trim()));
        }
        parts.push(self.district.trim().to_string());
        parts.push(self.province.trim().to_string());
        parts.push(self.department.trim().to_string());
        parts.join(", ")
    }

    /// Field-level validation. Whether the district is served is decided by
    /// the shipping rate engine.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for (field, value) in [
            ("department", &self.department),
            ("province", &self.province),
            ("district", &self.district),
        ] {
            if value.trim().is_empty() {
                errors.insert(field, "is required");
            }
        }

        let street = self.address.trim();
        if street.is_empty() {
            errors.insert("address", "is required");
        } else if street.chars().count() < MIN_ADDRESS_LENGTH {
            errors.insert(
                "address",
                format!("must be at least {MIN_ADDRESS_LENGTH} characters"),
            );
        }

        if let Some(code) = self.postal_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            if code.len() != 5 || !code.chars().all(|c| c.is_ascii_digit()) {
                errors.insert("postal_code", "must be 5 digits");
            }
        }
        errors
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        let addr = ShippingAddress::new("Lima", "Lima", "Miraflores", "Av. Larco 1234");
        assert!(addr.is_complete());

        let errors = ShippingAddress::default().validate();
        assert_eq!(errors.get("district"), Some("is required"));
        assert_eq!(errors.get("address"), Some("is required"));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_short_street_and_bad_postal_code() {
        let mut addr = ShippingAddress::new("Lima", "Lima", "Lince", "Jr 1");
        addr.postal_code = Some("15A46".into());
        let errors = addr.validate();
        assert!(errors.get("address").unwrap().contains("at least"));
        assert_eq!(errors.get("postal_code"), Some("must be 5 digits"));
    }

    #[test]
    fn test_one_line() {
        let addr = ShippingAddress::new("Lima", "Lima", "Barranco", "Jr. Unión 210")
            .with_reference("Frente al parque");
        assert_eq!(
            addr.one_line(),
            "Jr. Unión 210, (Frente al parque), Barranco, Lima, Lima"
        );
    }
}
