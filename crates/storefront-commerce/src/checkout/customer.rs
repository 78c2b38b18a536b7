//! Customer personal data collected in the first checkout step.

use serde::{Deserialize, Serialize};

use crate::error::FieldErrors;

/// Maximum length of an email address (RFC 5321).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Identity document kinds accepted at checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// National identity card, 8 digits.
    #[default]
    #[serde(rename = "DNI")]
    Dni,
    /// Taxpayer number, 11 digits starting with 10, 15, 17 or 20.
    #[serde(rename = "RUC")]
    Ruc,
    /// Foreigner card, 9 to 12 alphanumerics.
    #[serde(rename = "CE")]
    CarnetExtranjeria,
    /// Passport, 6 to 12 alphanumerics.
    #[serde(rename = "PASAPORTE")]
    Pasaporte,
}

/// Who is buying.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub document_type: DocumentType,
    pub document_number: String,
}

impl CustomerInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    /// Required fields and format checks.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if let Err(message) = validate_name(&self.first_name) {
            errors.insert("first_name", message);
        }
        if let Err(message) = validate_name(&self.last_name) {
            errors.insert("last_name", message);
        }
        if let Err(message) = validate_email(&self.email) {
            errors.insert("email", message);
        }
        if let Err(message) = validate_phone(&self.phone) {
            errors.insert("phone", message);
        }
        if let Err(message) = validate_document(self.document_type, &self.document_number) {
            errors.insert("document_number", message);
        }
        errors
    }
}

fn validate_name(name: &str) -> Result<(), &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("is required");
    }
    if name.chars().count() < 2 {
        return Err("must be at least 2 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'')
    {
        return Err("may only contain letters");
    }
    Ok(())
}

/// Structural email check: one `@`, non-empty local part, dotted domain.
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    let email = email.trim();
    if email.is_empty() {
        return Err("is required");
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err("is too long");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("must contain an @ symbol");
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err("is not a valid email address");
    }
    if email.chars().any(char::is_whitespace) {
        return Err("is not a valid email address");
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err("is not a valid email address");
    }
    Ok(())
}

/// Peruvian mobile number: 9 digits starting with 9, optional `+51`.
pub fn validate_phone(phone: &str) -> Result<(), &'static str> {
    let digits: String = phone
        .trim()
        .trim_start_matches("+51")
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    if digits.is_empty() {
        return Err("is required");
    }
    if digits.len() != 9 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("must be 9 digits");
    }
    if !digits.starts_with('9') {
        return Err("must be a mobile number starting with 9");
    }
    Ok(())
}

pub fn validate_document(kind: DocumentType, number: &str) -> Result<(), &'static str> {
    let number = number.trim();
    if number.is_empty() {
        return Err("is required");
    }
    let all_digits = number.chars().all(|c| c.is_ascii_digit());
    let alphanumeric = number.chars().all(|c| c.is_ascii_alphanumeric());
    match kind {
        DocumentType::Dni if number.len() != 8 || !all_digits => Err("DNI must be 8 digits"),
        DocumentType::Ruc if number.len() != 11 || !all_digits => Err("RUC must be 11 digits"),
        DocumentType::Ruc if !["10", "15", "17", "20"].iter().any(|p| number.starts_with(p)) => {
            Err("RUC must start with 10, 15, 17 or 20")
        }
        DocumentType::CarnetExtranjeria if !(9..=12).contains(&number.len()) || !alphanumeric => {
            Err("CE must be 9 to 12 letters or digits")
        }
        DocumentType::Pasaporte if !(6..=12).contains(&number.len()) || !alphanumeric => {
            Err("passport must be 6 to 12 letters or digits")
        }
        _ => Ok(()),
    }
}
