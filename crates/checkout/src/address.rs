use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, ValidationErrors, ValueObject};

/// Postal address used for shipping and billing.
///
/// Kept typed in memory; [`Address::to_storage`] and [`Address::from_storage`]
/// are the only places it becomes a key/value blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub address1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2.
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ValueObject for Address {}

impl Address {
    /// Trimmed copy with an upper-case country and blank optionals dropped.
    pub fn normalized(&self) -> Self {
        fn optional(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            company: optional(&self.company),
            address1: self.address1.trim().to_string(),
            address2: optional(&self.address2),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_ascii_uppercase(),
            phone: optional(&self.phone),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Field-level completeness check.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut errors = ValidationErrors::new();

        let required = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("address1", &self.address1),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(field, "can't be blank");
            }
        }

        let country = self.country.trim();
        if country.is_empty() {
            errors.push("country", "can't be blank");
        } else if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push("country", "must be a 2-letter code");
        }

        errors.into_result()
    }

    /// JSON object for the storage column.
    pub fn to_storage(&self) -> Result<String, DomainError> {
        serde_json::to_string(self)
            .map_err(|e| DomainError::invariant(format!("address serialization failed: {e}")))
    }

    /// Reads a storage column back. Blank text, `null` and `{}` all mean "no
    /// address"; anything else must be a JSON object.
    pub fn from_storage(raw: &str) -> Result<Option<Self>, DomainError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation("address", format!("is not valid JSON: {e}")))?;

        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(map) if map.is_empty() => Ok(None),
            serde_json::Value::Object(map) => serde_json::from_value(serde_json::Value::Object(map))
                .map(Some)
                .map_err(|e| DomainError::validation("address", format!("is malformed: {e}"))),
            _ => Err(DomainError::validation("address", "must be a key/value mapping")),
        }
    }
}
