//! Feature normalization
//!
//! Categorical values reach the model trimmed and lowercased, which is the
//! casing the model was trained on. Numeric fields are never touched, and
//! normalizing an already normalized value is a no-op.

use serde_json::Value;

use crate::models::{CustomerRecord, FeatureTable};

/// Trim surrounding whitespace and lowercase.
pub fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Normalize an untyped record.
///
/// Strings are normalized, objects and arrays are normalized field by field,
/// everything else is returned as is.
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(normalize_text(text)),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, field)| (key.clone(), normalize_value(field)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

impl CustomerRecord {
    pub fn normalized(&self) -> CustomerRecord {
        CustomerRecord {
            age: self.age,
            gender: normalize_text(&self.gender),
            subscription_type: normalize_text(&self.subscription_type),
            watch_hours: self.watch_hours,
            region: normalize_text(&self.region),
            number_of_profiles: self.number_of_profiles,
            payment_method: normalize_text(&self.payment_method),
            device: normalize_text(&self.device),
        }
    }
}

impl FeatureTable {
    pub fn normalized(&self) -> FeatureTable {
        self.iter().map(CustomerRecord::normalized).collect()
    }
}
