// src/label/mod.rs

mod rules;

use serde::Deserialize;
use serde::Serialize;

pub const UNKNOWN: &str = "Unknown";
pub const UNKNOWN_COURIER: &str = "Unknown Courier";
pub const UNKNOWN_PRODUCT: &str = "Unknown Product";

/// Structured shipment data recovered from a shipping label.
///
/// Every field is always populated: a field the rules cannot find carries
/// its sentinel (`"Unknown"`, `"Unknown Courier"`, `"Unknown Product"`, or
/// an empty variant) instead of being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLabel {
    pub order_id: String,
    pub tracking_number: String,
    pub courier: String,
    pub product_name: String,
    pub variant: String,
    pub full_text: String,
}

/// The fields a rule can fill in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    OrderId,
    TrackingNumber,
    Courier,
    ProductName,
    Variant,
}

impl Field {
    pub fn sentinel(self) -> &'static str {
        match self {
            Field::OrderId | Field::TrackingNumber => UNKNOWN,
            Field::Courier => UNKNOWN_COURIER,
            Field::ProductName => UNKNOWN_PRODUCT,
            Field::Variant => "",
        }
    }
}

impl ParsedLabel {
    /// A label where nothing was recognised.
    pub fn unrecognised(full_text: impl Into<String>) -> Self {
        Self {
            order_id: Field::OrderId.sentinel().to_string(),
            tracking_number: Field::TrackingNumber.sentinel().to_string(),
            courier: Field::Courier.sentinel().to_string(),
            product_name: Field::ProductName.sentinel().to_string(),
            variant: Field::Variant.sentinel().to_string(),
            full_text: full_text.into(),
        }
    }

    fn set(&mut self, field: Field, value: String) {
        match field {
            Field::OrderId => self.order_id = value,
            Field::TrackingNumber => self.tracking_number = value,
            Field::Courier => self.courier = value,
            Field::ProductName => self.product_name = value,
            Field::Variant => self.variant = value,
        }
    }

    /// How many of the sentinel-backed fields hold a real value.
    pub fn coverage(&self) -> (usize, usize) {
        let total = 4;
        let filled = [
            self.order_id != UNKNOWN,
            self.tracking_number != UNKNOWN,
            self.courier != UNKNOWN_COURIER,
            self.product_name != UNKNOWN_PRODUCT,
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }
}

/// Run the rule chain over the linear text of a label.
pub fn extract_label(text: &str) -> ParsedLabel {
    let mut label = ParsedLabel::unrecognised(text);
    for (field, rule) in rules::RULES {
        if let Some(value) = rule(text) {
            label.set(*field, value);
        }
    }
    label
}
