//! Pass content document model.
//!
//! The content document is mostly opaque to the service: only the
//! metadata and substructures the validator inspects are typed, everything
//! else is carried through `extra` maps untouched so that `pass.json` in the
//! bundle keeps every key the issuer supplied.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validator::ValidationError;

/// The only content format version accepted.
pub const FORMAT_VERSION: u32 = 1;

/// Visual style of a pass. Exactly one style substructure must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassStyle {
    BoardingPass,
    Coupon,
    EventTicket,
    Generic,
    StoreCard,
}

impl PassStyle {
    pub const ALL: [PassStyle; 5] = [
        Self::BoardingPass,
        Self::Coupon,
        Self::EventTicket,
        Self::Generic,
        Self::StoreCard,
    ];

    /// Key of the style substructure in the content document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoardingPass => "boardingPass",
            Self::Coupon => "coupon",
            Self::EventTicket => "eventTicket",
            Self::Generic => "generic",
            Self::StoreCard => "storeCard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|style| style.as_str() == s)
    }
}

impl std::fmt::Display for PassStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field inside a style substructure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            extra: Map::new(),
        }
    }
}

/// Field groups of a visual style.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleFields {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auxiliary_fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub back_fields: Vec<Field>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StyleFields {
    /// Every field across all groups, in document order.
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.header_fields
            .iter()
            .chain(&self.primary_fields)
            .chain(&self.secondary_fields)
            .chain(&self.auxiliary_fields)
            .chain(&self.back_fields)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barcode {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nfc {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_public_key: Option<String>,
}

/// A pass content document (`pass.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassContent {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub pass_type_identifier: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub team_identifier: String,
    #[serde(default, rename = "webServiceURL")]
    pub web_service_url: String,
    #[serde(default)]
    pub authentication_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<Barcode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub barcodes: Vec<Barcode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfc: Option<Nfc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boarding_pass: Option<StyleFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<StyleFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_ticket: Option<StyleFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<StyleFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_card: Option<StyleFields>,

    /// Keys the service does not interpret (colors, logo text, etc.).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PassContent {
    /// Parse a content document. Malformed JSON is a validation failure.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::new(format!("content is not a valid document: {}", e)))
    }

    /// Serialize to the `pass.json` bytes placed in the bundle.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// The style substructure for `style`, if present.
    pub fn style(&self, style: PassStyle) -> Option<&StyleFields> {
        match style {
            PassStyle::BoardingPass => self.boarding_pass.as_ref(),
            PassStyle::Coupon => self.coupon.as_ref(),
            PassStyle::EventTicket => self.event_ticket.as_ref(),
            PassStyle::Generic => self.generic.as_ref(),
            PassStyle::StoreCard => self.store_card.as_ref(),
        }
    }

    /// Styles with a populated substructure.
    pub fn present_styles(&self) -> Vec<PassStyle> {
        PassStyle::ALL
            .into_iter()
            .filter(|style| self.style(*style).is_some())
            .collect()
    }

    /// The single style of a valid document.
    pub fn pass_style(&self) -> Option<PassStyle> {
        match self.present_styles().as_slice() {
            [style] => Some(*style),
            _ => None,
        }
    }

    /// Every barcode, legacy single `barcode` first.
    pub fn all_barcodes(&self) -> impl Iterator<Item = &Barcode> {
        self.barcode.iter().chain(&self.barcodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUPON: &str = r#"{
        "description": "Ten percent off",
        "formatVersion": 1,
        "organizationName": "Example Shop",
        "passTypeIdentifier": "pass.com.example.coupon",
        "serialNumber": "C-1",
        "teamIdentifier": "TEAM123456",
        "webServiceURL": "https://passes.example.com/",
        "authenticationToken": "0123456789abcdef0123",
        "backgroundColor": "rgb(10, 20, 30)",
        "coupon": {
            "primaryFields": [{"key": "offer", "label": "Offer", "value": "10%"}],
            "transitType": "PKTransitTypeGeneric"
        }
    }"#;

    #[test]
    fn parses_known_and_unknown_keys() {
        let content = PassContent::from_json(COUPON.as_bytes()).unwrap();
        assert_eq!(content.serial_number, "C-1");
        assert_eq!(content.web_service_url, "https://passes.example.com/");
        assert_eq!(content.pass_style(), Some(PassStyle::Coupon));
        assert_eq!(
            content.extra.get("backgroundColor"),
            Some(&Value::from("rgb(10, 20, 30)"))
        );

        let coupon = content.coupon.as_ref().unwrap();
        assert_eq!(coupon.primary_fields[0].key, "offer");
        assert_eq!(coupon.primary_fields[0].extra.get("label"), Some(&Value::from("Offer")));
        assert!(coupon.extra.contains_key("transitType"));
    }

    #[test]
    fn serialization_keeps_unknown_keys() {
        let content = PassContent::from_json(COUPON.as_bytes()).unwrap();
        let bytes = content.to_json().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["backgroundColor"], "rgb(10, 20, 30)");
        assert_eq!(value["webServiceURL"], "https://passes.example.com/");
        assert!(value.get("boardingPass").is_none());
    }

    #[test]
    fn malformed_json_is_validation_error() {
        let err = PassContent::from_json(b"{not json").unwrap_err();
        assert!(err.reason().contains("not a valid document"));
    }

    #[test]
    fn style_names_roundtrip() {
        for style in PassStyle::ALL {
            assert_eq!(PassStyle::parse(style.as_str()), Some(style));
        }
        assert_eq!(PassStyle::parse("ticket"), None);
    }

    #[test]
    fn multiple_styles_have_no_single_style() {
        let mut content = PassContent::from_json(COUPON.as_bytes()).unwrap();
        content.generic = Some(StyleFields::default());
        assert_eq!(content.present_styles().len(), 2);
        assert_eq!(content.pass_style(), None);
    }
}
