//! Content document validation.
//!
//! `validate` is a pure function over a parsed [`PassContent`]: no I/O, no
//! shared state, safe to call from any number of threads.

use chrono::DateTime;
use thiserror::Error;

use crate::content::{PassContent, PassStyle, FORMAT_VERSION};
use crate::token::MIN_AUTH_TOKEN_LEN;

/// A content document was rejected. Always the caller's fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pass content: {reason}")]
pub struct ValidationError {
    reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Human-readable reason for the rejection.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Validate a content document.
pub fn validate(content: &PassContent) -> Result<(), ValidationError> {
    check_required(content)?;

    if content.format_version != FORMAT_VERSION {
        return Err(ValidationError::new(format!(
            "formatVersion must be {}, got {}",
            FORMAT_VERSION, content.format_version
        )));
    }

    if content.authentication_token.len() < MIN_AUTH_TOKEN_LEN {
        return Err(ValidationError::new(format!(
            "authenticationToken must be at least {} characters",
            MIN_AUTH_TOKEN_LEN
        )));
    }

    check_date("expirationDate", content.expiration_date.as_deref())?;
    check_date("relevantDate", content.relevant_date.as_deref())?;
    check_style(content)?;

    for (index, location) in content.locations.iter().enumerate() {
        if location.latitude == 0.0 || location.longitude == 0.0 {
            return Err(ValidationError::new(format!(
                "locations[{}] must have non-zero latitude and longitude",
                index
            )));
        }
    }

    for barcode in content.all_barcodes() {
        if barcode.format.is_empty() {
            return Err(ValidationError::new("barcode is missing format"));
        }
        if barcode.message.is_empty() {
            return Err(ValidationError::new("barcode is missing message"));
        }
        if barcode.message_encoding.is_empty() {
            return Err(ValidationError::new("barcode is missing messageEncoding"));
        }
    }

    if let Some(nfc) = &content.nfc {
        if nfc.message.is_empty() {
            return Err(ValidationError::new("nfc message must not be empty"));
        }
    }

    Ok(())
}

fn check_required(content: &PassContent) -> Result<(), ValidationError> {
    let required = [
        ("description", &content.description),
        ("organizationName", &content.organization_name),
        ("passTypeIdentifier", &content.pass_type_identifier),
        ("serialNumber", &content.serial_number),
        ("teamIdentifier", &content.team_identifier),
        ("webServiceURL", &content.web_service_url),
        ("authenticationToken", &content.authentication_token),
    ];

    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::new(format!("{} is required", name)));
        }
    }
    Ok(())
}

fn check_date(name: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(raw) => DateTime::parse_from_rfc3339(raw).map(|_| ()).map_err(|_| {
            ValidationError::new(format!("{} is not a valid RFC 3339 date: {:?}", name, raw))
        }),
        None => Ok(()),
    }
}

fn check_style(content: &PassContent) -> Result<(), ValidationError> {
    let styles = content.present_styles();
    let style = match styles.as_slice() {
        [style] => *style,
        [] => {
            return Err(ValidationError::new(format!(
                "exactly one style is required, one of {}",
                style_list(&PassStyle::ALL)
            )))
        }
        many => {
            return Err(ValidationError::new(format!(
                "exactly one style is allowed, found {}",
                style_list(many)
            )))
        }
    };

    let Some(fields) = content.style(style) else {
        return Ok(());
    };
    for field in fields.all_fields() {
        if field.key.is_empty() {
            return Err(ValidationError::new(format!(
                "{} has a field without a key",
                style
            )));
        }
        if field.value.is_null() {
            return Err(ValidationError::new(format!(
                "{} field {:?} has no value",
                style, field.key
            )));
        }
    }
    Ok(())
}

fn style_list(styles: &[PassStyle]) -> String {
    styles
        .iter()
        .map(PassStyle::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
