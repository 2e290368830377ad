//! Parser for the `zubax_id` identity document.
//!
//! The device answers `zubax_id` with a flat YAML-style mapping:
//!
//! ```text
//! product_id   : 'io.px4.sapog'
//! hw_version   : '1.0'
//! hw_unique_id : 'AAECAwQFBgcICQoLDA0ODw=='
//! hw_signature :
//!   - 'sVhV...'
//! ```
//!
//! Only the subset the firmware emits is accepted: `key : value` lines with
//! bare or quoted scalars, flow lists (`[a, b]`) and block lists of `- item`
//! lines under a key with an empty value. Anything else is a parse error, which
//! catches boot noise or a half-read response before it reaches the signing
//! step.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::collections::BTreeMap;

/// Field holding the base64-encoded hardware unique ID.
pub const UNIQUE_ID_FIELD: &str = "hw_unique_id";

/// Field holding the installed signature(s).
pub const SIGNATURE_FIELD: &str = "hw_signature";

/// Field holding the product name reported by the firmware.
pub const PRODUCT_ID_FIELD: &str = "product_id";

/// Value of one identity field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Single value; the empty string means "no value".
    Scalar(String),
    /// Sequence of values.
    List(Vec<String>),
}

impl FieldValue {
    /// All non-empty values of this field.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Scalar(s) if s.is_empty() => Vec::new(),
            Self::Scalar(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// Identity document reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl IdentityRecord {
    /// Parse the response lines of `zubax_id`.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self> {
        let mut fields = BTreeMap::new();
        // Key whose value was empty and may be followed by `- item` lines
        let mut open_list: Option<String> = None;

        for raw in lines {
            let raw = raw.as_ref();
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(item) = line.strip_prefix('-') {
                let key = open_list
                    .as_ref()
                    .ok_or_else(|| Error::Parse(format!("list item outside a field: {raw:?}")))?;
                match fields.get_mut(key) {
                    Some(FieldValue::List(items)) => items.push(unquote(item.trim())?),
                    _ => {
                        fields.insert(key.clone(), FieldValue::List(vec![unquote(item.trim())?]));
                    },
                }
                continue;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| Error::Parse(format!("not a key/value line: {raw:?}")))?;
            let key = key.trim();
            if key.is_empty()
                || !key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(Error::Parse(format!("invalid field name in {raw:?}")));
            }
            if fields.contains_key(key) {
                return Err(Error::Parse(format!("duplicate field {key:?}")));
            }

            let value = value.trim();
            let parsed = if value.is_empty() {
                open_list = Some(key.to_string());
                FieldValue::Scalar(String::new())
            } else {
                open_list = None;
                parse_value(value)?
            };
            fields.insert(key.to_string(), parsed);
        }

        if fields.is_empty() {
            return Err(Error::Parse("empty identity response".into()));
        }
        Ok(Self { fields })
    }

    /// Get a field by name.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Get a scalar field by name.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Scalar(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Product name reported by the firmware, if any.
    pub fn product_id(&self) -> Option<&str> {
        self.scalar(PRODUCT_ID_FIELD)
    }

    /// Decode the hardware unique ID.
    pub fn unique_id(&self) -> Result<Vec<u8>> {
        let encoded = self
            .scalar(UNIQUE_ID_FIELD)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Parse(format!("field {UNIQUE_ID_FIELD} is missing")))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| Error::Parse(format!("{UNIQUE_ID_FIELD} is not valid base64: {e}")))
    }

    /// Encoded signatures currently installed on the device.
    pub fn signatures(&self) -> Vec<&str> {
        self.fields
            .get(SIGNATURE_FIELD)
            .map(FieldValue::values)
            .unwrap_or_default()
    }

    /// Iterate over all fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v))
    }
}

fn parse_value(value: &str) -> Result<FieldValue> {
    if let Some(inner) = value.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| Error::Parse(format!("unterminated list: {value:?}")))?;
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(unquote)
            .collect::<Result<Vec<_>>>()?;
        return Ok(FieldValue::List(items));
    }
    Ok(FieldValue::Scalar(unquote(value)?))
}

fn unquote(value: &str) -> Result<String> {
    let unterminated = || Error::Parse(format!("unterminated quoted value: {value:?}"));
    if let Some(rest) = value.strip_prefix('\'') {
        let inner = rest.strip_suffix('\'').ok_or_else(unterminated)?;
        return Ok(inner.replace("''", "'"));
    }
    if let Some(rest) = value.strip_prefix('"') {
        let inner = rest.strip_suffix('"').ok_or_else(unterminated)?;
        return Ok(inner.replace("\\\"", "\""));
    }
    Ok(value.to_string())
}
