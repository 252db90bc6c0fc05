//! Concurrency token computation and weak ETag formatting.
//!
//! A token is the ordered list of the entity's concurrency property values,
//! each serialized as a URI literal and joined with `,`. The header form
//! percent-escapes characters that may not appear inside an entity tag, so
//! whitespace inside string values survives the round trip unchanged.

use crate::error::{ODataError, ODataResult};
use crate::literal::Literal;
use crate::metadata::{PrimitiveType, ServiceModel};
use crate::provider::Entity;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde_json::Value;
use std::fmt;

/// Characters escaped inside `W/"..."`.
const ETAG_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%').add(b'\\');

/// One concurrency property value.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenValue {
    pub property: String,
    pub primitive: PrimitiveType,
    /// URI literal form, never trimmed
    pub serialized: String,
}

/// Concurrency token of an entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyToken {
    values: Vec<TokenValue>,
}

impl ConcurrencyToken {
    /// Compute the token for an entity.
    ///
    /// Returns `None` when the entity's type declares no concurrency
    /// properties. Stored values that cannot be represented by the declared
    /// type are an internal fault.
    pub fn compute(entity: &Entity, model: &ServiceModel) -> ODataResult<Option<Self>> {
        let properties = model.concurrency_properties(entity.type_name());
        if properties.is_empty() {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(properties.len());
        for property in properties {
            let Some(primitive) = property.primitive_type() else {
                return Err(ODataError::internal_message(format!(
                    "concurrency property '{}' is not primitive",
                    property.name
                )));
            };
            let raw = entity.get(&property.name).unwrap_or(&Value::Null);
            let literal = Literal::from_json(raw, primitive).map_err(ODataError::internal)?;
            values.push(TokenValue {
                property: property.name.clone(),
                primitive,
                serialized: literal.to_uri_literal(),
            });
        }
        Ok(Some(Self { values }))
    }

    pub fn values(&self) -> &[TokenValue] {
        &self.values
    }

    /// Declared types of the token values, in order.
    pub fn types(&self) -> Vec<PrimitiveType> {
        self.values.iter().map(|v| v.primitive).collect()
    }

    /// Unescaped token text: literals joined with `,`.
    pub fn serialized(&self) -> String {
        self.values
            .iter()
            .map(|v| v.serialized.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Header form, `W/"<escaped token>"`.
    pub fn to_header(&self) -> String {
        format!("W/\"{}\"", escape(&self.serialized()))
    }

    /// Byte-for-byte comparison with an unescaped token.
    pub fn matches(&self, unescaped: &str) -> bool {
        self.serialized().as_bytes() == unescaped.as_bytes()
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header())
    }
}

/// Escape token text for use inside an entity tag.
pub fn escape(token: &str) -> String {
    utf8_percent_encode(token, ETAG_ESCAPE).to_string()
}

/// Reverse [`escape`]; `None` if the result is not UTF-8.
pub fn unescape(escaped: &str) -> Option<String> {
    percent_decode_str(escaped)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
