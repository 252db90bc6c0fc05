//! Content negotiation.
//!
//! Data payloads are always JSON. XML is negotiated only so that error
//! bodies can follow a client that asked for it; a data request that accepts
//! nothing but XML is rejected with 415.

use crate::error::{ODataError, ODataResult};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_XML: &str = "application/xml";
pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

/// Format of response and error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
}

impl ResponseFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json;odata.metadata=minimal",
            Self::Xml => APPLICATION_XML,
        }
    }

    fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            APPLICATION_JSON | "application/*" | "*/*" => Some(Self::Json),
            APPLICATION_XML | "text/xml" | "application/atom+xml" => Some(Self::Xml),
            _ => None,
        }
    }
}

/// Media type without parameters, lowercased.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Pick the response format from `$format` and `Accept`.
///
/// `$format` wins over `Accept`. `raw` requests (`$value`, `$count`) answer
/// in plain text or bytes whatever the client accepts, so an unsatisfiable
/// `Accept` only falls back to JSON error bodies for them.
pub fn negotiate(format: Option<&str>, accept: Option<&str>, raw: bool) -> ODataResult<ResponseFormat> {
    if let Some(format) = format {
        return match essence(format).as_str() {
            "json" | APPLICATION_JSON => Ok(ResponseFormat::Json),
            "xml" | "atom" | APPLICATION_XML | "application/atom+xml" => Ok(ResponseFormat::Xml),
            _ => Err(ODataError::bad_request(format!(
                "Invalid $format query option - the specified format '{}' is not supported.",
                format
            ))),
        };
    }

    let Some(accept) = accept.filter(|a| !a.trim().is_empty()) else {
        return Ok(ResponseFormat::Json);
    };

    let mut ranges: Vec<(String, f32)> = accept
        .split(',')
        .map(|range| {
            let media_type = essence(range);
            let quality = range
                .split(';')
                .skip(1)
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (media_type, quality)
        })
        .filter(|(_, quality)| *quality > 0.0)
        .collect();
    // stable, so equal qualities keep the client's order
    ranges.sort_by(|a, b| b.1.total_cmp(&a.1));

    match ranges
        .iter()
        .find_map(|(media_type, _)| ResponseFormat::from_media_type(media_type))
    {
        Some(format) => Ok(format),
        None if raw => Ok(ResponseFormat::Json),
        None => Err(ODataError::unsupported_media_type(format!(
            "Unsupported media type requested in the Accept header '{}'.",
            accept
        ))),
    }
}

/// Check the `Content-Type` of a JSON request body. An absent content type
/// is read as JSON.
pub fn ensure_json_content(content_type: Option<&str>) -> ODataResult<()> {
    match content_type.map(essence) {
        None => Ok(()),
        Some(media_type) if media_type == APPLICATION_JSON || media_type.is_empty() => Ok(()),
        Some(media_type) => Err(ODataError::unsupported_media_type(format!(
            "Content-Type '{}' is not supported for this request; expected '{}'.",
            media_type, APPLICATION_JSON
        ))),
    }
}
