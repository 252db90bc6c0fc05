//! Error response bodies.
//!
//! Errors are written in the negotiated format. Inner error details (the
//! full error text and its source chain) are included only when the service
//! enables verbose errors.

use super::core::ODataResponse;
use super::negotiation::ResponseFormat;
use crate::error::ODataError;
use http::header::CONTENT_TYPE;
use serde_json::{Map, Value, json};
use std::error::Error;

/// Build the response for a failed request.
pub fn create_error_response(
    error: &ODataError,
    format: ResponseFormat,
    verbose: bool,
) -> ODataResponse {
    let body = match format {
        ResponseFormat::Json => error_json(error, verbose).to_string(),
        ResponseFormat::Xml => error_xml(error, verbose),
    };
    let mut response = ODataResponse::new(error.status_code());
    response.insert_header(CONTENT_TYPE, format.content_type());
    response.body = body.into_bytes();
    response
}

/// JSON error body: `{"error": {"code", "message", "innererror"?}}`.
pub fn error_json(error: &ODataError, verbose: bool) -> Value {
    let mut body = Map::new();
    body.insert("code".to_string(), json!(error.error_code()));
    body.insert("message".to_string(), json!(error.public_message()));
    if verbose {
        body.insert(
            "innererror".to_string(),
            json!({
                "message": error.to_string(),
                "type": error.error_code(),
                "stacktrace": source_chain(error).join("\n"),
            }),
        );
    }
    json!({ "error": body })
}

fn error_xml(error: &ODataError, verbose: bool) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><m:error xmlns:m=\"http://docs.oasis-open.org/odata/ns/metadata\">",
    );
    xml.push_str(&format!("<m:code>{}</m:code>", escape_xml(error.error_code())));
    xml.push_str(&format!(
        "<m:message>{}</m:message>",
        escape_xml(&error.public_message())
    ));
    if verbose {
        xml.push_str(&format!(
            "<m:innererror><m:message>{}</m:message><m:type>{}</m:type><m:stacktrace>{}</m:stacktrace></m:innererror>",
            escape_xml(&error.to_string()),
            escape_xml(error.error_code()),
            escape_xml(&source_chain(error).join("\n"))
        ));
    }
    xml.push_str("</m:error>");
    xml
}

fn source_chain(error: &ODataError) -> Vec<String> {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(inner) = source {
        chain.push(inner.to_string());
        source = inner.source();
    }
    chain
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
