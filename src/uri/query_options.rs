//! System query options and service operation parameters.

use crate::error::{ODataError, ODataResult};
use std::collections::HashSet;

/// Parsed query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// `None` selects every structural property
    pub select: Option<Vec<String>>,
    /// `$select` was given, even as `*`
    pub selected: bool,
    pub expand: Vec<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub count: Option<bool>,
    pub id: Option<String>,
    pub format: Option<String>,
    /// Options without a `$` prefix, passed to service operations
    pub parameters: Vec<(String, String)>,
}

impl QueryOptions {
    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(query: &str) -> ODataResult<Self> {
        let mut options = Self::default();
        let mut seen = HashSet::new();

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if !name.starts_with('$') {
                options.parameters.push((name.into_owned(), value.into_owned()));
                continue;
            }
            if !seen.insert(name.to_string()) {
                return Err(ODataError::bad_request(format!(
                    "Query option '{}' was specified more than once, but it must be specified at most once.",
                    name
                )));
            }
            match name.as_ref() {
                "$select" => {
                    options.select = parse_select(&value)?;
                    options.selected = true;
                }
                "$expand" => options.expand = parse_expand(&value)?,
                "$top" => options.top = Some(parse_count_value(&name, &value)?),
                "$skip" => options.skip = Some(parse_count_value(&name, &value)?),
                "$count" => {
                    options.count = Some(match value.as_ref() {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(ODataError::bad_request(format!(
                                "Invalid value '{}' for $count; expected 'true' or 'false'.",
                                other
                            )));
                        }
                    })
                }
                "$id" => options.id = Some(value.into_owned()),
                "$format" => options.format = Some(value.into_owned()),
                other => {
                    return Err(ODataError::bad_request(format!(
                        "The query parameter '{}' begins with a system-reserved '$' character but is not recognized.",
                        other
                    )));
                }
            }
        }
        Ok(options)
    }

    /// Whether any option shaping a result set is present.
    pub fn has_structural_options(&self) -> bool {
        self.shapes_entities()
            || self.top.is_some()
            || self.skip.is_some()
            || self.count.is_some()
    }

    /// Whether `$select` or `$expand` is present.
    pub fn shapes_entities(&self) -> bool {
        self.selected || !self.expand.is_empty()
    }

    pub fn counts(&self) -> bool {
        self.count == Some(true)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_count_value(name: &str, value: &str) -> ODataResult<usize> {
    value.parse().map_err(|_| {
        ODataError::bad_request(format!(
            "Invalid value '{}' for {}; expected a non-negative integer.",
            value, name
        ))
    })
}

fn parse_identifier_list(option: &str, value: &str) -> ODataResult<Vec<String>> {
    let mut items = Vec::new();
    for item in value.split(',') {
        let item = item.trim();
        let valid = !item.is_empty()
            && item
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '*' || c == '.');
        if !valid {
            return Err(ODataError::bad_request(format!(
                "Syntax error in {} at '{}'.",
                option, item
            )));
        }
        items.push(item.to_string());
    }
    Ok(items)
}

fn parse_select(value: &str) -> ODataResult<Option<Vec<String>>> {
    let items = parse_identifier_list("$select", value)?;
    if items.iter().any(|i| i == "*") {
        return Ok(None);
    }
    Ok(Some(items))
}

fn parse_expand(value: &str) -> ODataResult<Vec<String>> {
    let items = parse_identifier_list("$expand", value)?;
    if items.iter().any(|i| i.contains('*') || i.contains('.')) {
        return Err(ODataError::bad_request(
            "$expand supports navigation property names only.",
        ));
    }
    Ok(items)
}
