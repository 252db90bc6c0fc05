//! `If-Match` / `If-None-Match` parsing and evaluation.
//!
//! Evaluation runs in two stages. Header syntax is checked when the headers
//! are parsed, before the addressed resource type is known, so a malformed
//! header is always a 400. The evaluator then compares the parsed tags with
//! the current token of the resource.

use super::token::{ConcurrencyToken, unescape};
use crate::error::{LiteralError, ODataError, ODataResult};
use crate::literal::{LexedLiteral, coerce, lex, split_top_level};
use log::trace;

/// Tags listed in a precondition header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTagList {
    /// `*`
    Any,
    /// Unescaped inner values of each `W/"..."`
    Tags(Vec<String>),
}

/// A parsed precondition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    #[default]
    None,
    IfMatch(EntityTagList),
    IfNoneMatch(EntityTagList),
}

/// What the request does with the addressed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestIntent {
    /// GET of a single resource
    Read,
    /// PUT, PATCH or DELETE of a single resource
    Mutate,
}

/// Result of evaluating a precondition against the current token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionOutcome {
    Pass,
    /// 304; the response still carries the ETag
    NotModified,
    /// 412
    PreconditionFailed,
    /// 400 with a reason
    BadRequest(String),
}

impl PreconditionOutcome {
    /// Convert failures to errors. `NotModified` is not an error and maps to
    /// `Ok(false)`; `Pass` maps to `Ok(true)`.
    pub fn into_result(self) -> ODataResult<bool> {
        match self {
            Self::Pass => Ok(true),
            Self::NotModified => Ok(false),
            Self::PreconditionFailed => Err(ODataError::precondition_failed(
                "The ETag value in the request header does not match the current ETag value of the object.",
            )),
            Self::BadRequest(message) => Err(ODataError::bad_request(message)),
        }
    }
}

impl Precondition {
    /// Parse both precondition headers.
    ///
    /// Sending both headers, a value that is neither `*` nor a list of weak
    /// entity tags, or a strong entity tag is a bad request.
    pub fn from_headers(if_match: Option<&str>, if_none_match: Option<&str>) -> ODataResult<Self> {
        match (if_match, if_none_match) {
            (None, None) => Ok(Self::None),
            (Some(_), Some(_)) => Err(ODataError::bad_request(
                "If-Match and If-None-Match cannot both be specified.",
            )),
            (Some(value), None) => parse_tag_list(value, "If-Match").map(Self::IfMatch),
            (None, Some(value)) => parse_tag_list(value, "If-None-Match").map(Self::IfNoneMatch),
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Reject any precondition header for requests that cannot carry one.
    pub fn ensure_absent(&self, reason: &str) -> ODataResult<()> {
        if self.is_present() {
            return Err(ODataError::bad_request(format!(
                "If-Match or If-None-Match headers cannot be specified {}.",
                reason
            )));
        }
        Ok(())
    }

    /// Evaluate against the current token of the addressed resource.
    ///
    /// `current` is `None` when the resource type declares no concurrency
    /// properties. `If-Match: *` then passes and a tag list is still lexed:
    /// an unreadable tag is a 400, any readable one a 412 since there is no
    /// token it could match. `If-None-Match` is a 400.
    pub fn evaluate(
        &self,
        intent: RequestIntent,
        current: Option<&ConcurrencyToken>,
    ) -> PreconditionOutcome {
        let Some(current) = current else {
            return match self {
                Self::None | Self::IfMatch(EntityTagList::Any) => PreconditionOutcome::Pass,
                Self::IfMatch(EntityTagList::Tags(tags)) => {
                    match tags.iter().try_for_each(|tag| lex_tag(tag).map(|_| ())) {
                        Err(message) => PreconditionOutcome::BadRequest(message),
                        Ok(()) => PreconditionOutcome::PreconditionFailed,
                    }
                }
                Self::IfNoneMatch(_) => PreconditionOutcome::BadRequest(
                    "If-None-Match header cannot be specified if the target type does not have etag properties defined.".to_string(),
                ),
            };
        };

        match (self, intent) {
            (Self::None, RequestIntent::Read) => PreconditionOutcome::Pass,
            (Self::None, RequestIntent::Mutate) => PreconditionOutcome::BadRequest(
                "Since entity type has one or more etag properties, If-Match HTTP header must be specified for DELETE/PUT/PATCH operations on this type.".to_string(),
            ),
            (Self::IfMatch(EntityTagList::Any), _) => PreconditionOutcome::Pass,
            (Self::IfMatch(EntityTagList::Tags(tags)), _) => match match_any(tags, current) {
                Err(message) => PreconditionOutcome::BadRequest(message),
                Ok(true) => PreconditionOutcome::Pass,
                Ok(false) => PreconditionOutcome::PreconditionFailed,
            },
            (Self::IfNoneMatch(list), intent) => {
                let matched = match list {
                    EntityTagList::Any => Ok(true),
                    EntityTagList::Tags(tags) => match_any(tags, current),
                };
                match (matched, intent) {
                    (Err(message), _) => PreconditionOutcome::BadRequest(message),
                    (Ok(false), _) => PreconditionOutcome::Pass,
                    (Ok(true), RequestIntent::Read) => PreconditionOutcome::NotModified,
                    (Ok(true), RequestIntent::Mutate) => PreconditionOutcome::PreconditionFailed,
                }
            }
        }
    }
}

/// Whether any tag equals the current token.
///
/// Err carries a 400 reason when a tag's content is not a literal list at
/// all. Tags with the wrong arity or values the declared types cannot hold
/// simply do not match.
fn match_any(tags: &[String], current: &ConcurrencyToken) -> Result<bool, String> {
    let mut matched = false;
    for tag in tags {
        if tag_matches(tag, current)? {
            matched = true;
        }
    }
    trace!("precondition tags {:?} matched={}", tags, matched);
    Ok(matched)
}

fn malformed(tag: &str) -> String {
    format!("The ETag value '{}' is not in a valid format.", tag)
}

/// Split a tag into its literal texts and lex each of them.
fn lex_tag(tag: &str) -> Result<Vec<(&str, LexedLiteral)>, String> {
    let parts = split_top_level(tag, ',').ok_or_else(|| malformed(tag))?;
    parts
        .into_iter()
        .map(|part| lex(part).map(|lexed| (part, lexed)).map_err(|_| malformed(tag)))
        .collect()
}

fn tag_matches(tag: &str, current: &ConcurrencyToken) -> Result<bool, String> {
    let lexed = lex_tag(tag)?;
    if lexed.len() != current.values().len() {
        return Ok(false);
    }
    for ((part, lexed), expected) in lexed.iter().zip(current.values()) {
        match coerce(lexed, expected.primitive, part) {
            Ok(_) => {}
            Err(LiteralError::TypeMismatch { .. } | LiteralError::OutOfRange { .. }) => {
                return Ok(false);
            }
            Err(LiteralError::Syntax { .. }) => return Err(malformed(tag)),
        }
    }
    Ok(current.matches(tag))
}

fn parse_tag_list(value: &str, header: &str) -> ODataResult<EntityTagList> {
    let invalid = || {
        ODataError::bad_request(format!(
            "The value '{}' of the {} header is not a valid entity tag list.",
            value, header
        ))
    };

    let trimmed = value.trim();
    if trimmed == "*" {
        return Ok(EntityTagList::Any);
    }

    let mut tags = Vec::new();
    let mut rest = trimmed;
    loop {
        let after_prefix = rest.strip_prefix("W/\"").ok_or_else(invalid)?;
        let end = after_prefix.find('"').ok_or_else(invalid)?;
        let inner = unescape(&after_prefix[..end]).ok_or_else(invalid)?;
        tags.push(inner);

        rest = after_prefix[end + 1..].trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest.strip_prefix(',').ok_or_else(invalid)?.trim_start();
    }
    Ok(EntityTagList::Tags(tags))
}
