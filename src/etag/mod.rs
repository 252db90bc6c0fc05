//! Concurrency tokens and precondition evaluation.
//!
//! This module implements optimistic concurrency control driven by the
//! properties a resource type flags as concurrency tokens:
//!
//! * [`ConcurrencyToken`] - the ordered (property, literal) pairs of an entity,
//!   rendered as a weak ETag (`W/"..."`)
//! * [`Precondition`] - a parsed `If-Match` / `If-None-Match` header
//! * [`PreconditionOutcome`] - the result of checking a precondition against
//!   the current token
//!
//! # Basic Usage
//!
//! ```rust
//! use odata_server::etag::{Precondition, PreconditionOutcome, RequestIntent};
//!
//! // Header syntax is validated before anything else
//! assert!(Precondition::from_headers(Some("abc"), None).is_err());
//!
//! // without concurrency properties a readable tag has nothing to match
//! let precondition = Precondition::from_headers(Some("W/\"1\""), None).unwrap();
//! let outcome = precondition.evaluate(RequestIntent::Mutate, None);
//! assert_eq!(outcome, PreconditionOutcome::PreconditionFailed);
//! ```

pub mod precondition;
pub mod token;

pub use precondition::{EntityTagList, Precondition, PreconditionOutcome, RequestIntent};
pub use token::{ConcurrencyToken, TokenValue};
