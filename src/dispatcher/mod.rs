//! Request dispatching.
//!
//! The dispatcher takes an [`ODataRequest`], runs it through the
//! resolve / authorize / query / execute / serialize pipeline against a
//! [`DataService`](crate::service::DataService), and produces an
//! [`ODataResponse`]. It is transport-agnostic: hosts convert their HTTP
//! requests with [`ODataRequest::from_http`] and send back
//! [`ODataResponse::into_http`].
//!
//! # Module Organization
//!
//! - [`core`]: request and response types, [`ODataServer`] and the state machine
//! - [`context`]: per-request state, trace and interceptor counters
//! - [`negotiation`]: `$format` / `Accept` handling
//! - [`payload`]: JSON entity reading and writing
//! - [`errors`]: error response bodies
//! - `handlers`: one module per kind of addressed resource
//! - `batch`: JSON batch requests and changesets

mod batch;
pub mod context;
pub mod core;
pub mod errors;
mod handlers;
pub mod negotiation;
pub mod payload;

pub use context::{DispatchState, RequestContext};
pub use self::core::{ODataRequest, ODataResponse, ODataServer};
pub use negotiation::ResponseFormat;
