//! Per-request processing state.

use super::negotiation::ResponseFormat;
use crate::config::ProtocolVersion;
use crate::interceptor::InvocationCounters;
use http::Method;
use log::debug;
use std::fmt;

/// States of the dispatch state machine.
///
/// A request moves forward through the states in declaration order and ends
/// in `Done` or `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    Resolving,
    Authorizing,
    QueryBuilding,
    Executing,
    Serializing,
    Done,
    Faulted,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything recorded about one request while it is processed.
///
/// The context is created by the dispatcher and returned from
/// [`ODataServer::dispatch_traced`](super::ODataServer::dispatch_traced) so
/// hosts and tests can inspect the state trace and interceptor counts.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// Format of response and error bodies
    pub format: ResponseFormat,
    /// Version the client sent in `OData-Version` / `DataServiceVersion`
    pub request_version: Option<ProtocolVersion>,
    /// Version written to the `OData-Version` response header
    pub response_version: ProtocolVersion,
    pub counters: InvocationCounters,
    trace: Vec<DispatchState>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            method,
            path: path.into(),
            format: ResponseFormat::Json,
            request_version: None,
            response_version: ProtocolVersion::V4_0,
            counters: InvocationCounters::new(),
            trace: Vec::new(),
        }
    }

    /// Move to `state`. Re-entering the current state is a no-op.
    pub fn enter(&mut self, state: DispatchState) {
        if self.state() == Some(state) {
            return;
        }
        debug!(
            "Request '{}' {} -> {} ({} {})",
            self.request_id,
            self.state()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "Start".to_string()),
            state,
            self.method,
            self.path
        );
        self.trace.push(state);
    }

    pub fn state(&self) -> Option<DispatchState> {
        self.trace.last().copied()
    }

    /// States visited, in order.
    pub fn trace(&self) -> &[DispatchState] {
        &self.trace
    }

    pub fn is_faulted(&self) -> bool {
        self.state() == Some(DispatchState::Faulted)
    }

    /// Whether the request got as far as `state`.
    pub fn reached(&self, state: DispatchState) -> bool {
        self.trace.contains(&state)
    }
}
