//! Service operations.
//!
//! A service operation is a named function exposed at the service root. Its
//! parameters are typed primitive values taken from the query string, and
//! its result is one of the [`ResultKind`] shapes.

use crate::error::{ODataError, ODataResult};
use crate::literal::{Literal, parse_typed};
use crate::metadata::PrimitiveType;
use crate::provider::{Entity, UpdateProvider};
use crate::uri::QueryOptions;
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Declared result shape of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultKind {
    Void,
    Primitive(PrimitiveType),
    /// A single entity of the named set
    Entity(String),
    /// A collection of entities of the named set
    Entities(String),
}

impl ResultKind {
    pub fn set_name(&self) -> Option<&str> {
        match self {
            Self::Entity(set) | Self::Entities(set) => Some(set),
            _ => None,
        }
    }
}

/// Value produced by an operation handler.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Void,
    Primitive(Literal),
    Entity(Option<Entity>),
    Entities(Vec<Entity>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationParameter {
    pub name: String,
    pub primitive: PrimitiveType,
}

/// Parsed arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationArgs {
    values: HashMap<String, Literal>,
}

impl OperationArgs {
    pub fn get(&self, name: &str) -> Option<&Literal> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub type OperationHandler = Arc<
    dyn Fn(&OperationArgs, &mut dyn UpdateProvider) -> ODataResult<OperationOutput> + Send + Sync,
>;

/// A registered service operation.
#[derive(Clone)]
pub struct ServiceOperation {
    pub name: String,
    /// GET for functions, POST for actions
    pub method: Method,
    pub parameters: Vec<OperationParameter>,
    pub result: ResultKind,
    handler: OperationHandler,
}

impl ServiceOperation {
    pub fn new<F>(name: impl Into<String>, method: Method, result: ResultKind, handler: F) -> Self
    where
        F: Fn(&OperationArgs, &mut dyn UpdateProvider) -> ODataResult<OperationOutput>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            method,
            parameters: Vec::new(),
            result,
            handler: Arc::new(handler),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, primitive: PrimitiveType) -> Self {
        self.parameters.push(OperationParameter {
            name: name.into(),
            primitive,
        });
        self
    }

    /// Whether this operation changes state (an action).
    pub fn is_action(&self) -> bool {
        self.method == Method::POST
    }

    /// Bind query string parameters to the declared parameters.
    ///
    /// Missing parameters are null; undeclared or mistyped ones are a bad
    /// request.
    pub fn bind_arguments(&self, options: &QueryOptions) -> ODataResult<OperationArgs> {
        let mut values = HashMap::new();
        for (name, raw) in &options.parameters {
            let parameter = self
                .parameters
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| {
                    ODataError::bad_request(format!(
                        "Service operation '{}' has no parameter named '{}'.",
                        self.name, name
                    ))
                })?;
            let value = parse_typed(raw, parameter.primitive).map_err(|e| {
                ODataError::bad_request(format!(
                    "Bad request - error in query syntax for parameter '{}': {}",
                    name, e
                ))
            })?;
            values.insert(name.clone(), value);
        }
        for parameter in &self.parameters {
            values
                .entry(parameter.name.clone())
                .or_insert(Literal::Null);
        }
        Ok(OperationArgs { values })
    }

    /// Invoke the handler and check the output against the declared result.
    pub fn invoke(
        &self,
        args: &OperationArgs,
        provider: &mut dyn UpdateProvider,
    ) -> ODataResult<OperationOutput> {
        let output = (self.handler)(args, provider)?;
        let consistent = matches!(
            (&self.result, &output),
            (ResultKind::Void, OperationOutput::Void)
                | (ResultKind::Primitive(_), OperationOutput::Primitive(_))
                | (ResultKind::Entity(_), OperationOutput::Entity(_))
                | (ResultKind::Entities(_), OperationOutput::Entities(_))
        );
        if !consistent {
            return Err(ODataError::internal_message(format!(
                "service operation '{}' returned a result that does not match its declaration",
                self.name
            )));
        }
        Ok(output)
    }
}

impl fmt::Debug for ServiceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOperation")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("parameters", &self.parameters)
            .field("result", &self.result)
            .finish()
    }
}
