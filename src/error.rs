//! Error types for OData request processing.
//!
//! Every failure in the pipeline is an [`ODataError`] carrying the HTTP status
//! it maps to. Errors are returned through `Result` and propagated with `?`
//! up to the dispatcher, which turns them into the final response.

use http::StatusCode;

/// Main error type for request processing.
///
/// Each variant corresponds to one entry of the protocol error taxonomy.
/// `Service` is the explicit, status-carrying error raised by interceptors,
/// service operations and providers; its status is reported verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ODataError {
    /// Malformed syntax, precondition or query option misuse (400)
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Rights denied (403)
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Unresolvable or hidden resource (404)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Verb incompatible with the addressed resource (405)
    #[error("Method not allowed: {message}")]
    MethodNotAllowed { message: String },

    /// Precondition mismatch (412)
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// Unsupported content type for the target (415)
    #[error("Unsupported media type: {message}")]
    UnsupportedMediaType { message: String },

    /// Explicit status raised by service code
    #[error("{message}")]
    Service { status: u16, message: String },

    /// Unexpected provider or interceptor fault (500)
    #[error("Internal server error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Failure to coerce a literal to a declared primitive type.
///
/// `Syntax` means the text is not a literal of any kind. `TypeMismatch` and
/// `OutOfRange` mean the text is a well-formed literal whose value cannot be
/// represented by the declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiteralError {
    #[error("'{text}' is not a valid literal")]
    Syntax { text: String },

    #[error("literal '{text}' is not compatible with type {expected}")]
    TypeMismatch { text: String, expected: String },

    #[error("literal '{text}' is out of range for type {expected}")]
    OutOfRange { text: String, expected: String },
}

/// Errors raised while building a service model or configuration.
///
/// These are programming errors in the service definition and are reported
/// once, when the service type is first initialised.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("Duplicate name '{name}' in service model")]
    DuplicateName { name: String },

    #[error("Type '{type_name}' references unknown base type '{base_type}'")]
    UnknownBaseType { type_name: String, base_type: String },

    #[error("Inheritance cycle detected at type '{type_name}'")]
    InheritanceCycle { type_name: String },

    #[error("Entity type '{type_name}' declares no key properties")]
    MissingKey { type_name: String },

    #[error("'{owner}' references unknown {what} '{name}'")]
    UnknownReference {
        owner: String,
        what: &'static str,
        name: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Service initialization panicked: {message}")]
    InitializationPanicked { message: String },
}

impl ODataError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a method not allowed error
    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            message: message.into(),
        }
    }

    /// Create a precondition failed error
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Create an unsupported media type error
    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::UnsupportedMediaType {
            message: message.into(),
        }
    }

    /// Create an error carrying an explicit status code.
    pub fn service(status: u16, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            message: message.into(),
        }
    }

    /// Wrap an unexpected error as an internal fault
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(error))
    }

    /// Wrap an unexpected failure described only by a message
    pub fn internal_message(message: impl Into<String>) -> Self {
        Self::Internal(message.into().into())
    }

    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Service { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for programmatic handling, written into error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BadRequest",
            Self::Forbidden { .. } => "Forbidden",
            Self::NotFound { .. } => "NotFound",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
            Self::PreconditionFailed { .. } => "PreconditionFailed",
            Self::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            Self::Service { .. } => "ServiceError",
            Self::Internal(_) => "InternalServerError",
        }
    }

    /// Message safe to show a client when verbose errors are disabled.
    ///
    /// Protocol errors keep their message; internal faults are replaced by a
    /// generic text so no provider detail leaks.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::MethodNotAllowed { message }
            | Self::PreconditionFailed { message }
            | Self::UnsupportedMediaType { message }
            | Self::Service { message, .. } => message.clone(),
            Self::Internal(_) => "An error occurred while processing this request.".to_string(),
        }
    }

    /// Whether this is an unexpected fault rather than a protocol error.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<serde_json::Error> for ODataError {
    fn from(error: serde_json::Error) -> Self {
        ODataError::bad_request(format!("Malformed JSON payload: {}", error))
    }
}

impl From<BuildError> for ODataError {
    fn from(error: BuildError) -> Self {
        ODataError::internal(error)
    }
}

// Result type aliases for convenience
pub type ODataResult<T> = Result<T, ODataError>;
pub type LiteralResult<T> = Result<T, LiteralError>;
pub type BuildResult<T> = Result<T, BuildError>;
