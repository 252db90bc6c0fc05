//! Service-wide configuration values.
//!
//! Access rights are bit sets so they can be combined the way a service
//! declares them (`ALL_READ | WRITE_MERGE`). [`ServiceBehavior`] holds the
//! behavioural switches and can be loaded from a JSON document.

use crate::error::{ODataError, ODataResult};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Rights granted on an entity set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntitySetRights: u32 {
        /// The set is hidden
        const NONE = 0;
        const READ_SINGLE = 1;
        const READ_MULTIPLE = 2;
        const WRITE_APPEND = 4;
        const WRITE_REPLACE = 8;
        const WRITE_DELETE = 16;
        const WRITE_MERGE = 32;
        const ALL_READ = Self::READ_SINGLE.bits() | Self::READ_MULTIPLE.bits();
        const ALL_WRITE = Self::WRITE_APPEND.bits()
            | Self::WRITE_REPLACE.bits()
            | Self::WRITE_DELETE.bits()
            | Self::WRITE_MERGE.bits();
        const ALL = Self::ALL_READ.bits() | Self::ALL_WRITE.bits();
    }
}

bitflags! {
    /// Rights granted on a service operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServiceOperationRights: u32 {
        /// The operation is hidden
        const NONE = 0;
        const READ_SINGLE = 1;
        const READ_MULTIPLE = 2;
        const ALL_READ = Self::READ_SINGLE.bits() | Self::READ_MULTIPLE.bits();
        const ALL = Self::ALL_READ.bits();
        /// Ignore the rights of the entity set the operation returns
        const OVERRIDE_ENTITY_SET_RIGHTS = 4;
    }
}

impl EntitySetRights {
    /// Whether the set is visible at all.
    pub fn is_visible(self) -> bool {
        !self.is_empty()
    }
}

impl ServiceOperationRights {
    /// Whether the operation is visible at all. The override flag alone
    /// grants nothing.
    pub fn is_visible(self) -> bool {
        self.intersects(Self::ALL)
    }

    pub fn overrides_entity_set_rights(self) -> bool {
        self.contains(Self::OVERRIDE_ENTITY_SET_RIGHTS)
    }
}

/// An OData protocol version, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const V4_0: ProtocolVersion = ProtocolVersion { major: 4, minor: 0 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse a version header value. Anything after `;` (client agent
    /// suffixes such as `4.0;NetFx`) is ignored.
    pub fn parse(value: &str) -> ODataResult<Self> {
        let invalid = || {
            ODataError::bad_request(format!(
                "Request version '{}' is not a valid request version.",
                value
            ))
        };
        let text = value.split(';').next().unwrap_or_default().trim();
        let (major, minor) = text.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }

    /// Value of the `OData-Version` response header.
    pub fn header_value(&self) -> String {
        format!("{};", self)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V4_0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

/// Behavioural switches of a service.
///
/// ```rust
/// use odata_server::config::ServiceBehavior;
///
/// let behavior = ServiceBehavior::from_json(r#"{"useVerboseErrors": true}"#).unwrap();
/// assert!(behavior.use_verbose_errors);
/// assert!(behavior.invoke_interceptors_on_link_delete);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceBehavior {
    /// Include inner error details in error bodies
    pub use_verbose_errors: bool,
    /// Run the source set's change interceptors when a link is deleted
    pub invoke_interceptors_on_link_delete: bool,
    pub max_protocol_version: ProtocolVersion,
    pub accept_count_requests: bool,
    pub accept_projection_requests: bool,
    /// Maximum number of top-level parts in a batch
    pub max_batch_count: usize,
    /// Maximum number of requests in one changeset
    pub max_changeset_count: usize,
    /// Absolute service root, used for `Location` and to resolve absolute
    /// `$id` / `@odata.bind` URLs
    pub service_root: String,
}

impl Default for ServiceBehavior {
    fn default() -> Self {
        Self {
            use_verbose_errors: false,
            invoke_interceptors_on_link_delete: true,
            max_protocol_version: ProtocolVersion::V4_0,
            accept_count_requests: true,
            accept_projection_requests: true,
            max_batch_count: 100,
            max_changeset_count: 1000,
            service_root: "http://localhost/service.svc/".to_string(),
        }
    }
}

impl ServiceBehavior {
    /// Load from a JSON document; absent keys keep their defaults.
    pub fn from_json(json: &str) -> ODataResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            ODataError::internal_message(format!("Invalid service behavior configuration: {}", e))
        })
    }

    /// Service root with a trailing slash.
    pub fn service_root(&self) -> String {
        if self.service_root.ends_with('/') {
            self.service_root.clone()
        } else {
            format!("{}/", self.service_root)
        }
    }
}
