//! Error types for tenant transformation and proxying.
//!
//! Every failure the pipeline can produce is a variant here, carrying the
//! tenant or name that caused it so callers can branch on the kind instead
//! of the message.

use thiserror::Error;

/// Result type alias for tenancy operations.
pub type Result<T> = std::result::Result<T, TenancyError>;

/// Core error types for the tenancy proxy.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// The tenant identity header was absent or empty
    #[error("{header} header not found")]
    MissingTenant { header: &'static str },

    /// The caller claimed to be the shared namespace
    #[error("illegal tenant id: '{tenant}'")]
    ReservedTenantId { tenant: String },

    /// The tenant id cannot be joined to names without ambiguity
    #[error("illegal tenant id '{tenant}': {reason}")]
    InvalidTenantId { tenant: String, reason: &'static str },

    /// A tenant-supplied name already contains the namespace separator
    #[error("name must not contain '{separator}': '{name}'")]
    InvalidName {
        name: String,
        separator: &'static str,
    },

    /// Resource subtype outside the allow-list
    #[error("task type is not allowed: {subtype:?} in '{name}'")]
    DisallowedSubtype {
        subtype: Option<String>,
        name: String,
    },

    /// A name expected to carry the tenant's prefix does not
    #[error("prefix not found: tenant '{tenant}', name '{name}'")]
    PrefixMismatch { tenant: String, name: String },

    /// A rebuilt body was neither structured JSON nor a string
    #[error("unsupported body type: {kind}")]
    UnsupportedBodyType { kind: &'static str },

    /// A path expression could not be parsed
    #[error("invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The request body does not have the shape the route expects
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// The backend answered a filtered route with a body that cannot be checked
    #[error("malformed upstream response: {0}")]
    UpstreamResponse(String),

    /// Request body exceeded the configured limit
    #[error("body too large: {size} > {limit}")]
    BodyTooLarge { size: usize, limit: usize },

    /// Request body streaming error
    #[error("body error: {0}")]
    Body(String),

    /// Upstream connection failed
    #[error("upstream connection error: {0}")]
    UpstreamConnection(#[from] hyper_util::client::legacy::Error),

    /// Upstream did not answer in time
    #[error("upstream timeout after {0}ms")]
    Timeout(u64),

    /// HTTP error from hyper
    #[error("http error: {0}")]
    Http(#[from] hyper::http::Error),

    /// Invalid URI
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TenancyError {
    /// Returns an HTTP status code appropriate for this error.
    #[inline]
    pub fn status_code(&self) -> u16 {
        match self {
            TenancyError::MissingTenant { .. } => 401,
            TenancyError::ReservedTenantId { .. } | TenancyError::InvalidTenantId { .. } => 403,
            TenancyError::InvalidName { .. }
            | TenancyError::DisallowedSubtype { .. }
            | TenancyError::PrefixMismatch { .. }
            | TenancyError::MalformedBody(_)
            | TenancyError::Body(_) => 400,
            TenancyError::BodyTooLarge { .. } => 413,
            TenancyError::UpstreamConnection(_) | TenancyError::UpstreamResponse(_) => 502,
            TenancyError::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Returns true if the error was raised before anything was sent upstream.
    #[inline]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TenancyError::MissingTenant { .. }
                | TenancyError::ReservedTenantId { .. }
                | TenancyError::InvalidTenantId { .. }
                | TenancyError::InvalidName { .. }
                | TenancyError::DisallowedSubtype { .. }
                | TenancyError::MalformedBody(_)
                | TenancyError::BodyTooLarge { .. }
                | TenancyError::Body(_)
        )
    }
}
