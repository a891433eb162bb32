//! Tenancy Core - multi-tenant isolation for a shared workflow backend
//!
//! The backend keeps every tenant's task and workflow definitions in one
//! flat namespace. This crate sits in front of it and rewrites traffic so
//! each tenant sees only its own resources:
//!
//! - **Names**: tenant-owned names are stored as `<tenant>___<name>`, shared
//!   ones as `GLOBAL___<name>` ([`naming`])
//! - **Requests**: bodies and paths are qualified before forwarding, and
//!   task types outside the allow-list are refused ([`policy`])
//! - **Responses**: listings are filtered to the caller's resources and
//!   prefixes are stripped, failing closed on foreign names ([`transform`])
//!
//! Routes and their hooks live in a [`RouteTable`]; the [`proxy`] module
//! runs each request through it.

#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::unnecessary_to_owned)]

pub mod body;
pub mod error;
pub mod jsonpath;
pub mod naming;
pub mod policy;
pub mod proxy;
pub mod routes;
pub mod runtime;
pub mod tenant;
pub mod transform;

pub use error::{Result, TenancyError};
pub use jsonpath::PathExpr;
pub use proxy::{ProxyConfig, ProxyServer, ProxyState};
pub use routes::RouteTable;
pub use runtime::build_runtime;
pub use tenant::TenantId;
