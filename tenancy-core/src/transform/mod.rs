//! Pre- and post-forward hooks for the backend's metadata endpoints.
//!
//! - `taskdefs`: task definitions, `/api/metadata/taskdefs`
//! - `workflowdefs`: workflow definitions, `/api/metadata/workflow`
//!
//! The helpers here are shared by both: stripping tenant prefixes at the
//! locations a path expression selects, and filtering a listing down to the
//! requesting tenant's own resources.

pub mod taskdefs;
pub mod workflowdefs;

use serde_json::Value;
use tracing::{debug, error};

use crate::error::{Result, TenancyError};
use crate::jsonpath::PathExpr;
use crate::naming;
use crate::tenant::TenantId;

/// Strip `tenant`'s prefix from every string `path` selects in `doc`.
///
/// With `allow_global`, names in the Global namespace are left as they are.
/// Non-string matches are ignored. Returns the number of names rewritten.
///
/// # Errors
///
/// [`TenancyError::PrefixMismatch`] on the first name that belongs to
/// neither the tenant nor (when allowed) the Global namespace. Names already
/// rewritten before the failure stay rewritten.
pub fn strip_tenant_prefix(
    tenant: &TenantId,
    doc: &mut Value,
    path: &PathExpr,
    allow_global: bool,
) -> Result<usize> {
    let mut stripped = 0;

    for location in path.find(doc) {
        let Some(Value::String(name)) = location.get_mut(doc) else {
            continue;
        };
        if allow_global && naming::is_global(name) {
            continue;
        }
        match naming::unqualify(tenant.as_str(), name) {
            Ok(bare) => {
                *name = bare.to_owned();
                stripped += 1;
            }
            Err(e) => {
                error!(
                    tenant = %tenant,
                    path = %path,
                    location = %location,
                    name = %name,
                    "Name must start with tenant prefix"
                );
                return Err(e);
            }
        }
    }

    Ok(stripped)
}

/// Apply [`strip_tenant_prefix`] for each `(path, allow_global)` pair.
pub fn strip_tenant_prefixes(
    tenant: &TenantId,
    doc: &mut Value,
    paths: &[(&PathExpr, bool)],
) -> Result<usize> {
    paths.iter().try_fold(0, |total, (path, allow_global)| {
        Ok(total + strip_tenant_prefix(tenant, doc, path, *allow_global)?)
    })
}

/// Keep only the items whose `name` carries `tenant`'s prefix, stripped.
///
/// Everything else, Global items and items without a string `name`
/// included, is dropped. Relative order is preserved.
pub fn retain_owned(tenant: &TenantId, items: &mut Vec<Value>) -> usize {
    let before = items.len();
    items.retain_mut(|item| {
        let Some(Value::String(name)) = item.get_mut("name") else {
            return false;
        };
        match naming::unqualify(tenant.as_str(), name) {
            Ok(bare) => {
                *name = bare.to_owned();
                true
            }
            Err(_) => false,
        }
    });
    debug!(
        tenant = %tenant,
        kept = items.len(),
        dropped = before - items.len(),
        "Filtered listing to tenant"
    );
    items.len()
}

/// The items of a listing response.
///
/// A 2xx listing that is not an array cannot be filtered, so it is refused
/// rather than passed through.
pub(crate) fn listing_mut(body: &mut Value) -> Result<&mut Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        other => {
            let kind = match other {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Object(_) => "object",
                Value::Array(_) => "array",
            };
            error!(kind, "Listing response is not an array");
            Err(TenancyError::UpstreamResponse(format!(
                "expected an array listing, got {kind}"
            )))
        }
    }
}

/// Unqualify the top-level `name` of a single resource.
pub(crate) fn unqualify_name(tenant: &TenantId, resource: &mut Value) -> Result<()> {
    let name = match resource.get_mut("name") {
        Some(Value::String(name)) => name,
        other => {
            let shown = other.map(|v| v.to_string()).unwrap_or_default();
            error!(tenant = %tenant, name = %shown, "Tenant prefix not found");
            return Err(TenancyError::PrefixMismatch {
                tenant: tenant.as_str().to_owned(),
                name: shown,
            });
        }
    };
    match naming::unqualify(tenant.as_str(), name) {
        Ok(bare) => {
            *name = bare.to_owned();
            Ok(())
        }
        Err(e) => {
            error!(tenant = %tenant, name = %name, "Tenant prefix not found");
            Err(e)
        }
    }
}

/// Qualify the top-level `name` of a single resource.
pub(crate) fn qualify_name(tenant: &TenantId, resource: &mut Value) -> Result<()> {
    let Some(Value::String(name)) = resource.get_mut("name") else {
        return Err(TenancyError::MalformedBody(
            "resource has no string 'name'".to_owned(),
        ));
    };
    *name = naming::qualify(tenant.as_str(), name)?;
    Ok(())
}
