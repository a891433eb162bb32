//! Tenant namespace codec.
//!
//! The backend has a single flat namespace, so every tenant-owned name is
//! stored as `<tenant>___<name>`. Names shared by all tenants use the
//! reserved `GLOBAL` marker in place of a tenant id. These functions are
//! the only place a qualified name is built or taken apart.

use tracing::error;

use crate::error::{Result, TenancyError};

/// Namespace marker for resources visible to every tenant.
pub const GLOBAL_MARKER: &str = "GLOBAL";

/// Joins a namespace marker to a bare name. Never legal inside a bare name.
pub const SEPARATOR: &str = "___";

/// Fail if a tenant-supplied name contains the separator.
pub fn ensure_bare(name: &str) -> Result<()> {
    if name.contains(SEPARATOR) {
        error!(name = %name, separator = SEPARATOR, "Name must not contain separator");
        return Err(TenancyError::InvalidName {
            name: name.to_owned(),
            separator: SEPARATOR,
        });
    }
    Ok(())
}

/// Fail if `tenant` could not be told apart from another tenant once joined
/// to a name.
///
/// A marker containing the separator would read as another marker plus a
/// name, and a trailing `_` merges into the separator (`a_` + `x` and
/// `a` + `_x` give the same qualified name).
pub fn ensure_tenant(tenant: &str) -> Result<()> {
    let reason = if tenant.contains(SEPARATOR) {
        "contains the namespace separator"
    } else if tenant.ends_with('_') {
        "ends with '_'"
    } else {
        return Ok(());
    };
    error!(tenant = %tenant, reason, "Tenant id cannot be used as a namespace marker");
    Err(TenancyError::InvalidTenantId {
        tenant: tenant.to_owned(),
        reason,
    })
}

/// Prefix `bare` with the tenant's namespace marker.
///
/// # Errors
///
/// [`TenancyError::InvalidName`] if `bare` already contains [`SEPARATOR`];
/// accepting it would let a tenant forge a name in another namespace.
pub fn qualify(tenant: &str, bare: &str) -> Result<String> {
    ensure_bare(bare)?;
    let mut qualified = String::with_capacity(tenant.len() + SEPARATOR.len() + bare.len());
    qualified.push_str(tenant);
    qualified.push_str(SEPARATOR);
    qualified.push_str(bare);
    Ok(qualified)
}

/// Strip the tenant's namespace marker from `qualified`.
///
/// The remainder is returned untouched; it may be empty or contain further
/// separators.
pub fn unqualify<'a>(tenant: &str, qualified: &'a str) -> Result<&'a str> {
    strip_marker(tenant, qualified).ok_or_else(|| TenancyError::PrefixMismatch {
        tenant: tenant.to_owned(),
        name: qualified.to_owned(),
    })
}

/// True if the name lives in the shared namespace.
#[inline]
pub fn is_global(qualified: &str) -> bool {
    strip_marker(GLOBAL_MARKER, qualified).is_some()
}

/// True if the name is qualified with `tenant`'s marker.
#[inline]
pub fn is_owned_by(tenant: &str, qualified: &str) -> bool {
    strip_marker(tenant, qualified).is_some()
}

fn strip_marker<'a>(marker: &str, qualified: &'a str) -> Option<&'a str> {
    qualified.strip_prefix(marker)?.strip_prefix(SEPARATOR)
}
