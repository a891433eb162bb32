//! Tenant identity extraction.

use std::fmt;

use http::HeaderMap;
use tracing::error;

use crate::error::{Result, TenancyError};
use crate::naming::{self, GLOBAL_MARKER};

/// Header carrying the already-authenticated tenant identity.
pub const TENANT_HEADER: &str = "x-auth-organization";

/// Tenant identifier for a single request.
///
/// Only obtainable through [`resolve`], so holding one means the id was
/// present, is not the Global marker and joins to names unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the tenant id from the request headers.
pub fn resolve(headers: &HeaderMap) -> Result<TenantId> {
    let tenant = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let Some(tenant) = tenant else {
        error!(header = TENANT_HEADER, "Tenant header not found");
        return Err(TenancyError::MissingTenant {
            header: TENANT_HEADER,
        });
    };

    if tenant == GLOBAL_MARKER {
        error!(tenant = %tenant, "Illegal name for tenant id");
        return Err(TenancyError::ReservedTenantId {
            tenant: tenant.to_owned(),
        });
    }

    naming::ensure_tenant(tenant)?;

    Ok(TenantId(tenant.to_owned()))
}

#[cfg(test)]
impl TenantId {
    pub(crate) fn for_test(id: &str) -> Self {
        Self(id.to_owned())
    }
}
