//! Task definition endpoints.
//!
//! Listing only returns the tenant's own definitions, writes are checked
//! against the subtype allow-list and qualified, and single-definition
//! paths are qualified before they reach the backend.
//!
//! ```text
//! curl -H "x-auth-organization: fb-test" localhost:8080/api/metadata/taskdefs
//! curl -H "x-auth-organization: fb-test" localhost:8080/api/metadata/taskdefs/frinx
//! ```

use serde_json::Value;

use super::{listing_mut, qualify_name, retain_owned, unqualify_name};
use crate::body::rebuild;
use crate::error::{Result, TenancyError};
use crate::naming;
use crate::policy::assert_allowed_subtype;
use crate::routes::{Forward, HookContext, HttpMethod, InboundResponse, OutboundRequest, Route};
use crate::tenant::TenantId;

const COLLECTION: &str = "/api/metadata/taskdefs";
const SINGLETON: &str = "/api/metadata/taskdefs/:name";

pub fn routes() -> Vec<Route> {
    vec![
        Route::new(HttpMethod::Get, COLLECTION).after(list_after),
        Route::new(HttpMethod::Post, COLLECTION).before(create_before),
        Route::new(HttpMethod::Put, COLLECTION).before(update_before),
        Route::new(HttpMethod::Get, SINGLETON)
            .before(qualify_path_name)
            .after(get_one_after),
        Route::new(HttpMethod::Delete, SINGLETON).before(qualify_path_name),
    ]
}

/// Subtype check first so rejected payloads are never qualified.
fn sanitize(tenant: &TenantId, taskdef: &mut Value) -> Result<()> {
    assert_allowed_subtype(taskdef)?;
    qualify_name(tenant, taskdef)
}

fn list_after(ctx: &HookContext<'_>, resp: &mut InboundResponse) -> Result<()> {
    if !resp.status.is_success() {
        return Ok(());
    }
    retain_owned(ctx.tenant, listing_mut(&mut resp.body)?);
    Ok(())
}

fn create_before(ctx: &HookContext<'_>, req: &mut OutboundRequest) -> Result<Forward> {
    let mut body = req.json_body()?;
    let Value::Array(taskdefs) = &mut body else {
        return Err(TenancyError::MalformedBody(
            "expected an array of task definitions".to_owned(),
        ));
    };
    for taskdef in taskdefs.iter_mut() {
        sanitize(ctx.tenant, taskdef)?;
    }
    Ok(Forward::with_body(rebuild(&body, &mut req.headers)?))
}

fn update_before(ctx: &HookContext<'_>, req: &mut OutboundRequest) -> Result<Forward> {
    let mut taskdef = req.json_body()?;
    if !taskdef.is_object() {
        return Err(TenancyError::MalformedBody(
            "expected a task definition object".to_owned(),
        ));
    }
    sanitize(ctx.tenant, &mut taskdef)?;
    Ok(Forward::with_body(rebuild(&taskdef, &mut req.headers)?))
}

/// Rewrite `:name` in the path to the tenant-qualified name.
pub(super) fn qualify_path_name(ctx: &HookContext<'_>, req: &mut OutboundRequest) -> Result<Forward> {
    let qualified = naming::qualify(ctx.tenant.as_str(), ctx.params.require("name")?)?;
    req.path = ctx.path_with("name", qualified)?;
    Ok(Forward::unchanged())
}

fn get_one_after(ctx: &HookContext<'_>, resp: &mut InboundResponse) -> Result<()> {
    if !resp.status.is_success() {
        return Ok(());
    }
    unqualify_name(ctx.tenant, &mut resp.body)
}

#[cfg(test)]
mod tests {
    use crate::transform::harness::{bodyless, forwarded_json, request, run_pre, run_post};
    use super::*;
    use http::{Method, StatusCode};
    use serde_json::json;

    #[test]
    fn test_create_qualifies_every_taskdef() {
        let body = json!([
            {"name": "bar", "type": "WAIT", "retryCount": 3},
            {"name": "baz", "type": "HTTP"}
        ]);
        let (req, forward) = run_pre("acme", request(Method::POST, COLLECTION, &body)).unwrap();
        assert!(forward.has_rebuilt_body());
        assert_eq!(
            forwarded_json(req, forward),
            json!([
                {"name": "acme___bar", "type": "WAIT", "retryCount": 3},
                {"name": "acme___baz", "type": "HTTP"}
            ])
        );
    }

    #[test]
    fn test_create_rejects_disallowed_subtype() {
        let body = json!([{"name": "bar", "type": "WAIT"}, {"name": "evil", "type": "SIMPLE"}]);
        let err = run_pre("acme", request(Method::POST, COLLECTION, &body)).unwrap_err();
        assert!(matches!(err, TenancyError::DisallowedSubtype { .. }));
    }

    #[test]
    fn test_subtype_checked_before_name() {
        // bad subtype and bad name: the subtype gate fires first
        let body = json!({"name": "a___b", "type": "SIMPLE"});
        let err = run_pre("acme", request(Method::PUT, COLLECTION, &body)).unwrap_err();
        assert!(matches!(err, TenancyError::DisallowedSubtype { .. }));
    }

    #[test]
    fn test_create_rejects_separator_in_name() {
        let body = json!([{"name": "other___bar", "type": "WAIT"}]);
        let err = run_pre("acme", request(Method::POST, COLLECTION, &body)).unwrap_err();
        assert!(matches!(err, TenancyError::InvalidName { .. }));
    }

    #[test]
    fn test_create_requires_array() {
        let body = json!({"name": "bar", "type": "WAIT"});
        let err = run_pre("acme", request(Method::POST, COLLECTION, &body)).unwrap_err();
        assert!(matches!(err, TenancyError::MalformedBody(_)));
    }

    #[test]
    fn test_update_qualifies() {
        let body = json!({"name": "frinx", "type": "WAIT", "timeoutSeconds": 400});
        let (req, forward) = run_pre("acme", request(Method::PUT, COLLECTION, &body)).unwrap();
        let sent = forwarded_json(req, forward);
        assert_eq!(sent["name"], "acme___frinx");
        assert_eq!(sent["timeoutSeconds"], 400);
    }

    #[test]
    fn test_singleton_paths_are_qualified() {
        for method in [Method::GET, Method::DELETE] {
            let req = bodyless(method, "/api/metadata/taskdefs/bar");
            let (req, forward) = run_pre("acme", req).unwrap();
            assert!(!forward.has_rebuilt_body());
            assert_eq!(req.path, "/api/metadata/taskdefs/acme___bar");
        }
    }

    #[test]
    fn test_singleton_path_rejects_separator() {
        let req = bodyless(Method::GET, "/api/metadata/taskdefs/other___bar");
        assert!(matches!(
            run_pre("acme", req),
            Err(TenancyError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_list_filters_per_tenant() {
        let listing = json!([
            {"name": "acme___bar"},
            {"name": "other___bar"},
            {"name": "GLOBAL___shared"},
            {"name": "acme___baz"}
        ]);

        let acme = run_post("acme", Method::GET, COLLECTION, StatusCode::OK, listing.clone()).unwrap();
        assert_eq!(acme, json!([{"name": "bar"}, {"name": "baz"}]));

        let other = run_post("other", Method::GET, COLLECTION, StatusCode::OK, listing).unwrap();
        assert_eq!(other, json!([{"name": "bar"}]));
    }

    #[test]
    fn test_get_one_strips_prefix() {
        let body = json!({"name": "acme___frinx", "type": "WAIT"});
        let path = "/api/metadata/taskdefs/frinx";
        let resp = run_post("acme", Method::GET, path, StatusCode::OK, body).unwrap();
        assert_eq!(resp, json!({"name": "frinx", "type": "WAIT"}));
    }

    #[test]
    fn test_get_one_rejects_foreign_name() {
        let body = json!({"name": "other___frinx", "secret": "x"});
        let path = "/api/metadata/taskdefs/frinx";
        let err = run_post("acme", Method::GET, path, StatusCode::OK, body).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(err, TenancyError::PrefixMismatch { .. }));
    }

    #[test]
    fn test_get_one_leaves_errors_alone() {
        let body = json!({"message": "not found"});
        let path = "/api/metadata/taskdefs/frinx";
        let resp = run_post("acme", Method::GET, path, StatusCode::NOT_FOUND, body.clone()).unwrap();
        assert_eq!(resp, body);
    }

    #[test]
    fn test_list_refuses_non_array() {
        let body = json!({"name": "other___secret"});
        let err = run_post("acme", Method::GET, COLLECTION, StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, TenancyError::UpstreamResponse(_)));
        assert_eq!(err.status_code(), 502);

        // error bodies from the backend are not listings
        let body = json!({"message": "unavailable"});
        let resp = run_post("acme", Method::GET, COLLECTION, StatusCode::SERVICE_UNAVAILABLE, body.clone()).unwrap();
        assert_eq!(resp, body);
    }
}
