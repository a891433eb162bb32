//! Route transform table.
//!
//! Maps (method, URL template) to an optional pre-forward and post-forward
//! hook. The table is built once at startup and only read afterwards. Hooks
//! are plain function pointers; dispatch is a structural match on method and
//! path segments.

use std::fmt;

use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::body::RebuiltBody;
use crate::error::{Result, TenancyError};
use crate::tenant::TenantId;

/// Compact HTTP method representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Patch = 4,
    Head = 5,
    Options = 6,
    Other = 255,
}

impl From<&Method> for HttpMethod {
    #[inline]
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => HttpMethod::Get,
            Method::POST => HttpMethod::Post,
            Method::PUT => HttpMethod::Put,
            Method::DELETE => HttpMethod::Delete,
            Method::PATCH => HttpMethod::Patch,
            Method::HEAD => HttpMethod::Head,
            Method::OPTIONS => HttpMethod::Options,
            _ => HttpMethod::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Param(String),
}

/// URL template such as `/api/metadata/taskdefs/:name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    source: &'static str,
    parts: Vec<TemplatePart>,
}

impl RouteTemplate {
    pub fn new(source: &'static str) -> Self {
        let parts = split_path(source)
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => TemplatePart::Param(name.to_owned()),
                None => TemplatePart::Literal(segment.to_owned()),
            })
            .collect();
        Self { source, parts }
    }

    pub fn as_str(&self) -> &'static str {
        self.source
    }

    /// Match a request path, binding named segments (percent-decoded).
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let mut params = RouteParams::default();
        let mut segments = split_path(path);

        for part in &self.parts {
            let segment = segments.next()?;
            match part {
                TemplatePart::Literal(literal) => {
                    if literal != segment {
                        return None;
                    }
                }
                TemplatePart::Param(name) => {
                    let value = urlencoding::decode(segment).ok()?;
                    params.values.push((name.clone(), value.into_owned()));
                }
            }
        }

        if segments.next().is_some() {
            return None;
        }
        Some(params)
    }

    /// Render the template with `params`, percent-encoding every value.
    pub fn render(&self, params: &RouteParams) -> Result<String> {
        let mut path = String::new();
        for part in &self.parts {
            path.push('/');
            match part {
                TemplatePart::Literal(literal) => path.push_str(literal),
                TemplatePart::Param(name) => {
                    path.push_str(&urlencoding::encode(params.require(name)?))
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        Ok(path)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Values bound by a template's named segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    values: Vec<(String, String)>,
}

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Like [`get`](Self::get), but a missing parameter is an error.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| TenancyError::MalformedBody(format!("missing path parameter '{name}'")))
    }

    /// Replace (or add) a bound value.
    pub fn set(&mut self, name: &str, value: String) {
        match self.values.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name.to_owned(), value)),
        }
    }
}

/// Request as it will be sent upstream. Pre-forward hooks mutate it.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    body: bytes::Bytes,
}

impl OutboundRequest {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: Option<String>,
        headers: HeaderMap,
        body: bytes::Bytes,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            query,
            headers,
            body,
        }
    }

    /// Original body bytes as received from the caller.
    pub fn raw_body(&self) -> &[u8] {
        &self.body
    }

    /// Parse the original body as JSON.
    pub fn json_body(&self) -> Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| TenancyError::MalformedBody(format!("invalid JSON: {e}")))
    }

    /// Path plus query string, as sent upstream.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Split into parts, choosing the body the continuation selected.
    pub(crate) fn into_parts(self, forward: Forward) -> (Method, String, HeaderMap, bytes::Bytes) {
        let path = self.path_and_query();
        let body = match forward.body {
            Some(rebuilt) => rebuilt.into_bytes(),
            None => self.body,
        };
        (self.method, path, self.headers, body)
    }
}

/// Continuation returned by a pre-forward hook.
///
/// A hook can only let the request proceed by producing one of these; the
/// forwarder consumes it when the upstream call is made.
#[derive(Debug)]
#[must_use = "the request is only forwarded when the continuation is returned"]
pub struct Forward {
    body: Option<RebuiltBody>,
}

impl Forward {
    /// Forward with the original body bytes.
    pub fn unchanged() -> Self {
        Self { body: None }
    }

    /// Forward with a rebuilt body.
    pub fn with_body(body: RebuiltBody) -> Self {
        Self { body: Some(body) }
    }

    pub fn has_rebuilt_body(&self) -> bool {
        self.body.is_some()
    }
}

/// Upstream response as seen by post-forward hooks.
#[derive(Debug)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// What a hook knows about the request it runs for.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub tenant: &'a TenantId,
    pub route: &'a Route,
    pub params: &'a RouteParams,
}

impl HookContext<'_> {
    /// Path for this route with `name` rebound to `value`.
    pub fn path_with(&self, name: &str, value: String) -> Result<String> {
        let mut params = self.params.clone();
        params.set(name, value);
        self.route.template.render(&params)
    }
}

pub type PreHook = fn(&HookContext<'_>, &mut OutboundRequest) -> Result<Forward>;
pub type PostHook = fn(&HookContext<'_>, &mut InboundResponse) -> Result<()>;

/// One entry in the table.
#[derive(Clone)]
pub struct Route {
    pub method: HttpMethod,
    pub template: RouteTemplate,
    pub pre: Option<PreHook>,
    pub post: Option<PostHook>,
}

impl Route {
    pub fn new(method: HttpMethod, template: &'static str) -> Self {
        Self {
            method,
            template: RouteTemplate::new(template),
            pre: None,
            post: None,
        }
    }

    pub fn before(mut self, hook: PreHook) -> Self {
        self.pre = Some(hook);
        self
    }

    pub fn after(mut self, hook: PostHook) -> Self {
        self.post = Some(hook);
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template.as_str())
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}

/// A route selected for a request, with its bound parameters.
#[derive(Debug)]
pub struct MatchedRoute<'t> {
    pub route: &'t Route,
    pub params: RouteParams,
}

impl<'t> MatchedRoute<'t> {
    pub fn context<'a>(&'a self, tenant: &'a TenantId) -> HookContext<'a> {
        HookContext {
            tenant,
            route: self.route,
            params: &self.params,
        }
    }
}

/// Registry of routes, searched in registration order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route to the table.
    pub fn add(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Add several routes.
    pub fn extend(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Task definition and workflow definition routes.
    pub fn metadata() -> Self {
        Self::new()
            .extend(crate::transform::taskdefs::routes())
            .extend(crate::transform::workflowdefs::routes())
    }

    /// First route matching `method` and `path`.
    pub fn dispatch(&self, method: &Method, path: &str) -> Option<MatchedRoute<'_>> {
        let method = HttpMethod::from(method);
        let matched = self.routes.iter().find_map(|route| {
            if route.method != method {
                return None;
            }
            route
                .template
                .matches(path)
                .map(|params| MatchedRoute { route, params })
        });

        match &matched {
            Some(m) => debug!(template = m.route.template.as_str(), "Matched route"),
            None => debug!(path = %path, "No route matched, passing through"),
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
