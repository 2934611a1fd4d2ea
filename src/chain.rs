//! Minimal middleware chain substrate.
//!
//! A [`Chain`] holds an ordered list of handlers. Dispatch walks the list in
//! registration order; each handler returns a [`Flow`] that either hands the
//! request to the next handler, terminates with a response, or signals a
//! fault. Faults travel forward to error-aware handlers instead of unwinding.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{ConfigError, Fault};

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Canonical uppercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Connect => "CONNECT",
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONNECT" => Ok(Method::Connect),
            "DELETE" => Ok(Method::Delete),
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "TRACE" => Ok(Method::Trace),
            other => Err(ConfigError::InvalidMethod(other.to_string())),
        }
    }
}

/// An incoming request as seen by the chain.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query_string: Option<String>,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
}

impl Request {
    /// Builds a request from a method and a target of the form `path?query`.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            query_string,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attaches a request body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Path component of the target, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, if the target carried one.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Parsed query parameters.
    pub fn query(&self) -> Query {
        Query::parse(self.query_string())
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// The outgoing response a handler terminates the chain with.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets a header, replacing any existing value under the same
    /// case-insensitive name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets the body bytes.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a header in place, replacing any existing value under the same
    /// case-insensitive name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Removes a header by case-insensitive name.
    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, with invalid bytes replaced.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Terminal response when no handler produced one.
    pub(crate) fn not_found(request: &Request) -> Self {
        Response::new(404)
            .with_header("Content-Type", "text/plain")
            .with_body(format!("Cannot {} {}", request.method(), request.path()))
    }

    /// Terminal response for a fault that no error handler consumed.
    pub(crate) fn from_fault(fault: &Fault) -> Self {
        Response::new(500)
            .with_header("Content-Type", "text/plain")
            .with_body(fault.to_string())
    }
}

/// Parsed query parameters. Repeated keys keep their first value.
#[derive(Debug, Clone, Default)]
pub struct Query {
    params: HashMap<String, String>,
}

impl Query {
    /// Parses an `a=1&b=2` query string. Keys and values are
    /// percent-decoded, `+` decodes to a space, and a key without `=` maps
    /// to the empty string.
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        for part in query.unwrap_or("").split('&') {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            params
                .entry(percent_decode(key))
                .or_insert_with(|| percent_decode(value));
        }
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Decodes percent-escapes byte-wise, then interprets the result as UTF-8.
fn percent_decode(input: &str) -> String {
    let raw = input.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'%' if i + 2 < raw.len() => match (hex_value(raw[i + 1]), hex_value(raw[i + 2])) {
                (Some(hi), Some(lo)) => {
                    bytes.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    bytes.push(b'%');
                    i += 1;
                }
            },
            b'+' => {
                bytes.push(b' ');
                i += 1;
            }
            byte => {
                bytes.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

/// Capture groups recorded by a pattern gate.
///
/// Group 0 is the whole match; named groups are indexed separately.
#[derive(Debug, Clone, Default)]
pub struct CaptureSet {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl CaptureSet {
    pub(crate) fn new(pattern: &regex::Regex, captures: &regex::Captures<'_>) -> Self {
        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();
        let mut named = HashMap::new();
        for name in pattern.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                named.insert(name.to_string(), m.as_str().to_string());
            }
        }
        Self { groups, named }
    }

    /// Numbered group, 0 being the whole match.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|group| group.as_deref())
    }

    /// Named group.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Number of groups, including group 0.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Per-dispatch scratch state threaded through the handlers.
///
/// Holds the captures of the most recent successful pattern match; they stay
/// visible to later handlers even after the matching handler continued.
#[derive(Debug, Default)]
pub struct RouteContext {
    captures: Option<CaptureSet>,
}

impl RouteContext {
    pub(crate) fn set_captures(&mut self, captures: CaptureSet) {
        self.captures = Some(captures);
    }

    pub fn captures(&self) -> Option<&CaptureSet> {
        self.captures.as_ref()
    }
}

/// Outcome of one handler invocation.
#[derive(Debug)]
pub enum Flow {
    /// Hand the request to the next handler.
    Continue,
    /// Terminate the dispatch with this response.
    Respond(Response),
    /// Signal a fault; it travels forward to error-aware handlers.
    Fault(Fault),
}

/// A chain handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow;
}

#[async_trait]
impl Handler for Arc<dyn Handler> {
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow {
        self.as_ref().handle(request, ctx).await
    }
}

/// An error-aware handler. Invoked only while a fault is pending; the fault
/// is passed by value, so returning [`Flow::Continue`] consumes it.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_fault(&self, fault: Fault, request: &Request, ctx: &mut RouteContext) -> Flow;
}

/// Adapts a synchronous closure to [`Handler`].
///
/// Handlers that need to await something implement [`Handler`] directly.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request, &mut RouteContext) -> Flow + Send + Sync,
{
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow {
        (self.0)(request, ctx)
    }
}

/// Wraps a synchronous closure as a chain handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Request, &mut RouteContext) -> Flow + Send + Sync,
{
    FnHandler(f)
}

enum Entry {
    Handler(Arc<dyn Handler>),
    Error(Arc<dyn ErrorHandler>),
}

/// An ordered middleware chain.
#[derive(Default)]
pub struct Chain {
    entries: Vec<Entry>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler invoked for every request.
    pub fn register(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.entries.push(Entry::Handler(Arc::new(handler)));
        self
    }

    /// Appends a handler gated on a literal path prefix.
    ///
    /// The prefix matches on segment boundaries only: `/api` covers `/api`
    /// and `/api/users` but not `/apix`. The path is never rewritten.
    pub fn register_at(&mut self, prefix: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        let inner: Arc<dyn Handler> = Arc::new(handler);
        self.entries.push(Entry::Handler(Arc::new(MountGate {
            prefix: prefix.into(),
            inner,
        })));
        self
    }

    /// Appends an error-aware handler.
    pub fn register_error(&mut self, handler: impl ErrorHandler + 'static) -> &mut Self {
        self.entries.push(Entry::Error(Arc::new(handler)));
        self
    }

    /// Number of registered entries, error handlers included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the request through the chain.
    ///
    /// Error-aware handlers are skipped while no fault is pending. A pending
    /// fault does not skip plain handlers; they run with the fault still in
    /// flight. At the end of the chain a pending fault becomes a plain-text
    /// 500 and a request nothing responded to becomes a 404.
    pub async fn dispatch(&self, request: &Request) -> Response {
        let mut ctx = RouteContext::default();
        let mut pending: Option<Fault> = None;
        for entry in &self.entries {
            match entry {
                Entry::Handler(handler) => {
                    if let Some(fault) = &pending {
                        warn!(
                            error = %fault,
                            path = %request.path(),
                            "pending fault carried through a plain handler"
                        );
                    }
                    match handler.handle(request, &mut ctx).await {
                        Flow::Continue => {}
                        Flow::Respond(response) => return response,
                        Flow::Fault(fault) => pending = Some(fault),
                    }
                }
                Entry::Error(handler) => {
                    let Some(fault) = pending.take() else {
                        continue;
                    };
                    match handler.handle_fault(fault, request, &mut ctx).await {
                        Flow::Continue => {}
                        Flow::Respond(response) => return response,
                        Flow::Fault(fault) => pending = Some(fault),
                    }
                }
            }
        }
        match pending {
            Some(fault) => {
                error!(
                    error = %fault,
                    method = %request.method(),
                    path = %request.path(),
                    "request failed"
                );
                Response::from_fault(&fault)
            }
            None => Response::not_found(request),
        }
    }
}

struct MountGate {
    prefix: String,
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for MountGate {
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow {
        if prefix_matches(&self.prefix, request.path()) {
            self.inner.handle(request, ctx).await
        } else {
            Flow::Continue
        }
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    // Segment boundary: the path either ends with the prefix or continues
    // with a slash. A prefix that itself ends in '/' already sits on one.
    prefix.ends_with('/') || matches!(path.as_bytes().get(prefix.len()), None | Some(b'/'))
}
