//! The mock response pipeline.
//!
//! A mock registration routes a synthetic handler through the dispatch
//! gates. Per request the handler resolves its source to either a JSON file
//! or inline data, layers the options, and renders the response: status and
//! headers first, then the single-object transform or the array pipeline
//! (filter, paginate, reshape), then serialization.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chain::{CaptureSet, Flow, Handler, Method, Query, Request, Response, RouteContext};
use crate::dispatch::{ExtendedChain, RouteSpec};
use crate::error::Fault;
use crate::options::MockOptions;

/// Resolves a mock source per request, from the request itself and the
/// captures recorded by a pattern gate.
pub trait MockResolver: Send + Sync {
    fn resolve(
        &self,
        request: &Request,
        captures: Option<&CaptureSet>,
        query: &Query,
    ) -> anyhow::Result<ResolvedMock>;
}

impl<F> MockResolver for F
where
    F: Fn(&Request, Option<&CaptureSet>, &Query) -> anyhow::Result<ResolvedMock> + Send + Sync,
{
    fn resolve(
        &self,
        request: &Request,
        captures: Option<&CaptureSet>,
        query: &Query,
    ) -> anyhow::Result<ResolvedMock> {
        self(request, captures, query)
    }
}

/// What a [`MockResolver`] resolved to: a file path or an options record.
#[derive(Debug, Clone)]
pub enum ResolvedMock {
    Path(PathBuf),
    Options(MockOptions),
}

impl From<PathBuf> for ResolvedMock {
    fn from(path: PathBuf) -> Self {
        ResolvedMock::Path(path)
    }
}

impl From<&Path> for ResolvedMock {
    fn from(path: &Path) -> Self {
        ResolvedMock::Path(path.to_path_buf())
    }
}

impl From<String> for ResolvedMock {
    fn from(path: String) -> Self {
        ResolvedMock::Path(PathBuf::from(path))
    }
}

impl From<&str> for ResolvedMock {
    fn from(path: &str) -> Self {
        ResolvedMock::Path(PathBuf::from(path))
    }
}

impl From<MockOptions> for ResolvedMock {
    fn from(options: MockOptions) -> Self {
        ResolvedMock::Options(options)
    }
}

/// The source of a mock response.
#[derive(Clone)]
pub enum MockSource {
    /// A JSON file on disk, subject to environment probing.
    File(PathBuf),
    /// An inline options record; its `result` field is the data.
    Options(MockOptions),
    /// A per-request resolver function.
    Resolver(Arc<dyn MockResolver>),
}

impl MockSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        MockSource::File(path.into())
    }

    pub fn options(options: MockOptions) -> Self {
        MockSource::Options(options)
    }

    pub fn resolver(resolver: impl MockResolver + 'static) -> Self {
        MockSource::Resolver(Arc::new(resolver))
    }
}

impl fmt::Debug for MockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockSource::File(path) => f.debug_tuple("File").field(path).finish(),
            MockSource::Options(options) => f.debug_tuple("Options").field(options).finish(),
            MockSource::Resolver(_) => f.debug_tuple("Resolver").finish(),
        }
    }
}

impl From<&str> for MockSource {
    fn from(path: &str) -> Self {
        MockSource::File(PathBuf::from(path))
    }
}

impl From<String> for MockSource {
    fn from(path: String) -> Self {
        MockSource::File(PathBuf::from(path))
    }
}

impl From<&Path> for MockSource {
    fn from(path: &Path) -> Self {
        MockSource::File(path.to_path_buf())
    }
}

impl From<PathBuf> for MockSource {
    fn from(path: PathBuf) -> Self {
        MockSource::File(path)
    }
}

impl From<MockOptions> for MockSource {
    fn from(options: MockOptions) -> Self {
        MockSource::Options(options)
    }
}

impl ExtendedChain {
    /// Registers a mock for every method on a route.
    pub fn use_mock(
        &mut self,
        route: RouteSpec,
        source: impl Into<MockSource>,
        options: Option<MockOptions>,
    ) -> &mut Self {
        self.register_mock(None, route, source.into(), options)
    }

    /// Registers a mock gated on an HTTP method and a route.
    pub fn use_mock_method(
        &mut self,
        method: Method,
        route: RouteSpec,
        source: impl Into<MockSource>,
        options: Option<MockOptions>,
    ) -> &mut Self {
        self.register_mock(Some(method), route, source.into(), options)
    }

    fn register_mock(
        &mut self,
        method: Option<Method>,
        route: RouteSpec,
        source: MockSource,
        options: Option<MockOptions>,
    ) -> &mut Self {
        info!(
            method = %method.map(Method::as_str).unwrap_or("*"),
            route = %route,
            "Registered mock route"
        );

        // Inline results enter through a source, never through static layers.
        self.default_mock_options.strip_result();
        let mut per_call = options.unwrap_or_default();
        per_call.strip_result();

        let handler = MockHandler {
            source,
            static_options: self.default_mock_options.overridden_by(&per_call),
            environment: self.environment.clone(),
        };
        match method {
            Some(method) => self.use_method(method, route, handler),
            None => self.use_route(route, handler),
        }
    }
}

/// The synthetic handler serving one mock registration.
struct MockHandler {
    source: MockSource,
    /// Server defaults layered with per-registration options, snapshotted at
    /// registration time.
    static_options: MockOptions,
    environment: Option<String>,
}

#[async_trait]
impl Handler for MockHandler {
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow {
        let query = Query::parse(request.query_string());

        let mut mock_path: Option<PathBuf> = None;
        let mut record: Option<MockOptions> = None;
        match &self.source {
            MockSource::File(path) => mock_path = Some(path.clone()),
            MockSource::Options(options) => record = Some(options.clone()),
            MockSource::Resolver(resolver) => {
                match resolver.resolve(request, ctx.captures(), &query) {
                    Ok(ResolvedMock::Path(path)) => mock_path = Some(path),
                    Ok(ResolvedMock::Options(options)) => record = Some(options),
                    Err(error) => return Flow::Fault(Fault::Resolver(error)),
                }
            }
        }

        // A request-time record overrides everything merged so far. Its
        // `result` selects the data source: a string redirects to that file,
        // any other value is served inline, absence leaves no source at all.
        let mut options = self.static_options.clone();
        let mut inline: Option<Value> = None;
        if let Some(mut record) = record {
            match record.take_result() {
                Some(Value::String(path)) => mock_path = Some(PathBuf::from(path)),
                Some(value) => {
                    inline = Some(value);
                    mock_path = None;
                }
                None => mock_path = None,
            }
            options = options.overridden_by(&record);
        }

        let data = match self.load_data(mock_path.as_deref(), inline).await {
            Ok(data) => data,
            Err(response) => return Flow::Respond(response),
        };
        match render(request, &query, &options, data) {
            Ok(response) => Flow::Respond(response),
            Err(fault) => Flow::Fault(fault),
        }
    }
}

impl MockHandler {
    /// Produces the raw data value, reading and parsing the mock file when
    /// one applies. Data errors come back as ready-made 500 responses.
    async fn load_data(
        &self,
        path: Option<&Path>,
        inline: Option<Value>,
    ) -> Result<Value, Response> {
        let Some(path) = path else {
            return match inline {
                Some(value) => Ok(value),
                None => {
                    warn!("mock has neither a file nor an inline result");
                    Err(data_error(
                        "Mock response has neither a mock file nor an inline result!",
                    ))
                }
            };
        };

        let path = resolve_mock_file(path, self.environment.as_deref()).await;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "mock file not found");
                return Err(data_error(format!(
                    "Mock file '{}' was not found!",
                    path.display()
                )));
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "mock file could not be read");
                return Err(data_error(format!(
                    "Mock file '{}' could not be read!",
                    path.display()
                )));
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => {
                debug!(path = %path.display(), "Serving mock file");
                Ok(value)
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "mock file is not valid json");
                Err(data_error(format!("Not valid json '{}'!", path.display())))
            }
        }
    }
}

/// Probes for an environment-qualified sibling of `path`.
///
/// With environment `dev`, `mocks/data.json` is served from
/// `mocks/data.dev.json` when that file exists, otherwise from the base
/// path. Without an environment the base path is used directly.
async fn resolve_mock_file(path: &Path, environment: Option<&str>) -> PathBuf {
    let Some(environment) = environment else {
        return path.to_path_buf();
    };
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };

    let mut name = stem.to_os_string();
    name.push(".");
    name.push(environment);
    if let Some(extension) = path.extension() {
        name.push(".");
        name.push(extension);
    }
    let candidate = path.with_file_name(name);
    if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        debug!(path = %candidate.display(), "Using environment mock file");
        candidate
    } else {
        path.to_path_buf()
    }
}

/// Renders the response from the effective options and the raw data.
fn render(
    request: &Request,
    query: &Query,
    options: &MockOptions,
    data: Value,
) -> Result<Response, Fault> {
    let effective = options.resolve();
    let mut response = Response::new(effective.status_code);

    if effective.empty_result {
        // No body and no content type, whatever any layer configured.
        for (name, value) in &effective.response_headers {
            if name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            if let Some(value) = value {
                response.set_header(name.as_str(), value.as_str());
            }
        }
        return Ok(response);
    }

    response.set_header("Content-Type", effective.content_type.as_str());
    // Explicit headers win over the configured content type; a None value
    // unsets the header entirely.
    for (name, value) in &effective.response_headers {
        match value {
            Some(value) => response.set_header(name.as_str(), value.as_str()),
            None => response.remove_header(name),
        }
    }

    let result = if effective.data_array {
        let Value::Array(items) = data else {
            warn!("mock data is not a json array");
            return Ok(data_error("Mock data is not a JSON array!"));
        };
        let items = match &effective.filter {
            Some(filter) => filter.filter(request, query, items),
            None => items,
        };
        let page = effective.paginator.paginate(query, items);
        effective
            .page_transform
            .transform(page)
            .map_err(Fault::Transform)?
    } else {
        effective
            .data_transform
            .transform(data)
            .map_err(Fault::Transform)?
    };

    let body = effective
        .serializer
        .serialize(&result)
        .map_err(Fault::Serialize)?;
    Ok(response.with_body(body))
}

fn data_error(message: impl Into<String>) -> Response {
    Response::new(500)
        .with_header("Content-Type", "text/plain")
        .with_body(message.into())
}
