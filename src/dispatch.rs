//! Dispatch resolution over a wrapped chain.
//!
//! [`ExtendedChain`] augments a plain [`Chain`] with routed registration:
//! handlers can be gated on an HTTP method, a literal path prefix, a regular
//! expression, or a combination. Each variant compiles down to a gate
//! handler appended to the wrapped chain, so dispatch order stays plain
//! registration order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::chain::{CaptureSet, Chain, ErrorHandler, Flow, Handler, Method, Request, Response, RouteContext};
use crate::error::ConfigError;
use crate::options::MockOptions;

/// Where a routed handler attaches: a literal path prefix or a compiled
/// pattern matched against the whole request path.
#[derive(Debug, Clone)]
pub enum RouteSpec {
    Path(String),
    Pattern(Regex),
}

impl RouteSpec {
    /// Literal path prefix route. The prefix matches on segment boundaries.
    pub fn path(path: impl Into<String>) -> Result<Self, ConfigError> {
        let path = path.into();
        if path.is_empty() {
            return Err(ConfigError::NotEnoughParameters("route must not be empty"));
        }
        Ok(RouteSpec::Path(path))
    }

    /// Pattern route compiled from a regular expression.
    pub fn pattern(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(RouteSpec::Pattern)
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }
}

impl From<Regex> for RouteSpec {
    fn from(pattern: Regex) -> Self {
        RouteSpec::Pattern(pattern)
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteSpec::Path(path) => f.write_str(path),
            RouteSpec::Pattern(pattern) => f.write_str(pattern.as_str()),
        }
    }
}

/// A [`Chain`] wrapped with the augmented registration surface.
///
/// The wrapped chain is an ordinary field, so several chains can be extended
/// independently in one process. [`ExtendedChain::restore`] hands the inner
/// chain back with every registration made through the wrapper intact.
pub struct ExtendedChain {
    pub(crate) chain: Chain,
    pub(crate) environment: Option<String>,
    pub(crate) default_mock_options: MockOptions,
}

impl ExtendedChain {
    /// Wraps a chain. Environment and default mock options start unset.
    pub fn wrap(chain: Chain) -> Self {
        Self {
            chain,
            environment: None,
            default_mock_options: MockOptions::default(),
        }
    }

    /// Sets the environment qualifier used when probing mock files.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Sets the server-wide default mock options. Each mock registration
    /// snapshots these, so set them before registering mocks.
    pub fn with_default_mock_options(mut self, options: MockOptions) -> Self {
        self.default_mock_options = options;
        self
    }

    /// Unwraps the inner chain, keeping every registration.
    pub fn restore(self) -> Chain {
        self.chain
    }

    /// Runs a request through the wrapped chain.
    pub async fn dispatch(&self, request: &Request) -> Response {
        self.chain.dispatch(request).await
    }

    /// Registers an ungated handler, invoked for every request.
    pub fn use_handler(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.chain.register(handler);
        self
    }

    /// Registers a handler gated on a route.
    pub fn use_route(&mut self, route: RouteSpec, handler: impl Handler + 'static) -> &mut Self {
        self.register_routed(None, route, Arc::new(handler))
    }

    /// Registers a handler gated on an HTTP method and a route.
    pub fn use_method(
        &mut self,
        method: Method,
        route: RouteSpec,
        handler: impl Handler + 'static,
    ) -> &mut Self {
        self.register_routed(Some(method), route, Arc::new(handler))
    }

    /// Registers an error-aware handler.
    pub fn use_error_handler(&mut self, handler: impl ErrorHandler + 'static) -> &mut Self {
        self.chain.register_error(handler);
        self
    }

    /// Attaches a routed handler to the wrapped chain.
    ///
    /// Pattern routes always go through a [`PatternGate`], with the method
    /// check first so captures are only recorded for requests the handler
    /// will actually see. Literal routes reuse the chain's own prefix
    /// mounting, with a method gate layered in when one applies.
    fn register_routed(
        &mut self,
        method: Option<Method>,
        route: RouteSpec,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        debug!(method = ?method.map(Method::as_str), route = %route, "registering routed handler");
        match (method, route) {
            (method, RouteSpec::Pattern(pattern)) => {
                self.chain.register(PatternGate {
                    method,
                    pattern,
                    inner: handler,
                });
            }
            (Some(method), RouteSpec::Path(path)) => {
                self.chain.register_at(path, MethodGate {
                    method,
                    inner: handler,
                });
            }
            (None, RouteSpec::Path(path)) => {
                self.chain.register_at(path, handler);
            }
        }
        self
    }
}

struct MethodGate {
    method: Method,
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for MethodGate {
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow {
        if request.method() == self.method {
            self.inner.handle(request, ctx).await
        } else {
            Flow::Continue
        }
    }
}

struct PatternGate {
    method: Option<Method>,
    pattern: Regex,
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for PatternGate {
    async fn handle(&self, request: &Request, ctx: &mut RouteContext) -> Flow {
        if let Some(method) = self.method {
            if request.method() != method {
                return Flow::Continue;
            }
        }
        match self.pattern.captures(request.path()) {
            Some(captures) => {
                ctx.set_captures(CaptureSet::new(&self.pattern, &captures));
                self.inner.handle(request, ctx).await
            }
            None => Flow::Continue,
        }
    }
}
