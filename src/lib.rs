//! Routed mock responses for chain-based HTTP middleware.
//!
//! Wraps a minimal middleware [`Chain`] with an augmented registration
//! surface: handlers gated by HTTP method, path prefix or regular
//! expression, plus a mock pipeline that serves canned JSON payloads in
//! place of a real backend.
//!
//! # Features
//!
//! - **Dispatch gates**: register handlers by method, literal path prefix,
//!   regular expression, or a combination
//! - **Mock sources**: static JSON files, per-request resolver functions, or
//!   inline result records
//! - **Layered options**: built-in defaults, server-wide defaults, per-route
//!   options and request-time records merged field by field
//! - **Array pipeline**: filter, paginate and reshape JSON arrays through
//!   pluggable strategies, served as a Spring-style page envelope
//! - **Environment files**: with environment `dev`, `data.dev.json` is
//!   preferred over `data.json` when it exists
//! - **Declarative setup**: register a whole mock set from YAML
//!
//! # Example Configuration
//!
//! ```yaml
//! environment: dev
//! defaults:
//!   response_headers:
//!     X-Mock: "1"
//! mocks:
//!   - method: GET
//!     route: /api/users
//!     response: mocks/users.json
//!     options:
//!       data_array: true
//!   - route: '^/api/users/(\d+)$'
//!     pattern: true
//!     response:
//!       result:
//!         id: 1
//!         name: admin
//! ```

pub mod chain;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mock;
pub mod options;

pub use chain::{
    handler_fn, CaptureSet, Chain, ErrorHandler, Flow, Handler, Method, Query, Request, Response,
    RouteContext,
};
pub use config::MockSetConfig;
pub use dispatch::{ExtendedChain, RouteSpec};
pub use error::{ConfigError, Fault};
pub use mock::{MockResolver, MockSource, ResolvedMock};
pub use options::{
    DataFilter, DataTransform, DefaultPaginator, EnvelopeTransform, IdentityTransform,
    JsonSerializer, MockOptions, PageTransform, PagedData, Paginator, Serializer,
};
