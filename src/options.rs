//! Mock response options and the strategy traits they carry.
//!
//! Options are layered: built-in defaults, then the server-wide defaults set
//! at installation time, then per-route options, then a request-time options
//! record. Each layer only overrides the fields it actually sets.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::chain::{Query, Request};

/// Default content type for mock responses.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Default status code for mock responses.
pub const DEFAULT_STATUS_CODE: u16 = 200;

/// Turns the final result value into the response body.
pub trait Serializer: Send + Sync {
    fn serialize(&self, result: &Value) -> anyhow::Result<String>;
}

impl<F> Serializer for F
where
    F: Fn(&Value) -> anyhow::Result<String> + Send + Sync,
{
    fn serialize(&self, result: &Value) -> anyhow::Result<String> {
        self(result)
    }
}

/// Reshapes a single-object result before serialization.
pub trait DataTransform: Send + Sync {
    fn transform(&self, data: Value) -> anyhow::Result<Value>;
}

impl<F> DataTransform for F
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    fn transform(&self, data: Value) -> anyhow::Result<Value> {
        self(data)
    }
}

/// Reshapes the paged envelope before serialization.
pub trait PageTransform: Send + Sync {
    fn transform(&self, page: PagedData) -> anyhow::Result<Value>;
}

impl<F> PageTransform for F
where
    F: Fn(PagedData) -> anyhow::Result<Value> + Send + Sync,
{
    fn transform(&self, page: PagedData) -> anyhow::Result<Value> {
        self(page)
    }
}

/// Slices an array result into a page based on the request query.
pub trait Paginator: Send + Sync {
    fn paginate(&self, query: &Query, data: Vec<Value>) -> PagedData;
}

impl<F> Paginator for F
where
    F: Fn(&Query, Vec<Value>) -> PagedData + Send + Sync,
{
    fn paginate(&self, query: &Query, data: Vec<Value>) -> PagedData {
        self(query, data)
    }
}

/// Narrows an array result before pagination, based on the request.
pub trait DataFilter: Send + Sync {
    fn filter(&self, request: &Request, query: &Query, data: Vec<Value>) -> Vec<Value>;
}

impl<F> DataFilter for F
where
    F: Fn(&Request, &Query, Vec<Value>) -> Vec<Value> + Send + Sync,
{
    fn filter(&self, request: &Request, query: &Query, data: Vec<Value>) -> Vec<Value> {
        self(request, query, data)
    }
}

/// One page of an array result, shaped like a Spring Data page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedData {
    pub content: Vec<Value>,
    pub total_elements: usize,
    pub total_pages: usize,
    pub number_of_elements: usize,
    pub first: bool,
    pub last: bool,
    /// Requested page index; `None` when pagination did not apply.
    pub number: Option<usize>,
    /// Requested page size; `None` when pagination did not apply.
    pub size: Option<usize>,
}

/// Serializes the result with `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, result: &Value) -> anyhow::Result<String> {
        Ok(serde_json::to_string(result)?)
    }
}

/// Passes a single-object result through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl DataTransform for IdentityTransform {
    fn transform(&self, data: Value) -> anyhow::Result<Value> {
        Ok(data)
    }
}

/// Serializes the whole paged envelope as the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeTransform;

impl PageTransform for EnvelopeTransform {
    fn transform(&self, page: PagedData) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(page)?)
    }
}

/// Pages by the `size` and `page` query parameters.
///
/// Both parameters must be present and parse as non-negative integers with a
/// non-zero size; otherwise the whole array comes back as a single page with
/// `number` and `size` unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPaginator;

impl Paginator for DefaultPaginator {
    fn paginate(&self, query: &Query, data: Vec<Value>) -> PagedData {
        let total = data.len();
        let size = query.get("size").and_then(|v| v.parse::<usize>().ok());
        let page = query.get("page").and_then(|v| v.parse::<usize>().ok());
        match (size, page) {
            (Some(size), Some(page)) if size > 0 => {
                let offset = page.saturating_mul(size);
                let start = offset.min(total);
                let end = offset.saturating_add(size).min(total);
                let content: Vec<Value> = data.into_iter().skip(start).take(end - start).collect();
                PagedData {
                    number_of_elements: content.len(),
                    content,
                    total_elements: total,
                    total_pages: total.div_ceil(size),
                    first: page == 0,
                    last: total <= offset.saturating_add(size),
                    number: Some(page),
                    size: Some(size),
                }
            }
            _ => PagedData {
                number_of_elements: total,
                content: data,
                total_elements: total,
                total_pages: 1,
                first: true,
                last: true,
                number: None,
                size: None,
            },
        }
    }
}

/// Options controlling how a mock response is rendered.
///
/// Every field is optional; unset fields defer to the next layer down and
/// ultimately to the built-in defaults.
#[derive(Clone, Default)]
pub struct MockOptions {
    pub(crate) content_type: Option<String>,
    pub(crate) status_code: Option<u16>,
    pub(crate) empty_result: Option<bool>,
    pub(crate) data_array: Option<bool>,
    /// `Some(value)` sets the header, `None` unsets it from lower layers.
    pub(crate) response_headers: HashMap<String, Option<String>>,
    pub(crate) result: Option<Value>,
    pub(crate) result_fn: Option<Arc<dyn Serializer>>,
    pub(crate) data_result_fn: Option<Arc<dyn DataTransform>>,
    pub(crate) data_array_result_fn: Option<Arc<dyn PageTransform>>,
    pub(crate) paging_fn: Option<Arc<dyn Paginator>>,
    pub(crate) filter_fn: Option<Arc<dyn DataFilter>>,
}

impl MockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type for the mock response.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Status code for the mock response.
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// When `true`, the response carries no body and no content type.
    pub fn empty_result(mut self, empty_result: bool) -> Self {
        self.empty_result = Some(empty_result);
        self
    }

    /// When `true`, the data is treated as an array and run through the
    /// filter, paginator and page transform.
    pub fn data_array(mut self, data_array: bool) -> Self {
        self.data_array = Some(data_array);
        self
    }

    /// Sets an explicit response header. Explicit headers win over the
    /// configured content type.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response_headers.insert(name.into(), Some(value.into()));
        self
    }

    /// Unsets a header that a lower layer would otherwise send.
    pub fn unset_header(mut self, name: impl Into<String>) -> Self {
        self.response_headers.insert(name.into(), None);
        self
    }

    /// Inline result data. Meaningful only on an options record used as a
    /// mock source or returned by a resolver; static layers have it
    /// stripped at registration time.
    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Replaces the result serializer.
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.result_fn = Some(Arc::new(serializer));
        self
    }

    /// Replaces the single-object transform.
    pub fn data_transform(mut self, transform: impl DataTransform + 'static) -> Self {
        self.data_result_fn = Some(Arc::new(transform));
        self
    }

    /// Replaces the paged-envelope transform.
    pub fn page_transform(mut self, transform: impl PageTransform + 'static) -> Self {
        self.data_array_result_fn = Some(Arc::new(transform));
        self
    }

    /// Replaces the paginator.
    pub fn paginator(mut self, paginator: impl Paginator + 'static) -> Self {
        self.paging_fn = Some(Arc::new(paginator));
        self
    }

    /// Installs a filter applied to array data before pagination.
    pub fn filter(mut self, filter: impl DataFilter + 'static) -> Self {
        self.filter_fn = Some(Arc::new(filter));
        self
    }

    /// Layers `over` on top of `self`. Scalar and strategy fields replace
    /// only when set in `over`; `response_headers` merges key-wise.
    pub fn overridden_by(&self, over: &MockOptions) -> MockOptions {
        let mut response_headers = self.response_headers.clone();
        for (name, value) in &over.response_headers {
            response_headers.insert(name.clone(), value.clone());
        }
        MockOptions {
            content_type: over.content_type.clone().or_else(|| self.content_type.clone()),
            status_code: over.status_code.or(self.status_code),
            empty_result: over.empty_result.or(self.empty_result),
            data_array: over.data_array.or(self.data_array),
            response_headers,
            result: over.result.clone().or_else(|| self.result.clone()),
            result_fn: over.result_fn.clone().or_else(|| self.result_fn.clone()),
            data_result_fn: over
                .data_result_fn
                .clone()
                .or_else(|| self.data_result_fn.clone()),
            data_array_result_fn: over
                .data_array_result_fn
                .clone()
                .or_else(|| self.data_array_result_fn.clone()),
            paging_fn: over.paging_fn.clone().or_else(|| self.paging_fn.clone()),
            filter_fn: over.filter_fn.clone().or_else(|| self.filter_fn.clone()),
        }
    }

    /// Drops any inline `result`. Static option layers may not smuggle one
    /// in; inline data enters only through a mock source.
    pub(crate) fn strip_result(&mut self) {
        if self.result.take().is_some() {
            debug!("dropping inline result from static mock options");
        }
    }

    pub(crate) fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    /// Collapses the layered options into concrete values.
    pub(crate) fn resolve(&self) -> EffectiveOptions {
        EffectiveOptions {
            content_type: self
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            status_code: self.status_code.unwrap_or(DEFAULT_STATUS_CODE),
            empty_result: self.empty_result.unwrap_or(false),
            data_array: self.data_array.unwrap_or(false),
            response_headers: self.response_headers.clone(),
            serializer: self
                .result_fn
                .clone()
                .unwrap_or_else(|| Arc::new(JsonSerializer)),
            data_transform: self
                .data_result_fn
                .clone()
                .unwrap_or_else(|| Arc::new(IdentityTransform)),
            page_transform: self
                .data_array_result_fn
                .clone()
                .unwrap_or_else(|| Arc::new(EnvelopeTransform)),
            paginator: self
                .paging_fn
                .clone()
                .unwrap_or_else(|| Arc::new(DefaultPaginator)),
            filter: self.filter_fn.clone(),
        }
    }
}

impl fmt::Debug for MockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockOptions")
            .field("content_type", &self.content_type)
            .field("status_code", &self.status_code)
            .field("empty_result", &self.empty_result)
            .field("data_array", &self.data_array)
            .field("response_headers", &self.response_headers)
            .field("result", &self.result)
            .field("result_fn", &self.result_fn.is_some())
            .field("data_result_fn", &self.data_result_fn.is_some())
            .field("data_array_result_fn", &self.data_array_result_fn.is_some())
            .field("paging_fn", &self.paging_fn.is_some())
            .field("filter_fn", &self.filter_fn.is_some())
            .finish()
    }
}

/// Fully resolved options, one concrete value per knob.
pub(crate) struct EffectiveOptions {
    pub(crate) content_type: String,
    pub(crate) status_code: u16,
    pub(crate) empty_result: bool,
    pub(crate) data_array: bool,
    pub(crate) response_headers: HashMap<String, Option<String>>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) data_transform: Arc<dyn DataTransform>,
    pub(crate) page_transform: Arc<dyn PageTransform>,
    pub(crate) paginator: Arc<dyn Paginator>,
    pub(crate) filter: Option<Arc<dyn DataFilter>>,
}
