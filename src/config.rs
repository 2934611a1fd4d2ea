//! Declarative mock configuration.
//!
//! A YAML document names an optional environment, server-wide default
//! options and a list of mock routes. [`MockSetConfig::install`] validates
//! the document and performs the equivalent functional registrations over a
//! chain. Strategy functions (serializers, paginators, filters) can only be
//! attached programmatically.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::chain::{Chain, Method};
use crate::dispatch::{ExtendedChain, RouteSpec};
use crate::error::ConfigError;
use crate::mock::MockSource;
use crate::options::MockOptions;

/// Top-level configuration for a set of mock routes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockSetConfig {
    /// Environment qualifier used when probing mock files.
    #[serde(default)]
    pub environment: Option<String>,

    /// Server-wide default options, layered under every mock.
    #[serde(default)]
    pub defaults: Option<MockOptionsConfig>,

    /// Mock routes, registered in order.
    #[serde(default)]
    pub mocks: Vec<MockRouteConfig>,
}

impl MockSetConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mock config from {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("Invalid mock config {}", path.display()))
    }

    /// Parses and validates a configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: MockSetConfig =
            serde_yaml::from_str(yaml).context("Failed to parse mock config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every mock route without registering anything.
    pub fn validate(&self) -> Result<()> {
        for (index, mock) in self.mocks.iter().enumerate() {
            mock.validate()
                .with_context(|| format!("Mock {} (route '{}')", index, mock.route))?;
        }
        if let Some(defaults) = &self.defaults {
            defaults.validate().context("Default mock options")?;
        }
        Ok(())
    }

    /// Wraps `chain` and registers every configured mock over it.
    pub fn install(self, chain: Chain) -> Result<ExtendedChain> {
        self.validate()?;

        let mut extended = ExtendedChain::wrap(chain);
        if let Some(environment) = self.environment {
            extended = extended.with_environment(environment);
        }
        if let Some(defaults) = self.defaults {
            extended = extended.with_default_mock_options(defaults.into_options());
        }

        let count = self.mocks.len();
        for mock in self.mocks {
            let route = mock.route_spec()?;
            let options = mock.options.map(MockOptionsConfig::into_options);
            let source = match mock.response {
                ResponseSourceConfig::Path(path) => MockSource::file(path),
                ResponseSourceConfig::Record(record) => MockSource::options(record.into_options()),
            };
            match mock.method {
                Some(method) => extended.use_mock_method(method, route, source, options),
                None => extended.use_mock(route, source, options),
            };
        }
        info!(mocks = count, "Installed mock configuration");
        Ok(extended)
    }
}

/// One configured mock route.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockRouteConfig {
    /// Gate on this HTTP method; absent means any method.
    #[serde(default)]
    pub method: Option<Method>,

    /// Route string: a path prefix, or a regular expression when `pattern`
    /// is set.
    pub route: String,

    /// Treat `route` as a regular expression.
    #[serde(default)]
    pub pattern: bool,

    /// Mock source: a file path string or an inline options record.
    pub response: ResponseSourceConfig,

    /// Per-route options layered over the server defaults.
    #[serde(default)]
    pub options: Option<MockOptionsConfig>,
}

impl MockRouteConfig {
    fn validate(&self) -> Result<()> {
        self.route_spec()?;
        if let ResponseSourceConfig::Record(record) = &self.response {
            record.validate()?;
        }
        if let Some(options) = &self.options {
            options.validate()?;
        }
        Ok(())
    }

    fn route_spec(&self) -> std::result::Result<RouteSpec, ConfigError> {
        if self.pattern {
            RouteSpec::pattern(&self.route)
        } else {
            RouteSpec::path(self.route.clone())
        }
    }
}

/// Mock source in configuration: a file path or an inline record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResponseSourceConfig {
    Path(String),
    Record(MockOptionsConfig),
}

/// Declarative subset of [`MockOptions`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockOptionsConfig {
    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub status_code: Option<u16>,

    #[serde(default)]
    pub empty_result: Option<bool>,

    #[serde(default)]
    pub data_array: Option<bool>,

    /// Response headers; a `null` value unsets the header.
    #[serde(default)]
    pub response_headers: HashMap<String, Option<String>>,

    /// Inline result data. Meaningful only on a `response` record; stripped
    /// from `defaults` and `options` at registration time.
    #[serde(default)]
    pub result: Option<Value>,
}

impl MockOptionsConfig {
    fn validate(&self) -> Result<()> {
        if let Some(status) = self.status_code {
            if !(100..=599).contains(&status) {
                return Err(ConfigError::InvalidStatus(status).into());
            }
        }
        Ok(())
    }

    /// Converts to runtime options.
    pub fn into_options(self) -> MockOptions {
        MockOptions {
            content_type: self.content_type,
            status_code: self.status_code,
            empty_result: self.empty_result,
            data_array: self.data_array,
            response_headers: self.response_headers,
            result: self.result,
            ..MockOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Request;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_parse_minimal_config() {
        let config = MockSetConfig::from_yaml(
            r"
mocks:
  - route: /api/users
    response: mocks/users.json
",
        )
        .unwrap();

        assert!(config.environment.is_none());
        assert!(config.defaults.is_none());
        assert_eq!(config.mocks.len(), 1);
        assert!(config.mocks[0].method.is_none());
        assert!(matches!(
            config.mocks[0].response,
            ResponseSourceConfig::Path(ref path) if path == "mocks/users.json"
        ));
    }

    #[test]
    fn test_parse_full_config() {
        let config = MockSetConfig::from_yaml(
            r#"
environment: dev
defaults:
  status_code: 200
  response_headers:
    X-Mock: "1"
    X-Gone: null
mocks:
  - method: POST
    route: /api/users
    response: mocks/users.json
    options:
      status_code: 201
      data_array: true
  - route: '^/api/users/(\d+)$'
    pattern: true
    response:
      result:
        id: 1
        name: admin
"#,
        )
        .unwrap();

        assert_eq!(config.environment.as_deref(), Some("dev"));
        let defaults = config.defaults.unwrap();
        assert_eq!(
            defaults.response_headers.get("X-Mock"),
            Some(&Some("1".to_string()))
        );
        assert_eq!(defaults.response_headers.get("X-Gone"), Some(&None));

        assert_eq!(config.mocks[0].method, Some(Method::Post));
        assert!(config.mocks[1].pattern);
        assert!(matches!(
            config.mocks[1].response,
            ResponseSourceConfig::Record(ref record)
                if record.result == Some(json!({"id": 1, "name": "admin"}))
        ));
    }

    #[test]
    fn test_rejects_unknown_top_level_field() {
        let err = MockSetConfig::from_yaml("bogus: 1\nmocks: []\n").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[test]
    fn test_rejects_unknown_option_field() {
        let result = MockSetConfig::from_yaml(
            r"
mocks:
  - route: /x
    response: x.json
    options:
      bogus: 1
",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_route() {
        let err = MockSetConfig::from_yaml(
            r#"
mocks:
  - route: ""
    response: x.json
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("not enough parameters"));
    }

    #[test]
    fn test_rejects_invalid_pattern() {
        let result = MockSetConfig::from_yaml(
            r"
mocks:
  - route: '^/api/('
    pattern: true
    response: x.json
",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_out_of_range_status() {
        let err = MockSetConfig::from_yaml(
            r"
mocks:
  - route: /x
    response: x.json
    options:
      status_code: 999
",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("invalid status code: 999"));
    }

    #[test]
    fn test_rejects_unknown_method() {
        let result = MockSetConfig::from_yaml(
            r"
mocks:
  - method: FETCH
    route: /x
    response: x.json
",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_install_serves_configured_file_mock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, r#"[{"id":1},{"id":2}]"#).unwrap();

        let yaml = format!(
            r"
mocks:
  - method: GET
    route: /api/users
    response: {}
    options:
      data_array: true
",
            path.display()
        );
        let extended = MockSetConfig::from_yaml(&yaml)
            .unwrap()
            .install(Chain::new())
            .unwrap();

        let response = tokio_test::block_on(
            extended.dispatch(&Request::new(Method::Get, "/api/users?size=1&page=0")),
        );
        assert_eq!(response.status(), 200);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["content"], json!([{"id": 1}]));
        assert_eq!(body["totalPages"], json!(2));
    }

    #[test]
    fn test_install_serves_inline_record_with_defaults() {
        let extended = MockSetConfig::from_yaml(
            r#"
defaults:
  status_code: 203
mocks:
  - route: /api/version
    response:
      result:
        version: "1.2.3"
"#,
        )
        .unwrap()
        .install(Chain::new())
        .unwrap();

        let response =
            tokio_test::block_on(extended.dispatch(&Request::new(Method::Get, "/api/version")));
        assert_eq!(response.status(), 203);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({"version": "1.2.3"}));
    }

    #[test]
    fn test_install_pattern_route() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item.json");
        std::fs::write(&path, r#"{"id": 5}"#).unwrap();

        let yaml = format!(
            r"
mocks:
  - route: '^/api/items/\d+$'
    pattern: true
    response: {}
",
            path.display()
        );
        let extended = MockSetConfig::from_yaml(&yaml)
            .unwrap()
            .install(Chain::new())
            .unwrap();

        let hit =
            tokio_test::block_on(extended.dispatch(&Request::new(Method::Get, "/api/items/5")));
        assert_eq!(hit.status(), 200);

        let miss =
            tokio_test::block_on(extended.dispatch(&Request::new(Method::Get, "/api/items/abc")));
        assert_eq!(miss.status(), 404);
    }

    #[test]
    fn test_from_file_missing_path() {
        let err = MockSetConfig::from_file(Path::new("/no/such/config.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("/no/such/config.yaml"));
    }
}
