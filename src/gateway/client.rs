//! HTTP client for a gateway's admin API.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::errors::{Error, Result};
use crate::gateway::{
    GatewayAdmin, GatewayOperation, GatewayPlugin, GatewayRoute, GatewayService, Page,
    PluginDefinition, RouteDefinition, ServiceDefinition,
};
use crate::types::Environment;

/// Header carrying the admin token when one is configured
pub const ADMIN_TOKEN_HEADER: &str = "Kong-Admin-Token";

/// Upper bound on followed `next` cursors for one listing
const MAX_PAGES: usize = 100;

/// Admin API client bound to one environment
///
/// Wraps a `reqwest::Client` with the environment's base URL, token and
/// request timeout. Cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct HttpGatewayClient {
    client: reqwest::Client,
    base_url: String,
    environment: Environment,
}

impl HttpGatewayClient {
    /// Creates a client from an environment's gateway configuration
    pub fn new(environment: Environment, config: &GatewayConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = &config.admin_token {
            let value = reqwest::header::HeaderValue::from_str(token)
                .map_err(|_| Error::config("admin token contains invalid header characters"))?;
            headers.insert(ADMIN_TOKEN_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.admin_url.trim_end_matches('/').to_string(),
            environment,
        })
    }

    /// Environment this client targets
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request and maps transport and status failures
    async fn send(
        &self,
        operation: GatewayOperation,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!(
            environment = %self.environment,
            %operation,
            %method,
            %url,
            "gateway request"
        );

        let mut request = self.client.request(method, &url);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let resp = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("{url}: request timed out")
            } else {
                format!("{url}: {e}")
            };
            Error::gateway_unavailable(operation, reason)
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(status_error(operation, status, path, body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: GatewayOperation,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let resp = self.send(operation, method, path, body).await?;
        resp.json::<T>()
            .await
            .map_err(|e| Error::gateway_response(operation, e.to_string()))
    }

    /// Follows `next` cursors until the listing is exhausted
    async fn list_all<T: DeserializeOwned>(
        &self,
        operation: GatewayOperation,
        first: String,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(path) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(Error::gateway_response(
                    operation,
                    format!("more than {MAX_PAGES} pages"),
                ));
            }
            let page: Page<T> = self.send_json(operation, Method::GET, &path, None).await?;
            items.extend(page.data);
            next = page.next.filter(|n| !n.is_empty()).map(|n| relative_path(&n));
        }

        Ok(items)
    }
}

/// Maps a non-2xx status onto the gateway error taxonomy
fn status_error(operation: GatewayOperation, status: StatusCode, path: &str, body: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::gateway_not_found(operation, path),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::gateway_unavailable(operation, format!("HTTP {status}: {body}"))
        }
        s if s.is_server_error() => {
            Error::gateway_unavailable(operation, format!("HTTP {status}: {body}"))
        }
        s => Error::gateway_rejected(operation, s.as_u16(), body),
    }
}

/// Strips scheme and authority from an absolute `next` link
fn relative_path(next: &str) -> String {
    match url::Url::parse(next) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        },
        Err(_) => next.to_string(),
    }
}

/// Bytes escaped inside a single path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

fn encode_query(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[async_trait]
impl GatewayAdmin for HttpGatewayClient {
    async fn upsert_service(&self, definition: &ServiceDefinition) -> Result<GatewayService> {
        let path = format!("/services/{}", encode(&definition.name));
        self.send_json(
            GatewayOperation::UpsertService,
            Method::PUT,
            &path,
            Some(serde_json::to_value(definition)?),
        )
        .await
    }

    async fn list_services(&self, tags: &[String]) -> Result<Vec<GatewayService>> {
        let path = if tags.is_empty() {
            "/services".to_string()
        } else {
            format!("/services?tags={}", encode_query(&tags.join(",")))
        };
        self.list_all(GatewayOperation::ListServices, path).await
    }

    async fn create_route(&self, definition: &RouteDefinition) -> Result<GatewayRoute> {
        self.send_json(
            GatewayOperation::CreateRoute,
            Method::POST,
            "/routes",
            Some(serde_json::to_value(definition)?),
        )
        .await
    }

    async fn find_route(&self, name_or_id: &str) -> Result<Option<GatewayRoute>> {
        let path = format!("/routes/{}", encode(name_or_id));
        match self
            .send_json(GatewayOperation::FindRoute, Method::GET, &path, None)
            .await
        {
            Ok(route) => Ok(Some(route)),
            Err(Error::GatewayNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_route(
        &self,
        route_id: &str,
        definition: &RouteDefinition,
    ) -> Result<GatewayRoute> {
        let path = format!("/routes/{}", encode(route_id));
        self.send_json(
            GatewayOperation::UpdateRoute,
            Method::PATCH,
            &path,
            Some(serde_json::to_value(definition)?),
        )
        .await
    }

    async fn delete_route(&self, route_id: &str) -> Result<()> {
        let path = format!("/routes/{}", encode(route_id));
        match self
            .send(GatewayOperation::DeleteRoute, Method::DELETE, &path, None)
            .await
        {
            Ok(_) | Err(Error::GatewayNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_plugins(&self, route_id: &str) -> Result<Vec<GatewayPlugin>> {
        let path = format!("/routes/{}/plugins", encode(route_id));
        self.list_all(GatewayOperation::ListPlugins, path).await
    }

    async fn create_plugin(
        &self,
        route_id: &str,
        definition: &PluginDefinition,
    ) -> Result<GatewayPlugin> {
        let path = format!("/routes/{}/plugins", encode(route_id));
        self.send_json(
            GatewayOperation::CreatePlugin,
            Method::POST,
            &path,
            Some(serde_json::to_value(definition)?),
        )
        .await
    }

    async fn update_plugin(
        &self,
        route_id: &str,
        plugin_id: &str,
        definition: &PluginDefinition,
    ) -> Result<GatewayPlugin> {
        let path = format!(
            "/routes/{}/plugins/{}",
            encode(route_id),
            encode(plugin_id)
        );
        self.send_json(
            GatewayOperation::UpdatePlugin,
            Method::PUT,
            &path,
            Some(serde_json::to_value(definition)?),
        )
        .await
    }

    async fn status(&self) -> Result<()> {
        self.send(GatewayOperation::Status, Method::GET, "/status", None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let op = GatewayOperation::UpdateRoute;
        assert!(matches!(
            status_error(op, StatusCode::NOT_FOUND, "/routes/x", String::new()),
            Error::GatewayNotFound { .. }
        ));
        assert!(status_error(op, StatusCode::BAD_GATEWAY, "/routes/x", String::new()).is_retryable());
        assert!(status_error(op, StatusCode::TOO_MANY_REQUESTS, "/routes/x", String::new()).is_retryable());
        assert!(matches!(
            status_error(op, StatusCode::CONFLICT, "/routes/x", "unique".to_string()),
            Error::GatewayRejected { status: 409, .. }
        ));
    }

    #[test]
    fn test_relative_next_path() {
        assert_eq!(
            relative_path("http://kong:8001/services?offset=abc&tags=payments"),
            "/services?offset=abc&tags=payments"
        );
        assert_eq!(relative_path("/services?offset=abc"), "/services?offset=abc");
    }

    #[test]
    fn test_path_segments_are_percent_encoded() {
        assert_eq!(encode("balance"), "balance");
        assert_eq!(encode("my route"), "my%20route");
        assert_eq!(encode("a/b?c#d"), "a%2Fb%3Fc%23d");
        assert_eq!(encode("100%"), "100%25");
        assert_eq!(encode_query("core banking,dev"), "core+banking%2Cdev");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = GatewayConfig {
            admin_url: "http://kong:8001/".to_string(),
            admin_token: Some("secret".to_string()),
            timeout_secs: 5,
        };
        let client = HttpGatewayClient::new(Environment::development(), &config).unwrap();
        assert_eq!(client.url("/routes"), "http://kong:8001/routes");
        assert_eq!(client.environment(), &Environment::development());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let config = GatewayConfig {
            admin_url: "http://kong:8001".to_string(),
            admin_token: Some("bad\ntoken".to_string()),
            timeout_secs: 5,
        };
        assert!(matches!(
            HttpGatewayClient::new(Environment::development(), &config),
            Err(Error::Config(_))
        ));
    }
}
