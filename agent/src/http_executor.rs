//! # Local-HTTP Executor
//!
//! Proxies `API_REQUEST` frames to a local REST API over plain `reqwest`.
//! Generalized from `api_client.py::LocalApiClient` with two deliberate
//! omissions: the hardcoded `ORYGGI_DEFAULT_API_KEY` fallback (a
//! customer-specific default with no place in a general-purpose crate) and
//! NTLM authentication (`httpx_ntlm`, Windows-SSPI-only and without a
//! maintained async Rust equivalent). Both are recorded in the design
//! ledger; an API key or bearer token must be configured explicitly.

use crate::config::HttpConfig;
use gateway_protocol::{ApiMethod, ApiStatus};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct ApiOutcome {
    pub status: ApiStatus,
    pub status_code: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

pub struct HttpExecutor {
    config: HttpConfig,
    client: Client,
}

impl HttpExecutor {
    pub fn new(config: HttpConfig) -> Self {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        self.config.base_url.is_some()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        method: ApiMethod,
        endpoint: &str,
        headers: HashMap<String, String>,
        body: Option<Value>,
        query_params: HashMap<String, String>,
        timeout: Option<u64>,
    ) -> ApiOutcome {
        let Some(base_url) = self.config.base_url.as_deref() else {
            return ApiOutcome {
                status: ApiStatus::NotConfigured,
                status_code: None,
                headers: HashMap::new(),
                body: None,
                execution_time_ms: 0,
                error_message: Some("local HTTP endpoint is not configured".to_string()),
                error_code: Some("NOT_CONFIGURED".to_string()),
            };
        };

        let url = format!("{}/{}", base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'));
        let request_timeout = Duration::from_secs(timeout.unwrap_or(self.config.default_timeout));

        let mut request_headers = headers;
        if let Some(api_key) = &self.config.api_key {
            request_headers.insert("APIKey".to_string(), api_key.clone());
        }
        if body.is_some() && !request_headers.contains_key("Content-Type") {
            request_headers.insert("Content-Type".to_string(), "application/json".to_string());
        }

        let mut builder = self
            .client
            .request(method_to_reqwest(method), &url)
            .timeout(request_timeout)
            .query(&query_params);

        if let Some(token) = &self.config.bearer_token {
            builder = builder.bearer_auth(token);
        }
        for (key, value) in &request_headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return ApiOutcome {
                    status: ApiStatus::Timeout,
                    status_code: None,
                    headers: HashMap::new(),
                    body: None,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    error_message: Some(format!("request timed out after {}s", request_timeout.as_secs())),
                    error_code: Some("TIMEOUT".to_string()),
                };
            }
            Err(err) => {
                return ApiOutcome {
                    status: ApiStatus::ConnectionError,
                    status_code: None,
                    headers: HashMap::new(),
                    body: None,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    error_message: Some(err.to_string()),
                    error_code: Some("CONNECTION_ERROR".to_string()),
                };
            }
        };

        let status_code = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let raw_body = response.bytes().await.unwrap_or_default();
        let response_body = if raw_body.is_empty() {
            None
        } else {
            match serde_json::from_slice::<Value>(&raw_body) {
                Ok(json) => Some(json),
                Err(_) => Some(Value::String(String::from_utf8_lossy(&raw_body).into_owned())),
            }
        };

        let success = (200..300).contains(&status_code);
        ApiOutcome {
            status: if success { ApiStatus::Success } else { ApiStatus::Error },
            status_code: Some(status_code),
            headers: response_headers,
            body: response_body.clone(),
            execution_time_ms: start.elapsed().as_millis() as u64,
            error_message: if success {
                None
            } else {
                Some(
                    response_body
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| format!("HTTP {status_code}"))
                        .chars()
                        .take(500)
                        .collect(),
                )
            },
            error_code: None,
        }
    }

    /// Probes the configured API the same way the original did: swagger
    /// first, root endpoint as a fallback, treating 401/403 as "reachable".
    pub async fn test_connection(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        let swagger = self
            .execute(ApiMethod::Get, "/swagger/index.html", HashMap::new(), None, HashMap::new(), Some(5))
            .await;
        if swagger.status_code == Some(200) {
            return true;
        }
        let root = self
            .execute(ApiMethod::Get, "/", HashMap::new(), None, HashMap::new(), Some(5))
            .await;
        matches!(root.status_code, Some(200) | Some(302) | Some(401) | Some(403))
    }
}

fn method_to_reqwest(method: ApiMethod) -> reqwest::Method {
    match method {
        ApiMethod::Get => reqwest::Method::GET,
        ApiMethod::Post => reqwest::Method::POST,
        ApiMethod::Put => reqwest::Method::PUT,
        ApiMethod::Delete => reqwest::Method::DELETE,
        ApiMethod::Patch => reqwest::Method::PATCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_without_base_url() {
        let executor = HttpExecutor::new(HttpConfig::default());
        assert!(!executor.is_configured());
    }

    #[test]
    fn method_mapping_covers_all_variants() {
        assert_eq!(method_to_reqwest(ApiMethod::Get), reqwest::Method::GET);
        assert_eq!(method_to_reqwest(ApiMethod::Post), reqwest::Method::POST);
        assert_eq!(method_to_reqwest(ApiMethod::Put), reqwest::Method::PUT);
        assert_eq!(method_to_reqwest(ApiMethod::Delete), reqwest::Method::DELETE);
        assert_eq!(method_to_reqwest(ApiMethod::Patch), reqwest::Method::PATCH);
    }
}
