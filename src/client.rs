//! Transport seam between the checks and a FHIR server.
//!
//! Checks only see [`FhirClient`]. Transport failures (connection refused,
//! timeouts) are `Err` values; any HTTP status, including 4xx and 5xx, is a
//! normal [`FhirReply`] so the checks can judge it.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::search::request::SearchRequest;

/// Status code and parsed body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirReply {
    pub status: u16,
    /// Parsed JSON body, `Value::Null` when the body was empty or not JSON.
    pub body: Value,
}

impl FhirReply {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.body.get("resourceType").and_then(Value::as_str)
    }

    pub fn is_bundle(&self) -> bool {
        self.resource_type() == Some("Bundle")
    }

    pub fn is_operation_outcome(&self) -> bool {
        self.resource_type() == Some("OperationOutcome")
    }

    /// Number of entries on the first page, zero for non-bundles.
    pub fn entry_count(&self) -> usize {
        self.body
            .get("entry")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
pub trait FhirClient: Send + Sync {
    /// `GET [base]/{resource_type}?{request}`
    async fn search(&self, resource_type: &str, request: &SearchRequest) -> Result<FhirReply>;

    /// `GET [base]/{resource_type}/{id}`
    async fn read(&self, resource_type: &str, id: &str) -> Result<FhirReply>;

    /// `GET` an absolute URL, or a path relative to the base (bundle `next`
    /// links, absolute references).
    async fn fetch(&self, url: &str) -> Result<FhirReply>;

    /// `GET [base]/{path}?{params}` for named operations such as `$docref`.
    async fn operation(&self, path: &str, params: &[(String, String)]) -> Result<FhirReply>;

    async fn capabilities(&self) -> Result<FhirReply> {
        self.operation("metadata", &[]).await
    }
}

/// Read-only view over a server's CapabilityStatement.
#[derive(Debug, Clone, Default)]
pub struct CapabilityStatement {
    body: Value,
}

impl CapabilityStatement {
    pub fn new(body: Value) -> Self {
        Self { body }
    }

    /// Fetch `metadata`. Any failure yields `None`; checks treat an unknown
    /// capability statement as "not documented".
    pub async fn fetch(client: &dyn FhirClient) -> Option<Self> {
        match client.capabilities().await {
            Ok(reply) if reply.is_success() && reply.resource_type() == Some("CapabilityStatement") => {
                Some(Self::new(reply.body))
            }
            Ok(reply) => {
                tracing::debug!("metadata returned HTTP {}", reply.status);
                None
            }
            Err(e) => {
                tracing::debug!("metadata request failed: {}", e);
                None
            }
        }
    }

    fn server_resources(&self) -> impl Iterator<Item = &Value> {
        self.body
            .get("rest")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|rest| rest.get("mode").and_then(Value::as_str) != Some("client"))
            .filter_map(|rest| rest.get("resource").and_then(Value::as_array))
            .flatten()
    }

    fn resource(&self, resource_type: &str) -> Option<&Value> {
        self.server_resources()
            .find(|r| r.get("type").and_then(Value::as_str) == Some(resource_type))
    }

    pub fn supports_resource(&self, resource_type: &str) -> bool {
        self.resource(resource_type).is_some()
    }

    /// Does the statement declare the `search-type` interaction for `resource_type`?
    pub fn documents_search(&self, resource_type: &str) -> bool {
        self.resource(resource_type)
            .and_then(|r| r.get("interaction"))
            .and_then(Value::as_array)
            .is_some_and(|interactions| {
                interactions
                    .iter()
                    .any(|i| i.get("code").and_then(Value::as_str) == Some("search-type"))
            })
    }

    /// Does the statement list `param` as a search parameter of `resource_type`?
    pub fn documents_search_param(&self, resource_type: &str, param: &str) -> bool {
        self.resource(resource_type)
            .and_then(|r| r.get("searchParam"))
            .and_then(Value::as_array)
            .is_some_and(|params| {
                params
                    .iter()
                    .any(|p| p.get("name").and_then(Value::as_str) == Some(param))
            })
    }

    pub fn documents_search_include(&self, resource_type: &str, include: &str) -> bool {
        self.resource(resource_type)
            .and_then(|r| r.get("searchInclude"))
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|i| i.as_str() == Some(include)))
    }

    pub fn documents_search_rev_include(&self, resource_type: &str, rev_include: &str) -> bool {
        self.resource(resource_type)
            .and_then(|r| r.get("searchRevInclude"))
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|i| i.as_str() == Some(rev_include)))
    }
}

#[cfg(feature = "http-client")]
pub use http::HttpFhirClient;

#[cfg(feature = "http-client")]
mod http {
    use super::*;
    use std::time::Duration;
    use url::Url;

    use crate::config::HttpConfig;
    use crate::error::ConformanceError;

    /// reqwest-backed client speaking `application/fhir+json`.
    pub struct HttpFhirClient {
        http: reqwest::Client,
        base_url: Url,
        bearer_token: Option<String>,
    }

    impl HttpFhirClient {
        pub fn new(base_url: &str, timeout: Duration, bearer_token: Option<String>) -> Result<Self> {
            // A trailing slash keeps `Url::join` from dropping the last path segment.
            let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
            let http = reqwest::Client::builder().timeout(timeout).build()?;
            Ok(Self {
                http,
                base_url,
                bearer_token,
            })
        }

        pub fn from_config(config: &HttpConfig) -> Result<Self> {
            let base_url = config
                .base_url
                .as_deref()
                .ok_or_else(|| ConformanceError::config("http.base_url is required"))?;
            Self::new(base_url, config.timeout(), config.bearer_token.clone())
        }

        /// A second client for the same server that sends no credentials.
        pub fn unauthenticated(&self) -> Self {
            Self {
                http: self.http.clone(),
                base_url: self.base_url.clone(),
                bearer_token: None,
            }
        }

        pub fn base_url(&self) -> &Url {
            &self.base_url
        }

        fn request(&self, url: Url) -> reqwest::RequestBuilder {
            let mut req = self.http.get(url);
            if let Some(token) = &self.bearer_token {
                req = req.bearer_auth(token);
            }
            req.header("Accept", "application/fhir+json")
        }

        async fn send(&self, req: reqwest::RequestBuilder) -> Result<FhirReply> {
            let resp = req.send().await?;
            let status = resp.status().as_u16();
            let text = resp.text().await?;
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::Null)
            };
            Ok(FhirReply::new(status, body))
        }
    }

    #[async_trait]
    impl FhirClient for HttpFhirClient {
        async fn search(&self, resource_type: &str, request: &SearchRequest) -> Result<FhirReply> {
            let url = self.base_url.join(resource_type)?;
            tracing::debug!("GET {}?{}", url, request);
            self.send(self.request(url).query(&request.to_query_pairs()))
                .await
        }

        async fn read(&self, resource_type: &str, id: &str) -> Result<FhirReply> {
            let url = self.base_url.join(&format!("{resource_type}/{id}"))?;
            tracing::debug!("GET {}", url);
            self.send(self.request(url)).await
        }

        async fn fetch(&self, url: &str) -> Result<FhirReply> {
            let url = match Url::parse(url) {
                Ok(absolute) => absolute,
                Err(url::ParseError::RelativeUrlWithoutBase) => self.base_url.join(url)?,
                Err(e) => return Err(e.into()),
            };
            tracing::debug!("GET {}", url);
            self.send(self.request(url)).await
        }

        async fn operation(&self, path: &str, params: &[(String, String)]) -> Result<FhirReply> {
            let url = self.base_url.join(path)?;
            tracing::debug!("GET {}", url);
            self.send(self.request(url).query(params)).await
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capability() -> CapabilityStatement {
        CapabilityStatement::new(json!({
            "resourceType": "CapabilityStatement",
            "rest": [{
                "mode": "server",
                "resource": [{
                    "type": "Observation",
                    "interaction": [{"code": "read"}, {"code": "search-type"}],
                    "searchParam": [{"name": "patient", "type": "reference"},
                                    {"name": "status", "type": "token"}],
                    "searchRevInclude": ["Provenance:target"]
                }, {
                    "type": "Condition",
                    "searchParam": [{"name": "patient", "type": "reference"}]
                }]
            }]
        }))
    }

    #[test]
    fn documents_search_params_per_resource() {
        let capability = capability();
        assert!(capability.supports_resource("Observation"));
        assert!(!capability.supports_resource("Goal"));
        assert!(capability.documents_search("Observation"));
        assert!(!capability.documents_search("Condition"));
        assert!(capability.documents_search_param("Observation", "status"));
        assert!(!capability.documents_search_param("Condition", "clinical-status"));
        assert!(capability.documents_search_rev_include("Observation", "Provenance:target"));
        assert!(!capability.documents_search_include("Observation", "Observation:patient"));
    }

    #[test]
    fn reply_helpers() {
        let reply = FhirReply::new(200, json!({"resourceType": "Bundle", "entry": [{}, {}]}));
        assert!(reply.is_success());
        assert!(reply.is_bundle());
        assert_eq!(reply.entry_count(), 2);

        let reply = FhirReply::new(400, json!({"resourceType": "OperationOutcome"}));
        assert!(!reply.is_success());
        assert!(reply.is_operation_outcome());
        assert_eq!(reply.entry_count(), 0);
    }
}
