//! Enrichment service HTTP client.
//!
//! POST `{"contracts": [...]}` → `{"results": {"<id>": {bundle}}}`.
//! The response is a partial map; an unresolved id is absent, never an error.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Error type for enrichment calls.
#[derive(Debug)]
pub enum EnrichError {
    /// Network error
    Network(String),
    /// HTTP error with status code
    Http(u16, String),
    /// JSON parsing error
    Parse(String),
}

impl std::fmt::Display for EnrichError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichError::Network(msg) => write!(f, "network error: {msg}"),
            EnrichError::Http(code, msg) => write!(f, "HTTP {code}: {msg}"),
            EnrichError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for EnrichError {}

/// One contract's resolved fields. Every field is optional; the gateway
/// merges whatever is present into still-blank ledger cells.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FieldBundle {
    #[serde(default)]
    pub client_code: Option<String>,
    #[serde(default)]
    pub equipment: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub period: Option<f64>,
    #[serde(default)]
    pub interest_rate: Option<f64>,
    #[serde(default)]
    pub contract_amount: Option<f64>,
    /// Approved facility limit — fallback amount when `contract_amount`
    /// is absent or zero on both sides.
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub valuation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    results: HashMap<String, FieldBundle>,
}

/// The seam the gateway consumes. Implemented by [`HttpEnrichmentService`]
/// and by in-memory fakes in tests.
pub trait EnrichmentService {
    fn enrich(&self, ids: &[String]) -> Result<HashMap<String, FieldBundle>, EnrichError>;
}

/// Blocking HTTP implementation.
pub struct HttpEnrichmentService {
    http: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
}

impl HttpEnrichmentService {
    pub fn new(url: &str, token: Option<&str>) -> Self {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("lforge/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            url: url.to_string(),
            token: token.map(String::from),
        }
    }
}

impl EnrichmentService for HttpEnrichmentService {
    fn enrich(&self, ids: &[String]) -> Result<HashMap<String, FieldBundle>, EnrichError> {
        let body = serde_json::json!({ "contracts": ids });

        let mut req = self.http.post(&self.url).json(&body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let response = req.send().map_err(|e| EnrichError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EnrichError::Http(status, body));
        }

        let parsed: EnrichResponse = response
            .json()
            .map_err(|e| EnrichError::Parse(e.to_string()))?;

        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn resolves_partial_batch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/enrich")
                .json_body(serde_json::json!({
                    "contracts": ["LR00000049", "ABCD000000012"]
                }));
            then.status(200).json_body(serde_json::json!({
                "results": {
                    "LR00000049": {
                        "client_code": "2001",
                        "contract_amount": 125000.0
                    }
                }
            }));
        });

        let service = HttpEnrichmentService::new(&server.url("/enrich"), None);
        let results = service
            .enrich(&["LR00000049".into(), "ABCD000000012".into()])
            .unwrap();

        mock.assert();
        assert_eq!(results.len(), 1);
        let bundle = &results["LR00000049"];
        assert_eq!(bundle.client_code.as_deref(), Some("2001"));
        assert_eq!(bundle.contract_amount, Some(125000.0));
        assert!(bundle.valuation.is_none());
    }

    #[test]
    fn http_error_is_surfaced() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/enrich");
            then.status(503).body("maintenance window");
        });

        let service = HttpEnrichmentService::new(&server.url("/enrich"), None);
        let err = service.enrich(&["LR00000049".into()]).unwrap_err();
        match err {
            EnrichError::Http(503, body) => assert_eq!(body, "maintenance window"),
            other => panic!("expected HTTP error, got {other}"),
        }
    }

    #[test]
    fn bearer_token_is_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/enrich")
                .header("authorization", "Bearer s3cret");
            then.status(200).json_body(serde_json::json!({ "results": {} }));
        });

        let service = HttpEnrichmentService::new(&server.url("/enrich"), Some("s3cret"));
        let results = service.enrich(&["LR00000049".into()]).unwrap();
        mock.assert();
        assert!(results.is_empty());
    }
}
