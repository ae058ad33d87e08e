//! Client for the remote service that hands out encrypted trigger payloads.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::core::crypto::{EnvelopeError, WireRecord, parse_envelope};
use crate::core::database::excerpt;
use crate::core::probe::{ConnectionProbeResult, ProbeTarget};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("trigger-updater/", env!("CARGO_PKG_VERSION"));

const LICENSE_NUMBER_HEADER: &str = "X-License-Number";
const LICENSE_EMAIL_HEADER: &str = "X-License-Email";

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("[NET001] request timed out after {0}s")]
    Timeout(u64),

    #[error("[NET002] could not connect to {url}: {detail}")]
    Connect { url: String, detail: String },

    #[error("[NET003] HTTP {status}: {excerpt}")]
    Status { status: u16, excerpt: String },

    #[error("[NET006] response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("[NET007] {0}")]
    WrongShape(String),

    #[error("[NET008] no trigger data available")]
    Empty,

    #[error("[NET009] request failed: {0}")]
    Request(String),

    #[error("invalid license header value: {0}")]
    InvalidHeader(String),
}

impl From<EnvelopeError> for EndpointError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Empty => EndpointError::Empty,
            EnvelopeError::WrongShape(detail) => EndpointError::WrongShape(detail),
        }
    }
}

/// License identity sent with every request, when configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseIdentity {
    pub number: Option<String>,
    pub email: Option<String>,
}

pub struct EndpointClient {
    client: Client,
    url: Url,
    headers: HeaderMap,
    probe_timeout: Duration,
    fetch_timeout: Duration,
}

impl EndpointClient {
    pub fn new(url: Url, license: &LicenseIdentity, user_agent: &str) -> Result<Self, EndpointError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in [
            (LICENSE_NUMBER_HEADER, &license.number),
            (LICENSE_EMAIL_HEADER, &license.email),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                let value = HeaderValue::from_str(value)
                    .map_err(|_| EndpointError::InvalidHeader(name.to_string()))?;
                headers.insert(name, value);
            }
        }

        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| EndpointError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url,
            headers,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, probe: Duration, fetch: Duration) -> Self {
        self.probe_timeout = probe;
        self.fetch_timeout = fetch;
        self
    }

    async fn get(&self, timeout: Duration) -> Result<reqwest::Response, EndpointError> {
        self.client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e, timeout))
    }

    fn request_error(&self, err: reqwest::Error, timeout: Duration) -> EndpointError {
        if err.is_timeout() {
            EndpointError::Timeout(timeout.as_secs())
        } else if err.is_connect() {
            EndpointError::Connect {
                url: self.url.to_string(),
                detail: err.to_string(),
            }
        } else {
            EndpointError::Request(err.to_string())
        }
    }

    /// Reachability check: the same GET as [`Self::fetch`], bounded by the
    /// probe timeout. Only a 200 answer counts as reachable.
    pub async fn probe(&self) -> ConnectionProbeResult {
        match self.get(self.probe_timeout).await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                debug!("Endpoint probe succeeded ({})", self.url);
                ConnectionProbeResult::reachable(ProbeTarget::Endpoint, "Endpoint reachable")
            }
            Ok(resp) => {
                let err = EndpointError::Status {
                    status: resp.status().as_u16(),
                    excerpt: String::new(),
                };
                warn!("Endpoint probe failed: {}", err);
                ConnectionProbeResult::unreachable(ProbeTarget::Endpoint, err.to_string())
            }
            Err(err) => {
                warn!("Endpoint probe failed: {}", err);
                ConnectionProbeResult::unreachable(ProbeTarget::Endpoint, err.to_string())
            }
        }
    }

    /// Fetch the encrypted envelope.
    pub async fn fetch(&self) -> Result<Vec<WireRecord>, EndpointError> {
        let resp = self.get(self.fetch_timeout).await?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| self.request_error(e, self.fetch_timeout))?;

        if status != StatusCode::OK {
            return Err(EndpointError::Status {
                status: status.as_u16(),
                excerpt: excerpt(body.trim(), 200),
            });
        }
        if body.trim().is_empty() {
            return Err(EndpointError::Empty);
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| EndpointError::InvalidJson(e.to_string()))?;
        let records = parse_envelope(value)?;
        debug!("Fetched {} encrypted item(s) from {}", records.len(), self.url);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::{Router, routing::get};

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Url::parse(&format!("http://{}/trigger", addr)).unwrap()
    }

    fn client(url: Url) -> EndpointClient {
        let license = LicenseIdentity {
            number: Some("LIC-42".to_string()),
            email: Some("ops@example.com".to_string()),
        };
        EndpointClient::new(url, &license, DEFAULT_USER_AGENT)
            .unwrap()
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn fetch_sends_license_headers_and_parses_list() {
        let app = Router::new().route(
            "/trigger",
            get(|headers: AxumHeaders| async move {
                let number = headers
                    .get("x-license-number")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let email = headers
                    .get("x-license-email")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if number != "LIC-42" || email != "ops@example.com" {
                    return (AxumStatus::FORBIDDEN, "missing license".to_string());
                }
                (
                    AxumStatus::OK,
                    r#"[{"json":{"iv":"AAAA","encrypted":"BBBB"}},{"iv":"CCCC","encrypted":"DDDD"}]"#
                        .to_string(),
                )
            }),
        );
        let records = client(serve(app).await).fetch().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].iv, "AAAA");
        assert_eq!(records[1].encrypted, "DDDD");
    }

    #[tokio::test]
    async fn non_200_carries_status_and_truncated_body() {
        let body = "x".repeat(500);
        let app = Router::new().route(
            "/trigger",
            get(move || {
                let body = body.clone();
                async move { (AxumStatus::INTERNAL_SERVER_ERROR, body) }
            }),
        );
        let err = client(serve(app).await).fetch().await.unwrap_err();
        match err {
            EndpointError::Status { status, excerpt } => {
                assert_eq!(status, 500);
                assert_eq!(excerpt.chars().count(), 203);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_list_and_empty_body_mean_no_data() {
        let app = Router::new()
            .route("/trigger", get(|| async { "[]" }))
            .route("/blank", get(|| async { "" }));
        let url = serve(app).await;
        let err = client(url.clone()).fetch().await.unwrap_err();
        assert!(matches!(err, EndpointError::Empty));

        let blank = url.join("/blank").unwrap();
        let err = client(blank).fetch().await.unwrap_err();
        assert!(matches!(err, EndpointError::Empty));
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let app = Router::new().route("/trigger", get(|| async { "{not json" }));
        let err = client(serve(app).await).fetch().await.unwrap_err();
        assert!(matches!(err, EndpointError::InvalidJson(_)));
        assert!(err.to_string().starts_with("[NET006]"));

        let app = Router::new().route("/trigger", get(|| async { "42" }));
        let err = client(serve(app).await).fetch().await.unwrap_err();
        assert!(matches!(err, EndpointError::WrongShape(_)));
        assert!(err.to_string().starts_with("[NET007]"));
    }

    #[tokio::test]
    async fn probe_requires_200() {
        let app = Router::new()
            .route("/trigger", get(|| async { "[]" }))
            .route("/down", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }));
        let url = serve(app).await;

        assert!(client(url.clone()).probe().await.ok);

        let probe = client(url.join("/down").unwrap()).probe().await;
        assert!(!probe.ok);
        assert_eq!(probe.target, ProbeTarget::Endpoint);
        assert!(probe.detail.contains("503"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{}/trigger", addr)).unwrap();

        let err = client(url.clone()).fetch().await.unwrap_err();
        assert!(matches!(err, EndpointError::Connect { .. }), "{:?}", err);
        assert!(!client(url).probe().await.ok);
    }
}
