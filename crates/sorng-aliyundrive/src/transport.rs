//! Transport boundary between the drive client and the network.
//!
//! Everything above this module speaks in [`ApiRequest`] / [`RawResponse`];
//! [`HttpTransport`] is the reqwest-backed implementation used in production.

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};

/// Streaming body of a single upload part.
pub type PartStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36";
const ORIGIN: &str = "https://www.aliyundrive.com";

// ── Request / response ───────────────────────────────────────────

/// A JSON API call, independent of any HTTP library.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// `POST {endpoint}{path}` with a JSON body.
    pub fn post<B: Serialize + ?Sized>(endpoint: &str, path: &str, body: &B) -> DriveResult<Self> {
        Ok(Self {
            method: Method::POST,
            url: format!("{}{}", endpoint.trim_end_matches('/'), path),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: Some(serde_json::to_value(body)?),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("authorization", format!("Bearer {}", token))
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Path component of the URL, used in log lines and test matchers.
    pub fn path(&self) -> &str {
        match self.url.find("://") {
            Some(i) => {
                let rest = &self.url[i + 3..];
                rest.find('/').map(|j| &rest[j..]).unwrap_or("/")
            }
            None => &self.url,
        }
    }
}

/// `{code, message}` envelope the service returns on application errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<ApiError> for DriveError {
    fn from(e: ApiError) -> Self {
        DriveError::api(e.code, e.message)
    }
}

/// Undecoded response. The service may report application errors with a
/// 2xx status, so callers inspect [`RawResponse::api_error`] explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Application error carried by the body, or a synthetic `Http<status>`
    /// code when a non-success status has no structured error.
    pub fn api_error(&self) -> Option<ApiError> {
        if let Ok(err) = serde_json::from_slice::<ApiError>(&self.body) {
            if !err.code.is_empty() {
                return Some(err);
            }
        }
        if self.is_success() {
            return None;
        }
        Some(ApiError {
            code: format!("Http{}", self.status),
            message: String::from_utf8_lossy(&self.body).into_owned(),
        })
    }

    /// Decode the body. An empty body decodes as JSON `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> DriveResult<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Application error first, then decode.
    pub fn into_result<T: DeserializeOwned>(self) -> DriveResult<T> {
        match self.api_error() {
            Some(err) => Err(err.into()),
            None => self.decode(),
        }
    }
}

// ── Trait ────────────────────────────────────────────────────────

/// Network seam. Implementations must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one JSON API request.
    async fn send(&self, request: &ApiRequest) -> DriveResult<RawResponse>;

    /// PUT one upload part to a pre-signed URL.
    async fn put_part(&self, url: &str, content_length: u64, body: PartStream) -> DriveResult<()>;

    /// GET raw bytes, e.g. a file download.
    async fn fetch(&self, url: &str, headers: &BTreeMap<String, String>) -> DriveResult<Vec<u8>>;
}

// ── reqwest implementation ───────────────────────────────────────

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> DriveResult<Self> {
        let inner = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriveError::transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { inner })
    }

    fn header_map(headers: &BTreeMap<String, String>) -> DriveResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| DriveError::invalid(format!("Invalid header name {k}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| DriveError::invalid(format!("Invalid header value for {k}: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> DriveResult<RawResponse> {
        debug!("Aliyun Drive API {} {}", request.method, request.path());

        let mut headers = Self::header_map(&request.headers)?;
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(reqwest::header::ORIGIN, HeaderValue::from_static(ORIGIN));

        let mut builder = self
            .inner
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(RawResponse::new(status, body.to_vec()))
    }

    async fn put_part(&self, url: &str, content_length: u64, body: PartStream) -> DriveResult<()> {
        debug!("Uploading part ({} bytes)", content_length);
        let resp = self
            .inner
            .put(url)
            .header(CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DriveError::transport(format!(
                "Part upload failed ({}): {}",
                status, text
            )));
        }
        Ok(())
    }

    async fn fetch(&self, url: &str, headers: &BTreeMap<String, String>) -> DriveResult<Vec<u8>> {
        let resp = self
            .inner
            .get(url)
            .headers(Self::header_map(headers)?)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DriveError::transport(format!("Download failed ({})", status)));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
