//! HTTP side of the preview backend. Everything lives under `/api`; the
//! server handles any reverse proxying.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use preview_proto::{GlyphDetail, GlyphId};
use reqwest::Client;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid backend url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// One request for the compiled font of the current epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRequest {
    pub version: u64,
    /// Sent as `?v=`; unique per request so no cache can answer with an older
    /// binary for the same URL.
    pub cache_buster: String,
}

impl FontRequest {
    pub fn new(version: u64) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        Self {
            version,
            cache_buster: format!("{version}-{millis}"),
        }
    }
}

/// Where compiled font binaries come from.
#[async_trait]
pub trait FontSource: Send + Sync {
    async fn fetch_font(&self, request: &FontRequest) -> Result<Bytes, ApiError>;
}

#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|err| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url.join(path).map_err(|err| ApiError::InvalidUrl {
            url: format!("{}{}", self.base_url, path),
            reason: err.to_string(),
        })
    }

    /// Liveness check; not part of the push protocol.
    pub async fn ping(&self) -> Result<(), ApiError> {
        let res = self.http.get(self.endpoint("/api/ping")?).send().await?;
        check_status(res).await.map(|_| ())
    }

    pub async fn glyph_detail(&self, id: GlyphId) -> Result<GlyphDetail, ApiError> {
        let url = self.endpoint(&format!("/api/glyph/{id}"))?;
        let res = check_status(self.http.get(url).send().await?).await?;
        Ok(res.json::<GlyphDetail>().await?)
    }
}

#[async_trait]
impl FontSource for BackendClient {
    async fn fetch_font(&self, request: &FontRequest) -> Result<Bytes, ApiError> {
        let res = self
            .http
            .get(self.endpoint("/api/font")?)
            .query(&[("v", request.cache_buster.as_str())])
            .send()
            .await?;
        let res = check_status(res).await?;
        Ok(res.bytes().await?)
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(ApiError::UnexpectedStatus { status, body })
    }
}
