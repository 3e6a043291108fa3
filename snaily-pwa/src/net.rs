//! Network transport
//!
//! `Fetcher` is the seam every outbound request goes through: the upstream
//! HTTP client implements it, and so does the interception layer, so callers
//! cannot tell whether a response came from the network or a cache.

use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::http::Method;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// What the requester intends to do with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Audio,
    /// fetch()/XHR and anything unspecified
    Empty,
}

impl Destination {
    /// Parse a `Sec-Fetch-Dest` value; unknown values map to `Empty`
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "script" | "worker" | "sharedworker" | "serviceworker" => Destination::Script,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "audio" => Destination::Audio,
            _ => Destination::Empty,
        }
    }
}

/// Outbound request, origin-relative unless `url` is absolute
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    /// Path and query (`/audio/cat.mp3`) or an absolute URL
    pub url: String,
    pub destination: Destination,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchRequest {
    /// Plain GET issued by code (no browser destination)
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            destination: Destination::Empty,
            content_type: None,
            body: Bytes::new(),
        }
    }

    /// POST with a JSON body
    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            destination: Destination::Empty,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Navigations are document requests
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// Path component without query string (absolute URLs keep their path)
    pub fn path(&self) -> &str {
        let without_origin = match self.url.find("://") {
            Some(scheme_end) => {
                let rest = &self.url[scheme_end + 3..];
                rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
            }
            None => self.url.as_str(),
        };
        without_origin.split(['?', '#']).next().unwrap_or("/")
    }
}

/// Response as seen by callers of a `Fetcher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, content_type: Option<String>, body: Bytes) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    /// 200 with the given body
    pub fn ok(content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self::new(200, content_type.map(str::to_string), body.into())
    }

    /// Plain-text response with an explicit status
    pub fn text(status: u16, message: &str) -> Self {
        Self::new(
            status,
            Some("text/plain; charset=utf-8".to_string()),
            Bytes::copy_from_slice(message.as_bytes()),
        )
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can turn a request into a response
///
/// `Err` means the transport failed (no response at all); HTTP error
/// statuses are returned as `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// Fetcher backed by reqwest, resolving relative URLs against one origin
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    origin: String,
}

impl ReqwestFetcher {
    pub fn new(origin: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.origin, url)
        } else {
            format!("{}/{}", self.origin, url)
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let url = self.absolute_url(&request.url);
        // reqwest 0.11 is on http 0.2; bridge the method by name
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::Internal(format!("Unsupported method: {}", e)))?;

        let mut builder = self.client.request(method, &url);
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(format!("{} {}: {}", request.method, url, e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::NetworkFailure(format!("Reading body of {}: {}", url, e)))?;

        debug!(url = %url, status, bytes = body.len(), "Upstream fetch");
        Ok(FetchResponse::new(status, content_type, body))
    }
}
