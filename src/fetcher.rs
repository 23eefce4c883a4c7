//! Bounded, chunked HTTP retrieval.
//!
//! A fetch yields a [`ChunkStream`]: an ordered, single-consumer sequence of
//! byte chunks cut to the configured chunk size. Status errors surface before
//! the stream is handed out; size and transfer errors surface from
//! [`ChunkStream::next_chunk`].

use crate::config::FetchLimits;
use crate::error::{Result, XmlError};
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// One bounded retrieval: created per invocation, consumed by [`Fetcher::fetch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub timeout: Duration,
    pub max_size: u64,
    pub chunk_size: usize,
}

impl FetchRequest {
    /// Parse and check `url`; only absolute `http`/`https` URLs are accepted
    pub fn new(url: &str, limits: FetchLimits) -> Result<Self> {
        Ok(Self {
            url: parse_url(url)?,
            timeout: limits.timeout,
            max_size: limits.max_size,
            chunk_size: limits.chunk_size.max(1),
        })
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis().try_into().unwrap_or(u64::MAX)
    }
}

pub fn parse_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(XmlError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL is missing".to_string(),
        });
    }

    let url = Url::parse(trimmed).map_err(|e| XmlError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(XmlError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL has no host".to_string(),
        }),
        scheme => Err(XmlError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}

/// HTTP client shared by the three use cases
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| XmlError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Issue the GET and hand out the body as a chunk stream.
    ///
    /// The request timeout covers connecting and draining the whole body, so it
    /// keeps running while the caller consumes chunks. No retries.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<ChunkStream> {
        let url = request.url.as_str();
        debug!(url, timeout_ms = request.timeout_ms(), "starting fetch");

        let response = self
            .client
            .get(request.url.clone())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| XmlError::from_reqwest(url, request.timeout_ms(), e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(XmlError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        if let Some(declared) = content_length
            && declared > request.max_size
        {
            warn!(url, declared, limit = request.max_size, "declared length exceeds limit");
            return Err(XmlError::SizeLimitExceeded {
                url: url.to_string(),
                limit_bytes: request.max_size,
                received_bytes: 0,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());
        let looks_like_xml = content_type.as_deref().is_some_and(|ct| ct.contains("xml"))
            || request.url.path().to_ascii_lowercase().ends_with(".xml");
        if !looks_like_xml {
            warn!(url, content_type = ?content_type, "response does not look like XML");
        }

        Ok(ChunkStream {
            url: url.to_string(),
            timeout_ms: request.timeout_ms(),
            body: response.bytes_stream().boxed(),
            pending: BytesMut::new(),
            chunk_size: request.chunk_size,
            max_size: request.max_size,
            received: 0,
            exhausted: false,
            content_length,
            content_type,
        })
    }
}

/// Lazily produced body chunks of one fetch; dropping it closes the connection
pub struct ChunkStream {
    url: String,
    timeout_ms: u64,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    pending: BytesMut,
    chunk_size: usize,
    max_size: u64,
    received: u64,
    exhausted: bool,
    content_length: Option<u64>,
    content_type: Option<String>,
}

impl ChunkStream {
    /// Next chunk of exactly `chunk_size` bytes (the last one may be shorter)
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.pending.len() >= self.chunk_size {
                return Ok(Some(self.pending.split_to(self.chunk_size).freeze()));
            }
            if self.exhausted {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.pending.split().freeze()));
            }

            match self
                .body
                .try_next()
                .await
                .map_err(|e| XmlError::from_reqwest(&self.url, self.timeout_ms, e))?
            {
                Some(bytes) => {
                    self.received += bytes.len() as u64;
                    if self.received > self.max_size {
                        warn!(
                            url = %self.url,
                            received = self.received,
                            limit = self.max_size,
                            "size limit exceeded, aborting transfer"
                        );
                        self.pending.clear();
                        self.exhausted = true;
                        return Err(XmlError::SizeLimitExceeded {
                            url: self.url.clone(),
                            limit_bytes: self.max_size,
                            received_bytes: self.received,
                        });
                    }
                    self.pending.extend_from_slice(&bytes);
                }
                None => self.exhausted = true,
            }
        }
    }

    /// Drain every chunk into one buffer; the size limit is checked as data arrives
    pub async fn collect(mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.content_length.unwrap_or(0) as usize);
        while let Some(chunk) = self.next_chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bytes received from the network so far
    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("url", &self.url)
            .field("chunk_size", &self.chunk_size)
            .field("max_size", &self.max_size)
            .field("received", &self.received)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}
