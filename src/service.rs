//! The three fetch-and-analyze use cases behind one entry point.
//!
//! [`XmlService`] holds no per-request state: every call builds its own
//! [`FetchRequest`], and all buffers, sockets and parser contexts belong to
//! that call alone. Logging goes to the `tracing::Dispatch` the service was
//! built with, never to a process-wide subscriber.

use crate::analyzer::{XmlStructuralInfo, analyze_chunks};
use crate::config::Config;
use crate::error::{Result, XmlError};
use crate::fetcher::{FetchRequest, Fetcher};
use crate::response::{STREAM_CONTENT_TYPE, attachment_disposition};
use crate::stream::{ByteStream, TeeOptions, tee};
use crate::validator::{ValidationResult, Validator};
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, Span, info, info_span};

pub struct XmlService {
    config: Config,
    fetcher: Fetcher,
    validator: Arc<Validator>,
    dispatch: Dispatch,
}

impl XmlService {
    pub fn new(config: Config, dispatch: Dispatch) -> Result<Self> {
        Self::with_validator(config, dispatch, Validator::new())
    }

    pub fn with_validator(config: Config, dispatch: Dispatch, validator: Validator) -> Result<Self> {
        let fetcher = Fetcher::new(&config.network.user_agent)?;
        Ok(Self {
            config,
            fetcher,
            validator: Arc::new(validator),
            dispatch,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn span(&self, operation: &'static str, url: &str) -> Span {
        tracing::dispatcher::with_default(&self.dispatch, || {
            info_span!("xml_fetch", operation, url)
        })
    }

    /// Download the whole document (size-capped), then check it is well-formed
    pub async fn download_and_validate(&self, url: &str) -> Result<String> {
        let span = self.span("download", url);
        async {
            let request = FetchRequest::new(url, self.config.download_limits())?;
            let body = self.fetcher.fetch(&request).await?.collect().await?;
            info!(bytes = body.len(), "download complete");

            let validator = Arc::clone(&self.validator);
            let dispatch = self.dispatch.clone();
            let span = Span::current();
            let outcome = tokio::task::spawn_blocking(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    span.in_scope(|| validator.validate(&body))
                })
            })
            .await
            .map_err(|e| {
                XmlError::Io(std::io::Error::other(format!("validation task failed: {}", e)))
            })?;

            match outcome {
                ValidationResult::Valid { text } => Ok(text),
                ValidationResult::Invalid { reason } => Err(XmlError::Parse { diagnostic: reason }),
            }
        }
        .instrument(span)
        .with_subscriber(self.dispatch.clone())
        .await
    }

    /// Relay the document as it arrives; HTTP status errors surface before any byte
    pub async fn stream(&self, url: &str) -> Result<ByteStream> {
        let span = self.span("stream", url);
        async {
            let request = FetchRequest::new(url, self.config.stream_limits())?;
            let chunks = self.fetcher.fetch(&request).await?;
            info!(
                media_type = STREAM_CONTENT_TYPE,
                disposition = %attachment_disposition(&request.url),
                upstream_content_type = ?chunks.content_type(),
                content_length = ?chunks.content_length(),
                "streaming started"
            );

            Ok(tee(
                chunks,
                TeeOptions {
                    queue_depth: self.config.stream.queue_depth,
                    probe_interval: self.config.stream.probe_interval_chunks,
                },
            ))
        }
        .instrument(span)
        .with_subscriber(self.dispatch.clone())
        .await
    }

    /// Extract structural metadata without holding the document in memory
    pub async fn analyze(&self, url: &str) -> Result<XmlStructuralInfo> {
        let span = self.span("analyze", url);
        async {
            let request = FetchRequest::new(url, self.config.analysis_limits())?;
            let chunks = self.fetcher.fetch(&request).await?;
            analyze_chunks(chunks).await
        }
        .instrument(span)
        .with_subscriber(self.dispatch.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn service() -> XmlService {
        XmlService::new(Config::new(), Dispatch::none()).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_urls_fail_before_network() {
        let service = service();

        let err = service.download_and_validate("not a url").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);

        let err = service.analyze("ftp://example.com/a.xml").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);

        let err = service.stream("").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let service = service();
        let err = service
            .analyze("http://127.0.0.1:1/doc.xml")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
