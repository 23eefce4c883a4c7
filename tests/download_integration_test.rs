//! End-to-end tests for download-and-validate against a mock origin.

mod common;

use std::time::{Duration, Instant};

use common::*;
use xml_fetch::config::MIB;
use xml_fetch::{Config, ErrorKind, NetworkError, XmlError};

#[tokio::test]
async fn test_download_returns_document_text() {
    let server = serve_xml("/note.xml", NOTE_XML).await;

    let text = service()
        .download_and_validate(&format!("{}/note.xml", server.uri()))
        .await
        .expect("download should succeed");

    assert_eq!(text, NOTE_XML);
}

#[tokio::test]
async fn test_download_rejects_mismatched_tags() {
    let server = serve_xml("/broken.xml", "<a><b></a>").await;

    let err = service()
        .download_and_validate(&format!("{}/broken.xml", server.uri()))
        .await
        .unwrap_err();

    match err {
        XmlError::Parse { diagnostic } => {
            assert!(diagnostic.contains("mismatched"), "diagnostic: {}", diagnostic)
        }
        other => panic!("Expected Parse error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_download_http_error_status() {
    let server = serve_status("/missing.xml", 404).await;

    let err = service()
        .download_and_validate(&format!("{}/missing.xml", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, XmlError::HttpStatus { status: 404, .. }));
    assert_eq!(err.kind(), ErrorKind::HttpStatus);
    assert_eq!(err.kind().http_status(), 500);
}

#[tokio::test]
async fn test_download_declared_length_over_limit() {
    let body = large_document((MIB + MIB / 2) as usize);
    let server = serve_xml("/big.xml", body).await;

    let mut config = Config::new();
    config.network.max_size_mb = 1;

    let err = service_with(config)
        .download_and_validate(&format!("{}/big.xml", server.uri()))
        .await
        .unwrap_err();

    match err {
        XmlError::SizeLimitExceeded {
            limit_bytes,
            received_bytes,
            ..
        } => {
            assert_eq!(limit_bytes, MIB);
            assert_eq!(received_bytes, 0);
        }
        other => panic!("Expected SizeLimitExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_download_chunked_body_over_limit() {
    let body = large_document((MIB + MIB / 2) as usize);
    let url = serve_chunked("/big.xml", split_parts(&body, 64 * 1024)).await;

    let mut config = Config::new();
    config.network.max_size_mb = 1;

    let err = service_with(config)
        .download_and_validate(&url)
        .await
        .unwrap_err();

    match err {
        XmlError::SizeLimitExceeded {
            limit_bytes,
            received_bytes,
            ..
        } => {
            assert_eq!(limit_bytes, MIB);
            assert!(received_bytes > MIB, "received {}", received_bytes);
            assert!(received_bytes < body.len() as u64, "received {}", received_bytes);
        }
        other => panic!("Expected SizeLimitExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_download_chunked_body_within_limit() {
    let url = serve_chunked("/note.xml", split_parts(NOTE_XML, 7)).await;

    let text = service()
        .download_and_validate(&url)
        .await
        .expect("chunked document should download");

    assert_eq!(text, NOTE_XML);
}

#[tokio::test]
async fn test_download_within_limit_succeeds() {
    let body = large_document((MIB / 2) as usize);
    let server = serve_xml("/medium.xml", body.clone()).await;

    let mut config = Config::new();
    config.network.max_size_mb = 1;

    let text = service_with(config)
        .download_and_validate(&format!("{}/medium.xml", server.uri()))
        .await
        .expect("document under the limit should download");

    assert_eq!(text.len(), body.len());
}

#[tokio::test]
async fn test_download_times_out() {
    let server = serve_delayed("/slow.xml", NOTE_XML, Duration::from_secs(5)).await;

    let started = Instant::now();
    let err = service_with(config_with_timeout(1))
        .download_and_validate(&format!("{}/slow.xml", server.uri()))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {:?}", err);
    assert!(matches!(
        err,
        XmlError::Network(NetworkError::Timeout {
            timeout_ms: 1000,
            ..
        })
    ));
    assert!(elapsed >= Duration::from_millis(900), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "gave up after {:?}", elapsed);
}

#[tokio::test]
async fn test_download_accepts_invalid_utf8_lossily() {
    let server = serve_xml("/latin1.xml", b"<r>caf\xe9</r>".to_vec()).await;

    let text = service()
        .download_and_validate(&format!("{}/latin1.xml", server.uri()))
        .await
        .expect("lossy decoding should not fail");

    assert!(text.contains('\u{fffd}'));
}
