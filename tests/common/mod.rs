//! Shared helpers for the integration tests: mock origins and service builders.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::Dispatch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use xml_fetch::{Config, XmlService};

pub const NOTE_XML: &str = r#"<?xml version="1.0"?><note><to>A</to><from>B</from></note>"#;

pub const DUPLICATE_NAMESPACE_XML: &str = r#"<root xmlns:ns="urn:test"><ns:item xmlns:ns="urn:test"/><ns:item/></root>"#;

/// Service with default configuration and logging discarded
pub fn service() -> XmlService {
    service_with(Config::new())
}

pub fn service_with(config: Config) -> XmlService {
    XmlService::new(config, Dispatch::none()).expect("service should build")
}

/// Configuration whose every fetch profile gives up after `seconds`
pub fn config_with_timeout(seconds: u64) -> Config {
    let mut config = Config::new();
    config.download.timeout_seconds = seconds;
    config.stream.timeout_seconds = seconds;
    config.analysis.timeout_seconds = seconds;
    config
}

/// Mock origin serving `body` as XML at `route`
pub async fn serve_xml(route: &str, body: impl Into<Vec<u8>>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into(), "application/xml"))
        .mount(&server)
        .await;
    server
}

/// Mock origin answering `route` with a bare status code
pub async fn serve_status(route: &str, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

/// Mock origin that holds the response back for `delay`
pub async fn serve_delayed(route: &str, body: &str, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.as_bytes().to_vec(), "application/xml")
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

/// Origin on a plain socket that answers every request with a chunked body
/// and no Content-Length, so only the running byte count can stop it
pub async fn serve_chunked(route: &str, parts: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let parts = parts.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = "HTTP/1.1 200 OK\r\nContent-Type: application/xml\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for part in parts {
                    let frame = [
                        format!("{:x}\r\n", part.len()).into_bytes(),
                        part,
                        b"\r\n".to_vec(),
                    ]
                    .concat();
                    if socket.write_all(&frame).await.is_err() {
                        return;
                    }
                }
                let _ = socket.write_all(b"0\r\n\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}{}", address, route)
}

/// `document` cut into `part_size` pieces for [`serve_chunked`]
pub fn split_parts(document: &str, part_size: usize) -> Vec<Vec<u8>> {
    document
        .as_bytes()
        .chunks(part_size)
        .map(|part| part.to_vec())
        .collect()
}

/// A well-formed document of at least `min_bytes` bytes
pub fn large_document(min_bytes: usize) -> String {
    let item = "<item>0123456789abcdef0123456789abcdef</item>";
    let mut document = String::with_capacity(min_bytes + 64);
    document.push_str("<items>");
    while document.len() < min_bytes {
        document.push_str(item);
    }
    document.push_str("</items>");
    document
}
