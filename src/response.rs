//! Response envelopes for transport collaborators.
//!
//! Shapes core results into the JSON bodies callers expect and maps error
//! kinds to transport status codes. Internal details never reach the body.

use crate::analyzer::XmlStructuralInfo;
use crate::error::{ErrorKind, XmlError};
use serde::{Deserialize, Serialize};
use url::Url;

pub const STATUS_SUCCESS: &str = "sucesso";
pub const STATUS_ERROR: &str = "erro";

/// Media type for streamed documents
pub const STREAM_CONTENT_TYPE: &str = "application/xml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub status: String,
    pub xml_content: String,
}

impl DownloadResponse {
    pub fn new(xml_content: String) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            xml_content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlInfoBody {
    pub root_tag: Option<String>,
    /// Sorted so identical documents always render identically
    pub namespaces: Vec<String>,
    pub element_count: u64,
    pub max_depth: u64,
    pub size_bytes: u64,
}

impl From<XmlStructuralInfo> for XmlInfoBody {
    fn from(info: XmlStructuralInfo) -> Self {
        let mut namespaces: Vec<String> = info.namespaces.into_iter().collect();
        namespaces.sort();
        Self {
            root_tag: info.root_tag,
            namespaces,
            element_count: info.element_count,
            max_depth: info.max_depth,
            size_bytes: info.size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub status: String,
    pub xml_info: XmlInfoBody,
}

impl AnalysisResponse {
    pub fn new(info: XmlStructuralInfo) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            xml_info: info.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub mensagem: String,
}

impl ErrorResponse {
    pub fn new(mensagem: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            mensagem: mensagem.into(),
        }
    }

    /// Transport status and body for a failed operation
    pub fn from_error(err: &XmlError) -> (u16, Self) {
        let kind = err.kind();
        let mensagem = match kind {
            ErrorKind::Input => "URL não fornecida ou inválida.".to_string(),
            ErrorKind::Internal => "Erro interno do servidor.".to_string(),
            _ => format!("Falha ao baixar ou processar o arquivo XML. {}", err),
        };
        (kind.http_status(), Self::new(mensagem))
    }
}

/// `Content-Disposition` value naming the file after the URL's last path segment
pub fn attachment_disposition(url: &Url) -> String {
    let filename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(|name| name.replace('"', ""))
        .unwrap_or_else(|| "document.xml".to_string());
    format!("attachment; filename=\"{}\"", filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use std::collections::HashSet;

    #[test]
    fn test_download_envelope() {
        let body = serde_json::to_value(DownloadResponse::new("<r/>".to_string())).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"status": "sucesso", "xml_content": "<r/>"})
        );
    }

    #[test]
    fn test_analysis_envelope_sorts_namespaces() {
        let info = XmlStructuralInfo {
            root_tag: Some("feed".to_string()),
            namespaces: HashSet::from(["urn:b".to_string(), "a:urn:a".to_string()]),
            element_count: 4,
            max_depth: 2,
            size_bytes: 120,
        };

        let body = serde_json::to_value(AnalysisResponse::new(info)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "status": "sucesso",
                "xml_info": {
                    "root_tag": "feed",
                    "namespaces": ["a:urn:a", "urn:b"],
                    "element_count": 4,
                    "max_depth": 2,
                    "size_bytes": 120
                }
            })
        );
    }

    #[test]
    fn test_error_envelopes() {
        let (status, body) = ErrorResponse::from_error(&XmlError::InvalidUrl {
            url: "x".to_string(),
            reason: "relative URL without a base".to_string(),
        });
        assert_eq!(status, 400);
        assert_eq!(body.status, "erro");

        let (status, body) = ErrorResponse::from_error(&XmlError::Network(NetworkError::Timeout {
            url: "http://example.com/a.xml".to_string(),
            timeout_ms: 30000,
        }));
        assert_eq!(status, 500);
        assert!(body.mensagem.contains("30000ms"));

        let (status, body) = ErrorResponse::from_error(&XmlError::Config("secret path".to_string()));
        assert_eq!(status, 500);
        assert!(!body.mensagem.contains("secret"));
    }

    #[test]
    fn test_attachment_disposition() {
        let url = Url::parse("https://example.com/data/feed.xml?x=1").unwrap();
        assert_eq!(attachment_disposition(&url), "attachment; filename=\"feed.xml\"");

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(
            attachment_disposition(&url),
            "attachment; filename=\"document.xml\""
        );
    }
}
