//! Full-buffer well-formedness validation.
//!
//! A buffered document is decoded as UTF-8 (invalid sequences become U+FFFD)
//! and handed to an ordered list of [`WellFormednessCheck`]s. The first check
//! that accepts the text wins. If every check rejects it, the last check's
//! diagnostic is reported, so the strictest parser should come last.

use crate::analyzer::describe_xml_error;
use crate::libxml2::LibXml2Wrapper;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{debug, info, warn};

/// Outcome of validating one buffered document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid { text: String },
    Invalid { reason: String },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }
}

/// One strategy for deciding whether a decoded document is well-formed
pub trait WellFormednessCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Err` carries a human-readable diagnostic
    fn check(&self, text: &str) -> Result<(), String>;
}

/// libxml2 in recovery mode: tolerates damaged content, rejects broken structure
pub struct RecoveringCheck {
    libxml2: LibXml2Wrapper,
}

impl RecoveringCheck {
    pub fn new() -> Self {
        Self {
            libxml2: LibXml2Wrapper::new(),
        }
    }
}

impl Default for RecoveringCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl WellFormednessCheck for RecoveringCheck {
    fn name(&self) -> &'static str {
        "libxml2-recover"
    }

    fn check(&self, text: &str) -> Result<(), String> {
        let report = self.libxml2.parse_recovering(text);

        if let Some(issue) = report.first_structural_issue() {
            return Err(issue.to_string());
        }
        if !report.document_built || !report.has_root {
            return Err("no root element could be recovered".to_string());
        }
        if !report.issues.is_empty() {
            debug!(
                tolerated = report.issues.len(),
                "recovering parser accepted document with cosmetic issues"
            );
        }
        Ok(())
    }
}

/// Conforming pull parser: any well-formedness violation is an error
pub struct StrictCheck;

impl WellFormednessCheck for StrictCheck {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn check(&self, text: &str) -> Result<(), String> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = Reader::from_str(text);
        let config = reader.config_mut();
        config.check_end_names = true;
        config.check_comments = true;

        let mut open_elements: Vec<String> = Vec::new();
        let mut seen_root = false;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event()
                .map_err(|err| describe_xml_error(&err, reader.error_position() as u64))?;

            match event {
                Event::Start(ref start) | Event::Empty(ref start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    if open_elements.is_empty() && seen_root {
                        return Err(format!(
                            "extra content at byte {}: second root element <{}>",
                            position, name
                        ));
                    }
                    seen_root = true;
                    for attr in start.attributes() {
                        let attr = attr.map_err(|e| {
                            format!("malformed attribute in <{}> at byte {}: {}", name, position, e)
                        })?;
                        attr.unescape_value().map_err(|e| {
                            format!("invalid attribute value in <{}> at byte {}: {}", name, position, e)
                        })?;
                    }
                    if matches!(event, Event::Start(_)) {
                        open_elements.push(name);
                    }
                }
                Event::End(_) => {
                    open_elements.pop();
                }
                Event::Text(ref content) => {
                    if open_elements.is_empty() {
                        if !content.iter().all(u8::is_ascii_whitespace) {
                            return Err(format!(
                                "text outside the root element at byte {}",
                                position
                            ));
                        }
                    } else {
                        content.unescape().map_err(|e| {
                            format!("invalid reference in text at byte {}: {}", position, e)
                        })?;
                    }
                }
                Event::CData(_) if open_elements.is_empty() => {
                    return Err(format!(
                        "CDATA section outside the root element at byte {}",
                        position
                    ));
                }
                Event::Decl(_) if position != 0 => {
                    return Err(format!(
                        "XML declaration at byte {} is not at the start of the document",
                        position
                    ));
                }
                Event::DocType(_) if seen_root => {
                    return Err(format!(
                        "document type declaration at byte {} after the root element",
                        position
                    ));
                }
                Event::Eof => {
                    if let Some(name) = open_elements.last() {
                        return Err(format!(
                            "premature end of document: <{}> is not closed",
                            name
                        ));
                    }
                    if !seen_root {
                        return Err("document has no root element".to_string());
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
    }
}

/// Runs well-formedness checks in order until one accepts
pub struct Validator {
    checks: Vec<Box<dyn WellFormednessCheck>>,
}

impl Validator {
    /// Recovering libxml2 parse first, strict parse as the fallback
    pub fn new() -> Self {
        Self::with_checks(vec![Box::new(RecoveringCheck::new()), Box::new(StrictCheck)])
    }

    pub fn with_checks(checks: Vec<Box<dyn WellFormednessCheck>>) -> Self {
        Self { checks }
    }

    /// Decode `bytes` leniently and validate; decoding itself never fails
    pub fn validate(&self, bytes: &[u8]) -> ValidationResult {
        let text = String::from_utf8_lossy(bytes).into_owned();

        let mut last_reason = None;
        for check in &self.checks {
            match check.check(&text) {
                Ok(()) => {
                    info!(check = check.name(), bytes = bytes.len(), "XML is well-formed");
                    return ValidationResult::Valid { text };
                }
                Err(reason) => {
                    debug!(check = check.name(), reason = %reason, "check rejected document");
                    last_reason = Some(reason);
                }
            }
        }

        let reason = last_reason.unwrap_or_else(|| "no well-formedness check configured".to_string());
        warn!(reason = %reason, "XML is not well-formed");
        ValidationResult::Invalid { reason }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_well_formed_document_is_valid() {
        let xml = r#"<?xml version="1.0"?><note><to>A</to><from>B</from></note>"#;
        assert_eq!(
            Validator::new().validate(xml.as_bytes()),
            ValidationResult::Valid {
                text: xml.to_string()
            }
        );
    }

    #[test]
    fn test_mismatched_tags_are_invalid() {
        match Validator::new().validate(b"<a><b></a>") {
            ValidationResult::Invalid { reason } => {
                assert!(reason.contains("mismatched"), "reason: {}", reason)
            }
            other => panic!("Expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_attributes_are_invalid() {
        match Validator::new().validate(br#"<r a="1" a="2"/>"#) {
            ValidationResult::Invalid { reason } => {
                assert!(reason.contains("<r>"), "reason: {}", reason)
            }
            other => panic!("Expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let bytes = b"<r>caf\xe9</r>";
        match Validator::new().validate(bytes) {
            ValidationResult::Valid { text } => {
                assert_eq!(text, String::from_utf8_lossy(bytes));
                assert!(text.contains('\u{fffd}'));
            }
            other => panic!("Expected Valid, got {:?}", other),
        }
    }

    #[test]
    fn test_strict_check_rules() {
        let strict = StrictCheck;
        assert!(strict.check("<r a=\"1\"><c/>text &amp; more</r>").is_ok());
        assert!(strict.check("\u{feff}<?xml version=\"1.0\"?><r/>").is_ok());
        assert!(strict.check("<!-- lead --><r/><!-- trail -->").is_ok());

        assert!(strict.check("").is_err());
        assert!(strict.check("<r>").is_err());
        assert!(strict.check("<a/><b/>").is_err());
        assert!(strict.check("<r/>tail").is_err());
        assert!(strict.check("<r a=\"1\" a=\"2\"/>").is_err());
        assert!(strict.check("<r>&undefined;</r>").is_err());
        assert!(strict.check("<r/><?xml version=\"1.0\"?>").is_err());
    }

    #[test]
    fn test_strict_diagnostic_names_the_tags() {
        let reason = StrictCheck.check("<a><b></a>").unwrap_err();
        assert!(reason.contains("mismatched"));
        assert!(reason.contains("</b>"));
        assert!(reason.contains("</a>"));
    }

    struct CountingCheck {
        calls: Arc<AtomicUsize>,
        verdict: Result<(), String>,
    }

    impl WellFormednessCheck for CountingCheck {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn check(&self, _text: &str) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    #[test]
    fn test_first_accepting_check_stops_the_chain() {
        let second_calls = Arc::new(AtomicUsize::new(0));
        let validator = Validator::with_checks(vec![
            Box::new(CountingCheck {
                calls: Arc::new(AtomicUsize::new(0)),
                verdict: Ok(()),
            }),
            Box::new(CountingCheck {
                calls: second_calls.clone(),
                verdict: Err("unused".to_string()),
            }),
        ]);

        assert!(validator.validate(b"anything").is_valid());
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_last_diagnostic_is_reported() {
        let validator = Validator::with_checks(vec![
            Box::new(CountingCheck {
                calls: Arc::new(AtomicUsize::new(0)),
                verdict: Err("vague".to_string()),
            }),
            Box::new(CountingCheck {
                calls: Arc::new(AtomicUsize::new(0)),
                verdict: Err("precise".to_string()),
            }),
        ]);

        assert_eq!(
            validator.validate(b"<x>"),
            ValidationResult::Invalid {
                reason: "precise".to_string()
            }
        );
    }

    #[test]
    fn test_no_checks_is_invalid() {
        assert!(!Validator::with_checks(vec![]).validate(b"<r/>").is_valid());
    }
}
