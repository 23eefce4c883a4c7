//! LibXML2 FFI wrapper for recovery-mode document parsing.
//!
//! libxml2's recovery mode (`XML_PARSE_RECOVER`) builds a best-effort tree
//! from damaged input instead of stopping at the first error. The wrapper
//! parses from memory, collects every diagnostic through a structured error
//! handler, and reports them together with whether a document and a root
//! element were produced. Callers decide which diagnostics they tolerate.
//!
//! ## Thread Safety
//!
//! - `xmlInitParser` is not thread-safe and runs exactly once behind a `Once`.
//! - Every parse gets its own parser context, so parses on different threads
//!   are independent.
//! - The structured error handler lives in libxml2's per-thread state; it is
//!   installed just before the parse and removed right after, on the same
//!   thread, by a guard.
//!
//! Network access is disabled for every parse (`XML_PARSE_NONET`) and entities
//! are never substituted, so a fetched document cannot pull in further
//! resources.

use libc::{c_char, c_int, c_void};
use std::ffi::CStr;
use std::marker::PhantomData;
use std::sync::Once;

static LIBXML2_INIT: Once = Once::new();

const XML_PARSE_RECOVER: c_int = 1 << 0;
const XML_PARSE_NONET: c_int = 1 << 11;
const XML_PARSE_HUGE: c_int = 1 << 19;

/// Error level reported by libxml2 (`xmlErrorLevel`)
pub const XML_ERR_ERROR: c_int = 2;
pub const XML_ERR_FATAL: c_int = 3;

/// `xmlParserErrors` codes that mean the element structure itself is broken
const STRUCTURAL_ERROR_CODES: &[c_int] = &[
    3,  // XML_ERR_DOCUMENT_START
    4,  // XML_ERR_DOCUMENT_EMPTY
    5,  // XML_ERR_DOCUMENT_END: extra content after the root
    39, // XML_ERR_ATTRIBUTE_NOT_STARTED
    40, // XML_ERR_ATTRIBUTE_NOT_FINISHED
    41, // XML_ERR_ATTRIBUTE_WITHOUT_VALUE
    42, // XML_ERR_ATTRIBUTE_REDEFINED
    68, // XML_ERR_NAME_REQUIRED
    72, // XML_ERR_LT_REQUIRED
    73, // XML_ERR_GT_REQUIRED
    74, // XML_ERR_LTSLASH_REQUIRED
    76, // XML_ERR_TAG_NAME_MISMATCH
    77, // XML_ERR_TAG_NOT_FINISHED
];

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlNode {
    _private: [u8; 0],
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();

    pub fn xmlNewParserCtxt() -> *mut XmlParserCtxt;
    pub fn xmlFreeParserCtxt(ctxt: *mut XmlParserCtxt);
    pub fn xmlCtxtReadMemory(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;

    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);
}

/// One diagnostic emitted by libxml2 during a parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserIssue {
    pub code: i32,
    pub level: i32,
    pub line: i32,
    pub message: String,
}

impl ParserIssue {
    /// Broken nesting, unfinished tags or a missing/duplicated root
    pub fn is_structural(&self) -> bool {
        STRUCTURAL_ERROR_CODES.contains(&self.code)
    }
}

impl std::fmt::Display for ParserIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// What a recovery-mode parse produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub document_built: bool,
    pub has_root: bool,
    pub issues: Vec<ParserIssue>,
}

impl RecoveryReport {
    pub fn first_structural_issue(&self) -> Option<&ParserIssue> {
        self.issues.iter().find(|issue| issue.is_structural())
    }
}

/// Callback for libxml2 to report parser errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let issues = unsafe { &mut *(user_data as *mut Vec<ParserIssue>) };
    let error = unsafe { &*error };

    let message = if error.message.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(error.message) }
            .to_string_lossy()
            .trim()
            .to_string()
    };

    issues.push(ParserIssue {
        code: error.code,
        level: error.level,
        line: error.line,
        message,
    });
}

struct ParserCtxtGuard(*mut XmlParserCtxt);

impl Drop for ParserCtxtGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { xmlFreeParserCtxt(self.0) };
        }
    }
}

struct DocGuard(*mut XmlDoc);

impl Drop for DocGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { xmlFreeDoc(self.0) };
        }
    }
}

/// Removes the thread's structured error handler once the parse is over
struct ErrorHandlerGuard;

impl ErrorHandlerGuard {
    fn install(issues: &mut Vec<ParserIssue>) -> Self {
        unsafe {
            xmlSetStructuredErrorFunc(
                issues as *mut Vec<ParserIssue> as *mut c_void,
                Some(structured_error_callback),
            );
        }
        ErrorHandlerGuard
    }
}

impl Drop for ErrorHandlerGuard {
    fn drop(&mut self) {
        unsafe { xmlSetStructuredErrorFunc(std::ptr::null_mut(), None) };
    }
}

/// Safe access to libxml2's recovery-mode parser
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a wrapper, initializing libxml2 on first use
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse `text` in recovery mode and report every diagnostic.
    ///
    /// The input is always read as UTF-8, whatever the XML declaration says.
    pub fn parse_recovering(&self, text: &str) -> RecoveryReport {
        let Ok(size) = c_int::try_from(text.len()) else {
            return RecoveryReport {
                document_built: false,
                has_root: false,
                issues: vec![ParserIssue {
                    code: 1,
                    level: XML_ERR_FATAL,
                    line: 0,
                    message: format!("document of {} bytes is too large for libxml2", text.len()),
                }],
            };
        };

        let mut issues = Vec::new();
        let (document_built, has_root) = {
            let _handler = ErrorHandlerGuard::install(&mut issues);

            let ctxt = ParserCtxtGuard(unsafe { xmlNewParserCtxt() });
            if ctxt.0.is_null() {
                (false, false)
            } else {
                let doc = DocGuard(unsafe {
                    xmlCtxtReadMemory(
                        ctxt.0,
                        text.as_ptr() as *const c_char,
                        size,
                        c"document.xml".as_ptr(),
                        c"UTF-8".as_ptr(),
                        XML_PARSE_RECOVER | XML_PARSE_NONET | XML_PARSE_HUGE,
                    )
                });
                let has_root = !doc.0.is_null() && !unsafe { xmlDocGetRootElement(doc.0) }.is_null();
                (!doc.0.is_null(), has_root)
            }
        };

        RecoveryReport {
            document_built,
            has_root,
            issues,
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
