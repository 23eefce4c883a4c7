//! # xml-fetch Library
//!
//! Fetches XML documents over HTTP(S) and offers three ways to consume them:
//! download and check well-formedness, relay the bytes as they arrive, or
//! extract structural metadata with memory bounded by nesting depth rather
//! than document size.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod libxml2;
pub mod response;
pub mod service;
pub mod stream;
pub mod validator;

pub use analyzer::{
    AnalyzerState, StructuralEvent, StructureAccumulator, XmlEventReader, XmlStructuralInfo,
    analyze_chunks, analyze_reader,
};
pub use cli::{Cli, Command, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager, FetchLimits};
pub use error::{ErrorKind, NetworkError, Result, XmlError};
pub use fetcher::{ChunkStream, FetchRequest, Fetcher, parse_url};
pub use libxml2::{LibXml2Wrapper, ParserIssue, RecoveryReport};
pub use response::{AnalysisResponse, DownloadResponse, ErrorResponse, XmlInfoBody};
pub use service::XmlService;
pub use stream::{ByteStream, DepthProbe, TeeOptions, tee};
pub use validator::{RecoveringCheck, StrictCheck, ValidationResult, Validator, WellFormednessCheck};
