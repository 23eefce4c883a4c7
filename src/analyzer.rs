//! Bounded-memory structural analysis of XML documents.
//!
//! [`XmlEventReader`] pulls `StartNamespace`/`StartElement`/`EndElement`
//! events from any [`BufRead`] without building a tree, and
//! [`StructureAccumulator`] folds them into an [`XmlStructuralInfo`]. The only
//! per-element state is the stack of open tag names, so memory grows with
//! nesting depth and never with the number of elements.
//!
//! For remote documents, [`analyze_chunks`] parses on a blocking worker fed
//! by a bounded channel; the async side only waits on network reads.

use crate::error::{Result, XmlError};
use crate::fetcher::ChunkStream;
use bytes::{Buf, Bytes};
use quick_xml::errors::IllFormedError;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use quick_xml::name::PrefixDeclaration;
use quick_xml::reader::Reader;
use std::collections::{HashSet, VecDeque};
use std::io::{self, BufRead, Read};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Chunks the network side may queue ahead of the parser
pub const ANALYZER_QUEUE_DEPTH: usize = 4;

/// Document-level metadata produced by a completed analysis
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlStructuralInfo {
    pub root_tag: Option<String>,
    pub namespaces: HashSet<String>,
    pub element_count: u64,
    pub max_depth: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralEvent {
    /// Emitted before the `StartElement` of the element declaring it
    StartNamespace { prefix: String, uri: String },
    StartElement { tag: String },
    EndElement,
}

impl StructuralEvent {
    /// `"prefix:uri"`, or just `"uri"` for a default namespace
    pub fn normalized_namespace(prefix: &str, uri: &str) -> String {
        if prefix.is_empty() {
            uri.to_string()
        } else {
            format!("{}:{}", prefix, uri)
        }
    }
}

pub(crate) fn describe_xml_error(err: &quick_xml::Error, position: u64) -> String {
    match err {
        quick_xml::Error::IllFormed(IllFormedError::MismatchedEndTag { expected, found }) => {
            format!(
                "mismatched tag at byte {}: expected </{}>, found </{}>",
                position, expected, found
            )
        }
        quick_xml::Error::IllFormed(IllFormedError::UnmatchedEndTag(name)) => {
            format!(
                "closing tag </{}> at byte {} has no matching opening tag",
                name, position
            )
        }
        other => format!("{} (at byte {})", other, position),
    }
}

fn parse_error(diagnostic: impl Into<String>) -> XmlError {
    XmlError::Parse {
        diagnostic: diagnostic.into(),
    }
}

/// Pull-based event source over a byte reader
pub struct XmlEventReader<R: BufRead> {
    reader: Reader<CountingReader<R>>,
    buf: Vec<u8>,
    pending: VecDeque<StructuralEvent>,
    depth: usize,
    seen_root: bool,
    finished: bool,
}

/// Counts every byte the parser takes from the source, byte order mark included
struct CountingReader<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(out)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amount: usize) {
        self.consumed += amount as u64;
        self.inner.consume(amount);
    }
}

impl<R: BufRead> XmlEventReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(CountingReader {
            inner: source,
            consumed: 0,
        });
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = true;
        config.check_comments = true;

        Self {
            reader,
            buf: Vec::new(),
            pending: VecDeque::new(),
            depth: 0,
            seen_root: false,
            finished: false,
        }
    }

    /// Bytes the parser has consumed from the source
    pub fn bytes_consumed(&self) -> u64 {
        self.reader.get_ref().consumed
    }

    fn read_next(&mut self) -> Result<Option<StructuralEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            self.buf.clear();
            let position = self.reader.buffer_position() as u64;
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(err) => {
                    let at = self.reader.error_position() as u64;
                    return Err(parse_error(describe_xml_error(&err, at)));
                }
            };

            match event {
                Event::Start(start) => {
                    for attr in start.attributes() {
                        let attr = attr.map_err(|e| {
                            parse_error(format!("malformed attribute at byte {}: {}", position, e))
                        })?;
                        unescape(&String::from_utf8_lossy(&attr.value)).map_err(|e| {
                            parse_error(format!(
                                "invalid attribute value at byte {}: {}",
                                position, e
                            ))
                        })?;
                        let Some(binding) = attr.key.as_namespace_binding() else {
                            continue;
                        };
                        let prefix = match binding {
                            PrefixDeclaration::Default => String::new(),
                            PrefixDeclaration::Named(prefix) => {
                                String::from_utf8_lossy(prefix).into_owned()
                            }
                        };
                        let uri = attr
                            .unescape_value()
                            .map_err(|e| {
                                parse_error(format!(
                                    "invalid namespace URI at byte {}: {}",
                                    position, e
                                ))
                            })?
                            .into_owned();
                        self.pending
                            .push_back(StructuralEvent::StartNamespace { prefix, uri });
                    }

                    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    self.depth += 1;
                    self.seen_root = true;
                    self.pending.push_back(StructuralEvent::StartElement { tag });
                }
                Event::End(_) => {
                    self.depth = self.depth.saturating_sub(1);
                    return Ok(Some(StructuralEvent::EndElement));
                }
                Event::Text(text) if self.depth == 0 => {
                    if !text.iter().all(u8::is_ascii_whitespace) {
                        return Err(parse_error(format!(
                            "text outside the root element at byte {}",
                            position
                        )));
                    }
                }
                Event::Text(text) => {
                    unescape(&String::from_utf8_lossy(&text)).map_err(|e| {
                        parse_error(format!("invalid reference in text at byte {}: {}", position, e))
                    })?;
                }
                Event::CData(_) if self.depth == 0 => {
                    return Err(parse_error(format!(
                        "CDATA section outside the root element at byte {}",
                        position
                    )));
                }
                Event::Decl(_) if position != 0 => {
                    return Err(parse_error(format!(
                        "XML declaration at byte {} is not at the start of the document",
                        position
                    )));
                }
                Event::DocType(_) if self.seen_root => {
                    return Err(parse_error(format!(
                        "document type declaration at byte {} after the root element",
                        position
                    )));
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for XmlEventReader<R> {
    type Item = Result<StructuralEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

/// Folds structural events into document metadata
#[derive(Debug)]
pub struct StructureAccumulator {
    state: AnalyzerState,
    open_elements: Vec<String>,
    peak_open_elements: usize,
    root_tag: Option<String>,
    namespaces: HashSet<String>,
    element_count: u64,
    max_depth: u64,
    size_bytes: u64,
}

impl StructureAccumulator {
    pub fn new() -> Self {
        Self {
            state: AnalyzerState::Idle,
            open_elements: Vec::new(),
            peak_open_elements: 0,
            root_tag: None,
            namespaces: HashSet::new(),
            element_count: 0,
            max_depth: 0,
            size_bytes: 0,
        }
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn depth(&self) -> u64 {
        self.open_elements.len() as u64
    }

    /// Most elements held open at once over the whole analysis
    pub fn peak_open_elements(&self) -> usize {
        self.peak_open_elements
    }

    /// Record consumed input; the first byte moves `Idle` to `Streaming`
    pub fn record_bytes(&mut self, consumed: u64) {
        if self.state == AnalyzerState::Idle && consumed > 0 {
            self.state = AnalyzerState::Streaming;
        }
        self.size_bytes = consumed;
    }

    pub fn fail(&mut self) {
        if self.state != AnalyzerState::Completed {
            self.state = AnalyzerState::Failed;
        }
    }

    pub fn apply(&mut self, event: StructuralEvent) -> Result<()> {
        match self.state {
            AnalyzerState::Completed | AnalyzerState::Failed => {
                return Err(parse_error("analysis already finished"));
            }
            AnalyzerState::Idle => self.state = AnalyzerState::Streaming,
            AnalyzerState::Streaming => {}
        }

        match event {
            StructuralEvent::StartNamespace { prefix, uri } => {
                self.namespaces
                    .insert(StructuralEvent::normalized_namespace(&prefix, &uri));
            }
            StructuralEvent::StartElement { tag } => {
                if self.open_elements.is_empty() && self.root_tag.is_some() {
                    self.fail();
                    return Err(parse_error(format!(
                        "second root element <{}> after </{}>",
                        tag,
                        self.root_tag.as_deref().unwrap_or_default()
                    )));
                }
                if self.root_tag.is_none() {
                    self.root_tag = Some(tag.clone());
                }
                self.element_count += 1;
                self.open_elements.push(tag);
                self.peak_open_elements = self.peak_open_elements.max(self.open_elements.len());
                self.max_depth = self.max_depth.max(self.depth());
            }
            StructuralEvent::EndElement => {
                if self.open_elements.pop().is_none() {
                    self.fail();
                    return Err(parse_error("closing tag without an open element"));
                }
            }
        }
        Ok(())
    }

    /// End of input: `Completed` only with a closed, non-empty document
    pub fn finish(mut self) -> Result<XmlStructuralInfo> {
        let outcome = match self.state {
            AnalyzerState::Completed | AnalyzerState::Failed => {
                Err(parse_error("analysis already finished"))
            }
            AnalyzerState::Idle => Err(parse_error("document is empty")),
            AnalyzerState::Streaming => {
                if let Some(open) = self.open_elements.last() {
                    Err(parse_error(format!(
                        "premature end of document: <{}> is not closed ({} element(s) open)",
                        open,
                        self.open_elements.len()
                    )))
                } else if self.element_count == 0 {
                    Err(parse_error("document has no root element"))
                } else {
                    Ok(())
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.state = AnalyzerState::Completed;
                Ok(XmlStructuralInfo {
                    root_tag: self.root_tag,
                    namespaces: self.namespaces,
                    element_count: self.element_count,
                    max_depth: self.max_depth,
                    size_bytes: self.size_bytes,
                })
            }
            Err(err) => {
                self.fail();
                Err(err)
            }
        }
    }
}

impl Default for StructureAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyze a document read from `source`; no partial result on failure
pub fn analyze_reader<R: BufRead>(source: R) -> Result<XmlStructuralInfo> {
    let mut events = XmlEventReader::new(source);
    let mut accumulator = StructureAccumulator::new();

    loop {
        let next = events.next();
        accumulator.record_bytes(events.bytes_consumed());
        match next {
            Some(Ok(event)) => accumulator.apply(event)?,
            Some(Err(err)) => {
                accumulator.fail();
                return Err(err);
            }
            None => break,
        }
    }

    accumulator.finish()
}

/// Blocking byte source fed by the async fetch loop
struct ChannelReader {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(receiver: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            receiver,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for ChannelReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.current.is_empty() {
            match self.receiver.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }
        Ok(&self.current)
    }

    fn consume(&mut self, amount: usize) {
        self.current.advance(amount.min(self.current.len()));
    }
}

/// Drain `chunks` through the analyzer.
///
/// A network fault takes precedence over whatever the parser reports, since
/// the parser only sees the input cut short.
pub async fn analyze_chunks(mut chunks: ChunkStream) -> Result<XmlStructuralInfo> {
    let url = chunks.url().to_string();
    let (sender, receiver) = mpsc::channel::<io::Result<Bytes>>(ANALYZER_QUEUE_DEPTH);
    let parser =
        tokio::task::spawn_blocking(move || analyze_reader(ChannelReader::new(receiver)));

    let mut fetch_error = None;
    loop {
        match chunks.next_chunk().await {
            Ok(Some(chunk)) => {
                if sender.send(Ok(chunk)).await.is_err() {
                    debug!(url = %url, "parser stopped early, closing transfer");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                let _ = sender
                    .send(Err(io::Error::other("transfer aborted")))
                    .await;
                fetch_error = Some(err);
                break;
            }
        }
    }
    let received = chunks.received_bytes();
    drop(chunks);
    drop(sender);

    let parsed = parser
        .await
        .map_err(|e| XmlError::Io(io::Error::other(format!("analyzer task failed: {}", e))))?;

    if let Some(err) = fetch_error {
        warn!(url = %url, error = %err, "analysis aborted by network fault");
        return Err(err);
    }

    let info = parsed?;
    info!(
        url = %url,
        elements = info.element_count,
        max_depth = info.max_depth,
        namespaces = info.namespaces.len(),
        bytes = received,
        "structural analysis complete"
    );
    Ok(info)
}
