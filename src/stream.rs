//! Pass-through streaming of a fetched document.
//!
//! A producer task pulls chunks from the fetch and pushes them through a small
//! bounded queue; the consumer sees every chunk unchanged and in order. While
//! chunks pass, a [`DepthProbe`] tracks tag balance so obviously broken
//! documents show up in the logs. The probe is advisory: by the time bytes
//! flow, the transport has already committed to a successful response.

use crate::error::Result;
use crate::fetcher::ChunkStream;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument::WithSubscriber;
use tracing::{Instrument, debug, info, warn};

/// Consumer side of a streamed document; transfer errors arrive as the last item
pub type ByteStream = ReceiverStream<Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeeOptions {
    /// Chunks the producer may run ahead of the consumer, clamped to 1..=4
    pub queue_depth: usize,
    /// Log probe progress every this many chunks
    pub probe_interval: u64,
}

impl Default for TeeOptions {
    fn default() -> Self {
        Self {
            queue_depth: 2,
            probe_interval: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Content,
    Lt,
    StartTag { quote: Option<u8>, slash: bool },
    EndTag,
    Instruction { question: bool },
    Bang,
    CommentOpen,
    Comment { dashes: u8 },
    CData { brackets: u8 },
    Declaration { nesting: u32 },
}

/// Byte-level open/close tag counter that survives chunk boundaries.
///
/// Skips comments, CDATA, processing instructions, declarations and quoted
/// attribute values. It is a heuristic: it does not match tag names.
#[derive(Debug, Clone)]
pub struct DepthProbe {
    state: ProbeState,
    depth: i64,
    went_negative: bool,
}

impl DepthProbe {
    pub fn new() -> Self {
        Self {
            state: ProbeState::Content,
            depth: 0,
            went_negative: false,
        }
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    /// A closing tag appeared with no element open
    pub fn went_negative(&self) -> bool {
        self.went_negative
    }

    /// Everything opened was closed and no markup is left dangling
    pub fn is_balanced(&self) -> bool {
        self.depth == 0 && !self.went_negative && self.state == ProbeState::Content
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state = match self.state {
                ProbeState::Content => match b {
                    b'<' => ProbeState::Lt,
                    _ => ProbeState::Content,
                },
                ProbeState::Lt => match b {
                    b'/' => ProbeState::EndTag,
                    b'?' => ProbeState::Instruction { question: false },
                    b'!' => ProbeState::Bang,
                    _ => ProbeState::StartTag {
                        quote: None,
                        slash: false,
                    },
                },
                ProbeState::StartTag {
                    quote: Some(q),
                    slash,
                } => ProbeState::StartTag {
                    quote: if b == q { None } else { Some(q) },
                    slash,
                },
                ProbeState::StartTag { quote: None, slash } => match b {
                    b'"' | b'\'' => ProbeState::StartTag {
                        quote: Some(b),
                        slash: false,
                    },
                    b'/' => ProbeState::StartTag {
                        quote: None,
                        slash: true,
                    },
                    b'>' => {
                        if !slash {
                            self.depth += 1;
                        }
                        ProbeState::Content
                    }
                    _ => ProbeState::StartTag {
                        quote: None,
                        slash: slash && b.is_ascii_whitespace(),
                    },
                },
                ProbeState::EndTag => match b {
                    b'>' => {
                        self.depth -= 1;
                        if self.depth < 0 {
                            self.went_negative = true;
                        }
                        ProbeState::Content
                    }
                    _ => ProbeState::EndTag,
                },
                ProbeState::Instruction { question } => match b {
                    b'>' if question => ProbeState::Content,
                    _ => ProbeState::Instruction {
                        question: b == b'?',
                    },
                },
                ProbeState::Bang => match b {
                    b'-' => ProbeState::CommentOpen,
                    b'[' => ProbeState::CData { brackets: 0 },
                    b'>' => ProbeState::Content,
                    _ => ProbeState::Declaration { nesting: 0 },
                },
                ProbeState::CommentOpen => ProbeState::Comment { dashes: 0 },
                ProbeState::Comment { dashes } => match b {
                    b'-' => ProbeState::Comment {
                        dashes: dashes.saturating_add(1),
                    },
                    b'>' if dashes >= 2 => ProbeState::Content,
                    _ => ProbeState::Comment { dashes: 0 },
                },
                ProbeState::CData { brackets } => match b {
                    b']' => ProbeState::CData {
                        brackets: brackets.saturating_add(1),
                    },
                    b'>' if brackets >= 2 => ProbeState::Content,
                    _ => ProbeState::CData { brackets: 0 },
                },
                ProbeState::Declaration { nesting } => match b {
                    b'[' => ProbeState::Declaration {
                        nesting: nesting + 1,
                    },
                    b']' => ProbeState::Declaration {
                        nesting: nesting.saturating_sub(1),
                    },
                    b'>' if nesting == 0 => ProbeState::Content,
                    _ => ProbeState::Declaration { nesting },
                },
            };
        }
    }
}

impl Default for DepthProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward `chunks` to the returned stream as they arrive.
///
/// Must be called inside a Tokio runtime. Dropping the returned stream stops
/// the producer and closes the connection.
pub fn tee(chunks: ChunkStream, options: TeeOptions) -> ByteStream {
    let (sender, receiver) = mpsc::channel(options.queue_depth.clamp(1, 4));
    let producer = forward(chunks, sender, options.probe_interval.max(1))
        .instrument(tracing::Span::current())
        .with_current_subscriber();
    tokio::spawn(producer);
    ReceiverStream::new(receiver)
}

async fn forward(
    mut chunks: ChunkStream,
    sender: mpsc::Sender<Result<Bytes>>,
    probe_interval: u64,
) {
    let url = chunks.url().to_string();
    let mut probe = DepthProbe::new();
    let mut forwarded: u64 = 0;
    let mut reported_negative = false;

    loop {
        match chunks.next_chunk().await {
            Ok(Some(chunk)) => {
                if sender.send(Ok(chunk.clone())).await.is_err() {
                    debug!(url = %url, chunks = forwarded, "consumer dropped the stream");
                    return;
                }
                forwarded += 1;
                probe.feed(&chunk);

                if probe.went_negative() && !reported_negative {
                    reported_negative = true;
                    warn!(url = %url, chunk = forwarded, "closing tag without an open element");
                }
                if forwarded % probe_interval == 0 {
                    info!(
                        url = %url,
                        chunks = forwarded,
                        bytes = chunks.received_bytes(),
                        open_elements = probe.depth(),
                        "streaming"
                    );
                }
            }
            Ok(None) => {
                if probe.is_balanced() {
                    info!(url = %url, chunks = forwarded, bytes = chunks.received_bytes(), "stream complete");
                } else {
                    warn!(
                        url = %url,
                        bytes = chunks.received_bytes(),
                        open_elements = probe.depth(),
                        "stream complete but tags look unbalanced"
                    );
                }
                return;
            }
            Err(err) => {
                warn!(url = %url, error = %err, "stream aborted");
                let _ = sender.send(Err(err)).await;
                return;
            }
        }
    }
}
