//! Streaming decoders over one snapshot document.
//!
//! Each decoder wraps a fresh [`quick_xml::Reader`] and is used for exactly
//! one file. Only the element being decoded is held in memory.
//!
//! - [`EntryDecoder`] materializes every `entry` into an [`Entry`].
//! - [`FragmentDecoder`] captures the verbatim bytes of every `entry` and
//!   extracts only its `id`.
//! - [`TombstoneDecoder`] materializes every `deleted-entry`.
//!
//! A token-level error ends the iteration after yielding the error once;
//! an entry whose own structure is unusable is skipped and counted.

use std::io::{BufRead, BufReader, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use crate::FeedError;
use crate::model::{Entry, Tombstone};
use crate::xml::{XmlNode, local_name, unescape_lossy};

/// Read buffer per open snapshot file.
pub const READ_BUFFER_BYTES: usize = 256 << 10;

/// Bytes of already-consumed input the fragment recorder may hold before compacting.
const RECORDER_SLACK_BYTES: usize = 64 << 10;

/// Outcome of decoding one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub units: usize,
    /// Elements skipped because their own structure was unusable.
    pub dropped: usize,
}

/// A unit the worker pool can decode out of a snapshot file.
pub trait DecodedUnit: Sized + Send {
    /// Short label for logs.
    const KIND: &'static str;

    /// Decode every unit in `source`, handing each to `emit`.
    fn decode_all<R: Read>(
        source: R,
        emit: &mut dyn FnMut(Self),
    ) -> Result<DecodeSummary, FeedError>;
}

/// Scans a document for elements with a given local name.
struct ElementScanner<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    name: &'static [u8],
    done: bool,
}

impl<R: BufRead> ElementScanner<R> {
    fn new(source: R, name: &'static [u8]) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::new(),
            name,
            done: false,
        }
    }

    fn next_node(&mut self) -> Option<Result<XmlNode, FeedError>> {
        if self.done {
            return None;
        }
        let result = self.scan();
        match &result {
            Ok(None) | Err(_) => self.done = true,
            Ok(Some(_)) => {}
        }
        result.transpose()
    }

    fn scan(&mut self) -> Result<Option<XmlNode>, FeedError> {
        loop {
            self.buf.clear();
            let root = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) if e.local_name().as_ref() == self.name => XmlNode::open(&e),
                Event::Empty(e) if e.local_name().as_ref() == self.name => {
                    return Ok(Some(XmlNode::open(&e)));
                }
                Event::Eof => return Ok(None),
                _ => continue,
            };
            let node = XmlNode::read_children(&mut self.reader, root, &mut self.buf)?;
            return Ok(Some(node));
        }
    }
}

/// Structured-mode decoder: yields one [`Entry`] per `entry` element.
pub struct EntryDecoder<R> {
    scanner: ElementScanner<R>,
    dropped: usize,
}

impl<R: BufRead> EntryDecoder<R> {
    pub fn new(source: R) -> Self {
        Self {
            scanner: ElementScanner::new(source, b"entry"),
            dropped: 0,
        }
    }

    /// Entries skipped because their outer structure was unparseable.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<R: BufRead> Iterator for EntryDecoder<R> {
    type Item = Result<Entry, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.scanner.next_node()? {
                Ok(node) => match Entry::from_node(&node) {
                    Ok(entry) => return Some(Ok(entry)),
                    Err(e) => {
                        debug!(error = %e, "entry dropped");
                        self.dropped += 1;
                    }
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl DecodedUnit for Entry {
    const KIND: &'static str = "entry";

    fn decode_all<R: Read>(
        source: R,
        emit: &mut dyn FnMut(Self),
    ) -> Result<DecodeSummary, FeedError> {
        let mut decoder = EntryDecoder::new(BufReader::with_capacity(READ_BUFFER_BYTES, source));
        let mut units = 0;
        for entry in decoder.by_ref() {
            emit(entry?);
            units += 1;
        }
        Ok(DecodeSummary {
            units,
            dropped: decoder.dropped(),
        })
    }
}

/// Yields one [`Tombstone`] per `deleted-entry` element.
pub struct TombstoneDecoder<R> {
    scanner: ElementScanner<R>,
    dropped: usize,
}

impl<R: BufRead> TombstoneDecoder<R> {
    pub fn new(source: R) -> Self {
        Self {
            scanner: ElementScanner::new(source, b"deleted-entry"),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<R: BufRead> Iterator for TombstoneDecoder<R> {
    type Item = Result<Tombstone, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.scanner.next_node()? {
                Ok(node) => match Tombstone::from_node(&node) {
                    Ok(t) => return Some(Ok(t)),
                    Err(e) => {
                        debug!(error = %e, "tombstone dropped");
                        self.dropped += 1;
                    }
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl DecodedUnit for Tombstone {
    const KIND: &'static str = "tombstone";

    fn decode_all<R: Read>(
        source: R,
        emit: &mut dyn FnMut(Self),
    ) -> Result<DecodeSummary, FeedError> {
        let mut decoder =
            TombstoneDecoder::new(BufReader::with_capacity(READ_BUFFER_BYTES, source));
        let mut units = 0;
        for tombstone in decoder.by_ref() {
            emit(tombstone?);
            units += 1;
        }
        Ok(DecodeSummary {
            units,
            dropped: decoder.dropped(),
        })
    }
}

/// The verbatim bytes of one `entry` element and its `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: String,
    /// From `<entry` through the matching `</entry>`, exactly as in the file.
    pub bytes: Vec<u8>,
}

/// Keeps every byte read from the inner source that may still belong to a
/// fragment. Offsets are absolute positions in the source.
struct Recorder<R> {
    inner: R,
    window: Vec<u8>,
    window_start: u64,
}

impl<R> Recorder<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            window: Vec::new(),
            window_start: 0,
        }
    }

    fn slice(&self, start: u64, end: u64) -> Option<&[u8]> {
        let from = usize::try_from(start.checked_sub(self.window_start)?).ok()?;
        let to = usize::try_from(end.checked_sub(self.window_start)?).ok()?;
        self.window.get(from..to)
    }

    /// Absolute offset of the last `<` before `end`.
    fn tag_open_before(&self, end: u64) -> Option<u64> {
        let to = usize::try_from(end.checked_sub(self.window_start)?).ok()?;
        let idx = self.window.get(..to)?.iter().rposition(|&b| b == b'<')?;
        Some(self.window_start + idx as u64)
    }

    /// Forget bytes before `pos`, once enough of them accumulate.
    fn release_before(&mut self, pos: u64) {
        let Some(n) = pos
            .checked_sub(self.window_start)
            .and_then(|n| usize::try_from(n).ok())
        else {
            return;
        };
        if n >= RECORDER_SLACK_BYTES && n <= self.window.len() {
            self.window.drain(..n);
            self.window_start += n as u64;
        }
    }
}

impl<R: Read> Read for Recorder<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(out)?;
        self.window.extend_from_slice(&out[..n]);
        Ok(n)
    }
}

/// Fragment-mode decoder: yields one [`Fragment`] per `entry` element.
pub struct FragmentDecoder<R> {
    reader: Reader<BufReader<Recorder<R>>>,
    buf: Vec<u8>,
    done: bool,
}

impl<R: Read> FragmentDecoder<R> {
    pub fn new(source: R) -> Self {
        let recorder = Recorder::new(source);
        Self {
            reader: Reader::from_reader(BufReader::with_capacity(READ_BUFFER_BYTES, recorder)),
            buf: Vec::new(),
            done: false,
        }
    }

    fn stream_offset(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn recorder(&self) -> &Recorder<R> {
        self.reader.get_ref().get_ref()
    }

    fn scan(&mut self) -> Result<Option<Fragment>, FeedError> {
        loop {
            self.buf.clear();
            let is_entry = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => e.local_name().as_ref() == b"entry",
                Event::Eof => return Ok(None),
                _ => false,
            };
            if is_entry {
                return self.capture().map(Some);
            }
            // The `<` of the next tag may already be consumed with the text before it.
            let keep_from = self.stream_offset().saturating_sub(1);
            self.reader.get_mut().get_mut().release_before(keep_from);
        }
    }

    /// Read up to the `</entry>` matching the start tag just consumed.
    fn capture(&mut self) -> Result<Fragment, FeedError> {
        let tag_end = self.stream_offset();
        let start = self
            .recorder()
            .tag_open_before(tag_end)
            .ok_or_else(|| FeedError::Truncated("entry".into()))?;

        let mut depth = 1usize;
        let mut in_id = false;
        let mut id = String::new();
        while depth > 0 {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    depth += 1;
                    in_id = depth == 2 && local_name(&e) == "id";
                }
                Event::End(_) => {
                    depth -= 1;
                    in_id = false;
                }
                Event::Text(t) if in_id => id.push_str(&unescape_lossy(&t)),
                Event::CData(c) if in_id => id.push_str(&String::from_utf8_lossy(&c)),
                Event::Eof => return Err(FeedError::Truncated("entry".into())),
                _ => {}
            }
        }

        let end = self.stream_offset();
        let bytes = self
            .recorder()
            .slice(start, end)
            .ok_or_else(|| FeedError::Truncated("entry".into()))?
            .to_vec();
        self.reader.get_mut().get_mut().release_before(end);
        Ok(Fragment {
            id: id.trim().to_string(),
            bytes,
        })
    }
}

impl<R: Read> Iterator for FragmentDecoder<R> {
    type Item = Result<Fragment, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.scan();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result.transpose()
    }
}

impl DecodedUnit for Fragment {
    const KIND: &'static str = "fragment";

    fn decode_all<R: Read>(
        source: R,
        emit: &mut dyn FnMut(Self),
    ) -> Result<DecodeSummary, FeedError> {
        let mut units = 0;
        for fragment in FragmentDecoder::new(source) {
            emit(fragment?);
            units += 1;
        }
        Ok(DecodeSummary { units, dropped: 0 })
    }
}
