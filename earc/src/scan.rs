use std::io::Read;

use log::{debug, info, warn};

use ecore::buf::{fill_buf, Tail};

// Every content chunk opens with a 32 byte prefix followed by the zlib stream header. The
// two header bytes of the first chunk are the marker that the next chunk will repeat.
pub const MARKER_AT: u64 = 32;

// When the second marker byte sits at `pos`, the chunk it belongs to started 33 bytes earlier
// (its prefix plus the first marker byte), which is where the previous chunk ends.
pub const BOUNDARY_LAG: u64 = 33;

// Windows shorter than this cannot even hold their own prefix and marker
pub const MIN_SCAN_WINDOW: u64 = 34;

const READ_BLOCK: usize = 8 * 1024;

/// One committed chunk, `offset` is relative to the start of the probed stream.
#[derive(Debug, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub windows: usize,
    pub rejected: usize,
    pub false_triggers: usize,
    pub bytes: u64,
    pub truncated: bool,
}

// State machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Prefix,
    Marker,
    Idle,
    Armed,
}

/// Single forward pass over an oversized content stream, cutting it at marker positions
/// whose preceding window passes `validate`.
pub struct BoundaryScanner<V: FnMut(&[u8]) -> bool> {
    validate: V,
    min_window: u64,

    // Holds stream[window_start..pos]
    acc: Vec<u8>,
    window_start: u64,
    pos: u64,

    marker: [u8; 2],
    state: Probe,
    report: ScanReport,
}

impl<V: FnMut(&[u8]) -> bool> BoundaryScanner<V> {
    pub fn new(validate: V) -> Self {
        BoundaryScanner {
            validate,
            min_window: MIN_SCAN_WINDOW,
            acc: Vec::new(),
            window_start: 0,
            pos: 0,
            marker: [0; 2],
            state: Probe::Prefix,
            report: ScanReport::default(),
        }
    }

    /// Run to the end of `reader`, handing every accepted window to `commit` in order.
    ///
    /// A stream that breaks off is treated as ended, the remainder is still offered as a
    /// final window.
    pub fn scan<R, F, E>(mut self, mut reader: R, mut commit: F) -> Result<ScanReport, E>
    where
        R: Read,
        F: FnMut(Window) -> Result<(), E>,
    {
        let mut block = vec![0u8; READ_BLOCK];

        loop {
            let (tail, len) = fill_buf(&mut reader, &mut block);

            for &byte in block[..len].iter() {
                if let Some(window) = self.push(byte) {
                    commit(window)?;
                }
            }

            match tail {
                Tail::Open => continue,
                Tail::Eof => break,
                Tail::Truncated(kind) => {
                    debug!("probe stream cut at {} bytes ({:?})", self.pos, kind);
                    self.report.truncated = true;
                    break;
                }
            }
        }

        if let Some(window) = self.finish() {
            commit(window)?;
        }

        self.report.bytes = self.pos;
        info!(
            "scan done: {} windows, {} rejected, {} bytes",
            self.report.windows, self.report.rejected, self.report.bytes
        );
        Ok(self.report)
    }

    fn push(&mut self, byte: u8) -> Option<Window> {
        let pos = self.pos;
        self.pos += 1;
        self.acc.push(byte);

        match self.state {
            Probe::Prefix => {
                if pos == MARKER_AT {
                    self.marker[0] = byte;
                    self.state = Probe::Marker;
                }
                None
            }
            Probe::Marker => {
                self.marker[1] = byte;
                self.state = Probe::Idle;
                debug!("marker {:02x} {:02x}", self.marker[0], self.marker[1]);
                None
            }
            _ if byte == self.marker[0] => {
                self.state = Probe::Armed;
                None
            }
            // Disarms on a boundary, the next one needs a fresh marker[0]
            Probe::Armed if byte == self.marker[1] => {
                self.state = Probe::Idle;
                self.candidate(pos - BOUNDARY_LAG)
            }
            _ => {
                self.state = Probe::Idle;
                None
            }
        }
    }

    fn candidate(&mut self, end: u64) -> Option<Window> {
        let len = end.saturating_sub(self.window_start);
        if len < self.min_window {
            debug!("pass: {}-{}", self.window_start, len);
            self.report.false_triggers += 1;
            return None;
        }

        if (self.validate)(&self.acc[..len as usize]) {
            Some(self.take(len))
        } else {
            // Marker bytes showed up inside compressed payload
            debug!("reject: {}-{}", self.window_start, len);
            self.report.rejected += 1;
            None
        }
    }

    fn take(&mut self, len: u64) -> Window {
        let window = Window {
            offset: self.window_start,
            bytes: self.acc.drain(..len as usize).collect(),
        };
        debug!("found: {}-{}", window.offset, len);

        self.window_start += len;
        self.report.windows += 1;
        window
    }

    fn finish(&mut self) -> Option<Window> {
        if self.acc.is_empty() {
            return None;
        }

        let len = self.acc.len() as u64;
        if (self.validate)(&self.acc[..]) {
            Some(self.take(len))
        } else {
            warn!(
                "last window {}-{} does not decompress, stream too short?",
                self.window_start, len
            );
            self.report.rejected += 1;
            None
        }
    }
}
