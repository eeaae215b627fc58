//! Incremental end-of-headers detection
//!
//! Request headers end at the first `\r\n\r\n`. The scanner is a four state
//! automaton over that sequence, fed chunk by chunk as bytes arrive, so no
//! line buffering is needed and a boundary split across reads is still found.

const BOUNDARY: [u8; 4] = *b"\r\n\r\n";

/// Header boundary scanner
#[derive(Debug, Clone, Default)]
pub struct HeaderScanner {
    /// How many bytes of `BOUNDARY` have matched so far
    matched: usize,
    /// Bytes consumed so far
    offset: usize,
    /// Offset just past the boundary, once found
    end: Option<usize>,
}

impl HeaderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the stream.
    ///
    /// Returns the stream offset just past `\r\n\r\n` once the boundary has
    /// been seen. Bytes fed after that are counted but not scanned.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        if self.end.is_some() {
            self.offset += chunk.len();
            return self.end;
        }

        for (i, &b) in chunk.iter().enumerate() {
            self.matched = if b == BOUNDARY[self.matched] {
                self.matched + 1
            } else if b == b'\r' {
                // a CR always starts a fresh candidate
                1
            } else {
                0
            };

            if self.matched == BOUNDARY.len() {
                let end = self.offset + i + 1;
                self.end = Some(end);
                self.offset += chunk.len();
                return self.end;
            }
        }

        self.offset += chunk.len();
        None
    }

    /// Offset just past the boundary, if found
    pub fn boundary(&self) -> Option<usize> {
        self.end
    }

    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }

    /// Total bytes fed
    pub fn consumed(&self) -> usize {
        self.offset
    }
}
