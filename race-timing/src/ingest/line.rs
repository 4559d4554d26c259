const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Reassembles newline-delimited lines from arbitrarily split reads.
///
/// Bytes are accumulated until a `\n` shows up; everything after the last
/// delimiter stays buffered for the next [`push`](Self::push). Blank lines
/// are skipped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let text = String::from_utf8_lossy(&self.pending[consumed..end]);
            let trimmed = text.trim_end_matches(LINE_ENDINGS);
            if !trimmed.trim().is_empty() {
                lines.push(trimmed.to_string());
            }
            consumed = end + 1;
        }
        self.pending.drain(..consumed);
        lines
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
