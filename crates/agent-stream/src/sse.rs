/// Splits an arbitrarily chunked byte stream into text lines.
///
/// Bytes are buffered rather than text so a UTF-8 sequence cut by a chunk
/// boundary is only decoded once its line is complete.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            lines.push(decode_line(&line[..idx]));
        }
        lines
    }

    /// Flushes whatever is left once the source is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }

    /// Bytes currently held for an incomplete line.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Classification of a single SSE line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// JSON payload of a `data:` line.
    Data(&'a str),
    /// The `data: [DONE]` sentinel.
    Done,
    /// Blank lines, comments, keep-alives and non-data fields.
    Ignored,
}

pub fn parse_data_line(line: &str) -> SseLine<'_> {
    let Some(rest) = line.strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    let payload = rest.strip_prefix(' ').unwrap_or(rest).trim_end();
    if payload.is_empty() {
        SseLine::Ignored
    } else if payload == "[DONE]" {
        SseLine::Done
    } else {
        SseLine::Data(payload)
    }
}
