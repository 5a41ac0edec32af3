//! Incremental line assembly for the upstream `data: {json}` stream.
//!
//! Network chunks land at arbitrary byte offsets: a chunk may end in the
//! middle of a multi-byte UTF-8 sequence or in the middle of a record. The
//! decoder owns both tails so no chunking of the same byte sequence can
//! change the decoded output.

/// Stateful chunk-to-line decoder. One instance per relay invocation.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    /// Undecoded byte tail — at most one incomplete UTF-8 sequence.
    bytes: Vec<u8>,
    /// Decoded text that has not yet seen its terminating newline.
    text: String,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and get back every line it completes, in
    /// order, without their line terminators. The trailing fragment stays
    /// buffered until its newline arrives in a later chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        self.decode_pending();
        self.drain_lines()
    }

    /// Consume the decoder at stream end. Returns the trailing fragment
    /// unless it is empty or whitespace-only. An incomplete UTF-8 tail is
    /// dropped at this point; it can no longer complete.
    pub fn finish(self) -> Option<String> {
        let tail = self.text.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    /// Move every decodable byte from `bytes` into `text`, retaining an
    /// incomplete trailing sequence and substituting U+FFFD for byte runs
    /// that can never decode.
    fn decode_pending(&mut self) {
        let mut offset = 0;
        loop {
            match std::str::from_utf8(&self.bytes[offset..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    offset = self.bytes.len();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    // The prefix was just validated; lossy conversion of it
                    // performs no replacement.
                    self.text.push_str(&String::from_utf8_lossy(
                        &self.bytes[offset..offset + valid_len],
                    ));
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.text.push('\u{FFFD}');
                            offset += valid_len + invalid_len;
                        }
                        None => {
                            // Incomplete sequence: keep it for the next chunk.
                            offset += valid_len;
                            break;
                        }
                    }
                }
            }
        }
        self.bytes.drain(..offset);
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.text.find('\n') {
            let line: String = self.text.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }
}
