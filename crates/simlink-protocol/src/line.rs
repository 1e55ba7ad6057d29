//! Newline framing shared by device transports and the remote simulator link

/// Delimiter terminating every line on the wire
pub const LINE_DELIMITER: u8 = b'\n';

/// Longest partial line kept while waiting for a delimiter
pub const MAX_LINE_LEN: usize = 4096;

/// Streaming splitter for newline-delimited text
///
/// Bytes are pushed as they arrive from a transport; complete lines are
/// pulled out one at a time with the trailing delimiter removed. Nothing
/// else is stripped, so a device sending `\r\n` delivers lines ending in `\r`.
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
}

impl LineCodec {
    /// Create an empty codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Push raw bytes into the codec buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Drop an unterminated tail that has grown past the limit
        let tail_start = self
            .buffer
            .iter()
            .rposition(|&b| b == LINE_DELIMITER)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let tail_len = self.buffer.len() - tail_start;
        if tail_len > MAX_LINE_LEN {
            tracing::warn!(
                "Discarding {} bytes of unterminated input (limit {})",
                tail_len,
                MAX_LINE_LEN
            );
            self.buffer.truncate(tail_start);
        }
    }

    /// Extract the next complete line, if available
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == LINE_DELIMITER)?;
        let bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&bytes[..bytes.len() - 1]).into_owned())
    }

    /// Number of buffered bytes not yet returned as a line
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Build the outbound device line for a simulator value
pub fn format_device_line(device_event_name: &str, value: &str) -> String {
    format!("{}:{}", device_event_name, value)
}

/// Append the wire delimiter to a line
pub fn frame_line(line: &str) -> Vec<u8> {
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line.as_bytes());
    framed.push(LINE_DELIMITER);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_line() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"GEAR_TOGGLE\n");

        assert_eq!(codec.next_line().as_deref(), Some("GEAR_TOGGLE"));
        assert_eq!(codec.next_line(), None);
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_streaming_split() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"FLA");
        assert_eq!(codec.next_line(), None);

        codec.push_bytes(b"PS_UP\nAP_MA");
        assert_eq!(codec.next_line().as_deref(), Some("FLAPS_UP"));
        assert_eq!(codec.next_line(), None);

        codec.push_bytes(b"STER\n");
        assert_eq!(codec.next_line().as_deref(), Some("AP_MASTER"));
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"A\nB\n\nC\n");

        assert_eq!(codec.next_line().as_deref(), Some("A"));
        assert_eq!(codec.next_line().as_deref(), Some("B"));
        assert_eq!(codec.next_line().as_deref(), Some(""));
        assert_eq!(codec.next_line().as_deref(), Some("C"));
        assert_eq!(codec.next_line(), None);
    }

    #[test]
    fn test_carriage_return_is_kept() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"GEAR\r\n");
        assert_eq!(codec.next_line().as_deref(), Some("GEAR\r"));
    }

    #[test]
    fn test_oversized_tail_discarded() {
        let mut codec = LineCodec::new();
        codec.push_bytes(b"OK\n");
        codec.push_bytes(&vec![b'x'; MAX_LINE_LEN + 1]);

        assert_eq!(codec.next_line().as_deref(), Some("OK"));
        assert_eq!(codec.next_line(), None);
        assert_eq!(codec.buffered_len(), 0);

        codec.push_bytes(b"NEXT\n");
        assert_eq!(codec.next_line().as_deref(), Some("NEXT"));
    }

    #[test]
    fn test_format_and_frame() {
        assert_eq!(format_device_line("GEAR_LED", "1"), "GEAR_LED:1");
        assert_eq!(frame_line("GEAR_LED:1"), b"GEAR_LED:1\n".to_vec());
    }

    proptest! {
        #[test]
        fn lines_survive_arbitrary_chunking(
            lines in prop::collection::vec("[A-Z_:0-9]{0,24}", 1..8),
            split in 0usize..256,
        ) {
            let wire: Vec<u8> = lines.iter().flat_map(|l| frame_line(l)).collect();
            let split = split.min(wire.len());

            let mut codec = LineCodec::new();
            codec.push_bytes(&wire[..split]);
            let mut out = Vec::new();
            while let Some(line) = codec.next_line() {
                out.push(line);
            }
            codec.push_bytes(&wire[split..]);
            while let Some(line) = codec.next_line() {
                out.push(line);
            }

            prop_assert_eq!(out, lines);
        }
    }
}
