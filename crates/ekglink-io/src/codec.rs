//! Wire framing and receive-side text decoding.
//!
//! # Host to device
//!
//! Every sender variant transmits a stream of 4-byte little-endian IEEE-754
//! single-precision floats. Each value is its own flushed write:
//!
//! ```text
//! [1.0, -2.5]  ->  00 00 80 3F | 00 00 20 C0
//! ```
//!
//! # Device to host
//!
//! Text acknowledgements and diagnostics are newline-terminated lines. The
//! [`LineAssembler`] turns arbitrarily chunked input into complete lines:
//! invalid UTF-8 is dropped, `\r`, `\n` and `\r\n` all end a line, and an
//! unterminated tail is carried into the next chunk.

use bytes::{Buf, BufMut, BytesMut};

use ekglink_core::error::{Error, Result};

/// Size of one encoded value on the wire.
pub const VALUE_LEN: usize = 4;

/// Values per row in the human-readable sample report.
pub const REPORT_COLUMNS: usize = 6;

/// Encode one value as it appears on the wire.
pub fn encode_value(value: f32) -> [u8; VALUE_LEN] {
    value.to_le_bytes()
}

/// Encode a whole frame.
///
/// # Example
///
/// ```
/// use ekglink_io::codec::encode_sample;
///
/// let bytes = encode_sample(&[1.0, -2.5]);
/// assert_eq!(bytes, [0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x20, 0xC0]);
/// ```
pub fn encode_sample(values: &[f32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * VALUE_LEN);
    for &value in values {
        buf.put_f32_le(value);
    }
    buf.to_vec()
}

/// Decode a frame back into values.
///
/// Fails if `bytes` is not a whole number of values.
pub fn decode_sample(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % VALUE_LEN != 0 {
        return Err(Error::InvalidParameter(format!(
            "frame length {} is not a multiple of {}",
            bytes.len(),
            VALUE_LEN
        )));
    }
    let mut buf = bytes;
    let mut values = Vec::with_capacity(bytes.len() / VALUE_LEN);
    while buf.has_remaining() {
        values.push(buf.get_f32_le());
    }
    Ok(values)
}

/// Render values for display, [`REPORT_COLUMNS`] per row, each `{:8.3}`.
pub fn format_values(values: &[f32]) -> Vec<String> {
    values
        .chunks(REPORT_COLUMNS)
        .map(|row| {
            row.iter()
                .map(|v| format!("{:8.3}", v))
                .collect::<Vec<_>>()
                .join(" ")
                .trim_end()
                .to_string()
        })
        .collect()
}

/// Move the longest decodable prefix of `pending` into a `String`.
///
/// Invalid sequences are dropped. An incomplete sequence at the very end is
/// left in `pending`, since the next chunk may complete it.
fn drain_decodable(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(s) => {
                out.push_str(s);
                start = pending.len();
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                out.push_str(std::str::from_utf8(&pending[start..valid_end]).unwrap_or_default());
                match e.error_len() {
                    Some(bad) => start = valid_end + bad,
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    out
}

/// Reassembles text lines from arbitrarily chunked bytes.
///
/// Feeding the same byte stream through any chunking yields the same lines
/// in the same order.
#[derive(Debug, Default)]
pub struct LineAssembler {
    /// Bytes not yet decoded (an incomplete UTF-8 sequence).
    undecoded: Vec<u8>,
    /// Decoded text of the current, unterminated line.
    partial: String,
    /// The last character seen was `\r`; a following `\n` belongs to it.
    after_cr: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.undecoded.extend_from_slice(chunk);
        let text = drain_decodable(&mut self.undecoded);

        let mut lines = Vec::new();
        for c in text.chars() {
            if self.after_cr {
                self.after_cr = false;
                if c == '\n' {
                    continue;
                }
            }
            match c {
                '\r' => {
                    lines.push(std::mem::take(&mut self.partial));
                    self.after_cr = true;
                }
                '\n' => lines.push(std::mem::take(&mut self.partial)),
                _ => self.partial.push(c),
            }
        }
        lines
    }

    /// Text received after the last line ending.
    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// Consume the assembler and return whatever never saw a line ending.
    pub fn into_remainder(self) -> Option<String> {
        let mut rest = self.partial;
        rest.push_str(&String::from_utf8_lossy(&self.undecoded));
        (!rest.is_empty()).then_some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Frame encoding
    // -----------------------------------------------------------------------

    #[test]
    fn encode_known_values() {
        assert_eq!(
            encode_sample(&[1.0, -2.5]),
            vec![0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x20, 0xC0]
        );
        assert_eq!(encode_value(1.0), [0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn encoded_length_is_four_per_value() {
        let values: Vec<f32> = (0..140).map(|i| i as f32 * 0.25 - 10.0).collect();
        assert_eq!(encode_sample(&values).len(), 4 * values.len());
    }

    #[test]
    fn decode_reproduces_bits() {
        let values = [0.0f32, -0.0, f32::MIN_POSITIVE, f32::MAX, -1.5e-7, f32::NAN];
        let decoded = decode_sample(&encode_sample(&values)).unwrap();
        let bits: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        let decoded_bits: Vec<u32> = decoded.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, decoded_bits);
    }

    #[test]
    fn decode_rejects_ragged_frame() {
        assert!(decode_sample(&[0x00, 0x00, 0x80]).is_err());
    }

    // -----------------------------------------------------------------------
    // Report formatting
    // -----------------------------------------------------------------------

    #[test]
    fn format_six_per_row() {
        let values: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        let rows = format_values(&values);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            "   1.000    2.000    3.000    4.000    5.000    6.000"
        );
        assert_eq!(rows[1], "   7.000    8.000");
    }

    #[test]
    fn format_full_frame_row_count() {
        let values = vec![0.5f32; 140];
        let rows = format_values(&values);
        assert_eq!(rows.len(), 24);
        assert_eq!(rows[23].split_whitespace().count(), 2);
    }

    #[test]
    fn format_negative_and_rounding() {
        assert_eq!(format_values(&[-0.12345]), vec!["  -0.123"]);
    }

    // -----------------------------------------------------------------------
    // Line assembly
    // -----------------------------------------------------------------------

    #[test]
    fn lines_across_chunks() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"AB\r\nC"), vec!["AB"]);
        assert_eq!(asm.partial(), "C");
        assert_eq!(asm.push(b"D\n"), vec!["CD"]);
        assert_eq!(asm.partial(), "");
    }

    #[test]
    fn all_line_endings_normalized() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"a\rb\nc\r\nd\n"), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn crlf_split_across_chunks_is_one_ending() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"AB\r"), vec!["AB"]);
        assert_eq!(asm.push(b"\nCD\n"), vec!["CD"]);
    }

    #[test]
    fn blank_lines_are_lines() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"\n\r\r\n"), vec!["", "", ""]);
    }

    #[test]
    fn invalid_utf8_dropped() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.push(b"O\xFFK\n"), vec!["OK"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let bytes = "µV 12\n".as_bytes();
        let mut asm = LineAssembler::new();
        assert!(asm.push(&bytes[..1]).is_empty());
        assert_eq!(asm.push(&bytes[1..]), vec!["µV 12"]);
    }

    #[test]
    fn truncated_sequence_followed_by_ascii_is_dropped() {
        let mut asm = LineAssembler::new();
        assert!(asm.push(&[0xE2, 0x82]).is_empty());
        assert_eq!(asm.push(b"x\n"), vec!["x"]);
    }

    #[test]
    fn remainder_is_kept_not_emitted() {
        let mut asm = LineAssembler::new();
        assert!(asm.push(b"no newline yet").is_empty());
        assert_eq!(asm.into_remainder().as_deref(), Some("no newline yet"));

        let asm = LineAssembler::new();
        assert_eq!(asm.into_remainder(), None);
    }

    #[test]
    fn chunk_boundary_independence() {
        let stream: &[u8] = b"ready\r\nOK 1\rOK 2\n\xC2\xB5V\r\n\xFFtail\r\nlast";

        let mut whole = LineAssembler::new();
        let expected = whole.push(stream);
        let expected_rest = whole.into_remainder();
        assert_eq!(expected, vec!["ready", "OK 1", "OK 2", "µV", "tail"]);

        // Every pair of cut points.
        for i in 0..=stream.len() {
            for j in i..=stream.len() {
                let mut asm = LineAssembler::new();
                let mut lines = asm.push(&stream[..i]);
                lines.extend(asm.push(&stream[i..j]));
                lines.extend(asm.push(&stream[j..]));
                assert_eq!(lines, expected, "cuts at {i}, {j}");
                assert_eq!(asm.into_remainder(), expected_rest, "cuts at {i}, {j}");
            }
        }

        // One byte at a time.
        let mut asm = LineAssembler::new();
        let lines: Vec<String> = stream.iter().flat_map(|b| asm.push(&[*b])).collect();
        assert_eq!(lines, expected);
    }
}
