//! Logging helpers that keep packet dumps and external tool output on a single line.

use std::fmt::Write;

/// Longest preview kept for tool output before the ellipsis.
const MAX_PREVIEW: usize = 300;

/// Escape raw tool output (OpenOCD, socat stderr) for single-line logging.
///
/// Invalid UTF-8 is replaced, `\n`, `\r`, `\t` and backslashes are escaped,
/// other control characters become `\xNN`. Output is capped at
/// [`MAX_PREVIEW`] characters.
pub fn escape_log(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end();
    let mut out = String::with_capacity(text.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in text.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex dump of the first `max` bytes of a packet, with a `..` marker when truncated.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = hex::encode(&data[..data.len().min(max)]);
    if data.len() > max {
        out.push_str("..");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{escape_log, hex_snippet};

    #[test]
    fn escapes_newlines_and_trims_trailing_whitespace() {
        let esc = escape_log(b"Info : halted\nError: timeout\r\n");
        assert_eq!(esc, "Info : halted\\nError: timeout");
    }

    #[test]
    fn escapes_control_bytes() {
        assert_eq!(escape_log(b"a\x1bb"), "a\\x1Bb");
    }

    #[test]
    fn hex_snippet_truncates() {
        assert_eq!(hex_snippet(&[0xf0, 0x01, 0xab], 8), "f001ab");
        assert_eq!(hex_snippet(&[0xf0, 0x01, 0xab], 2), "f001..");
        assert_eq!(hex_snippet(&[], 4), "");
    }
}
