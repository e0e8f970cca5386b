//! ANSI escape stripping used to clean up the tail of the rolling
//! buffer before searching it for a resume token.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches CSI (`ESC [ … letter`), OSC (`ESC ] … BEL|ST`), charset
/// designators, keypad mode switches, line-attribute sequences, and
/// the remaining two-character escapes.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \x1b\[[0-9;?]*[A-Za-z]        # CSI
        | \x1b\][^\x07]*(?:\x07|\x1b\\) # OSC terminated by BEL or ST
        | \x1b[()][A-Za-z0-9]          # charset designation
        | \x1b[=>]                     # keypad mode
        | \x1b\#[0-9]                  # line attribute
        | \x1b[A-Za-z]                 # remaining two-char escapes
        ",
    )
    .expect("static ANSI regex is valid")
});

pub fn strip_ansi(input: &str) -> String {
    ANSI_ESCAPE.replace_all(input, "").into_owned()
}

/// Regex used when a policy record has no `resume_pattern` of its own.
pub static DEFAULT_RESUME_PATTERN: &str = r"--resume\s+(\S+)";

/// Extracts the first capture group of `pattern` (or the default)
/// from the cleaned tail of `buffer`, scanning at most the last
/// `tail_bytes` bytes.
pub fn extract_resume_id(buffer: &[u8], pattern: Option<&str>, tail_bytes: usize) -> Option<String> {
    let start = buffer.len().saturating_sub(tail_bytes);
    let tail = String::from_utf8_lossy(&buffer[start..]);
    let cleaned = strip_ansi(&tail);

    let re = match pattern {
        Some(p) => Regex::new(p).ok()?,
        None => Regex::new(DEFAULT_RESUME_PATTERN).ok()?,
    };
    re.captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_csi_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }

    #[test]
    fn strips_osc_title_sequence() {
        assert_eq!(strip_ansi("\x1b]0;title\x07prompt"), "prompt");
    }

    #[test]
    fn extracts_default_resume_pattern() {
        let buf = b"some output\nrun with --resume abc-123 to continue\n";
        let id = extract_resume_id(buf, None, 4096);
        assert_eq!(id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn extracts_custom_resume_pattern() {
        let buf = b"session-token=xyz987 ready";
        let id = extract_resume_id(buf, Some(r"session-token=(\S+)"), 4096);
        assert_eq!(id.as_deref(), Some("xyz987"));
    }

    #[test]
    fn returns_none_when_absent() {
        let buf = b"nothing interesting here";
        assert_eq!(extract_resume_id(buf, None, 4096), None);
    }

    #[test]
    fn only_scans_the_tail_window() {
        let mut buf = vec![b'a'; 5000];
        buf.extend_from_slice(b" --resume deep-token");
        // Tail window too small to reach the token near the front... but the
        // token is appended at the very end, so a tiny window still finds it.
        assert_eq!(
            extract_resume_id(&buf, None, 64).as_deref(),
            Some("deep-token")
        );
        // A window that only covers filler bytes finds nothing.
        let mut buf2 = vec![b'a'; 5000];
        buf2.extend_from_slice(b" --resume deep-token");
        buf2.extend_from_slice(&vec![b'b'; 100]);
        assert_eq!(extract_resume_id(&buf2, None, 64), None);
    }
}
