//! Logging utilities for sanitizing multi-line user/content strings so logs stay single-line.
//! Escapes control characters that otherwise break log readability.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Truncates very long strings with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
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
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Stand-in for a credential in log output. Only the length class leaks.
pub fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Log-safe rendering of one input line. Lines typed while a password
/// prompt is active must go through [`mask_secret`] instead.
pub fn preview_line(line: &str) -> String {
    const MAX_LINE: usize = 80;
    let escaped = escape_log(line);
    if escaped.chars().count() > MAX_LINE {
        let cut: String = escaped.chars().take(MAX_LINE).collect();
        format!("{}…", cut)
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_truncates() {
        let s = "Line1\nLine2\r\tEnd";
        let esc = escape_log(s);
        assert_eq!(esc, "Line1\\nLine2\\r\\tEnd");
        assert!(escape_log(&"x".repeat(400)).ends_with('…'));
    }

    #[test]
    fn secrets_never_echo() {
        assert_eq!(mask_secret("hunter2"), "<redacted>");
        assert_eq!(mask_secret(""), "<empty>");
        assert!(!mask_secret("hunter2").contains("hunter"));
    }

    #[test]
    fn previews_are_bounded() {
        assert_eq!(preview_line("look"), "look");
        assert_eq!(preview_line(&"a".repeat(200)).chars().count(), 81);
    }
}
