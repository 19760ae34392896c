//! Terminal escape stripping

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// CSI and OSC sequences, two-byte escapes, then any stray ESC
static ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]|\x1b")
        .expect("escape pattern is valid")
});

/// Remove terminal escape sequences from `text`
///
/// When a removed sequence sat between two whitespace characters only one
/// of them is kept, so `"ERROR \x1b[0m done"` becomes `"ERROR done"`.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if !text.contains('\x1b') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in ESCAPE.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        last = m.end();

        let before_ws = out.chars().next_back().is_some_and(char::is_whitespace);
        let after_ws = text[last..].chars().next().is_some_and(char::is_whitespace);
        if before_ws && after_ws {
            out.pop();
        }
    }
    out.push_str(&text[last..]);

    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_borrowed() {
        assert!(matches!(strip_ansi("hello"), Cow::Borrowed("hello")));
    }

    #[test]
    fn test_strip_colors() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_ansi("\x1b[1;32mINFO\x1b[0m ready"), "INFO ready");
    }

    #[test]
    fn test_collapse_surrounding_whitespace() {
        assert_eq!(
            strip_ansi("\x1b[31mERROR \x1b[0m connection failed"),
            "ERROR connection failed"
        );
        assert_eq!(strip_ansi("a \x1b[1m\x1b[31m b"), "a b");
    }

    #[test]
    fn test_strip_osc_and_stray_escape() {
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
        assert_eq!(strip_ansi("broken\x1b"), "broken");
    }
}
