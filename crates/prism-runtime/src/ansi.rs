//! ANSI escape stripping.

use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences: colours, cursor movement, erase.
static ANSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("Invalid ANSI regex"));

/// Removes ANSI escape sequences, leaving all other text untouched.
pub fn strip_ansi(s: &str) -> String {
    ANSI_REGEX.replace_all(s, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_colour_codes() {
        assert_eq!(
            strip_ansi("\x1b[1m\x1b[32mApply complete!\x1b[0m Resources: 1 added."),
            "Apply complete! Resources: 1 added."
        );
    }

    #[test]
    fn test_strips_cursor_sequences() {
        assert_eq!(strip_ansi("\x1b[2K\x1b[1Gdone"), "done");
        assert_eq!(strip_ansi("\x1b[?25lhidden"), "hidden");
    }

    #[test]
    fn test_plain_text_unchanged() {
        let text = "Plan: 3 to add, 1 to change, 2 to destroy. [x] {\"a\":1}";
        assert_eq!(strip_ansi(text), text);
        assert_eq!(strip_ansi(""), "");
    }
}
