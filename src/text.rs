//! Pure text transforms shared by the backend connector and the line editor.
//!
//! Nothing here touches I/O; everything is a plain `&str -> String` function
//! so it can be exercised directly in unit tests.

use regex::Regex;
use std::sync::LazyLock;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static ANSI regex")
});

static PROMPT_BG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B\[4.").expect("static prompt-background regex")
});

static PROMPT_FALLBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^@]+@[^:]+:[^$#]*[$#]\s*").expect("static prompt-fallback regex")
});

/// Strips every ANSI escape sequence from `s`.
///
/// Idempotent: running it twice is the same as running it once, since the
/// result contains no more escape sequences to strip.
pub fn strip_ansi(s: &str) -> String {
    ANSI_RE.replace_all(s, "").into_owned()
}

/// Strips a trailing shell prompt off a line of backend output.
///
/// The backend colours its prompt with a background-colour escape
/// (`ESC [ 4 <n>`); if one is present, everything from its last occurrence
/// onward is dropped. Otherwise falls back to stripping a bare
/// `user@host:cwd$ ` pattern.
pub fn remove_prompt(s: &str) -> String {
    if let Some(last) = PROMPT_BG_RE.find_iter(s).last() {
        return s[..last.start()].to_string();
    }
    PROMPT_FALLBACK_RE.replace_all(s, "").into_owned()
}

/// The suffix that would need to be appended to `original` to produce
/// `completed`, or `""` if `completed` doesn't actually extend `original`.
pub fn completion_diff(original: &str, completed: &str) -> String {
    completed
        .strip_prefix(original)
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_csi_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }

    #[test]
    fn strip_ansi_is_idempotent() {
        let s = "\x1b[1;32mgreen\x1b[0m and plain text";
        let once = strip_ansi(s);
        let twice = strip_ansi(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_ansi_leaves_plain_text_untouched() {
        assert_eq!(strip_ansi("no escapes here"), "no escapes here");
    }

    #[test]
    fn remove_prompt_cuts_at_background_escape() {
        let line = "hello\x1b[42muser@box:/tmp$ ";
        assert_eq!(remove_prompt(line), "hello");
    }

    #[test]
    fn remove_prompt_falls_back_to_plain_pattern() {
        let line = "user@box:/tmp$ ";
        assert_eq!(remove_prompt(line), "");
    }

    #[test]
    fn remove_prompt_leaves_non_prompt_text_alone() {
        assert_eq!(remove_prompt("just some output"), "just some output");
    }

    #[test]
    fn completion_diff_returns_suffix() {
        assert_eq!(completion_diff("ls /ho", "ls /home"), "me");
    }

    #[test]
    fn completion_diff_empty_when_not_a_prefix() {
        assert_eq!(completion_diff("ls /ho", "cat /ho"), "");
    }
}
