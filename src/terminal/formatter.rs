use std::sync::LazyLock;

use regex::Regex;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x1b\x{9b}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PRZcf-ntqry=><~]))",
    )
    .expect("ANSI escape pattern is valid")
});

/// Renders raw process output the way a terminal screen would show it.
///
/// `\b` steps the cursor back one cell and `\r` returns it to the start of the
/// current line. Cells behind the cursor are not erased, so text that was later
/// overwritten by a shorter frame stays visible, as with progress bars:
/// `"aaaaa\rbb"` renders as `"bbaaa"`. The visible extent is the longest the
/// output ever was at a carriage return, across the whole scan. Color and other
/// ANSI control sequences are removed from the result.
pub fn format_terminal(raw: &[u8]) -> String {
    let input = String::from_utf8_lossy(raw);
    let mut screen: Vec<char> = Vec::with_capacity(input.len());
    let mut cursor = 0usize;
    let mut longest = 0usize;

    for ch in input.chars() {
        match ch {
            '\u{8}' => cursor = cursor.saturating_sub(1),
            '\r' => {
                longest = longest.max(cursor);
                cursor = screen[..cursor]
                    .iter()
                    .rposition(|&c| c == '\n')
                    .map_or(0, |newline| newline + 1);
            }
            _ => {
                if cursor < screen.len() {
                    screen[cursor] = ch;
                } else {
                    screen.push(ch);
                }
                cursor += 1;
            }
        }
    }

    let visible = longest.max(cursor);
    let text: String = screen[..visible].iter().collect();
    strip_ansi(&text)
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_input() {
        assert_eq!(format_terminal(b""), "");
    }

    #[test]
    fn backspace_removes_previous_char() {
        assert_eq!(format_terminal(b"ab\x08c"), "ac");
    }

    #[test]
    fn backspace_on_empty_screen_is_noop() {
        assert_eq!(format_terminal(b"\x08\x08x"), "x");
    }

    #[test]
    fn carriage_return_without_newline_resets_everything() {
        assert_eq!(format_terminal(b"abc\rdef"), "def");
    }

    #[test]
    fn carriage_return_returns_to_line_start() {
        assert_eq!(format_terminal(b"line1\nabc\rdef"), "line1\ndef");
    }

    #[test]
    fn shorter_overwrite_keeps_longest_frame() {
        assert_eq!(format_terminal(b"aaaaa\rbb"), "bbaaa");
    }

    #[test]
    fn progress_bar_shows_last_frame() {
        let raw = b"downloading\n10%\r50%\r100%\ndone\n";
        assert_eq!(format_terminal(raw), "downloading\n100%\ndone\n");
    }

    #[test]
    fn longest_extent_is_tracked_across_lines() {
        // The extent recorded on the long line is kept even after later lines rewrite it.
        assert_eq!(format_terminal(b"a\nbbbbbb\rc\n"), "a\nc\nbbbb");
    }

    #[test]
    fn strips_color_codes() {
        assert_eq!(
            format_terminal(b"\x1b[31merror\x1b[0m: missing file"),
            "error: missing file"
        );
    }

    #[test]
    fn strips_osc_title_sequence() {
        assert_eq!(strip_ansi("\x1b]0;title\x07prompt$"), "prompt$");
    }

    #[test]
    fn keeps_multibyte_characters_intact() {
        assert_eq!(format_terminal("héllo\u{8}\u{8}p!".as_bytes()), "hélp!");
    }
}
