use std::borrow::Cow;

/// Removes C0 control characters (except tab, newline, carriage return) and DEL.
///
/// Feed titles and descriptions are attacker-controlled; anything we persist
/// goes through here first. Returns `Cow::Borrowed` when nothing was stripped.
///
/// # Examples
///
/// ```
/// use harvester::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("plain"), "plain");
/// assert_eq!(strip_control_chars("a\x07b"), "ab");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s.chars().any(is_stripped);
    if !needs_strip {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}

fn is_stripped(c: char) -> bool {
    (c.is_control() && c != '\t' && c != '\n' && c != '\r') || c == '\u{7f}'
}

/// Truncates to at most `max` Unicode scalar values.
///
/// Never splits a code point; returns the input unchanged when it fits.
pub fn truncate_chars(s: &str, max: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max) {
        Some((idx, _)) => Cow::Owned(s[..idx].to_owned()),
        None => Cow::Borrowed(s),
    }
}

/// First non-empty line of `s`, trimmed.
pub fn first_line(s: &str) -> &str {
    s.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Collapses runs of spaces and tabs into one space and runs of blank lines
/// into a single paragraph break.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0usize;

    for line in s.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(&words.join(" "));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_borrowed_when_clean() {
        assert!(matches!(strip_control_chars("hello\nworld"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_escape_and_bell() {
        assert_eq!(strip_control_chars("Evil\x1b Feed\x07"), "Evil Feed");
    }

    #[test]
    fn test_truncate_counts_code_points() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_first_line_skips_blank_lines() {
        assert_eq!(first_line("\n\n  caption here \nsecond"), "caption here");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn test_collapse_whitespace() {
        let input = "  one   two \n\n\n three\tfour\nfive ";
        assert_eq!(collapse_whitespace(input), "one two\n\nthree four\nfive");
    }
}
