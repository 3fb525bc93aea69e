//! Subject text helpers: HTML escaping and URL slugs.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

// ── Regex patterns ──────────────────────────────────────────────────────

static RE_NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\s\p{L}\p{Nd}]").unwrap());

static RE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Letters that do not decompose into a base letter plus combining marks.
const TRANSLITERATIONS: &[(char, &str)] = &[
    ('ß', "ss"),
    ('Æ', "AE"),
    ('æ', "ae"),
    ('Ø', "O"),
    ('ø', "o"),
    ('Œ', "OE"),
    ('œ', "oe"),
    ('Đ', "D"),
    ('đ', "d"),
    ('Ł', "L"),
    ('ł', "l"),
    ('Þ', "TH"),
    ('þ', "th"),
    ('ı', "i"),
];

/// Escape `& < > " '` for safe inclusion in HTML.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Strip diacritics, replace every run of non-alphanumerics with `-` and
/// trim dashes from both ends. Case is preserved.
pub fn slug(input: &str) -> String {
    let folded = transliterate(input);
    let spaced = RE_NON_WORD.replace_all(&folded, " ");
    let dashed = RE_SPACE.replace_all(&spaced, "-");
    dashed.trim_matches('-').to_string()
}

fn transliterate(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        match TRANSLITERATIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_specials() {
        assert_eq!(
            html_escape(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#039;Jerry&#039;&lt;/b&gt;"
        );
        assert_eq!(html_escape("plain"), "plain");
    }

    #[test]
    fn slug_replaces_punctuation_runs() {
        assert_eq!(slug("Re: Meeting tomorrow!"), "Re-Meeting-tomorrow");
        assert_eq!(slug("  --hello,   world--  "), "hello-world");
    }

    #[test]
    fn slug_strips_diacritics() {
        assert_eq!(slug("Café crème à la carte"), "Cafe-creme-a-la-carte");
        assert_eq!(slug("Straße Øl"), "Strasse-Ol");
    }

    #[test]
    fn slug_keeps_digits_and_non_latin_letters() {
        assert_eq!(slug("Invoice #2024-07"), "Invoice-2024-07");
        assert_eq!(slug("日本語 メール"), "日本語-メール");
    }

    #[test]
    fn slug_of_empty_subject_is_empty() {
        assert_eq!(slug(""), "");
        assert_eq!(slug("!!!"), "");
    }
}
