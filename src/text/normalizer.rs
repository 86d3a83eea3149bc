/*! Deterministic Unicode normalization.

Turns raw UTF-8 into the token sequence that every other stage (shingles,
simhash, scoring) works on. The steps run in a fixed order; each one is
pure, so the whole pipeline is idempotent.
!*/
use caseless::Caseless;
use unic_ucd::GeneralCategory;
use unicode_normalization::UnicodeNormalization;

/// Code points that survive step 8. Everything else becomes a space.
fn is_word_char(c: char) -> bool {
    c == '_'
        || c.is_ascii_digit()
        || c.is_ascii_alphabetic()
        || ('\u{00C0}'..='\u{02AF}').contains(&c)
        || ('\u{0400}'..='\u{04FF}').contains(&c)
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
        || GeneralCategory::of(c) == GeneralCategory::NonspacingMark
}

/// Zero-width and directional controls, removed outright.
fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}' | '\u{FEFF}')
}

/// Steps 1-3: strip invisibles, rejoin words hyphenated across a line
/// break, collapse the remaining newlines to spaces.
fn strip_and_dehyphenate(text: &str) -> String {
    let chars: Vec<char> = text
        .chars()
        .filter(|c| !is_zero_width(*c) && *c != '\u{00AD}')
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '-' && i > 0 && chars[i - 1].is_alphabetic() {
            // hyphen at end of line: skip the break if a letter follows
            let mut j = i + 1;
            let mut broke_line = false;
            while j < chars.len() && chars[j].is_whitespace() {
                if chars[j] == '\n' || chars[j] == '\r' {
                    broke_line = true;
                }
                j += 1;
            }
            if broke_line && j < chars.len() && chars[j].is_alphabetic() {
                i = j;
                continue;
            }
        }
        if c == '\n' || c == '\r' {
            out.push(' ');
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// Full normalization: raw text to tokens.
///
/// Never fails; empty input gives an empty token list.
pub fn normalize(text: &str) -> Vec<String> {
    let text = strip_and_dehyphenate(text);

    // NFKC, casefold, drop combining marks, fold ё→е, then the word-class
    // filter. Single pass over the recomposed stream. Full default case
    // folding, not lowercasing: ß must become ss.
    let cleaned: String = text
        .nfkc()
        .default_case_fold()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == 'ё' { 'е' } else { c })
        .map(|c| if is_word_char(c) { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().map(str::to_string).collect()
}
