//! Text normalization applied before chunking, embedding, and querying
//!
//! Every piece of text entering the system passes through [`normalize`],
//! which repairs common extraction artifacts (stray combining accents,
//! ligatures left over from PDF fonts) and canonicalizes whitespace and
//! punctuation spacing. The function is pure and idempotent, so cache
//! keys derived from normalized text are stable.

use unicode_normalization::UnicodeNormalization;

/// Ligatures commonly emitted by PDF text extraction, with their
/// Latin-script expansions.
const LIGATURES: &[(char, &str)] = &[
    ('\u{fb00}', "ff"),
    ('\u{fb01}', "fi"),
    ('\u{fb02}', "fl"),
    ('\u{fb03}', "ffi"),
    ('\u{fb04}', "ffl"),
    ('\u{0153}', "oe"),
    ('\u{0152}', "OE"),
    ('\u{00e6}', "ae"),
    ('\u{00c6}', "AE"),
];

/// Normalize a piece of text.
///
/// Guaranteed transformations, in order: repair known mis-encodings
/// (floating acute accent before a vowel), expand ligatures, NFC
/// normalization, collapse whitespace runs to single spaces while
/// preserving `\n\n` paragraph separators, normalize spacing around
/// sentence punctuation, trim.
pub fn normalize(text: &str) -> String {
    let repaired = repair_misencodings(text);
    let expanded = expand_ligatures(&repaired);
    let composed: String = expanded.nfc().collect();
    let collapsed = collapse_whitespace(&composed);
    normalize_punctuation_spacing(&collapsed)
}

/// Merge a floating acute accent with a following vowel
/// (e.g. `´a` extracted from a PDF becomes `á`).
fn repair_misencodings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{00b4}' {
            match chars.peek().copied() {
                Some('a') => {
                    out.push('á');
                    chars.next();
                }
                Some('e') => {
                    out.push('é');
                    chars.next();
                }
                Some('i') => {
                    out.push('í');
                    chars.next();
                }
                Some('o') => {
                    out.push('ó');
                    chars.next();
                }
                Some('u') => {
                    out.push('ú');
                    chars.next();
                }
                Some('A') => {
                    out.push('Á');
                    chars.next();
                }
                Some('E') => {
                    out.push('É');
                    chars.next();
                }
                Some('I') => {
                    out.push('Í');
                    chars.next();
                }
                Some('O') => {
                    out.push('Ó');
                    chars.next();
                }
                Some('U') => {
                    out.push('Ú');
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }

    out
}

fn expand_ligatures(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match LIGATURES.iter().find(|(lig, _)| *lig == c) {
            Some((_, expansion)) => out.push_str(expansion),
            None => out.push(c),
        }
    }
    out
}

/// Collapse whitespace runs to single spaces, keeping `\n\n` as the
/// paragraph separator. Lone newlines inside a paragraph become spaces.
fn collapse_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let paragraphs: Vec<String> = split_paragraphs(&unified)
        .into_iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect();

    paragraphs.join("\n\n")
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find("\n\n") {
        parts.push(&rest[..idx]);
        rest = rest[idx..].trim_start_matches('\n');
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

/// No space before `.,!?;:`, exactly one after unless end-of-input.
/// Number contexts like `3.14` or `1,668` are left alone.
fn normalize_punctuation_spacing(text: &str) -> String {
    const PUNCT: &[char] = &['.', ',', '!', '?', ';', ':'];

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut last_pushed: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' {
            // Drop the space when the next non-space char is punctuation
            // following a word character.
            let mut j = i + 1;
            while j < chars.len() && chars[j] == ' ' {
                j += 1;
            }
            if j < chars.len() && PUNCT.contains(&chars[j]) {
                if last_pushed.map(|p| p.is_alphanumeric()).unwrap_or(false) {
                    continue;
                }
            }
            out.push(c);
            last_pushed = Some(c);
        } else {
            out.push(c);
            last_pushed = Some(c);
            if PUNCT.contains(&c) {
                // Only split before letters; digits stay attached so
                // decimals and thousands separators survive.
                if chars.get(i + 1).map(|n| n.is_alphabetic()).unwrap_or(false) {
                    out.push(' ');
                    last_pushed = Some(' ');
                }
            }
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ligature_expansion() {
        assert_eq!(normalize("e\u{fb03}cient work\u{fb02}ow"), "efficient workflow");
        assert_eq!(normalize("C\u{0153}ur"), "Coeur");
    }

    #[test]
    fn test_floating_accent_repair() {
        assert_eq!(normalize("educaci\u{00b4}on"), "educación");
        assert_eq!(normalize("caf\u{00b4}e"), "café");
    }

    #[test]
    fn test_whitespace_collapse_preserves_paragraphs() {
        let text = "first   line\nsame paragraph\n\n\nsecond  paragraph";
        assert_eq!(normalize(text), "first line same paragraph\n\nsecond paragraph");
    }

    #[test]
    fn test_punctuation_spacing() {
        assert_eq!(normalize("Hello ,world !How are you"), "Hello, world! How are you");
        assert_eq!(normalize("done."), "done.");
    }

    #[test]
    fn test_numbers_left_alone() {
        assert_eq!(normalize("pi is 3.14159"), "pi is 3.14159");
        assert_eq!(normalize("melting point: 1,668 C"), "melting point: 1,668 C");
    }

    #[test]
    fn test_idempotence_on_fixtures() {
        let fixtures = [
            "The melting point of titanium is 1668 C.",
            "a ,b .c\n\nd  e\u{fb01}",
            "  leading and trailing  ",
            "x:y;z",
        ];
        for f in fixtures {
            let once = normalize(f);
            assert_eq!(normalize(&once), once, "not idempotent for {f:?}");
        }
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(s in "\\PC{0,200}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once.clone());
        }

        #[test]
        fn prop_no_double_spaces(s in "\\PC{0,200}") {
            let once = normalize(&s);
            prop_assert!(!once.contains("  "));
        }
    }
}
