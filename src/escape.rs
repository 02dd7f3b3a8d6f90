//! Text escaping for serialization and entity resolution for decoding.
//!
//! https://www.w3.org/TR/REC-xml/#syntax

use std::io::{self, Write};

/// U+FFFD, substituted for any code point outside the XML 1.0 `Char`
/// production on output.
pub const REPLACEMENT: char = '\u{FFFD}';

/// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
pub fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Writes `s` to `w` with markup-significant characters replaced by
/// references and invalid XML characters replaced by U+FFFD.
///
/// The replacement table is fixed so output bytes are deterministic:
/// `<` `>` `&` become named entities, quotes and the three whitespace
/// controls become character references.
pub fn escape_text<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    let mut last = 0;

    for (i, c) in s.char_indices() {
        let replacement: &[u8] = match c {
            '<' => b"&lt;",
            '>' => b"&gt;",
            '&' => b"&amp;",
            '"' => b"&#34;",
            '\'' => b"&#39;",
            '\t' => b"&#x9;",
            '\n' => b"&#xA;",
            '\r' => b"&#xD;",
            c if !is_xml_char(c) => "\u{FFFD}".as_bytes(),
            _ => continue,
        };

        w.write_all(&bytes[last..i])?;
        w.write_all(replacement)?;
        last = i + c.len_utf8();
    }

    w.write_all(&bytes[last..])
}

/// `escape_text` into a fresh `String`.
pub fn escape_to_string(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    // Writing to a Vec cannot fail.
    escape_text(&mut out, s).unwrap();
    String::from_utf8(out).unwrap()
}

/// Resolves the five predefined entities plus decimal (`&#N;`) and
/// hexadecimal (`&#xN;`) character references. Anything else that looks like
/// a reference is passed through literally, ampersand included.
pub fn unescape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        match resolve_reference(rest) {
            Some((consumed, c)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// `rest` starts with `&`. Returns the reference length (through `;`) and the
/// character it denotes, or None when the text is not a recognized reference.
fn resolve_reference(rest: &str) -> Option<(usize, char)> {
    let semi = rest.find(';')?;
    let body = &rest[1..semi];

    let resolved = match body {
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "apos" => '\'',
        "quot" => '"',
        _ => {
            let digits = body.strip_prefix('#')?;
            let value = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                Some(hex) if !hex.is_empty() => u32::from_str_radix(hex, 16).ok()?,
                Some(_) => return None,
                None if !digits.is_empty() => digits.parse::<u32>().ok()?,
                None => return None,
            };
            char::from_u32(value)?
        }
    };

    Some((semi + 1, resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped(s: &str) -> String {
        escape_to_string(s)
    }

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(escaped("a<b>c&d"), "a&lt;b&gt;c&amp;d");
        assert_eq!(escaped(r#"he said "hi'"#), "he said &#34;hi&#39;");
        assert_eq!(escaped("a\tb\nc\rd"), "a&#x9;b&#xA;c&#xD;d");
    }

    #[test]
    fn replaces_invalid_characters() {
        assert_eq!(escaped("a\u{0}b\u{B}c"), "a\u{FFFD}b\u{FFFD}c");
        // Valid astral and BMP characters pass through unchanged.
        assert_eq!(escaped("π\u{10348}"), "π\u{10348}");
    }

    #[test]
    fn unescape_resolves_named_and_numeric_references() {
        assert_eq!(unescape_text("&lt;&gt;&amp;&apos;&quot;"), "<>&'\"");
        assert_eq!(unescape_text("&#65;&#x42;&#x63;"), "ABc");
    }

    #[test]
    fn unescape_passes_unknown_references_through() {
        assert_eq!(unescape_text("&nbsp; &foo; & x"), "&nbsp; &foo; & x");
        assert_eq!(unescape_text("&#;&#x;&#xZZ;"), "&#;&#x;&#xZZ;");
        // An out-of-range scalar is not a reference either.
        assert_eq!(unescape_text("&#x110000;"), "&#x110000;");
    }

    #[test]
    fn unescape_inverts_escape() {
        let inputs = ["", "plain", "a<b>&c\"'d", "tab\tnl\ncr\r", "mixed &amp; done"];
        for input in inputs {
            assert_eq!(unescape_text(&escaped(input)), input);
        }
    }
}
