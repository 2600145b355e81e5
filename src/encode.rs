//! Percent-encoding helpers for paths and query strings.
//!
//! Rules match against a decoded path in which `%`, `;` and `?` have been
//! re-encoded, so a decoded octet can never be mistaken for an escape
//! sequence, a path parameter separator or a query separator. The masking
//! is reversed once the pass is over and the final path is assembled.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters escaped in a path segment. Everything outside unreserved and
/// the sub-delims allowed in path components per RFC 3986.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@')
    .remove(b'/');

/// Characters escaped in a query string: as for paths, plus a literal `?`
/// is allowed.
const QUERY: &AsciiSet = &PATH.remove(b'?');

/// Percent-encode a decoded path. `%` is always encoded, so a decoded
/// percent octet survives a round trip as `%25`.
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

/// Percent-encode a decoded query string.
pub fn encode_query(query: &str) -> String {
    utf8_percent_encode(query, QUERY).to_string()
}

/// Fully percent-decode a string, replacing invalid UTF-8 with U+FFFD.
pub fn decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Mask `%`, `;` and `?` in a decoded path before matching.
pub fn mask_reserved(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`mask_reserved`]: decode exactly `%25`, `%3B` and `%3F`
/// (case-insensitively), leaving every other escape sequence alone.
pub fn unmask_reserved(path: &str) -> String {
    let chars: Vec<char> = path.chars().collect();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' && i + 2 < chars.len() {
            let pair = [
                chars[i + 1].to_ascii_lowercase(),
                chars[i + 2].to_ascii_lowercase(),
            ];
            match pair {
                ['2', '5'] => {
                    out.push('%');
                    i += 3;
                    continue;
                }
                ['3', 'b'] => {
                    out.push(';');
                    i += 3;
                    continue;
                }
                ['3', 'f'] => {
                    out.push('?');
                    i += 3;
                    continue;
                }
                _ => {}
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}
