//! IRCv3 message tag parsing and escaping.

use std::collections::HashMap;
use std::fmt::{Result as FmtResult, Write};

/// Value stored for a flag tag (a tag with no `=`).
pub const FLAG_VALUE: &str = "1";

/// Escape a tag value for serialization.
///
/// Escapes special characters according to the IRCv3 message-tags spec.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Reverses the escaping applied by [`escape_tag_value`]. Unknown escapes
/// drop the backslash; a trailing backslash is dropped entirely.
pub(crate) fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

/// Parse a raw tag section (the text between `@` and the first space) into
/// a key/value map.
///
/// Tags are `;`-separated; a missing `=` marks a flag tag, which stores
/// [`FLAG_VALUE`]. A key with an empty value (`badge-info=`) stores the
/// empty string, not the flag value. Duplicate keys keep the last
/// occurrence.
pub(crate) fn parse_tag_section(raw: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for pair in raw.split(';') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => {
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            None => {
                tags.insert(pair.to_string(), FLAG_VALUE.to_string());
            }
        }
    }
    tags
}
