//! The structured message type and its projections.

use std::collections::HashMap;

use tracing::trace;

use crate::command::Command;

use super::parse::scan;
use super::tags;

/// A parsed protocol line.
///
/// Immutable once built. `channel`, `trailing`, and `user` are pure
/// projections over `params`/`prefix` rather than stored fields, so they
/// can never disagree with the data they derive from.
#[derive(Clone, Debug)]
pub struct Message {
    /// Tag map. Flag tags store `"1"`; keys are unique.
    pub tags: HashMap<String, String>,
    /// Raw source hostmask (without the leading `:`), empty if absent.
    pub prefix: String,
    /// Classified command.
    pub command: Command,
    /// Middle parameters followed by the trailing parameter (leading `:`
    /// stripped). Never null; empty when the line carried none.
    pub params: Vec<String>,
    /// The original (or reconstructed) line, kept for diagnostics and
    /// unaccounted-for reporting. Not part of equality.
    pub raw: String,
}

impl Message {
    /// Parse a raw line.
    ///
    /// Never fails: a line the scanner rejects degrades to a minimal
    /// message with an empty `Unknown` command and the raw text preserved.
    pub fn parse(raw: &str) -> Self {
        let line = raw.trim_end_matches(['\r', '\n']);
        match scan(line) {
            Ok(parts) => Self {
                tags: parts.tags.map(tags::parse_tag_section).unwrap_or_default(),
                prefix: parts.prefix.unwrap_or("").to_string(),
                command: Command::from_token(parts.command),
                params: parts.params.into_iter().map(str::to_string).collect(),
                raw: line.to_string(),
            },
            Err(defect) => {
                trace!(?defect, line, "line degraded to Unknown");
                Self {
                    tags: HashMap::new(),
                    prefix: String::new(),
                    command: Command::Unknown(String::new()),
                    params: Vec::new(),
                    raw: line.to_string(),
                }
            }
        }
    }

    /// Construct a message from a command and parameters, reconstructing
    /// `raw` from the wire form.
    pub fn new(command: Command, params: Vec<String>) -> Self {
        let mut message = Self {
            tags: HashMap::new(),
            prefix: String::new(),
            command,
            params,
            raw: String::new(),
        };
        message.raw = message.to_string();
        message
    }

    /// Attach a tag, rebuilding `raw`.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self.raw = self.to_string();
        self
    }

    /// Attach a prefix, rebuilding `raw`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.raw = self.to_string();
        self
    }

    /// The user part of the prefix: everything before the first `!`, or
    /// the whole prefix if there is none.
    pub fn user(&self) -> &str {
        match self.prefix.split_once('!') {
            Some((user, _)) => user,
            None => &self.prefix,
        }
    }

    /// First parameter with a leading `#` stripped; empty without params.
    pub fn channel(&self) -> &str {
        self.params
            .first()
            .map(|p| p.strip_prefix('#').unwrap_or(p))
            .unwrap_or("")
    }

    /// Last parameter when at least two exist, else empty.
    pub fn trailing(&self) -> &str {
        if self.params.len() >= 2 {
            self.params.last().map(String::as_str).unwrap_or("")
        } else {
            ""
        }
    }

    /// Look up a tag value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Whether a tag is present with the flag value `"1"`.
    pub fn tag_flag(&self, key: &str) -> bool {
        self.tag(key) == Some(tags::FLAG_VALUE)
    }
}

/// Equality ignores `raw`: two messages are equal when their tags, prefix,
/// command, and parameters agree, regardless of original tag order.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.tags == other.tags
            && self.prefix == other.prefix
            && self.command == other.command
            && self.params == other.params
    }
}

impl Eq for Message {}
