//! Wire serialization for [`Message`].

use std::fmt::{self, Write};

use super::tags::escape_tag_value;
use super::types::Message;

/// Serializes back to the dialect's wire form.
///
/// Tag keys are written sorted so output is deterministic; flag tags
/// serialize as `key=1`, which re-parses to the same map. The last
/// parameter takes the `:` trailing form whenever the bare form would not
/// survive a re-parse (empty, contains a space, or starts with `:`).
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            f.write_char('@')?;
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    f.write_char(';')?;
                }
                f.write_str(key)?;
                f.write_char('=')?;
                escape_tag_value(f, &self.tags[*key])?;
            }
            f.write_char(' ')?;
        }

        if !self.prefix.is_empty() {
            write!(f, ":{} ", self.prefix)?;
        }

        f.write_str(self.command.as_str())?;

        if let Some((last, middles)) = self.params.split_last() {
            for param in middles {
                write!(f, " {}", param)?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }

        Ok(())
    }
}
