//! IRCv3 message-tag escaping (§4.1).
//!
//! ```text
//! tags      := tag { ';' tag }
//! tag       := [ '+' ] [ vendor '/' ] key [ '=' escaped_value ]
//! ```
//! Escape map: `\:` -> `;`, `\s` -> SPACE, `\\` -> `\`, `\r` -> CR, `\n` -> LF;
//! a lone trailing `\` is dropped.

/// An ordered tag map. Order is preserved for round-trip serialization;
/// lookups are by lowercased key, matching the wire requirement that tag
/// keys are case-insensitive and stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<(String, Option<String>)>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        let key = key.to_ascii_lowercase();
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_deref())
    }

    /// Insert or replace a tag, preserving its original position if already present.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into().to_ascii_lowercase();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

impl FromIterator<(String, Option<String>)> for Tags {
    fn from_iter<T: IntoIterator<Item = (String, Option<String>)>>(iter: T) -> Self {
        let mut tags = Tags::new();
        for (k, v) in iter {
            tags.insert(k, v);
        }
        tags
    }
}

/// Decode the escape sequences in a raw tag value as seen on the wire.
pub fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other), // unknown escape: drop the backslash, keep the char
            None => {}                      // lone trailing backslash: dropped
        }
    }
    out
}

/// Encode a tag value for the wire. Strict inverse of [`unescape_value`]:
/// never emits an unescaped `;`, SPACE, `\`, CR or LF.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        let value = "a;b c\\d";
        let escaped = escape_value(value);
        assert_eq!(escaped, "a\\:b\\sc\\\\d");
        assert_eq!(unescape_value(&escaped), value);
    }

    #[test]
    fn lone_trailing_backslash_is_dropped() {
        assert_eq!(unescape_value("abc\\"), "abc");
    }

    #[test]
    fn tags_lookup_is_case_insensitive_on_key() {
        let mut tags = Tags::new();
        tags.insert("Account", Some("bob".to_string()));
        assert_eq!(tags.get("account"), Some(Some("bob")));
    }
}
