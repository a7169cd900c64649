use super::tags::escape_value;
use super::{IrcMessage, Source};

impl IrcMessage {
    /// Render this message as a CRLF-terminated wire line. Strict inverse of
    /// [`super::parse_line`]: a trailing param is colon-prefixed only when it
    /// contains a space, starts with `:`, is empty, or was explicitly marked
    /// as trailing when the message was built or parsed.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if !self.tags.is_empty() {
            out.push('@');
            let mut first = true;
            for (key, value) in self.tags.iter() {
                if !first {
                    out.push(';');
                }
                first = false;
                out.push_str(key);
                if let Some(v) = value {
                    out.push('=');
                    out.push_str(&escape_value(v));
                }
            }
            out.push(' ');
        }

        if let Some(source) = &self.source {
            out.push(':');
            match source {
                Source::Server(name) => out.push_str(name),
                Source::User { nick, user, host } => {
                    out.push_str(nick);
                    if let Some(user) = user {
                        out.push('!');
                        out.push_str(user);
                    }
                    if let Some(host) = host {
                        out.push('@');
                        out.push_str(host);
                    }
                }
            }
            out.push(' ');
        }

        out.push_str(&self.verb.to_string());

        let last_index = self.params.len().checked_sub(1);
        for (index, param) in self.params.iter().enumerate() {
            out.push(' ');
            let is_last = Some(index) == last_index;
            let needs_colon = is_last
                && (self.trailing_was_explicit
                    || param.is_empty()
                    || param.starts_with(':')
                    || param.contains(' '));
            if needs_colon {
                out.push(':');
            }
            out.push_str(param);
        }

        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{parse_line, Verb};

    #[test]
    fn numeric_verb_formats_as_three_digits() {
        let msg = IrcMessage::new(Verb::Numeric(1), vec!["nick".into(), "welcome".into()]);
        assert_eq!(msg.to_wire(), "001 nick :welcome\r\n");
    }

    #[test]
    fn trailing_param_with_space_is_colon_prefixed() {
        let msg = IrcMessage::new("PRIVMSG", vec!["#chan".into(), "hello world".into()]);
        assert_eq!(msg.to_wire(), "PRIVMSG #chan :hello world\r\n");
    }

    #[test]
    fn single_word_trailing_param_stays_colon_prefixed_when_marked_explicit() {
        let msg = IrcMessage::new("JOIN", vec!["#chan".into()]);
        assert_eq!(msg.to_wire(), "JOIN :#chan\r\n");
    }

    #[test]
    fn tags_round_trip_through_wire_format() {
        let mut msg = IrcMessage::new("PRIVMSG", vec!["#chan".into(), "hi there".into()]);
        msg.tags.insert("time", Some("2024-01-01T00:00:00.000Z".to_string()));
        msg.tags.insert("account", Some("bob".to_string()));
        let wire = msg.to_wire();
        assert!(wire.starts_with("@time=2024-01-01T00:00:00.000Z;account=bob "));
        let parsed = parse_line(wire.trim_end_matches("\r\n")).unwrap();
        assert_eq!(parsed.tags.get("time"), msg.tags.get("time"));
        assert_eq!(parsed.tags.get("account"), msg.tags.get("account"));
    }
}
