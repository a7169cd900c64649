//! L1 — Message Codec. Parses and serializes one IRC wire line, with
//! IRCv3 tag support (§4.1).

mod parse;
mod serialize;
pub mod tags;

pub use parse::parse_line;
pub use tags::Tags;

/// Where a message came from: either a full user hostmask or a bare server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    User {
        nick: String,
        user: Option<String>,
        host: Option<String>,
    },
    Server(String),
}

impl Source {
    pub fn nick(&self) -> Option<&str> {
        match self {
            Source::User { nick, .. } => Some(nick),
            Source::Server(_) => None,
        }
    }
}

/// The command or 3-digit numeric of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Command(String),
    Numeric(u16),
}

impl Verb {
    pub fn as_command(&self) -> Option<&str> {
        match self {
            Verb::Command(c) => Some(c.as_str()),
            Verb::Numeric(_) => None,
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Command(c) => write!(f, "{c}"),
            Verb::Numeric(n) => write!(f, "{n:03}"),
        }
    }
}

/// A fully parsed IRC wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: Tags,
    pub source: Option<Source>,
    pub verb: Verb,
    /// Every parameter, the trailing one included — callers that need to
    /// know whether the last param was colon-prefixed use `trailing_was_explicit`.
    pub params: Vec<String>,
    pub trailing_was_explicit: bool,
}

impl IrcMessage {
    /// Build a message with no tags or source — the common case for client-originated lines.
    pub fn new(verb: impl Into<VerbArg>, params: Vec<String>) -> Self {
        IrcMessage {
            tags: Tags::new(),
            source: None,
            verb: verb.into().0,
            params,
            trailing_was_explicit: true,
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// CTCP messages (PRIVMSG/NOTICE whose trailing is wrapped in `\x01`).
    pub fn ctcp_payload(&self) -> Option<&str> {
        let last = self.params.last()?;
        let stripped = last.strip_prefix('\x01')?;
        stripped.strip_suffix('\x01').or(Some(stripped))
    }
}

/// Small ergonomics shim so `IrcMessage::new("PRIVMSG", ...)` and
/// `IrcMessage::new(Verb::Numeric(1), ...)` both work.
pub struct VerbArg(Verb);

impl From<&str> for VerbArg {
    fn from(s: &str) -> Self {
        VerbArg(Verb::Command(s.to_ascii_uppercase()))
    }
}

impl From<Verb> for VerbArg {
    fn from(v: Verb) -> Self {
        VerbArg(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_tags_scenario() {
        let line = "@time=2024-01-01T00:00:00.000Z;account=bob :bob!b@h PRIVMSG #chan :hello world";
        let msg = parse_line(line).unwrap();
        assert_eq!(msg.tags.get("time"), Some(Some("2024-01-01T00:00:00.000Z")));
        assert_eq!(msg.tags.get("account"), Some(Some("bob")));
        assert_eq!(
            msg.source,
            Some(Source::User {
                nick: "bob".into(),
                user: Some("b".into()),
                host: Some("h".into()),
            })
        );
        assert_eq!(msg.verb, Verb::Command("PRIVMSG".into()));
        assert_eq!(msg.params, vec!["#chan".to_string(), "hello world".to_string()]);
    }

    #[test]
    fn serialize_parse_round_trip() {
        let msg = IrcMessage::new("PRIVMSG", vec!["#chan".into(), "hello world".into()]);
        let wire = msg.to_wire();
        let back = parse_line(wire.trim_end_matches("\r\n")).unwrap();
        assert_eq!(back.verb, msg.verb);
        assert_eq!(back.params, msg.params);
    }

    #[test]
    fn ctcp_action_payload() {
        let msg = IrcMessage::new("PRIVMSG", vec!["#chan".into(), "\x01ACTION waves\x01".into()]);
        assert_eq!(msg.ctcp_payload(), Some("ACTION waves"));
    }
}
