use nom::{
    IResult, Parser,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::opt,
    multi::separated_list1,
    sequence::{pair, preceded},
};

use crate::constants::MAX_LINE_BYTES;
use crate::errors::IrcClientError;

use super::tags::{unescape_value, Tags};
use super::{IrcMessage, Source, Verb};

// https://www.rfc-editor.org/rfc/rfc2812 2.3.1, extended with IRCv3 message tags.
//
//  line      := [ '@' tags SP ] [ ':' source SP ] verb { SP param } [ SP ':' trailing ] EOL
//  tags      := tag { ';' tag }
//  tag       := [ '+' ] [ vendor '/' ] key [ '=' escaped_value ]
//
//  nospcrlfcl = any octet except NUL, CR, LF, " " and ":"
//  middle     = nospcrlfcl *( ":" / nospcrlfcl )
//  trailing   = *( ":" / " " / nospcrlfcl )

fn is_nospcrlfcl(c: char) -> bool {
    !matches!(c, '\0' | '\r' | '\n' | ' ' | ':')
}

fn is_nospcrlf(c: char) -> bool {
    !matches!(c, '\0' | '\r' | '\n')
}

fn is_tag_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '/' | '+' | '_')
}

fn is_tag_value_char(c: char) -> bool {
    !matches!(c, '\0' | '\r' | '\n' | ';' | ' ')
}

//  middle     = nospcrlfcl *( ":" / nospcrlfcl )
fn middle_parser(input: &str) -> IResult<&str, &str> {
    nom::combinator::recognize(pair(
        nom::character::complete::satisfy(is_nospcrlfcl),
        take_while(|c: char| c == ':' || is_nospcrlfcl(c)),
    ))
    .parse(input)
}

//  trailing   = *( ":" / " " / nospcrlfcl )
fn trailing_parser(input: &str) -> IResult<&str, &str> {
    take_while(is_nospcrlf).parse(input)
}

//  tag        = [ '+' ] [ vendor '/' ] key [ '=' escaped_value ]
fn tag_parser(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (rem, name) = take_while1(is_tag_name_char)(input)?;
    let (rem, value) = opt(preceded(char('='), take_while(is_tag_value_char))).parse(rem)?;
    Ok((
        rem,
        (
            name.to_ascii_lowercase(),
            value.map(unescape_value),
        ),
    ))
}

//  tags       = tag { ';' tag }
fn tags_parser(input: &str) -> IResult<&str, Tags> {
    let (rem, entries) = separated_list1(char(';'), tag_parser).parse(input)?;
    Ok((rem, entries.into_iter().collect()))
}

/// Split a hostmask-or-servername prefix into a structured [`Source`].
///
/// prefix = servername / ( nickname [ [ "!" user ] "@" host ] )
fn parse_source(prefix: &str) -> Source {
    if let Some((nick, rest)) = prefix.split_once('!') {
        let (user, host) = match rest.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), Some(h.to_string())),
            None => (Some(rest.to_string()), None),
        };
        return Source::User {
            nick: nick.to_string(),
            user,
            host,
        };
    }
    if let Some((nick, host)) = prefix.split_once('@') {
        return Source::User {
            nick: nick.to_string(),
            user: None,
            host: Some(host.to_string()),
        };
    }
    if prefix.contains('.') {
        Source::Server(prefix.to_string())
    } else {
        Source::User {
            nick: prefix.to_string(),
            user: None,
            host: None,
        }
    }
}

fn parse_verb(token: &str) -> Option<Verb> {
    if token.is_empty() {
        return None;
    }
    if token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit()) {
        return token.parse().ok().map(Verb::Numeric);
    }
    if token.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Some(Verb::Command(token.to_ascii_uppercase()));
    }
    None
}

/// Parse one IRC wire line. `input` must already have its CR/LF/CRLF terminator
/// stripped by the caller (the transport's line splitter); a bare trailing
/// `\r` or `\n`, if present, is tolerated and stripped here too.
pub fn parse_line(input: &str) -> Result<IrcMessage, IrcClientError> {
    if input.len() > MAX_LINE_BYTES {
        return Err(IrcClientError::MalformedLine {
            reason: "line exceeds 8192 bytes",
            offset: MAX_LINE_BYTES,
        });
    }
    if input.as_bytes().contains(&0) {
        return Err(IrcClientError::MalformedLine {
            reason: "stray NUL byte",
            offset: input.bytes().position(|b| b == 0).unwrap_or(0),
        });
    }
    let input = input.trim_end_matches(['\r', '\n']);

    let mut rest = input;
    let mut tags = Tags::new();
    if let Some(stripped) = rest.strip_prefix('@') {
        let (after, parsed_tags) = tags_parser(stripped).map_err(|_| IrcClientError::MalformedLine {
            reason: "malformed tag section",
            offset: 0,
        })?;
        let after = after.strip_prefix(' ').ok_or(IrcClientError::MalformedLine {
            reason: "missing space after tags",
            offset: input.len() - after.len(),
        })?;
        tags = parsed_tags;
        rest = after.trim_start_matches(' ');
    }

    let mut source = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (after, prefix) = middle_parser(stripped).map_err(|_| IrcClientError::MalformedLine {
            reason: "malformed source prefix",
            offset: 0,
        })?;
        source = Some(parse_source(prefix));
        rest = after.trim_start_matches(' ');
    }

    let (verb_token, mut rest) = match rest.split_once(' ') {
        Some((v, r)) => (v, r),
        None => (rest, ""),
    };
    let verb = parse_verb(verb_token).ok_or(IrcClientError::MalformedLine {
        reason: "empty or invalid verb",
        offset: 0,
    })?;

    let mut params = Vec::new();
    let mut trailing_was_explicit = false;
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(stripped) = rest.strip_prefix(':') {
            let (after, trailing) = trailing_parser(stripped).unwrap_or((stripped, stripped));
            params.push(trailing.to_string());
            trailing_was_explicit = true;
            rest = after;
            break;
        }
        match middle_parser(rest) {
            Ok((after, token)) => {
                params.push(token.to_string());
                rest = after;
            }
            Err(_) => break,
        }
    }

    Ok(IrcMessage {
        tags,
        source,
        verb,
        params,
        trailing_was_explicit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_with_no_source_or_tags() {
        let msg = parse_line("PING :abc.def").unwrap();
        assert_eq!(msg.verb, Verb::Command("PING".into()));
        assert_eq!(msg.params, vec!["abc.def".to_string()]);
    }

    #[test]
    fn numeric_with_isupport_style_params() {
        let msg = parse_line(":irc.example.com 005 nick CHANTYPES=# :are supported").unwrap();
        assert_eq!(msg.verb, Verb::Numeric(5));
        assert_eq!(msg.source, Some(Source::Server("irc.example.com".into())));
        assert_eq!(
            msg.params,
            vec!["nick".to_string(), "CHANTYPES=#".to_string(), "are supported".to_string()]
        );
    }

    #[test]
    fn rejects_empty_verb() {
        assert!(parse_line(":nick!u@h  ").is_err());
    }

    #[test]
    fn rejects_oversize_line() {
        let huge = "A".repeat(MAX_LINE_BYTES + 1);
        assert!(parse_line(&huge).is_err());
    }

    #[test]
    fn rejects_stray_nul() {
        let line = format!("PRIVMSG #chan :a\0b");
        assert!(parse_line(&line).is_err());
    }

    #[test]
    fn crlf_terminator_is_tolerated() {
        let msg = parse_line("NOTICE x :hi\r\n").unwrap();
        assert_eq!(msg.params[1], "hi");
    }
}
