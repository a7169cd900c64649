//! DCC CTCP encode/decode: `SEND`, `ACCEPT`, `RESUME` (§4.10, §6 "DCC CTCP").

use std::net::Ipv4Addr;

use crate::errors::IrcClientError;

/// A parsed `DCC <subcommand> ...` CTCP payload (the body between the two
/// `\x01` delimiters, with the leading `DCC ` already stripped by the caller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DccCommand {
    Send {
        filename: String,
        ip: Ipv4Addr,
        port: u16,
        size: u64,
        token: Option<String>,
    },
    Accept {
        filename: String,
        port: u16,
        position: u64,
    },
    Resume {
        filename: String,
        port: u16,
        position: u64,
    },
}

/// Encode the standard 32-bit big-endian integer IP used on the wire (§6).
pub fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from_be_bytes(ip.octets())
}

pub fn u32_to_ip(n: u32) -> Ipv4Addr {
    Ipv4Addr::from(n.to_be_bytes())
}

pub fn encode_send(filename: &str, ip: Ipv4Addr, port: u16, size: u64, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("DCC SEND \"{filename}\" {} {port} {size} {token}", ip_to_u32(ip)),
        None => format!("DCC SEND \"{filename}\" {} {port} {size}", ip_to_u32(ip)),
    }
}

/// A passive (reverse) offer: port `0`, ip `0`, and a mandatory token.
pub fn encode_passive_send(filename: &str, size: u64, token: &str) -> String {
    format!("DCC SEND \"{filename}\" 0 0 {size} {token}")
}

pub fn encode_accept(filename: &str, port: u16, position: u64) -> String {
    format!("DCC ACCEPT \"{filename}\" {port} {position}")
}

pub fn encode_resume(filename: &str, port: u16, position: u64) -> String {
    format!("DCC RESUME \"{filename}\" {port} {position}")
}

/// Parse the body of a `DCC ...` CTCP message (no leading `\x01`, no `DCC `
/// prefix — callers strip that before calling).
pub fn parse(body: &str) -> Result<DccCommand, IrcClientError> {
    let mut tokens = tokenize(body);
    let subcommand = tokens.next().ok_or_else(|| malformed(body))?;

    match subcommand.as_str() {
        "SEND" => {
            let filename = tokens.next().ok_or_else(|| malformed(body))?;
            let ip_raw: u32 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            let port: u16 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            let size: u64 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            let token = tokens.next();
            Ok(DccCommand::Send {
                filename,
                ip: u32_to_ip(ip_raw),
                port,
                size,
                token,
            })
        }
        "ACCEPT" => {
            let filename = tokens.next().ok_or_else(|| malformed(body))?;
            let port: u16 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            let position: u64 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            Ok(DccCommand::Accept { filename, port, position })
        }
        "RESUME" => {
            let filename = tokens.next().ok_or_else(|| malformed(body))?;
            let port: u16 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            let position: u64 = tokens.next().ok_or_else(|| malformed(body))?.parse().map_err(|_| malformed(body))?;
            Ok(DccCommand::Resume { filename, port, position })
        }
        other => Err(IrcClientError::DccProtocol(format!("unsupported DCC subcommand '{other}'"))),
    }
}

fn malformed(body: &str) -> IrcClientError {
    IrcClientError::DccProtocol(format!("malformed DCC payload: {body}"))
}

/// Splits on whitespace, but treats a `"..."` quoted span (the filename) as
/// a single token, unescaping nothing — DCC filenames don't use backslash escapes.
fn tokenize(body: &str) -> impl Iterator<Item = String> {
    let mut out = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut token = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
            out.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            out.push(token);
        }
    }
    out.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_active_send_with_big_endian_ip() {
        let ip = Ipv4Addr::new(192, 168, 1, 5);
        let line = encode_send("file.bin", ip, 5000, 1024, None);
        assert_eq!(line, "DCC SEND \"file.bin\" 3232235781 5000 1024");
    }

    #[test]
    fn encodes_and_parses_passive_offer() {
        let line = encode_passive_send("file.bin", 1024, "tok123");
        let body = line.strip_prefix("DCC ").unwrap();
        match parse(body).unwrap() {
            DccCommand::Send { filename, ip, port, size, token } => {
                assert_eq!(filename, "file.bin");
                assert_eq!(ip, Ipv4Addr::new(0, 0, 0, 0));
                assert_eq!(port, 0);
                assert_eq!(size, 1024);
                assert_eq!(token.as_deref(), Some("tok123"));
            }
            _ => panic!("expected Send"),
        }
    }

    #[test]
    fn parses_resume_request() {
        let body = "RESUME \"file.bin\" 5000 512";
        match parse(body).unwrap() {
            DccCommand::Resume { filename, port, position } => {
                assert_eq!(filename, "file.bin");
                assert_eq!(port, 5000);
                assert_eq!(position, 512);
            }
            _ => panic!("expected Resume"),
        }
    }

    #[test]
    fn unsupported_subcommand_is_a_protocol_error() {
        assert!(parse("CHAT chat 123 456").is_err());
    }

    #[test]
    fn ip_round_trips_through_u32_encoding() {
        let ip = Ipv4Addr::new(203, 0, 113, 42);
        assert_eq!(u32_to_ip(ip_to_u32(ip)), ip);
    }
}
