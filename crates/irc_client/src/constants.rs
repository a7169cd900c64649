//! Numeric replies and limits this client must recognize.
//!
//! Names follow RFC 2812 §5 plus the IRCv3 extensions listed in §6.

pub const RPL_WELCOME: u16 = 1;
pub const RPL_YOURHOST: u16 = 2;
pub const RPL_CREATED: u16 = 3;
pub const RPL_MYINFO: u16 = 4;
pub const RPL_ISUPPORT: u16 = 5;

pub const RPL_AWAY: u16 = 301;
pub const RPL_TOPIC: u16 = 332;
pub const RPL_TOPICWHOTIME: u16 = 333;
pub const RPL_NAMREPLY: u16 = 353;
pub const RPL_ENDOFNAMES: u16 = 366;

pub const ERR_NOSUCHNICK: u16 = 401;
pub const ERR_NOSUCHCHANNEL: u16 = 403;
pub const ERR_NONICKNAMEGIVEN: u16 = 431;
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
pub const ERR_NICKNAMEINUSE: u16 = 433;
pub const ERR_NICKCOLLISION: u16 = 436;
pub const ERR_UNKNOWNCOMMAND: u16 = 421;
pub const ERR_NOTREGISTERED: u16 = 451;
pub const ERR_NEEDMOREPARAMS: u16 = 461;
pub const ERR_ALREADYREGISTRED: u16 = 462;

// SASL (IRCv3 `sasl` capability)
pub const RPL_LOGGEDIN: u16 = 900;
pub const RPL_LOGGEDOUT: u16 = 901;
pub const ERR_NICKLOCKED: u16 = 902;
pub const RPL_SASLSUCCESS: u16 = 903;
pub const ERR_SASLFAIL: u16 = 904;
pub const ERR_SASLTOOLONG: u16 = 905;
pub const ERR_SASLABORTED: u16 = 906;
pub const ERR_SASLALREADY: u16 = 907;

/// Maximum size of one wire line, tags included (§4.1, §6).
pub const MAX_LINE_BYTES: usize = 8192;
/// Maximum size of one outbound line, tags excluded, absent `message-tags`.
pub const MAX_OUTBOUND_BYTES_NO_TAGS: usize = 512;

/// The set of IRCv3 capabilities this client requests when the server offers them (§6).
pub const SUPPORTED_CAPABILITIES: &[&str] = &[
    "sasl",
    "multi-prefix",
    "server-time",
    "message-tags",
    "account-tag",
    "echo-message",
    "away-notify",
    "chghost",
    "userhost-in-names",
    "cap-notify",
    "extended-join",
    "account-notify",
    "invite-notify",
];
