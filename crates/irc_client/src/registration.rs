//! L7 — Registration Handler. NICK/USER sequence, welcome detection, and
//! nick-collision retry (§4.7).

use std::time::Duration;

use crate::constants::{ERR_NICKCOLLISION, ERR_NICKNAMEINUSE, RPL_WELCOME};
use crate::errors::IrcClientError;
use crate::message::{IrcMessage, Verb};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_NICK_RETRIES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPhase {
    NotStarted,
    AwaitingWelcome,
    Done,
}

pub struct RegistrationHandler {
    username: String,
    real_name: String,
    server_password: Option<String>,
    current_nick: String,
    retries: u8,
    phase: RegistrationPhase,
}

pub enum RegistrationAction {
    Send(Vec<String>),
    /// Registration completed; carries the server-confirmed nick.
    Welcome { nick: String },
    Failed(IrcClientError),
    Ignore,
}

impl RegistrationHandler {
    pub fn new(
        desired_nick: impl Into<String>,
        username: impl Into<String>,
        real_name: impl Into<String>,
        server_password: Option<String>,
    ) -> Self {
        RegistrationHandler {
            username: username.into(),
            real_name: real_name.into(),
            server_password,
            current_nick: desired_nick.into(),
            retries: 0,
            phase: RegistrationPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RegistrationPhase {
        self.phase
    }

    pub fn current_nick(&self) -> &str {
        &self.current_nick
    }

    /// Lines to send to begin registration: optional `PASS`, then `NICK`
    /// and `USER`.
    pub fn start(&mut self) -> Vec<String> {
        self.phase = RegistrationPhase::AwaitingWelcome;
        let mut lines = Vec::new();
        if let Some(password) = &self.server_password {
            lines.push(format!("PASS {password}"));
        }
        lines.push(format!("NICK {}", self.current_nick));
        lines.push(format!("USER {} 0 * :{}", self.username, self.real_name));
        lines
    }

    pub fn on_message(&mut self, msg: &IrcMessage) -> RegistrationAction {
        let Verb::Numeric(n) = msg.verb else {
            return RegistrationAction::Ignore;
        };

        match n {
            RPL_WELCOME => {
                self.phase = RegistrationPhase::Done;
                RegistrationAction::Welcome {
                    nick: self.current_nick.clone(),
                }
            }
            ERR_NICKNAMEINUSE | ERR_NICKCOLLISION => self.retry_nick(),
            _ => RegistrationAction::Ignore,
        }
    }

    fn retry_nick(&mut self) -> RegistrationAction {
        if self.retries >= MAX_NICK_RETRIES {
            self.phase = RegistrationPhase::Done;
            return RegistrationAction::Failed(IrcClientError::NickUnavailable);
        }
        self.retries += 1;
        self.current_nick.push('_');
        RegistrationAction::Send(vec![format!("NICK {}", self.current_nick)])
    }

    pub fn timeout_error(&self) -> IrcClientError {
        IrcClientError::RegistrationTimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;

    #[test]
    fn nick_collision_retries_with_trailing_underscore_then_succeeds() {
        let mut reg = RegistrationHandler::new("desirednick", "user", "Real Name", None);
        let start = reg.start();
        assert!(start.iter().any(|l| l == "NICK desirednick"));

        let collision = parse_line("433 * desirednick :Nickname is already in use").unwrap();
        match reg.on_message(&collision) {
            RegistrationAction::Send(lines) => assert_eq!(lines, vec!["NICK desirednick_"]),
            _ => panic!("expected Send"),
        }

        let collision2 = parse_line("433 * desirednick_ :Nickname is already in use").unwrap();
        match reg.on_message(&collision2) {
            RegistrationAction::Send(lines) => assert_eq!(lines, vec!["NICK desirednick__"]),
            _ => panic!("expected Send"),
        }

        let welcome = parse_line(":irc.example.com 001 desirednick__ :Welcome").unwrap();
        match reg.on_message(&welcome) {
            RegistrationAction::Welcome { nick } => assert_eq!(nick, "desirednick__"),
            _ => panic!("expected Welcome"),
        }
        assert_eq!(reg.phase(), RegistrationPhase::Done);
    }

    #[test]
    fn exhausting_retries_fails_with_nick_unavailable() {
        let mut reg = RegistrationHandler::new("n", "u", "R", None);
        reg.start();
        let collision = parse_line("433 * n :in use").unwrap();
        for _ in 0..MAX_NICK_RETRIES {
            reg.on_message(&collision);
        }
        match reg.on_message(&collision) {
            RegistrationAction::Failed(IrcClientError::NickUnavailable) => {}
            _ => panic!("expected NickUnavailable"),
        }
    }

    #[test]
    fn server_password_is_sent_before_nick_and_user() {
        let mut reg = RegistrationHandler::new("n", "u", "R", Some("hunter2".to_string()));
        let lines = reg.start();
        assert_eq!(lines[0], "PASS hunter2");
        assert_eq!(lines[1], "NICK n");
    }
}
