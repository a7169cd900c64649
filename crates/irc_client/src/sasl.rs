//! L6 — SASL Authenticator. PLAIN mechanism only, with a per-step timeout
//! (§4.6).

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::constants::{
    ERR_NICKLOCKED, ERR_SASLABORTED, ERR_SASLALREADY, ERR_SASLFAIL, ERR_SASLTOOLONG,
    RPL_SASLSUCCESS,
};
use crate::errors::SaslError;
use crate::message::{IrcMessage, Verb};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslPhase {
    Idle,
    AwaitingContinue,
    AwaitingResult,
    Succeeded,
    Failed,
}

pub struct SaslAuthenticator {
    username: String,
    password: String,
    phase: SaslPhase,
}

pub enum SaslAction {
    Send(String),
    Succeeded,
    Failed(SaslError),
    Ignore,
}

impl SaslAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        SaslAuthenticator {
            username: username.into(),
            password: password.into(),
            phase: SaslPhase::Idle,
        }
    }

    pub fn phase(&self) -> SaslPhase {
        self.phase
    }

    /// First line to send: `AUTHENTICATE PLAIN`.
    pub fn start(&mut self) -> String {
        self.phase = SaslPhase::AwaitingContinue;
        "AUTHENTICATE PLAIN".to_string()
    }

    pub fn on_message(&mut self, msg: &IrcMessage) -> SaslAction {
        if let Some("AUTHENTICATE") = msg.verb.as_command() {
            return self.on_authenticate(msg);
        }
        let Verb::Numeric(n) = msg.verb else {
            return SaslAction::Ignore;
        };
        self.on_numeric(n)
    }

    fn on_authenticate(&mut self, msg: &IrcMessage) -> SaslAction {
        if self.phase != SaslPhase::AwaitingContinue {
            return SaslAction::Ignore;
        }
        if msg.param(0) != Some("+") {
            self.phase = SaslPhase::Failed;
            return SaslAction::Failed(SaslError::Authenticate);
        }
        let payload = format!("\0{}\0{}", self.username, self.password);
        let encoded = BASE64.encode(payload.as_bytes());
        self.phase = SaslPhase::AwaitingResult;
        SaslAction::Send(format!("AUTHENTICATE {encoded}"))
    }

    fn on_numeric(&mut self, n: u16) -> SaslAction {
        if self.phase != SaslPhase::AwaitingResult && self.phase != SaslPhase::AwaitingContinue {
            return SaslAction::Ignore;
        }
        match n {
            RPL_SASLSUCCESS => {
                self.phase = SaslPhase::Succeeded;
                SaslAction::Succeeded
            }
            ERR_NICKLOCKED => self.fail(SaslError::Authenticate),
            ERR_SASLFAIL => self.fail(SaslError::Denied),
            ERR_SASLTOOLONG => self.fail(SaslError::UnsupportedMechanism),
            ERR_SASLABORTED => self.fail(SaslError::Aborted),
            ERR_SASLALREADY => self.fail(SaslError::AlreadyAuthenticated),
            _ => SaslAction::Ignore,
        }
    }

    fn fail(&mut self, err: SaslError) -> SaslAction {
        self.phase = SaslPhase::Failed;
        SaslAction::Failed(err)
    }

    pub fn timeout_error(&self) -> SaslError {
        SaslError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;

    #[test]
    fn plain_success_sends_expected_base64_payload() {
        let mut sasl = SaslAuthenticator::new("alice", "secret");
        assert_eq!(sasl.start(), "AUTHENTICATE PLAIN");

        let plus = parse_line("AUTHENTICATE +").unwrap();
        match sasl.on_message(&plus) {
            SaslAction::Send(line) => {
                assert_eq!(line, "AUTHENTICATE AGFsaWNlAHNlY3JldA==");
            }
            _ => panic!("expected Send"),
        }

        let success = parse_line(":irc.example.com 903 alice :SASL authentication successful").unwrap();
        assert!(matches!(sasl.on_message(&success), SaslAction::Succeeded));
        assert_eq!(sasl.phase(), SaslPhase::Succeeded);
    }

    #[test]
    fn denied_numeric_maps_to_denied_error() {
        let mut sasl = SaslAuthenticator::new("alice", "wrong");
        sasl.start();
        sasl.on_message(&parse_line("AUTHENTICATE +").unwrap());
        let fail = parse_line(":irc.example.com 904 alice :SASL authentication failed").unwrap();
        match sasl.on_message(&fail) {
            SaslAction::Failed(SaslError::Denied) => {}
            _ => panic!("expected Denied"),
        }
    }

    #[test]
    fn non_plus_authenticate_continuation_fails_the_flow() {
        let mut sasl = SaslAuthenticator::new("alice", "secret");
        sasl.start();
        let bogus = parse_line("AUTHENTICATE abcd").unwrap();
        assert!(matches!(
            sasl.on_message(&bogus),
            SaslAction::Failed(SaslError::Authenticate)
        ));
    }
}
