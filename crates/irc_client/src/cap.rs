//! L5 — CAP Negotiator. The IRCv3 capability handshake state machine with
//! timeout (§4.5).

use std::collections::HashSet;
use std::time::Duration;

use log::info;

use crate::errors::IrcClientError;
use crate::message::IrcMessage;

pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(7);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapPhase {
    Idle,
    Listing,
    Requesting,
    Acking,
    SaslAwait,
    Done,
}

/// Drives one capability negotiation attempt. The orchestrator owns an
/// instance per connection attempt and feeds it inbound `CAP` lines.
pub struct CapNegotiator {
    phase: CapPhase,
    requested: HashSet<String>,
    negotiated: HashSet<String>,
    sasl_requested: bool,
}

/// What the negotiator wants the caller to do after processing one line.
pub enum CapAction {
    /// Send these lines and keep waiting.
    Send(Vec<String>),
    /// Negotiation is complete; these are the finally negotiated capabilities.
    Done(HashSet<String>),
    /// Waiting on SASL (L6) to report terminal before `CAP END` can be sent.
    AwaitSasl,
    /// Nothing to do for this line.
    Ignore,
}

impl CapNegotiator {
    pub fn new(requested: impl IntoIterator<Item = String>) -> Self {
        let requested: HashSet<String> = requested.into_iter().collect();
        let sasl_requested = requested.contains("sasl");
        CapNegotiator {
            phase: CapPhase::Idle,
            requested,
            negotiated: HashSet::new(),
            sasl_requested,
        }
    }

    pub fn phase(&self) -> CapPhase {
        self.phase
    }

    pub fn negotiated(&self) -> &HashSet<String> {
        &self.negotiated
    }

    /// Line(s) to send to kick off negotiation.
    pub fn start(&mut self) -> Vec<String> {
        self.phase = CapPhase::Listing;
        vec!["CAP LS 302".to_string()]
    }

    /// Feed one parsed inbound message. Only `CAP` subcommands are acted on;
    /// anything else is `CapAction::Ignore`.
    pub fn on_message(&mut self, msg: &IrcMessage) -> CapAction {
        let Some("CAP") = msg.verb.as_command() else {
            return CapAction::Ignore;
        };
        let Some(subcommand) = msg.param(1) else {
            return CapAction::Ignore;
        };

        match subcommand {
            "LS" => self.on_ls(msg),
            "ACK" => self.on_ack(msg),
            "NAK" => {
                info!("server NAKed a capability request");
                CapAction::Ignore
            }
            _ => CapAction::Ignore,
        }
    }

    fn on_ls(&mut self, msg: &IrcMessage) -> CapAction {
        let offered: HashSet<String> = msg
            .param(msg.params.len().saturating_sub(1))
            .unwrap_or("")
            .split_whitespace()
            .map(|tok| tok.split('=').next().unwrap_or(tok).to_string())
            .collect();

        let intersection: Vec<String> = self
            .requested
            .iter()
            .filter(|cap| offered.contains(*cap))
            .cloned()
            .collect();

        if intersection.is_empty() {
            self.phase = CapPhase::Done;
            return CapAction::Done(self.negotiated.clone());
        }

        self.phase = CapPhase::Requesting;
        CapAction::Send(vec![format!("CAP REQ :{}", intersection.join(" "))])
    }

    fn on_ack(&mut self, msg: &IrcMessage) -> CapAction {
        let acked = msg
            .param(msg.params.len().saturating_sub(1))
            .unwrap_or("")
            .split_whitespace();
        for cap in acked {
            self.negotiated.insert(cap.to_string());
        }
        self.phase = CapPhase::Acking;

        if self.sasl_requested && self.negotiated.contains("sasl") {
            self.phase = CapPhase::SaslAwait;
            return CapAction::AwaitSasl;
        }

        self.phase = CapPhase::Done;
        CapAction::Done(self.negotiated.clone())
    }

    /// Called once SASL (L6) reports a terminal result, to unblock `CAP END`.
    pub fn sasl_finished(&mut self) -> CapAction {
        self.phase = CapPhase::Done;
        CapAction::Done(self.negotiated.clone())
    }

    pub fn timeout_error(&self) -> IrcClientError {
        IrcClientError::CapTimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;

    fn negotiator(requested: &[&str]) -> CapNegotiator {
        CapNegotiator::new(requested.iter().map(|s| s.to_string()))
    }

    #[test]
    fn empty_ls_completes_with_empty_negotiated_set() {
        let mut cap = negotiator(&["sasl", "multi-prefix"]);
        cap.start();
        let msg = parse_line(":irc.example.com CAP * LS :").unwrap();
        match cap.on_message(&msg) {
            CapAction::Done(negotiated) => assert!(negotiated.is_empty()),
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn requests_only_the_intersection_of_offered_and_wanted() {
        let mut cap = negotiator(&["sasl", "multi-prefix"]);
        cap.start();
        let msg = parse_line(
            ":irc.example.com CAP * LS :sasl multi-prefix server-time away-notify",
        )
        .unwrap();
        match cap.on_message(&msg) {
            CapAction::Send(lines) => {
                assert_eq!(lines.len(), 1);
                assert!(lines[0].contains("sasl"));
                assert!(lines[0].contains("multi-prefix"));
                assert!(!lines[0].contains("server-time"));
            }
            _ => panic!("expected Send"),
        }
    }

    #[test]
    fn holds_cap_end_until_sasl_reports_terminal() {
        let mut cap = negotiator(&["sasl"]);
        cap.start();
        cap.on_message(&parse_line(":irc.example.com CAP * LS :sasl").unwrap());
        let ack = parse_line(":irc.example.com CAP * ACK :sasl").unwrap();
        assert!(matches!(cap.on_message(&ack), CapAction::AwaitSasl));
        assert_eq!(cap.phase(), CapPhase::SaslAwait);

        match cap.sasl_finished() {
            CapAction::Done(negotiated) => assert!(negotiated.contains("sasl")),
            _ => panic!("expected Done"),
        }
        assert_eq!(cap.phase(), CapPhase::Done);
    }

    #[test]
    fn non_sasl_ack_completes_immediately() {
        let mut cap = negotiator(&["multi-prefix"]);
        cap.start();
        cap.on_message(&parse_line(":irc.example.com CAP * LS :multi-prefix").unwrap());
        let ack = parse_line(":irc.example.com CAP * ACK :multi-prefix").unwrap();
        assert!(matches!(cap.on_message(&ack), CapAction::Done(_)));
    }
}
