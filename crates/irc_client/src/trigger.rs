//! `TriggerRule` (§3): user-authored rules that fire a command or
//! script action when an incoming event matches a pattern. Matching itself
//! lives here; *running* the matched action is the out-of-scope
//! slash-command dispatcher / scripting engine's job — this module only
//! decides which rules fire and hands back their action.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerActionKind {
    Command,
    Script,
}

/// The pattern half of a rule: an event name plus optional regexes over the
/// event's nick, channel, and text fields. A `None` regex matches anything.
#[derive(Debug, Clone)]
pub struct EventPattern {
    pub event_name: String,
    pub nick: Option<Regex>,
    pub channel: Option<Regex>,
    pub text: Option<Regex>,
}

impl EventPattern {
    pub fn matches(&self, event_name: &str, nick: Option<&str>, channel: Option<&str>, text: Option<&str>) -> bool {
        if self.event_name != event_name {
            return false;
        }
        if let Some(re) = &self.nick {
            if !nick.is_some_and(|n| re.is_match(n)) {
                return false;
            }
        }
        if let Some(re) = &self.channel {
            if !channel.is_some_and(|c| re.is_match(c)) {
                return false;
            }
        }
        if let Some(re) = &self.text {
            if !text.is_some_and(|t| re.is_match(t)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct TriggerRule {
    pub id: String,
    pub pattern: EventPattern,
    pub action_kind: TriggerActionKind,
    pub action_payload: String,
    pub enabled: bool,
}

/// The fields a rule's regexes are matched against, extracted from one
/// dispatched event by the caller (the dispatcher/bridge, not this module).
#[derive(Debug, Clone, Default)]
pub struct TriggerContext<'a> {
    pub nick: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub text: Option<&'a str>,
}

/// One triggered action: the rule that fired, ready to hand to the command
/// dispatcher or scripting engine.
#[derive(Debug, Clone)]
pub struct TriggeredAction<'a> {
    pub rule_id: &'a str,
    pub kind: TriggerActionKind,
    pub payload: &'a str,
}

/// An ordered collection of trigger rules, evaluated in insertion order.
#[derive(Default)]
pub struct TriggerSet {
    rules: Vec<TriggerRule>,
}

impl TriggerSet {
    pub fn new() -> Self {
        TriggerSet::default()
    }

    pub fn add(&mut self, rule: TriggerRule) {
        self.rules.push(rule);
    }

    pub fn remove(&mut self, id: &str) {
        self.rules.retain(|r| r.id != id);
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.id == id) {
            rule.enabled = enabled;
        }
    }

    /// Every enabled rule whose pattern matches `event_name` under `ctx`,
    /// in the order they were added.
    pub fn matching<'a>(&'a self, event_name: &str, ctx: &TriggerContext<'_>) -> Vec<TriggeredAction<'a>> {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.pattern.matches(event_name, ctx.nick, ctx.channel, ctx.text))
            .map(|r| TriggeredAction {
                rule_id: &r.id,
                kind: r.action_kind,
                payload: &r.action_payload,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, text: Option<&str>, kind: TriggerActionKind, payload: &str) -> TriggerRule {
        TriggerRule {
            id: id.to_string(),
            pattern: EventPattern {
                event_name: "MESSAGE_RECEIVED".to_string(),
                nick: None,
                channel: None,
                text: text.map(|t| Regex::new(t).unwrap()),
            },
            action_kind: kind,
            action_payload: payload.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn matching_rule_fires_for_its_event_and_text_pattern() {
        let mut set = TriggerSet::new();
        set.add(rule("r1", Some("^!hello"), TriggerActionKind::Command, "PRIVMSG #chan :hi"));
        let ctx = TriggerContext { text: Some("!hello there"), ..Default::default() };
        let fired = set.matching("MESSAGE_RECEIVED", &ctx);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_id, "r1");
    }

    #[test]
    fn disabled_rule_never_fires() {
        let mut set = TriggerSet::new();
        set.add(rule("r1", None, TriggerActionKind::Script, "on_hello"));
        set.set_enabled("r1", false);
        let ctx = TriggerContext::default();
        assert!(set.matching("MESSAGE_RECEIVED", &ctx).is_empty());
    }

    #[test]
    fn unrelated_event_name_does_not_match() {
        let mut set = TriggerSet::new();
        set.add(rule("r1", None, TriggerActionKind::Command, "x"));
        let ctx = TriggerContext::default();
        assert!(set.matching("CLIENT_READY", &ctx).is_empty());
    }

    #[test]
    fn removing_a_rule_drops_it_from_future_matches() {
        let mut set = TriggerSet::new();
        set.add(rule("r1", None, TriggerActionKind::Command, "x"));
        set.remove("r1");
        let ctx = TriggerContext::default();
        assert!(set.matching("MESSAGE_RECEIVED", &ctx).is_empty());
    }
}
