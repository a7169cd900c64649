//! §3 `Channel` data model, keyed by its casemapping-folded canonical name.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::isupport::CaseMapping;

/// A channel's canonical (lowercased-per-casemapping) name, used as its
/// storage/lookup key (§3 invariant).
pub fn canonical_name(raw: &str, casemapping: CaseMapping) -> String {
    casemapping.fold(raw)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelModes {
    /// Modes with no parameter that are currently set (e.g. `n`, `t`, `s`).
    pub simple: HashSet<char>,
    /// Modes that carry a parameter (e.g. `k` -> key, `l` -> limit).
    pub parameterized: HashMap<char, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Canonical (folded) name; also the store's lookup key.
    pub name: String,
    /// The name as last seen on the wire, for display.
    pub display_name: String,
    pub topic: Option<String>,
    pub topic_set_by: Option<String>,
    pub topic_set_at: Option<i64>,
    pub modes: ChannelModes,
    /// nick -> set of mode chars held (e.g. `{'o'}` for an op).
    pub members: HashMap<String, HashSet<char>>,
    /// False until `RPL_ENDOFNAMES` for this channel has been seen.
    pub join_complete: bool,
}

impl Channel {
    pub fn new(raw_name: &str, casemapping: CaseMapping) -> Self {
        Channel {
            name: canonical_name(raw_name, casemapping),
            display_name: raw_name.to_string(),
            topic: None,
            topic_set_by: None,
            topic_set_at: None,
            modes: ChannelModes::default(),
            members: HashMap::new(),
            join_complete: false,
        }
    }

    pub fn add_member(&mut self, nick: &str) {
        self.members.entry(nick.to_string()).or_default();
    }

    pub fn remove_member(&mut self, nick: &str) {
        self.members.remove(nick);
    }

    /// Rewrite a member's nick in place (response to a `NICK` change),
    /// preserving their prefix set.
    pub fn rename_member(&mut self, old_nick: &str, new_nick: &str) {
        if let Some(modes) = self.members.remove(old_nick) {
            self.members.insert(new_nick.to_string(), modes);
        }
    }

    pub fn set_member_mode(&mut self, nick: &str, mode: char, set: bool) {
        let modes = self.members.entry(nick.to_string()).or_default();
        if set {
            modes.insert(mode);
        } else {
            modes.remove(&mode);
        }
    }

    pub fn has_member(&self, nick: &str) -> bool {
        self.members.contains_key(nick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_name_folds_per_casemapping() {
        assert_eq!(canonical_name("#GeneRal", CaseMapping::Rfc1459), "#general");
    }

    #[test]
    fn rename_member_preserves_prefix_set() {
        let mut ch = Channel::new("#chan", CaseMapping::Rfc1459);
        ch.add_member("bob");
        ch.set_member_mode("bob", 'o', true);
        ch.rename_member("bob", "bobby");
        assert!(!ch.has_member("bob"));
        assert!(ch.members.get("bobby").unwrap().contains(&'o'));
    }

    #[test]
    fn remove_member_drops_them_entirely() {
        let mut ch = Channel::new("#chan", CaseMapping::Rfc1459);
        ch.add_member("bob");
        ch.remove_member("bob");
        assert!(!ch.has_member("bob"));
    }
}
