//! `RPL_ISUPPORT` (005) token parsing (§4.9): the source of
//! `CHANTYPES`, `PREFIX`, `CHANMODES`, and `CASEMAPPING` for the dispatcher
//! and channel model.

/// Casemapping used to fold nicknames/channels to their canonical form.
/// `Rfc1459` is the protocol default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMapping {
    Ascii,
    Rfc1459,
    StrictRfc1459,
}

impl CaseMapping {
    pub fn fold(self, input: &str) -> String {
        input
            .chars()
            .map(|c| self.fold_char(c))
            .collect()
    }

    fn fold_char(self, c: char) -> char {
        if !c.is_ascii_uppercase() {
            return c.to_ascii_lowercase();
        }
        match (self, c) {
            (CaseMapping::Ascii, _) => c.to_ascii_lowercase(),
            (CaseMapping::Rfc1459, '[') => '{',
            (CaseMapping::Rfc1459, ']') => '}',
            (CaseMapping::Rfc1459, '\\') => '|',
            (CaseMapping::Rfc1459, '~') => '^',
            (CaseMapping::StrictRfc1459, '[') => '{',
            (CaseMapping::StrictRfc1459, ']') => '}',
            (CaseMapping::StrictRfc1459, '\\') => '|',
            _ => c.to_ascii_lowercase(),
        }
    }
}

/// Server-advertised capability tokens relevant to channel/mode handling.
#[derive(Debug, Clone)]
pub struct ServerSupport {
    pub chantypes: Vec<char>,
    /// Mode char -> prefix symbol, in server-advertised priority order
    /// (highest first), e.g. `[('o', '@'), ('v', '+')]`.
    pub prefix: Vec<(char, char)>,
    /// The four CHANMODES groups: (A) list, (B) always-param, (C)
    /// param-on-set-only, (D) never-param.
    pub chanmodes: ChanModes,
    pub casemapping: CaseMapping,
}

#[derive(Debug, Clone, Default)]
pub struct ChanModes {
    pub list: Vec<char>,
    pub always_param: Vec<char>,
    pub param_on_set: Vec<char>,
    pub no_param: Vec<char>,
}

impl Default for ServerSupport {
    fn default() -> Self {
        ServerSupport {
            chantypes: vec!['#', '&'],
            prefix: vec![('o', '@'), ('v', '+')],
            chanmodes: ChanModes {
                list: vec!['b'],
                always_param: vec!['k'],
                param_on_set: vec!['l'],
                no_param: vec!['i', 'm', 'n', 's', 't'],
            },
            casemapping: CaseMapping::Rfc1459,
        }
    }
}

impl ServerSupport {
    /// Fold one or more `RPL_ISUPPORT` tokens (e.g. `CHANTYPES=#`,
    /// `PREFIX=(ov)@+`, `CHANMODES=b,k,l,imnst`, `CASEMAPPING=ascii`) into
    /// this struct. Unknown tokens are ignored (§6: "unknown keys
    /// produce warnings, not errors" — logging is the caller's job here
    /// since this is a pure parse step).
    pub fn apply_tokens(&mut self, tokens: &[&str]) {
        for token in tokens {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (*token, None),
            };
            match key {
                "CHANTYPES" => {
                    if let Some(v) = value {
                        self.chantypes = v.chars().collect();
                    }
                }
                "PREFIX" => {
                    if let Some(v) = value {
                        if let Some(parsed) = parse_prefix(v) {
                            self.prefix = parsed;
                        }
                    }
                }
                "CHANMODES" => {
                    if let Some(v) = value {
                        self.chanmodes = parse_chanmodes(v);
                    }
                }
                "CASEMAPPING" => {
                    if let Some(v) = value {
                        self.casemapping = match v {
                            "ascii" => CaseMapping::Ascii,
                            "strict-rfc1459" => CaseMapping::StrictRfc1459,
                            _ => CaseMapping::Rfc1459,
                        };
                    }
                }
                _ => {}
            }
        }
    }

    pub fn is_channel_name(&self, name: &str) -> bool {
        name.chars().next().is_some_and(|c| self.chantypes.contains(&c))
    }

    /// Highest-priority prefix symbol for a set of mode chars a user holds
    /// (e.g. `{'o','v'}` -> `@`), or `None` if they hold no recognized mode.
    pub fn highest_prefix(&self, modes: &std::collections::HashSet<char>) -> Option<char> {
        self.prefix
            .iter()
            .find(|(mode, _)| modes.contains(mode))
            .map(|(_, symbol)| *symbol)
    }
}

fn parse_prefix(value: &str) -> Option<Vec<(char, char)>> {
    let value = value.strip_prefix('(')?;
    let (modes, symbols) = value.split_once(')')?;
    if modes.len() != symbols.len() {
        return None;
    }
    Some(modes.chars().zip(symbols.chars()).collect())
}

fn parse_chanmodes(value: &str) -> ChanModes {
    let mut groups = value.split(',');
    ChanModes {
        list: groups.next().unwrap_or_default().chars().collect(),
        always_param: groups.next().unwrap_or_default().chars().collect(),
        param_on_set: groups.next().unwrap_or_default().chars().collect(),
        no_param: groups.next().unwrap_or_default().chars().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1459_folds_bracket_characters() {
        assert_eq!(CaseMapping::Rfc1459.fold("Nick[Away]"), "nick{away}");
    }

    #[test]
    fn ascii_casemapping_does_not_fold_brackets() {
        assert_eq!(CaseMapping::Ascii.fold("Nick[Away]"), "nick[away]");
    }

    #[test]
    fn applies_prefix_and_chanmodes_tokens() {
        let mut support = ServerSupport::default();
        support.apply_tokens(&[
            "CHANTYPES=#&",
            "PREFIX=(ov)@+",
            "CHANMODES=beI,k,l,imnpst",
            "CASEMAPPING=ascii",
        ]);
        assert_eq!(support.chantypes, vec!['#', '&']);
        assert_eq!(support.prefix, vec![('o', '@'), ('v', '+')]);
        assert_eq!(support.chanmodes.list, vec!['b', 'e', 'I']);
        assert_eq!(support.casemapping, CaseMapping::Ascii);
    }

    #[test]
    fn highest_prefix_prefers_op_over_voice() {
        let support = ServerSupport::default();
        let modes: std::collections::HashSet<char> = ['v', 'o'].into_iter().collect();
        assert_eq!(support.highest_prefix(&modes), Some('@'));
    }

    #[test]
    fn is_channel_name_checks_first_character_against_chantypes() {
        let support = ServerSupport::default();
        assert!(support.is_channel_name("#general"));
        assert!(!support.is_channel_name("nick"));
    }
}
