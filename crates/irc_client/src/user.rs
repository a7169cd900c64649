//! §3 `User` data model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub nick: String,
    pub ident: Option<String>,
    pub host: Option<String>,
    pub account: Option<String>,
    pub away: bool,
}

impl User {
    pub fn new(nick: impl Into<String>) -> Self {
        User {
            nick: nick.into(),
            ident: None,
            host: None,
            account: None,
            away: false,
        }
    }
}
