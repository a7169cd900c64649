//! L9 — Protocol Dispatcher. Routes parsed messages to the handler table
//! and maintains the channel/user models in L2 (§4.9).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use log::warn;
use serde_json::json;

use crate::channel::canonical_name;
use crate::constants::{
    ERR_NOSUCHCHANNEL, ERR_NOSUCHNICK, RPL_ISUPPORT, RPL_NAMREPLY, RPL_TOPIC, RPL_TOPICWHOTIME,
};
use crate::context::{ContextKind, RenderedLine};
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::message::{IrcMessage, Source, Verb};
use crate::state::StateStore;
use crate::transport::NetworkTransport;

/// `RPL_ENDOFNAMES` — handled alongside `RPL_NAMREPLY` but not re-exported
/// from constants.rs since it is only meaningful here.
const RPL_ENDOFNAMES: u16 = 366;

pub struct Dispatcher {
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    /// Accumulates `RPL_NAMREPLY` entries per channel until `RPL_ENDOFNAMES`.
    pending_names: DashMap<String, Vec<(String, HashSet<char>)>>,
}

impl Dispatcher {
    pub fn new(store: Arc<StateStore>, events: Arc<EventBus>) -> Self {
        Dispatcher {
            store,
            events,
            pending_names: DashMap::new(),
        }
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        self.events.publish(event, payload);
    }

    fn append_line(&self, context_id: &str, kind: ContextKind, text: String) {
        self.store.get_or_create_context(context_id, kind, crate::context::DEFAULT_INTERACTIVE_CAP);
        let line = RenderedLine {
            text: text.clone(),
            timestamp_millis: Utc::now().timestamp_millis(),
        };
        self.store.with_context(context_id, |ctx| ctx.append(line));
        self.emit("CONTEXT_MESSAGE_APPENDED", json!({ "context": context_id, "text": text }));
    }

    fn my_nick(&self) -> String {
        self.store.connection_info().get().nick
    }

    fn fold(&self, s: &str) -> String {
        self.store.server_support().casemapping.fold(s)
    }

    /// Process one already-parsed line. Per §4.9 this must run to
    /// completion before the caller dispatches the next line.
    pub async fn dispatch(&self, msg: &IrcMessage, transport: &dyn NetworkTransport) -> Result<()> {
        match &msg.verb {
            Verb::Command(cmd) => self.dispatch_command(cmd, msg, transport).await,
            Verb::Numeric(n) => self.dispatch_numeric(*n, msg),
        }
    }

    async fn dispatch_command(
        &self,
        cmd: &str,
        msg: &IrcMessage,
        transport: &dyn NetworkTransport,
    ) -> Result<()> {
        match cmd {
            "PING" => {
                let trailing = msg.param(0).unwrap_or("").to_string();
                transport.send_line(format!("PONG :{trailing}")).await?;
            }
            "PRIVMSG" | "NOTICE" => self.handle_privmsg_or_notice(cmd, msg, transport).await?,
            "JOIN" => self.handle_join(msg),
            "PART" => self.handle_part(msg),
            "KICK" => self.handle_kick(msg),
            "QUIT" => self.handle_quit(msg),
            "NICK" => self.handle_nick(msg),
            "MODE" => self.handle_mode(msg),
            "TOPIC" => self.handle_topic(msg),
            "ERROR" => {
                let reason = msg.param(0).unwrap_or("remote error").to_string();
                warn!("server sent ERROR: {reason}");
                self.append_line("status", ContextKind::Status, format!("* Error: {reason}"));
                self.emit("CLIENT_REMOTE_ERROR", json!({ "reason": reason }));
            }
            _ => {
                // Unknown commands are logged and ignored; unknown numerics
                // (handled in dispatch_numeric) get surfaced to the user.
            }
        }
        Ok(())
    }

    async fn handle_privmsg_or_notice(
        &self,
        cmd: &str,
        msg: &IrcMessage,
        transport: &dyn NetworkTransport,
    ) -> Result<()> {
        let Some(target) = msg.param(0) else { return Ok(()) };
        let from_nick = msg.source.as_ref().and_then(Source::nick).unwrap_or("*");
        let is_channel = self.store.server_support().is_channel_name(target);
        let context_id = if is_channel {
            self.fold(target)
        } else if from_nick != "*" {
            self.fold(from_nick)
        } else {
            "status".to_string()
        };
        let context_kind = if is_channel { ContextKind::Channel } else { ContextKind::Query };

        if let Some(ctcp) = msg.ctcp_payload() {
            return self
                .handle_ctcp(cmd, from_nick, &context_id, context_kind, ctcp, transport)
                .await;
        }

        let text = msg.param(1).unwrap_or("");
        let rendered = format!("<{from_nick}> {text}");
        self.append_line(&context_id, context_kind, rendered);
        self.emit(
            "MESSAGE_RECEIVED",
            json!({ "from": from_nick, "target": target, "text": text, "notice": cmd == "NOTICE" }),
        );
        Ok(())
    }

    async fn handle_ctcp(
        &self,
        cmd: &str,
        from_nick: &str,
        context_id: &str,
        context_kind: ContextKind,
        payload: &str,
        transport: &dyn NetworkTransport,
    ) -> Result<()> {
        let mut parts = payload.splitn(2, ' ');
        let ctcp_cmd = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("");

        if ctcp_cmd == "ACTION" {
            self.append_line(context_id, context_kind, format!("* {from_nick} {arg}"));
            return Ok(());
        }

        if cmd != "PRIVMSG" {
            return Ok(());
        }

        let reply = match ctcp_cmd {
            "VERSION" => Some("VERSION irc_client".to_string()),
            "PING" => Some(format!("PING {arg}")),
            "TIME" => Some(format!("TIME {}", Utc::now().to_rfc2822())),
            _ => None,
        };
        if let Some(reply) = reply {
            transport
                .send_line(format!("NOTICE {from_nick} :\x01{reply}\x01"))
                .await?;
        }
        Ok(())
    }

    fn handle_join(&self, msg: &IrcMessage) {
        let Some(raw_channel) = msg.param(0) else { return };
        let Some(from_nick) = msg.source.as_ref().and_then(Source::nick) else { return };
        let canonical = self.fold(raw_channel);
        let my_nick_folded = self.fold(&self.my_nick());

        self.store.get_or_create_channel(&canonical, raw_channel);
        self.store.with_channel(&canonical, |ch| {
            ch.add_member(from_nick);
            if self.fold(from_nick) == my_nick_folded {
                ch.join_complete = false;
            }
        });

        if self.fold(from_nick) == my_nick_folded {
            self.store.get_or_create_context(&canonical, ContextKind::Channel, crate::context::DEFAULT_INTERACTIVE_CAP);
            self.append_line(&canonical, ContextKind::Channel, format!("* You joined {raw_channel}"));
        } else {
            self.append_line(&canonical, ContextKind::Channel, format!("* {from_nick} joined {raw_channel}"));
        }
        self.emit("CHANNEL_JOINED", json!({ "channel": raw_channel, "nick": from_nick }));
    }

    fn handle_part(&self, msg: &IrcMessage) {
        let Some(raw_channel) = msg.param(0) else { return };
        let Some(from_nick) = msg.source.as_ref().and_then(Source::nick) else { return };
        let canonical = self.fold(raw_channel);
        let my_nick_folded = self.fold(&self.my_nick());
        let reason = msg.param(1).unwrap_or("");

        self.store.with_channel(&canonical, |ch| ch.remove_member(from_nick));
        self.append_line(&canonical, ContextKind::Channel, format!("* {from_nick} left {raw_channel} ({reason})"));

        if self.fold(from_nick) == my_nick_folded {
            self.emit("CHANNEL_PARTED", json!({ "channel": raw_channel }));
        }
    }

    fn handle_kick(&self, msg: &IrcMessage) {
        let Some(raw_channel) = msg.param(0) else { return };
        let Some(kicked_nick) = msg.param(1) else { return };
        let kicker = msg.source.as_ref().and_then(Source::nick).unwrap_or("*");
        let canonical = self.fold(raw_channel);
        let my_nick_folded = self.fold(&self.my_nick());
        let reason = msg.param(2).unwrap_or("");

        self.store.with_channel(&canonical, |ch| ch.remove_member(kicked_nick));
        self.append_line(
            &canonical,
            ContextKind::Channel,
            format!("* {kicked_nick} was kicked by {kicker} ({reason})"),
        );

        if self.fold(kicked_nick) == my_nick_folded {
            self.emit("CHANNEL_KICKED", json!({ "channel": raw_channel }));
        }
    }

    fn handle_quit(&self, msg: &IrcMessage) {
        let Some(from_nick) = msg.source.as_ref().and_then(Source::nick) else { return };
        let reason = msg.param(0).unwrap_or("");
        for canonical in self.store.channel_names() {
            let had_member = self
                .store
                .with_channel(&canonical, |ch| {
                    let present = ch.has_member(from_nick);
                    ch.remove_member(from_nick);
                    present
                })
                .unwrap_or(false);
            if had_member {
                self.append_line(&canonical, ContextKind::Channel, format!("* {from_nick} quit ({reason})"));
            }
        }
        self.emit("USER_QUIT", json!({ "nick": from_nick, "reason": reason }));
    }

    fn handle_nick(&self, msg: &IrcMessage) {
        let Some(from_nick) = msg.source.as_ref().and_then(Source::nick) else { return };
        let Some(new_nick) = msg.param(0) else { return };
        let old_folded = self.fold(from_nick);
        let new_folded = self.fold(new_nick);
        let my_nick_folded = self.fold(&self.my_nick());

        for canonical in self.store.channel_names() {
            self.store.with_channel(&canonical, |ch| ch.rename_member(from_nick, new_nick));
        }
        self.store.rename_user(&old_folded, &new_folded, new_nick);

        if old_folded == my_nick_folded {
            let mut info = self.store.connection_info().get();
            info.nick = new_nick.to_string();
            let _ = self.store.connection_info().set(info);
        }

        self.emit("USER_NICK_CHANGED", json!({ "old": from_nick, "new": new_nick }));
    }

    fn handle_mode(&self, msg: &IrcMessage) {
        let Some(target) = msg.param(0) else { return };
        let support = self.store.server_support();
        if !support.is_channel_name(target) {
            return; // user modes aren't modeled beyond §3's scope
        }
        let canonical = self.fold(target);
        let Some(mode_string) = msg.param(1) else { return };
        let mut arg_index = 2;
        let mut deltas = Vec::new();

        let mut adding = true;
        for c in mode_string.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                c if support.prefix.iter().any(|(m, _)| *m == c) => {
                    if let Some(nick) = msg.param(arg_index) {
                        self.store.with_channel(&canonical, |ch| ch.set_member_mode(nick, c, adding));
                        deltas.push(json!({ "mode": c, "set": adding, "param": nick }));
                        arg_index += 1;
                    }
                }
                c if support.chanmodes.always_param.contains(&c)
                    || (adding && support.chanmodes.param_on_set.contains(&c))
                    || support.chanmodes.list.contains(&c) =>
                {
                    let param = msg.param(arg_index).map(|s| s.to_string());
                    self.store.with_channel(&canonical, |ch| {
                        if adding {
                            ch.modes.parameterized.insert(c, param.clone().unwrap_or_default());
                        } else {
                            ch.modes.parameterized.remove(&c);
                        }
                    });
                    deltas.push(json!({ "mode": c, "set": adding, "param": param }));
                    arg_index += 1;
                }
                c => {
                    self.store.with_channel(&canonical, |ch| {
                        if adding {
                            ch.modes.simple.insert(c);
                        } else {
                            ch.modes.simple.remove(&c);
                        }
                    });
                    deltas.push(json!({ "mode": c, "set": adding }));
                }
            }
        }

        self.emit("CHANNEL_MODE_APPLIED", json!({ "channel": target, "deltas": deltas }));
    }

    fn handle_topic(&self, msg: &IrcMessage) {
        let Some(raw_channel) = msg.param(0) else { return };
        let setter = msg.source.as_ref().and_then(Source::nick).unwrap_or("*").to_string();
        let topic = msg.param(1).unwrap_or("").to_string();
        let canonical = self.fold(raw_channel);
        self.store.with_channel(&canonical, |ch| {
            ch.topic = Some(topic.clone());
            ch.topic_set_by = Some(setter.clone());
            ch.topic_set_at = Some(Utc::now().timestamp());
        });
        self.append_line(&canonical, ContextKind::Channel, format!("* {setter} changed topic to: {topic}"));
        self.emit("CHANNEL_TOPIC_CHANGED", json!({ "channel": raw_channel, "topic": topic, "by": setter }));
    }

    fn dispatch_numeric(&self, n: u16, msg: &IrcMessage) -> Result<()> {
        match n {
            RPL_ISUPPORT => {
                let tokens: Vec<&str> = msg.params[1..msg.params.len().saturating_sub(1).max(1)]
                    .iter()
                    .map(String::as_str)
                    .collect();
                self.store.update_server_support(|support| support.apply_tokens(&tokens));
            }
            RPL_TOPIC => {
                if let (Some(raw_channel), Some(topic)) = (msg.param(1), msg.param(2)) {
                    let canonical = self.fold(raw_channel);
                    self.store.with_channel(&canonical, |ch| ch.topic = Some(topic.to_string()));
                }
            }
            RPL_TOPICWHOTIME => {
                if let (Some(raw_channel), Some(who)) = (msg.param(1), msg.param(2)) {
                    let canonical = self.fold(raw_channel);
                    self.store.with_channel(&canonical, |ch| ch.topic_set_by = Some(who.to_string()));
                }
            }
            RPL_NAMREPLY => self.handle_namreply(msg),
            RPL_ENDOFNAMES => self.handle_endofnames(msg),
            ERR_NOSUCHNICK | ERR_NOSUCHCHANNEL => {
                let text = msg.params.last().cloned().unwrap_or_default();
                self.append_line("status", ContextKind::Status, format!("* {text}"));
            }
            _ => {
                let text = msg.params.last().cloned().unwrap_or_default();
                self.append_line("status", ContextKind::Status, format!("* {n:03}: {text}"));
            }
        }
        Ok(())
    }

    fn handle_namreply(&self, msg: &IrcMessage) {
        let Some(raw_channel) = msg.param(2) else { return };
        let Some(names) = msg.params.last() else { return };
        let support = self.store.server_support();
        let canonical = self.fold(raw_channel);

        let mut entries = Vec::new();
        for token in names.split_whitespace() {
            let mut modes = HashSet::new();
            let mut rest = token;
            while let Some(c) = rest.chars().next() {
                if let Some((mode_char, _)) = support.prefix.iter().find(|(_, sym)| *sym == c) {
                    modes.insert(*mode_char);
                    rest = &rest[c.len_utf8()..];
                } else {
                    break;
                }
            }
            entries.push((rest.to_string(), modes));
        }

        self.pending_names.entry(canonical).or_default().extend(entries);
    }

    fn handle_endofnames(&self, msg: &IrcMessage) {
        let Some(raw_channel) = msg.param(1) else { return };
        let canonical = self.fold(raw_channel);
        self.store.get_or_create_channel(&canonical, raw_channel);

        if let Some((_, entries)) = self.pending_names.remove(&canonical) {
            self.store.with_channel(&canonical, |ch| {
                for (nick, modes) in entries {
                    ch.add_member(&nick);
                    for m in modes {
                        ch.set_member_mode(&nick, m, true);
                    }
                }
                ch.join_complete = true;
            });
        } else {
            self.store.with_channel(&canonical, |ch| ch.join_complete = true);
        }

        self.emit("CHANNEL_FULLY_JOINED", json!({ "channel": raw_channel }));
    }
}

pub fn canonicalize(raw: &str, store: &StateStore) -> String {
    canonical_name(raw, store.server_support().casemapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;
    use crate::state::ConnectionInfo;
    use tempfile::tempdir;

    fn dispatcher() -> Dispatcher {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::load(dir.path().join("state.json"), 0));
        let info = ConnectionInfo {
            host: "irc.example.com".into(),
            port: 6697,
            tls: true,
            verify_ssl_cert: true,
            nick: "me".into(),
            username: "me".into(),
            real_name: "Me".into(),
            server_password: None,
            nickserv_password: None,
            sasl_username: None,
            sasl_password: None,
            auto_join_channels: Vec::new(),
            requested_capabilities: Vec::new(),
            config_errors: Vec::new(),
        };
        store.connection_info().set(info).unwrap();
        Dispatcher::new(store, Arc::new(EventBus::new()))
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl NetworkTransport for RecordingTransport {
        async fn send_line(&self, line: String) -> Result<()> {
            self.sent.lock().unwrap().push(line);
            Ok(())
        }
        async fn close(&self, _reason: String) {}
    }

    #[tokio::test]
    async fn ping_replies_with_matching_pong() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::default();
        let msg = parse_line("PING :abc.def").unwrap();
        dispatcher.dispatch(&msg, &transport).await.unwrap();
        assert_eq!(transport.sent.lock().unwrap().as_slice(), ["PONG :abc.def"]);
    }

    #[tokio::test]
    async fn namreply_then_endofnames_populates_channel_members() {
        let dispatcher = dispatcher();
        let names = parse_line(":irc.example.com 353 me = #chan :@op +voice plain").unwrap();
        dispatcher.dispatch(&names, &RecordingTransport::default()).await.unwrap();
        let end = parse_line(":irc.example.com 366 me #chan :End of /NAMES list").unwrap();
        dispatcher.dispatch(&end, &RecordingTransport::default()).await.unwrap();

        let canonical = dispatcher.fold("#chan");
        let has_op = dispatcher
            .store
            .with_channel(&canonical, |ch| ch.members.get("op").unwrap().contains(&'o'))
            .unwrap();
        assert!(has_op);
        let join_complete = dispatcher.store.with_channel(&canonical, |ch| ch.join_complete).unwrap();
        assert!(join_complete);
    }

    #[tokio::test]
    async fn join_creates_channel_and_context() {
        let dispatcher = dispatcher();
        let join = parse_line(":bob!b@h JOIN #chan").unwrap();
        dispatcher.dispatch(&join, &RecordingTransport::default()).await.unwrap();
        let canonical = dispatcher.fold("#chan");
        assert!(dispatcher.store.with_channel(&canonical, |ch| ch.has_member("bob")).unwrap());
    }

    #[tokio::test]
    async fn ctcp_action_is_rendered_as_an_action_line() {
        let dispatcher = dispatcher();
        let action = parse_line(":bob!b@h PRIVMSG me :\x01ACTION waves\x01").unwrap();
        dispatcher.dispatch(&action, &RecordingTransport::default()).await.unwrap();
        let canonical = dispatcher.fold("bob");
        let has_line = dispatcher
            .store
            .with_context(&canonical, |ctx| ctx.len() > 0)
            .unwrap_or(false);
        assert!(has_line);
    }
}
