//! `Core`: the explicit value that replaces "global singletons (client
//! logic, managers)" (§9 design notes). Every subsystem is reached
//! through a handle into this value instead of a static; the State Store
//! remains the only piece that is itself "globally reachable."

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{info, warn};
use serde_json::json;

use crate::config::ClientConfig;
use crate::dcc::{DccConfig, DccRegistry};
use crate::dispatcher::Dispatcher;
use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::message::{parse_line, IrcMessage, Source, Verb};
use crate::orchestrator::Orchestrator;
use crate::scripting::CommandRegistry;
use crate::state::{ConnectionState, StateStore};
use crate::transport::{NetworkTransport, TransportEvent};
use crate::trigger::{TriggerContext, TriggerSet};

/// Everything one running client session needs, wired together once at
/// startup. `Arc<Core>` is the handle passed to whatever owns the UI loop
/// or headless driver.
pub struct Core {
    pub store: Arc<StateStore>,
    pub events: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    pub dcc: Arc<DccRegistry>,
    pub dcc_config: DccConfig,
    pub commands: Arc<CommandRegistry>,
    pub triggers: RwLock<TriggerSet>,
}

impl Core {
    /// Build a `Core` from a loaded configuration. Seeds the State Store's
    /// `ConnectionInfo` from `config.connection`; the store's own validator
    /// rejects a malformed one (§4.2).
    pub fn new(config: ClientConfig, now_unix: i64) -> Result<Arc<Self>> {
        let store = Arc::new(StateStore::load(PathBuf::from(&config.persist_path), now_unix));
        store.connection_info().set(config.connection)?;

        let events = Arc::new(EventBus::new());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            events.clone(),
            config.features.auto_reconnect,
        ));
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), events.clone()));

        Ok(Arc::new(Core {
            store,
            events,
            orchestrator,
            dispatcher,
            dcc: Arc::new(DccRegistry::new()),
            dcc_config: config.dcc.into(),
            commands: Arc::new(CommandRegistry::new()),
            triggers: RwLock::new(TriggerSet::new()),
        }))
    }

    /// Spawn the periodic persistence flush and DCC sweep loops (§4.2,
    /// §4.10 defaults). Call once after construction.
    pub fn spawn_background_tasks(self: &Arc<Self>, persist_interval: Duration) {
        self.store.spawn_persist_loop(persist_interval);
        self.dcc.clone().spawn_sweep_loop(
            self.store.clone(),
            self.events.clone(),
            Duration::from_secs(self.dcc_config.cleanup_interval_seconds),
            (self.dcc_config.transfer_max_age_seconds as i64).saturating_mul(1000),
            (self.dcc_config.passive_token_timeout_seconds as i64).saturating_mul(1000),
        );
    }

    /// Connect (retrying with backoff per §4.8) and dispatch every
    /// inbound line until the orchestrator gives up — a manual disconnect
    /// or a non-retryable failure. Reconnects transparently in between.
    pub async fn run(self: &Arc<Self>) {
        loop {
            let Some((transport, mut transport_events)) = self.orchestrator.connect_with_reconnect().await else {
                return;
            };
            let transport: Arc<dyn NetworkTransport> = Arc::from(transport);
            info!("session established; entering dispatch loop");

            loop {
                let Some(event) = transport_events.recv().await else { break };
                match event {
                    TransportEvent::Line(line) => match parse_line(&line) {
                        Ok(msg) => {
                            if let Err(e) = self.dispatcher.dispatch(&msg, &*transport).await {
                                warn!("dispatch error: {e}");
                            }
                            self.fire_triggers(&msg);
                        }
                        Err(e) => warn!("dropping malformed line: {e}"),
                    },
                    TransportEvent::Disconnected(reason) => {
                        info!("transport disconnected: {reason}");
                        break;
                    }
                }
            }

            let _ = self.store.transition_connection_state(ConnectionState::Disconnected);
            self.events.publish("CLIENT_DISCONNECTED", json!({}));
        }
    }

    /// Evaluate trigger rules against one dispatched message and publish a
    /// `TRIGGER_FIRED` event per match. Running the matched command/script
    /// is the out-of-scope command dispatcher / scripting engine's job —
    /// this only decides what fired.
    fn fire_triggers(&self, msg: &IrcMessage) {
        let Some((event_name, nick, channel, text)) = trigger_fields(msg) else { return };
        let fired: Vec<(String, crate::trigger::TriggerActionKind, String)> = {
            let triggers = self.triggers.read().expect("lock poisoned");
            let ctx = TriggerContext { nick, channel, text };
            triggers
                .matching(event_name, &ctx)
                .into_iter()
                .map(|a| (a.rule_id.to_string(), a.kind, a.payload.to_string()))
                .collect()
        };
        for (rule_id, kind, payload) in fired {
            self.events.publish(
                "TRIGGER_FIRED",
                json!({ "rule_id": rule_id, "kind": format!("{kind:?}"), "payload": payload }),
            );
        }
    }
}

/// Maps a wire message onto the (event_name, nick, channel, text) shape
/// trigger patterns match against, mirroring the dispatcher's own framing
/// of the same commands (§4.9).
fn trigger_fields(msg: &IrcMessage) -> Option<(&'static str, Option<&str>, Option<&str>, Option<&str>)> {
    let Verb::Command(cmd) = &msg.verb else { return None };
    let nick = msg.source.as_ref().and_then(Source::nick);
    match cmd.as_str() {
        "PRIVMSG" | "NOTICE" => Some(("MESSAGE_RECEIVED", nick, msg.param(0), msg.param(1))),
        "JOIN" => Some(("CHANNEL_JOINED", nick, msg.param(0), None)),
        "PART" => Some(("CHANNEL_PARTED", nick, msg.param(0), msg.param(1))),
        "QUIT" => Some(("USER_QUIT", nick, None, msg.param(0))),
        "NICK" => Some(("USER_NICK_CHANGED", nick, None, msg.param(0))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_line;

    fn config() -> ClientConfig {
        ClientConfig {
            connection: crate::state::ConnectionInfo {
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
            },
            features: crate::config::FeaturesConfig::default(),
            dcc: crate::config::DccFileConfig::default(),
            persist_path: std::env::temp_dir()
                .join(format!("irc_client_core_test_{}.json", std::process::id()))
                .to_string_lossy()
                .into_owned(),
        }
    }

    #[test]
    fn trigger_fields_extracts_message_received_shape() {
        let msg = parse_line(":bob!b@h PRIVMSG #chan :!ping").unwrap();
        let (event, nick, channel, text) = trigger_fields(&msg).unwrap();
        assert_eq!(event, "MESSAGE_RECEIVED");
        assert_eq!(nick, Some("bob"));
        assert_eq!(channel, Some("#chan"));
        assert_eq!(text, Some("!ping"));
    }

    #[test]
    fn fire_triggers_publishes_trigger_fired_for_a_matching_rule() {
        let core = Core::new(config(), 0).unwrap();
        core.triggers.write().unwrap().add(crate::trigger::TriggerRule {
            id: "r1".into(),
            pattern: crate::trigger::EventPattern {
                event_name: "MESSAGE_RECEIVED".into(),
                nick: None,
                channel: None,
                text: Some(regex::Regex::new("^!ping").unwrap()),
            },
            action_kind: crate::trigger::TriggerActionKind::Command,
            action_payload: "PRIVMSG #chan :pong".into(),
            enabled: true,
        });

        let seen = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let seen = seen.clone();
            core.events.subscribe("TRIGGER_FIRED", move |_, _| {
                seen.store(true, std::sync::atomic::Ordering::SeqCst);
            });
        }

        let msg = parse_line(":bob!b@h PRIVMSG #chan :!ping").unwrap();
        core.fire_triggers(&msg);
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
