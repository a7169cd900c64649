//! Headless demo/test driver: wires a `Core` up from CLI flags or a TOML
//! config file, prints every status-context line and event bus event to
//! stderr, and runs the connection loop. No terminal UI, slash-command
//! dispatch, or scripting engine lives here — those are out of scope.

use clap::Parser;
use flexi_logger::{Duplicate, Logger};
use irc_client::config::ClientConfig;
use irc_client::constants::SUPPORTED_CAPABILITIES;
use irc_client::context::{ContextKind, DEFAULT_HEADLESS_CAP};
use irc_client::core::Core;
use irc_client::state::ConnectionInfo;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "irc_client_headless", about = "headless driver for the irc_client core")]
struct Args {
    /// Path to a TOML config file (see `ClientConfig::load_toml`). When
    /// given, every other flag is ignored.
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "irc.libera.chat")]
    host: String,

    #[arg(long, default_value_t = 6697)]
    port: u16,

    /// Connect over plaintext instead of TLS.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    plaintext: bool,

    /// Skip TLS certificate verification (§4.4 warning-event path).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    insecure: bool,

    #[arg(long, default_value = "irc_client_guest")]
    nick: String,

    #[arg(long)]
    sasl_username: Option<String>,

    #[arg(long)]
    sasl_password: Option<String>,

    #[arg(long, default_value = "irc_client_state.json")]
    persist_path: String,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            connection: ConnectionInfo {
                host: self.host,
                port: self.port,
                tls: !self.plaintext,
                verify_ssl_cert: !self.insecure,
                nick: self.nick.clone(),
                username: self.nick.clone(),
                real_name: self.nick,
                server_password: None,
                nickserv_password: None,
                sasl_username: self.sasl_username,
                sasl_password: self.sasl_password,
                auto_join_channels: Vec::new(),
                requested_capabilities: SUPPORTED_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
                config_errors: Vec::new(),
            },
            features: irc_client::config::FeaturesConfig::default(),
            dcc: irc_client::config::DccFileConfig::default(),
            persist_path: self.persist_path,
        }
    }
}

fn log_every_event(core: &std::sync::Arc<Core>) {
    core.events.subscribe("CLIENT_CONNECTING", |_, _| info!("connecting..."));
    core.events.subscribe("CLIENT_CONNECTED", |_, _| info!("transport connected"));
    core.events.subscribe("CLIENT_CAP_NEGOTIATION_START", |_, _| info!("negotiating capabilities"));
    core.events
        .subscribe("CLIENT_CAP_NEGOTIATION_COMPLETE", |_, _| info!("capability negotiation complete"));
    core.events.subscribe("CLIENT_AUTHENTICATING", |_, _| info!("authenticating via SASL"));
    core.events.subscribe("CLIENT_AUTHENTICATED", |_, _| info!("SASL authentication succeeded"));
    core.events.subscribe("CLIENT_REGISTERING", |_, _| info!("registering"));
    core.events.subscribe("CLIENT_REGISTERED", |_, _| info!("registered"));
    core.events.subscribe("CLIENT_READY", |_, _| info!("ready"));
    core.events
        .subscribe("CLIENT_DISCONNECTED", |_, _| info!("disconnected"));
    core.events
        .subscribe("CLIENT_RECONNECTING", |_, _| info!("reconnecting"));
    core.events.subscribe("CONTEXT_MESSAGE_APPENDED", |_, payload| {
        if let Some(text) = payload.get("text").and_then(|v| v.as_str()) {
            println!("{text}");
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")
        .and_then(|logger| logger.log_to_stderr().duplicate_to_stderr(Duplicate::All).start())
        .ok();

    let args = Args::parse();
    let config = if let Some(path) = args.config.clone() {
        ClientConfig::load_toml(path)?
    } else {
        args.into_config()
    };

    let now = chrono::Utc::now().timestamp();
    let core = Core::new(config, now)?;
    core.store
        .get_or_create_context("status", ContextKind::Status, DEFAULT_HEADLESS_CAP);
    core.spawn_background_tasks(irc_client::state::DEFAULT_PERSIST_INTERVAL);
    log_every_event(&core);

    core.run().await;
    Ok(())
}
