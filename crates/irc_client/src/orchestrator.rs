//! L8 — Connection Orchestrator. Sequences L4→L5→L6→L7, and is the only
//! component allowed to mutate `ConnectionState` (§4.8).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use serde_json::json;

use crate::cap::{CapAction, CapNegotiator};
use crate::errors::{IrcClientError, Result};
use crate::event_bus::EventBus;
use crate::message::parse_line;
use crate::registration::{RegistrationAction, RegistrationHandler};
use crate::sasl::{SaslAction, SaslAuthenticator};
use crate::state::{ConnectionState, StateStore};
use crate::transport::{NetworkTransport, TcpLineTransport, TlsLineTransport, TransportEvent};

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Computes the next exponential-backoff delay with full jitter (§4.8).
pub fn next_backoff(attempt: u32, initial: Duration, factor: u32, cap: Duration) -> Duration {
    let exp = initial.as_millis().saturating_mul((factor as u128).saturating_pow(attempt));
    let capped = exp.min(cap.as_millis());
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered as u64)
}

/// A manual `/disconnect` or `/quit` cancels backoff and forbids
/// auto-reconnect until the next explicit `/connect` (§4.8).
pub struct Orchestrator {
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    auto_reconnect: bool,
    manual_disconnect: AtomicBool,
    attempt: AtomicU32,
}

impl Orchestrator {
    pub fn new(store: Arc<StateStore>, events: Arc<EventBus>, auto_reconnect: bool) -> Self {
        Orchestrator {
            store,
            events,
            auto_reconnect,
            manual_disconnect: AtomicBool::new(false),
            attempt: AtomicU32::new(0),
        }
    }

    fn emit(&self, event: &str) {
        self.events.publish(event, json!({}));
    }

    fn transition(&self, to: ConnectionState) -> Result<()> {
        self.store.transition_connection_state(to)
    }

    /// Mark a manual disconnect/quit: cancels any pending backoff and
    /// suppresses auto-reconnect until `/connect` is issued again.
    pub fn mark_manual_disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::Release);
    }

    pub fn clear_manual_disconnect(&self) {
        self.manual_disconnect.store(false, Ordering::Release);
        self.attempt.store(0, Ordering::Release);
    }

    /// Run one connection attempt end to end: transport -> CAP -> SASL ->
    /// registration. Returns the live transport and its inbound event
    /// stream once the client reaches `Ready`, so the caller can hand both
    /// to the dispatcher for the session that follows, or the failure that
    /// ended the attempt.
    pub async fn run_attempt(
        &self,
    ) -> Result<(Box<dyn NetworkTransport>, tokio::sync::mpsc::Receiver<TransportEvent>)> {
        let info = self.store.connection_info().get();
        let errors = info.validate();
        if !errors.is_empty() {
            self.transition(ConnectionState::ConfigError)?;
            return Err(IrcClientError::ConfigError(errors.join("; ")));
        }

        self.emit("CLIENT_CONNECTING");
        self.transition(ConnectionState::Connecting)?;

        let (transport, mut events): (Box<dyn NetworkTransport>, tokio::sync::mpsc::Receiver<TransportEvent>) =
            if info.tls {
                let (t, r) = TlsLineTransport::connect(
                    &info.host,
                    info.port,
                    info.verify_ssl_cert,
                    crate::transport::DEFAULT_WRITE_QUEUE_CAP,
                )
                .await?;
                if !info.verify_ssl_cert {
                    self.events.publish(
                        "CLIENT_TLS_VERIFICATION_DISABLED",
                        json!({ "host": info.host }),
                    );
                }
                (Box::new(t), r)
            } else {
                let (t, r) = TcpLineTransport::connect(
                    &info.host,
                    info.port,
                    crate::transport::DEFAULT_WRITE_QUEUE_CAP,
                )
                .await?;
                (Box::new(t), r)
            };

        self.emit("CLIENT_CONNECTED");

        self.emit("CLIENT_CAP_NEGOTIATION_START");
        self.transition(ConnectionState::CapNegotiating)?;
        let mut cap = CapNegotiator::new(info.requested_capabilities.iter().cloned());
        for line in cap.start() {
            transport.send_line(line).await?;
        }

        let mut sasl = info
            .sasl_username
            .as_ref()
            .zip(info.sasl_password.as_ref())
            .map(|(u, p)| SaslAuthenticator::new(u.clone(), p.clone()));

        if sasl.is_some() {
            self.transition(ConnectionState::Authenticating)?;
            self.emit("CLIENT_AUTHENTICATING");
        }

        let negotiated = self
            .drive_cap_and_sasl(&*transport, &mut events, &mut cap, &mut sasl)
            .await?;
        self.emit("CLIENT_CAP_NEGOTIATION_COMPLETE");
        let _ = negotiated;

        if sasl.is_some() {
            self.emit("CLIENT_AUTHENTICATED");
        }

        self.emit("CLIENT_REGISTERING");
        self.transition(ConnectionState::Registering)?;
        let mut registration = RegistrationHandler::new(
            info.nick.clone(),
            info.username.clone(),
            info.real_name.clone(),
            info.server_password.clone(),
        );
        for line in registration.start() {
            transport.send_line(line).await?;
        }

        let final_nick = self.drive_registration(&*transport, &mut events, &mut registration).await?;

        self.transition(ConnectionState::Registered)?;
        self.emit("CLIENT_REGISTERED");
        let mut updated = info.clone();
        updated.nick = final_nick;
        let _ = self.store.connection_info().set(updated);

        self.transition(ConnectionState::Ready)?;
        self.emit("CLIENT_READY");
        self.attempt.store(0, Ordering::Release);
        Ok((transport, events))
    }

    async fn drive_cap_and_sasl(
        &self,
        transport: &dyn NetworkTransport,
        events: &mut tokio::sync::mpsc::Receiver<TransportEvent>,
        cap: &mut CapNegotiator,
        sasl: &mut Option<SaslAuthenticator>,
    ) -> Result<std::collections::HashSet<String>> {
        let deadline = tokio::time::Instant::now() + crate::cap::DEFAULT_OVERALL_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(cap.timeout_error());
            }
            let event = tokio::time::timeout(remaining, events.recv())
                .await
                .map_err(|_| cap.timeout_error())?
                .ok_or(IrcClientError::TransportIo(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "transport closed during CAP negotiation",
                )))?;

            let TransportEvent::Line(line) = event else {
                return Err(IrcClientError::TransportIo(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "transport disconnected during CAP negotiation",
                )));
            };
            let Ok(msg) = parse_line(&line) else { continue };

            if let Some(authenticator) = sasl.as_mut() {
                match authenticator.on_message(&msg) {
                    SaslAction::Send(reply) => {
                        transport.send_line(reply).await?;
                        continue;
                    }
                    SaslAction::Succeeded => {
                        let action = cap.sasl_finished();
                        if let CapAction::Done(negotiated) = action {
                            transport.send_line("CAP END".to_string()).await?;
                            return Ok(negotiated);
                        }
                    }
                    SaslAction::Failed(e) => return Err(IrcClientError::Sasl(e)),
                    SaslAction::Ignore => {}
                }
            }

            match cap.on_message(&msg) {
                CapAction::Send(lines) => {
                    for line in lines {
                        transport.send_line(line).await?;
                    }
                }
                CapAction::AwaitSasl => {
                    if let Some(authenticator) = sasl.as_mut() {
                        let line = authenticator.start();
                        transport.send_line(line).await?;
                    } else {
                        transport.send_line("CAP END".to_string()).await?;
                        return Ok(cap.negotiated().clone());
                    }
                }
                CapAction::Done(negotiated) => {
                    transport.send_line("CAP END".to_string()).await?;
                    return Ok(negotiated);
                }
                CapAction::Ignore => {}
            }
        }
    }

    async fn drive_registration(
        &self,
        transport: &dyn NetworkTransport,
        events: &mut tokio::sync::mpsc::Receiver<TransportEvent>,
        registration: &mut RegistrationHandler,
    ) -> Result<String> {
        let deadline = tokio::time::Instant::now() + crate::registration::DEFAULT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(registration.timeout_error());
            }
            let event = tokio::time::timeout(remaining, events.recv())
                .await
                .map_err(|_| registration.timeout_error())?
                .ok_or(IrcClientError::TransportIo(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "transport closed during registration",
                )))?;

            let TransportEvent::Line(line) = event else {
                return Err(IrcClientError::TransportIo(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "transport disconnected during registration",
                )));
            };
            let Ok(msg) = parse_line(&line) else { continue };

            match registration.on_message(&msg) {
                RegistrationAction::Send(lines) => {
                    for line in lines {
                        transport.send_line(line).await?;
                    }
                }
                RegistrationAction::Welcome { nick } => return Ok(nick),
                RegistrationAction::Failed(e) => return Err(e),
                RegistrationAction::Ignore => {}
            }
        }
    }

    /// Run attempts in a loop, applying exponential backoff with full jitter
    /// between retryable failures, until success, a non-retryable failure,
    /// or a manual disconnect. On success returns the live transport and
    /// its event stream for the caller to dispatch; `None` means the loop
    /// gave up (manual disconnect or a non-retryable error).
    pub async fn connect_with_reconnect(
        &self,
    ) -> Option<(Box<dyn NetworkTransport>, tokio::sync::mpsc::Receiver<TransportEvent>)> {
        loop {
            match self.run_attempt().await {
                Ok(pair) => return Some(pair),
                Err(e) => {
                    warn!("connection attempt failed: {e}");
                    let _ = self.transition(ConnectionState::Disconnected);
                    self.emit("CLIENT_DISCONNECTED");

                    if self.manual_disconnect.load(Ordering::Acquire) {
                        info!("manual disconnect in effect; not reconnecting");
                        return None;
                    }
                    if !self.auto_reconnect || !e.is_retryable() {
                        return None;
                    }

                    let attempt = self.attempt.fetch_add(1, Ordering::AcqRel);
                    let delay = next_backoff(
                        attempt,
                        DEFAULT_INITIAL_BACKOFF,
                        DEFAULT_BACKOFF_FACTOR,
                        DEFAULT_BACKOFF_CAP,
                    );
                    self.emit("CLIENT_RECONNECTING");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_the_cap() {
        for attempt in 0..20 {
            let delay = next_backoff(attempt, DEFAULT_INITIAL_BACKOFF, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_CAP);
            assert!(delay <= DEFAULT_BACKOFF_CAP);
        }
    }

    #[test]
    fn backoff_grows_then_saturates_at_the_cap_bound() {
        let early = next_backoff(0, DEFAULT_INITIAL_BACKOFF, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_CAP);
        assert!(early <= DEFAULT_INITIAL_BACKOFF);
        let late = next_backoff(10, DEFAULT_INITIAL_BACKOFF, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_CAP);
        assert!(late <= DEFAULT_BACKOFF_CAP);
    }
}
