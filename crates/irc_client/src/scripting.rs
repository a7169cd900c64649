//! The "event/command API consumed by external scripting layer" boundary
//! (§6). No scripting runtime lives here — only the two traits a
//! script engine would implement, plus the registry the core uses to
//! enforce the one guarantee §6 makes: command names are
//! case-insensitive and collisions are rejected.

use dashmap::DashMap;

use crate::event_bus::EventPayload;

/// Implemented by the (out-of-scope) scripting engine to receive events the
/// core publishes. The core only ever calls through this trait; it never
/// inspects what a script does with an event.
pub trait ScriptEventSink: Send + Sync {
    fn on_event(&self, event: &str, payload: &EventPayload);
}

/// Implemented by the core and handed to the scripting engine so scripts
/// can register commands. `register_command` rejects a name that collides,
/// case-insensitively, with one already registered.
pub trait ScriptCommandRegistry: Send + Sync {
    fn register_command(&self, name: &str, help: &str) -> Result<(), CommandRegistrationError>;
    fn unregister_command(&self, name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRegistrationError {
    #[error("command '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Debug, Clone)]
pub struct RegisteredCommand {
    pub name: String,
    pub help: String,
}

/// Concrete `ScriptCommandRegistry` the core owns. Keyed by lowercased name
/// so `/Join` and `/join` collide.
#[derive(Default)]
pub struct CommandRegistry {
    commands: DashMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry::default()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredCommand> {
        self.commands.get(&name.to_ascii_lowercase()).map(|e| e.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.iter().map(|e| e.value().name.clone()).collect()
    }
}

impl ScriptCommandRegistry for CommandRegistry {
    fn register_command(&self, name: &str, help: &str) -> Result<(), CommandRegistrationError> {
        let key = name.to_ascii_lowercase();
        if self.commands.contains_key(&key) {
            return Err(CommandRegistrationError::AlreadyRegistered(name.to_string()));
        }
        self.commands.insert(
            key,
            RegisteredCommand {
                name: name.to_string(),
                help: help.to_string(),
            },
        );
        Ok(())
    }

    fn unregister_command(&self, name: &str) {
        self.commands.remove(&name.to_ascii_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_the_same_command_name_case_insensitively_is_rejected() {
        let registry = CommandRegistry::new();
        registry.register_command("Join", "join a channel").unwrap();
        let err = registry.register_command("join", "duplicate").unwrap_err();
        assert_eq!(err, CommandRegistrationError::AlreadyRegistered("join".to_string()));
    }

    #[test]
    fn unregistering_frees_the_name_for_reuse() {
        let registry = CommandRegistry::new();
        registry.register_command("part", "leave a channel").unwrap();
        registry.unregister_command("PART");
        assert!(registry.register_command("part", "again").is_ok());
    }
}
