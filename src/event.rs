//! Event-driven communication between signal sources and the engine.

use std::{fmt, str::FromStr};

use anyhow::Result;
use tokio::sync::broadcast;

/// Closed set of environmental triggers the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    ProcessStart,
    Resume,
    Suspend,
    Logon,
    Unlock,
    ConsoleConnect,
    DisplayOn,
    NightFlagChanged,
    UserInput,
}

impl Trigger {
    /// Triggers after which the hardware may have been reset behind our back.
    pub fn is_wake(self) -> bool {
        matches!(
            self,
            Self::ProcessStart
                | Self::Resume
                | Self::Logon
                | Self::Unlock
                | Self::ConsoleConnect
                | Self::DisplayOn
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessStart => "ProcessStart",
            Self::Resume => "Resume",
            Self::Suspend => "Suspend",
            Self::Logon => "Logon",
            Self::Unlock => "Unlock",
            Self::ConsoleConnect => "ConsoleConnect",
            Self::DisplayOn => "DisplayOn",
            Self::NightFlagChanged => "NightFlagChanged",
            Self::UserInput => "UserInput",
        }
    }

    /// Parses a trigger name sent by an external collaborator.
    ///
    /// Case and `-`/`_` separators are ignored; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Some(match normalized.as_str() {
            "processstart" => Self::ProcessStart,
            "resume" => Self::Resume,
            "suspend" => Self::Suspend,
            "logon" => Self::Logon,
            "unlock" => Self::Unlock,
            "consoleconnect" => Self::ConsoleConnect,
            "displayon" => Self::DisplayOn,
            "nightflagchanged" => Self::NightFlagChanged,
            "userinput" => Self::UserInput,
            _ => return None,
        })
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown trigger '{s}'"))
    }
}

/// Application events for inter-service communication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Trigger(Trigger),
    /// The schedule file changed on disk.
    ScheduleChanged,
    SystemShutdown,
}

/// Broadcast bus between services.
///
/// # Example
///
/// ```no_run
/// use kb_backlightd::event::{Event, EventBus, Trigger};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::Trigger(Trigger::Resume)).ok();
///
/// // In async context:
/// // let event = subscriber.recv().await;
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
