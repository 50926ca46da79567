//! Power and session notifications from systemd-logind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use std::process;
use tokio_util::sync::CancellationToken;
use zbus::{Connection, proxy, zvariant::OwnedObjectPath};

use crate::{
    event::{Event, EventBus, Trigger},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// logind's alias for the caller's display session.
const AUTO_SESSION_PATH: &str = "/org/freedesktop/login1/session/auto";

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1",
    gen_blocking = false
)]
trait LoginManager {
    fn get_session_by_pid(&self, pid: u32) -> zbus::Result<OwnedObjectPath>;

    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    fn session_new(&self, session_id: String, object_path: OwnedObjectPath) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1",
    gen_blocking = false
)]
trait LoginSession {
    #[zbus(property)]
    fn locked_hint(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn active(&self) -> zbus::Result<bool>;
}

/// Publishes resume, suspend, logon, unlock and console-connect triggers.
///
/// - **Priority**: 7
/// - **Critical**: No
///
/// Needs the system bus; creation fails without one and the coordinator
/// skips the service.
pub struct SessionServiceProvider {
    event_bus: EventBus,
    connection: Connection,
}

impl SessionServiceProvider {
    pub async fn new(event_bus: EventBus) -> Result<Self> {
        let connection = Connection::system()
            .await
            .context("Failed to connect to the system bus")?;
        Ok(Self {
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for SessionServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_session_service(event_bus, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "SessionEventsService"
    }

    fn priority(&self) -> i32 {
        7
    }
}

/// `PrepareForSleep(start)` maps to suspend on the way down, resume on the
/// way up.
pub fn sleep_trigger(start: bool) -> Trigger {
    if start {
        Trigger::Suspend
    } else {
        Trigger::Resume
    }
}

/// The screen locker clears `LockedHint` once the user is back in; the
/// session's `Unlock` signal is a request to the locker, not a notification.
pub fn is_unlock_transition(was_locked: bool, locked: bool) -> bool {
    was_locked && !locked
}

async fn own_session(
    connection: &Connection,
    manager: &LoginManagerProxy<'_>,
) -> Result<LoginSessionProxy<'static>> {
    let path = match manager.get_session_by_pid(process::id()).await {
        Ok(path) => path,
        Err(e) => {
            debug!("No session for pid {}: {e}; using the display session", process::id());
            OwnedObjectPath::try_from(AUTO_SESSION_PATH)?
        }
    };
    info!("Watching login session {}", path.as_str());

    Ok(LoginSessionProxy::builder(connection)
        .path(path)?
        .build()
        .await?)
}

fn publish(event_bus: &EventBus, trigger: Trigger) {
    info!("Session event: {trigger}");
    if let Err(e) = event_bus.publish(Event::Trigger(trigger)) {
        warn!("Failed to publish {trigger}: {e}");
    }
}

async fn run_session_service(
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let manager = LoginManagerProxy::new(&connection).await?;
    let mut sleep_signals = manager.receive_prepare_for_sleep().await?;
    let mut new_sessions = manager.receive_session_new().await?;

    let session = own_session(&connection, &manager).await?;
    let mut lock_changes = session.receive_locked_hint_changed().await;
    let mut was_locked = session.locked_hint().await.unwrap_or(false);
    let mut active_changes = session.receive_active_changed().await;
    let mut was_active = session.active().await.unwrap_or(true);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Session events service cancelled");
                break;
            }
            Some(signal) = sleep_signals.next() => {
                match signal.args() {
                    Ok(args) => publish(&event_bus, sleep_trigger(args.start)),
                    Err(e) => warn!("Malformed PrepareForSleep signal: {e}"),
                }
            }
            Some(signal) = new_sessions.next() => {
                if let Ok(args) = signal.args() {
                    debug!("New login session {}", args.session_id);
                }
                publish(&event_bus, Trigger::Logon);
            }
            Some(change) = lock_changes.next() => {
                let locked = change.get().await.unwrap_or(was_locked);
                if is_unlock_transition(was_locked, locked) {
                    publish(&event_bus, Trigger::Unlock);
                }
                was_locked = locked;
            }
            Some(change) = active_changes.next() => {
                let active = change.get().await.unwrap_or(was_active);
                if active && !was_active {
                    publish(&event_bus, Trigger::ConsoleConnect);
                }
                was_active = active;
            }
            else => {
                warn!("logind signal streams closed");
                break;
            }
        }
    }
    Ok(())
}
