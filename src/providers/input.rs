//! Raw input activity from evdev devices.

use std::{
    mem::size_of,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::{
    fs::File,
    io::AsyncReadExt,
    sync::mpsc,
    task::JoinSet,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::InputCfg,
    event::{Event, EventBus, Trigger},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

const INPUT_DIR: &str = "/dev/input";

/// One `struct input_event` as the kernel writes it.
const FRAME_SIZE: usize = size_of::<libc::input_event>();
/// `type` follows the timestamp; `code` and `value` make up the last 8 bytes.
const TYPE_OFFSET: usize = FRAME_SIZE - 8;

const EV_KEY: u16 = 0x01;
const EV_REL: u16 = 0x02;
const EV_ABS: u16 = 0x03;

/// Whether an event frame is user activity (key, pointer motion, touch).
///
/// Sync and misc frames accompany real events and are not counted on their
/// own.
pub fn is_activity_frame(frame: &[u8]) -> bool {
    if frame.len() < FRAME_SIZE {
        return false;
    }
    let kind = u16::from_ne_bytes([frame[TYPE_OFFSET], frame[TYPE_OFFSET + 1]]);
    matches!(kind, EV_KEY | EV_REL | EV_ABS)
}

/// Collapses a stream of activity into at most one pulse per window.
#[derive(Debug)]
pub struct PulseCoalescer {
    window: Duration,
    last: Option<Instant>,
}

impl PulseCoalescer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns true when `now` starts a new pulse.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Publishes coalesced [`Trigger::UserInput`] pulses from keyboards and
/// pointing devices.
///
/// Reading `/dev/input` usually needs membership in the `input` group;
/// devices that cannot be opened are skipped.
///
/// - **Priority**: 3
/// - **Critical**: No
pub struct InputServiceProvider {
    event_bus: EventBus,
    config: InputCfg,
}

impl InputServiceProvider {
    pub fn new(event_bus: EventBus, config: InputCfg) -> Self {
        Self { event_bus, config }
    }
}

#[async_trait]
impl ServiceProvider for InputServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let event_bus = self.event_bus.clone();
        let config = self.config.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_input_service(config, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "InputService"
    }

    fn priority(&self) -> i32 {
        3
    }
}

async fn discover_devices(configured: &[PathBuf]) -> Vec<PathBuf> {
    if !configured.is_empty() {
        return configured.to_vec();
    }

    let mut devices = Vec::new();
    let mut entries = match tokio::fs::read_dir(INPUT_DIR).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {INPUT_DIR}: {e}");
            return devices;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with("event") {
            devices.push(entry.path());
        }
    }
    devices.sort();
    devices
}

/// Reads frames until the device goes away, sending one message per
/// activity frame.
async fn read_device(path: &Path, activity: mpsc::Sender<()>) -> Result<()> {
    let mut file = File::open(path).await?;
    let mut frame = [0u8; FRAME_SIZE];

    loop {
        match file.read_exact(&mut frame).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if is_activity_frame(&frame) && activity.try_send(()).is_err() && activity.is_closed() {
            return Ok(());
        }
    }
}

async fn run_input_service(
    config: InputCfg,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let devices = discover_devices(&config.devices).await;
    let (activity_tx, mut activity_rx) = mpsc::channel(64);

    let mut readers = JoinSet::new();
    for device in devices {
        let tx = activity_tx.clone();
        readers.spawn(async move {
            if let Err(e) = read_device(&device, tx).await {
                debug!("Stopped reading {}: {e}", device.display());
            }
        });
    }
    drop(activity_tx);

    if readers.is_empty() {
        warn!("No input devices found; user input will only come from the slow poll");
        return Ok(());
    }
    info!("Reading activity from {} input devices", readers.len());

    let mut coalescer = PulseCoalescer::new(Duration::from_millis(config.coalesce_ms));
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Input service cancelled");
                break;
            }
            pulse = activity_rx.recv() => {
                if pulse.is_none() {
                    warn!("All input devices closed");
                    break;
                }
                if coalescer.admit(Instant::now()) {
                    if let Err(e) = event_bus.publish(Event::Trigger(Trigger::UserInput)) {
                        debug!("No subscribers for user input: {e}");
                    }
                }
            }
        }
    }

    readers.abort_all();
    Ok(())
}
