//! BLE session management for a Muse headset.
//!
//! Discovery, GATT setup, the startup command sequence and shutdown live
//! here. Notifications leave this module as [`RawNotification`]s on the
//! per-characteristic channels from [`crate::demux`].
//!
//! [`RawNotification`]: crate::types::RawNotification

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::demux::{self, ChannelReceivers, ChannelSenders, Routed, DEFAULT_CHANNEL_CAPACITY};
use crate::error::{ConnectionError, TransportError};
use crate::protocol::{
    encode_command, CMD_HALT, CONTROL_CHARACTERISTIC, ELECTRICAL_CHARACTERISTICS,
    MUSE_SERVICE_UUID, OPTICAL_CHARACTERISTICS, STARTUP_SEQUENCE,
};
use crate::types::ConnectionState;

// ── MuseClientConfig ──────────────────────────────────────────────────────────

/// Configuration for [`MuseClient`].
#[derive(Debug, Clone)]
pub struct MuseClientConfig {
    /// Device to connect to: platform id (UUID on macOS/Windows, MAC address
    /// on Linux) or advertised name. Matched case-insensitively.
    pub device_id: String,
    /// How long to scan for the device before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Upper bound on the BLE `connect()` call. Default: `10`.
    pub connect_timeout_secs: u64,
    /// Capacity of each per-characteristic notification channel.
    pub channel_capacity: usize,
}

impl Default for MuseClientConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            scan_timeout_secs: 15,
            connect_timeout_secs: 10,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A headset seen during [`MuseClient::scan_all`].
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    /// Platform identifier usable as [`MuseClientConfig::device_id`].
    pub id: String,
    pub address: String,
}

/// Whether a peripheral answers to `wanted`.
///
/// Accepts the platform id, the MAC address, or the advertised name.
pub fn matches_identifier(wanted: &str, id: &str, address: &str, name: Option<&str>) -> bool {
    let wanted = wanted.trim();
    !wanted.is_empty()
        && (wanted.eq_ignore_ascii_case(id)
            || wanted.eq_ignore_ascii_case(address)
            || name.is_some_and(|n| wanted.eq_ignore_ascii_case(n)))
}

fn session_err(context: &'static str) -> impl FnOnce(btleplug::Error) -> ConnectionError {
    move |e| ConnectionError::SessionFailure(format!("{context}: {e}"))
}

// ── MuseClient ────────────────────────────────────────────────────────────────

/// Connection manager for one Muse headset.
///
/// [`MuseClient::connect`] discovers the adapter, waits for the configured
/// device, opens a GATT session, resolves the control characteristic,
/// subscribes to the seven data characteristics, and starts the notification listener.
/// If anything fails after the session is opened, the device is disconnected
/// before the error is returned.
pub struct MuseClient {
    config: MuseClientConfig,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl MuseClient {
    pub fn new(config: MuseClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Observe connection state changes, including those made by the handle.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    // ── Public: scan ─────────────────────────────────────────────────────────

    /// Scan for `scan_timeout_secs` and list every peripheral whose name
    /// starts with `"Muse"`.
    pub async fn scan_all(&self) -> Result<Vec<DiscoveredDevice>, ConnectionError> {
        let adapter = default_adapter().await?;
        info!("scan_all: scanning for {} s …", self.config.scan_timeout_secs);
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?;
        let mut found = vec![];
        for p in peripherals {
            if let Ok(Some(props)) = p.properties().await {
                if let Some(name) = props.local_name.filter(|n| n.starts_with("Muse")) {
                    let id = p.id().to_string();
                    info!("scan_all: found {name}  id={id}");
                    found.push(DiscoveredDevice {
                        name,
                        id,
                        address: p.address().to_string(),
                    });
                }
            }
        }
        Ok(found)
    }

    // ── Public: connect ──────────────────────────────────────────────────────

    /// Connect to the configured device and start routing its notifications.
    ///
    /// Returns the session handle and one receiver per data characteristic.
    /// Streaming does not begin until [`MuseHandle::start`] is called.
    pub async fn connect(&self) -> Result<(MuseHandle, ChannelReceivers), ConnectionError> {
        self.state.send_replace(ConnectionState::Connecting);
        match self.try_connect().await {
            Ok(connected) => {
                self.state.send_replace(ConnectionState::Connected);
                Ok(connected)
            }
            Err(e) => {
                error!("Connection failed: {e}");
                self.state.send_replace(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn try_connect(&self) -> Result<(MuseHandle, ChannelReceivers), ConnectionError> {
        let adapter = default_adapter().await?;

        info!(
            "Scanning for {} (timeout: {} s) …",
            self.config.device_id, self.config.scan_timeout_secs
        );
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?;
        let found = self.find_device(&adapter).await;
        adapter.stop_scan().await.ok();
        let (peripheral, device_name) = found?;
        info!("Found device: {device_name}");

        bounded_connect(
            Duration::from_secs(self.config.connect_timeout_secs),
            peripheral.connect(),
            async {
                peripheral.disconnect().await.ok();
            },
        )
        .await?;

        // Session is open from here on: never return without disconnecting.
        let session = match self.open_session(&peripheral).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Session setup failed, disconnecting: {e}");
                peripheral.disconnect().await.ok();
                return Err(e);
            }
        };
        info!("Connected and subscribed: {device_name}");

        let shutdown = CancellationToken::new();
        let (senders, receivers) = demux::channels(self.config.channel_capacity);

        spawn_listener(
            session.notifications,
            senders,
            Arc::clone(&self.state),
            shutdown.clone(),
        );
        spawn_disconnect_watcher(
            adapter,
            peripheral.clone(),
            Arc::clone(&self.state),
            shutdown.clone(),
        );

        let handle = MuseHandle {
            peripheral,
            control_char: session.control_char,
            device_name,
            state: Arc::clone(&self.state),
            shutdown,
        };
        Ok((handle, receivers))
    }

    /// Poll discovered peripherals until one matches the configured identifier.
    async fn find_device(&self, adapter: &Adapter) -> Result<(Peripheral, String), ConnectionError> {
        use tokio::time::{sleep, timeout};

        let wanted = self.config.device_id.as_str();
        let result = timeout(Duration::from_secs(self.config.scan_timeout_secs), async {
            loop {
                let peripherals = adapter.peripherals().await.unwrap_or_default();
                for p in peripherals {
                    let name = p.properties().await.ok().flatten().and_then(|props| props.local_name);
                    let id = p.id().to_string();
                    let address = p.address().to_string();
                    if matches_identifier(wanted, &id, &address, name.as_deref()) {
                        let name = name.unwrap_or(id);
                        return (p, name);
                    }
                }
                sleep(Duration::from_millis(250)).await;
            }
        })
        .await;

        result.map_err(|_| ConnectionError::DeviceNotFound {
            id: wanted.to_string(),
            timeout_secs: self.config.scan_timeout_secs,
        })
    }

    /// Discover services, resolve characteristics, and subscribe.
    async fn open_session(&self, peripheral: &Peripheral) -> Result<Session, ConnectionError> {
        // BlueZ reports the link as up before the GATT cache is populated.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(Duration::from_secs(15), peripheral.discover_services())
            .await
            .map_err(|_| {
                ConnectionError::SessionFailure("discover_services() timed out after 15 s".into())
            })?
            .map_err(session_err("discover_services"))?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == MUSE_SERVICE_UUID)
            .ok_or(ConnectionError::ServiceNotFound(MUSE_SERVICE_UUID))?;

        let find_char = |uuid: Uuid| -> Result<Characteristic, ConnectionError> {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or(ConnectionError::CharacteristicNotFound(uuid))
        };

        let control_char = find_char(CONTROL_CHARACTERISTIC)?;
        debug!("Control characteristic flags: {:?}", control_char.properties);

        for &uuid in OPTICAL_CHARACTERISTICS.iter().chain(ELECTRICAL_CHARACTERISTICS.iter()) {
            let c = find_char(uuid)?;
            peripheral.subscribe(&c).await.map_err(session_err("subscribe"))?;
        }

        let notifications = peripheral
            .notifications()
            .await
            .map_err(session_err("notifications"))?;

        Ok(Session {
            control_char,
            notifications,
        })
    }
}

/// Run `connect` for at most `limit`.
///
/// On timeout `abandon` runs before the error is returned: the stack may
/// still complete the link after the future is dropped.
async fn bounded_connect<C, A>(limit: Duration, connect: C, abandon: A) -> Result<(), ConnectionError>
where
    C: Future<Output = Result<(), btleplug::Error>>,
    A: Future<Output = ()>,
{
    match tokio::time::timeout(limit, connect).await {
        Ok(result) => result.map_err(session_err("connect")),
        Err(_) => {
            warn!("connect() timed out after {limit:?}, disconnecting");
            abandon.await;
            Err(ConnectionError::SessionFailure(format!(
                "connect() timed out after {} s",
                limit.as_secs()
            )))
        }
    }
}

struct Session {
    control_char: Characteristic,
    notifications: NotificationStream,
}

type NotificationStream =
    std::pin::Pin<Box<dyn futures::Stream<Item = btleplug::api::ValueNotification> + Send>>;

async fn default_adapter() -> Result<Adapter, ConnectionError> {
    let manager = Manager::new()
        .await
        .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|e| ConnectionError::AdapterUnavailable(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| ConnectionError::AdapterUnavailable("no Bluetooth adapter found".into()))?;

    // CoreBluetooth ignores scan requests until the manager reports PoweredOn.
    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => break,
                Ok(state) if tokio::time::Instant::now() >= deadline => {
                    warn!("macOS: adapter still {state:?} after 3 s, continuing");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    Ok(adapter)
}

/// Own the merged notification stream and fan it out per characteristic.
fn spawn_listener(
    mut notifications: NotificationStream,
    senders: ChannelSenders,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        info!("Notification listener started");
        let mut count: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Notification listener cancelled");
                    break;
                }
                notif = notifications.next() => {
                    let Some(notif) = notif else {
                        info!("Notification stream ended – device disconnected.");
                        state.send_replace(ConnectionState::Disconnected);
                        break;
                    };
                    count += 1;
                    if count <= 5 || count % 500 == 0 {
                        info!("notif #{count} uuid={} len={}", notif.uuid, notif.value.len());
                    }
                    if let Routed::Closed(channel) = senders.route(notif.uuid, notif.value).await {
                        info!("{} consumer dropped; stopping listener", channel.name());
                        break;
                    }
                }
            }
        }
        shutdown.cancel();
    });
}

/// Watch the adapter for the link dropping; usually faster than the
/// notification stream closing.
fn spawn_disconnect_watcher(
    adapter: Adapter,
    peripheral: Peripheral,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
) {
    let peripheral_id = peripheral.id();
    tokio::spawn(async move {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Disconnect watcher: could not subscribe to adapter events: {e}");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                        info!("Disconnect watcher: device {id:?} disconnected.");
                        state.send_replace(ConnectionState::Disconnected);
                        shutdown.cancel();
                        break;
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    });
}

// ── Command channel ───────────────────────────────────────────────────────────

/// Anything that can deliver one text command to the headset.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_command(&self, cmd: &str) -> Result<(), TransportError>;
}

/// Send [`STARTUP_SEQUENCE`] in order, stopping at the first failure.
pub async fn run_startup_sequence<S: CommandSink + ?Sized>(sink: &S) -> Result<(), TransportError> {
    for cmd in STARTUP_SEQUENCE {
        debug!("Sending startup command {cmd:?}");
        sink.send_command(cmd).await?;
    }
    Ok(())
}

// ── MuseHandle ────────────────────────────────────────────────────────────────

/// The open session with the headset.
///
/// Owns the subscriptions and the shutdown token shared by the listener
/// tasks. Only this handle writes to the device.
pub struct MuseHandle {
    peripheral: Peripheral,
    control_char: Characteristic,
    device_name: String,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
}

#[async_trait]
impl CommandSink for MuseHandle {
    async fn send_command(&self, cmd: &str) -> Result<(), TransportError> {
        let payload = encode_command(cmd)?;
        self.peripheral
            .write(&self.control_char, &payload, WriteType::WithoutResponse)
            .await
            .map_err(|e| TransportError::Write {
                command: cmd.to_string(),
                reason: e.to_string(),
            })
    }
}

impl MuseHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Token cancelled when the session ends, for tying downstream tasks to it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Put the headset into streaming mode.
    ///
    /// On failure the session is torn down before the error is returned,
    /// since the device cannot be assumed to stream.
    pub async fn start(&self) -> Result<(), TransportError> {
        match run_startup_sequence(self).await {
            Ok(()) => {
                info!("{}: streaming started", self.device_name);
                Ok(())
            }
            Err(e) => {
                error!("{}: startup failed: {e}", self.device_name);
                self.state.send_replace(ConnectionState::Failed);
                self.shutdown.cancel();
                self.peripheral.disconnect().await.ok();
                Err(e)
            }
        }
    }

    /// Check whether the adapter still reports the link as up.
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Stop all listener tasks, halt streaming (best effort) and disconnect.
    pub async fn shutdown(self) -> Result<(), ConnectionError> {
        self.shutdown.cancel();
        if let Err(e) = self.send_command(CMD_HALT).await {
            debug!("Halt on shutdown failed: {e}");
        }
        let result = self
            .peripheral
            .disconnect()
            .await
            .map_err(session_err("disconnect"));
        self.state.send_replace(ConnectionState::Disconnected);
        info!("{}: disconnected", self.device_name);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Vec<u8>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send_command(&self, cmd: &str) -> Result<(), TransportError> {
            if self.fail_on == Some(cmd) {
                return Err(TransportError::Write {
                    command: cmd.into(),
                    reason: "link lost".into(),
                });
            }
            let frame = encode_command(cmd)?;
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_startup_sequence_is_sent_in_order() {
        let sink = RecordingSink::default();
        run_startup_sequence(&sink).await.unwrap();

        let frames = sink.frames.lock().unwrap();
        assert_eq!(
            *frames,
            vec![
                vec![0x02, b'h', b'\n'],
                vec![0x04, b'p', b'5', b'0', b'\n'],
                vec![0x02, b's', b'\n'],
                vec![0x02, b'd', b'\n'],
            ]
        );
    }

    #[tokio::test]
    async fn test_startup_stops_at_first_failure() {
        let sink = RecordingSink {
            fail_on: Some("s"),
            ..Default::default()
        };
        let err = run_startup_sequence(&sink).await.unwrap_err();
        assert!(matches!(err, TransportError::Write { ref command, .. } if command == "s"));
        // "d" must never be sent after a failed "s".
        assert_eq!(sink.frames.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_overlong_command_is_not_written() {
        let sink = RecordingSink::default();
        let err = sink.send_command(&"x".repeat(300)).await.unwrap_err();
        assert!(matches!(err, TransportError::CommandTooLong { command_len: 300, .. }));
        assert!(sink.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_timeout_disconnects() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let abandoned = AtomicBool::new(false);
        let err = bounded_connect(
            Duration::from_millis(10),
            std::future::pending(),
            async { abandoned.store(true, Ordering::SeqCst) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionError::SessionFailure(_)));
        assert!(abandoned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_in_time_keeps_link() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let abandoned = AtomicBool::new(false);
        bounded_connect(Duration::from_secs(1), async { Ok(()) }, async {
            abandoned.store(true, Ordering::SeqCst)
        })
        .await
        .unwrap();
        assert!(!abandoned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_identifier_matching() {
        let id = "hci0/dev_00_55_DA_B0_12_34";
        let addr = "00:55:DA:B0:12:34";
        assert!(matches_identifier("00:55:da:b0:12:34", id, addr, None));
        assert!(matches_identifier(id, id, addr, Some("Muse-1234")));
        assert!(matches_identifier("muse-1234", id, addr, Some("Muse-1234")));
        assert!(!matches_identifier("Muse-9999", id, addr, Some("Muse-1234")));
        assert!(!matches_identifier("", id, addr, Some("")));
    }

    #[test]
    fn test_default_config() {
        let c = MuseClientConfig::default();
        assert_eq!(c.scan_timeout_secs, 15);
        assert_eq!(c.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }
}
