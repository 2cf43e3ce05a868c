use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use muse_sentinel::alert::{
    self, AlertDispatcher, LogSink, MqttConfig, MqttSink, DEFAULT_ALERT_TOPIC,
};
use muse_sentinel::classify::ThresholdClassifier;
use muse_sentinel::muse_client::{MuseClient, MuseClientConfig};
use muse_sentinel::pipeline::{spawn_synchronizer, IncidentMonitor, SyncConfig};
use muse_sentinel::sync::DEFAULT_MAX_PENDING;
use muse_sentinel::types::{Classification, GeoLocation};

/// Upper bound on flushing alerts at exit.
const ALERT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Watch a Muse headset for faints and seizures and raise incident alerts.
#[derive(Debug, Parser)]
#[command(name = "muse-sentinel", version, about)]
struct Cli {
    /// Headset to connect to (platform id, MAC address, or advertised name).
    #[arg(long, env = "MUSE_DEVICE", required_unless_present = "scan")]
    device: Option<String>,

    /// List nearby headsets and exit.
    #[arg(long)]
    scan: bool,

    /// Patient identifier carried in every alert.
    #[arg(long, env = "PATIENT_ID", default_value = "unknown")]
    patient_id: String,

    /// Seconds to scan before giving up on the headset.
    #[arg(long, default_value_t = 15)]
    scan_timeout_secs: u64,

    /// Per-channel depth of the ordinal join before the oldest tick is dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING)]
    join_depth: usize,

    /// MQTT broker host. Alerts are only logged when unset.
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "muse-sentinel")]
    mqtt_client_id: String,

    /// Channel alerts are published to.
    #[arg(long, env = "ALERT_TOPIC", default_value = DEFAULT_ALERT_TOPIC)]
    topic: String,

    /// Patient latitude, included in alerts together with --long.
    #[arg(long, requires = "long", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Patient longitude.
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    long: Option<f64>,

    /// Port of the demo trigger interface.
    #[cfg(feature = "demo")]
    #[arg(long, env = "DEMO_PORT", default_value_t = muse_sentinel::demo::DEFAULT_DEMO_PORT)]
    demo_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // RUST_LOG=muse_sentinel=debug for per-tick output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let client_config = MuseClientConfig {
        device_id: cli.device.clone().unwrap_or_default(),
        scan_timeout_secs: cli.scan_timeout_secs,
        ..Default::default()
    };
    let client = MuseClient::new(client_config);

    if cli.scan {
        let devices = client.scan_all().await?;
        if devices.is_empty() {
            println!("No Muse headsets found.");
        }
        for d in devices {
            println!("{:24} id={} address={}", d.name, d.id, d.address);
        }
        return Ok(());
    }

    // ── Alerts ────────────────────────────────────────────────────────────────
    let background = CancellationToken::new();
    let (dispatcher, alert_worker) = match &cli.mqtt_host {
        Some(host) => {
            let mqtt = MqttConfig {
                host: host.clone(),
                port: cli.mqtt_port,
                client_id: cli.mqtt_client_id.clone(),
                topic: cli.topic.clone(),
                ..Default::default()
            };
            info!("Publishing alerts to mqtt://{}:{}/{}", mqtt.host, mqtt.port, mqtt.topic);
            AlertDispatcher::spawn(MqttSink::connect(&mqtt, background.clone()))
        }
        None => {
            warn!("No MQTT host configured; alerts will only be logged");
            AlertDispatcher::spawn(LogSink)
        }
    };

    let geo_location = match (cli.lat, cli.long) {
        (Some(lat), Some(long)) => Some(GeoLocation { lat, long }),
        _ => None,
    };
    let mut monitor = IncidentMonitor::new(
        ThresholdClassifier::default(),
        dispatcher,
        cli.patient_id.clone(),
        geo_location,
    );

    // ── Demo triggers ─────────────────────────────────────────────────────────
    let (_trigger_tx, mut triggers) = mpsc::channel::<Vec<i8>>(8);
    #[cfg(feature = "demo")]
    {
        let port = cli.demo_port;
        let tx = _trigger_tx.clone();
        let token = background.clone();
        tokio::spawn(async move {
            if let Err(e) = muse_sentinel::demo::serve(port, tx, token).await {
                log::error!("Demo interface failed: {e}");
            }
        });
    }

    // ── Connect ───────────────────────────────────────────────────────────────
    info!(
        "Connecting to Muse headset {} …",
        cli.device.as_deref().unwrap_or_default()
    );
    let (handle, receivers) = client.connect().await.context("connecting to headset")?;
    info!("Connected to {}", handle.device_name());

    handle.start().await.context("starting headset stream")?;
    info!("Streaming started. Press Ctrl-C to quit.");

    let mut combined = spawn_synchronizer(
        receivers,
        SyncConfig {
            max_pending: cli.join_depth,
            ..Default::default()
        },
        handle.shutdown_token(),
    );

    // ── Main loop ─────────────────────────────────────────────────────────────
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            instant = combined.recv() => match instant {
                Some(instant) => {
                    monitor.process(&instant);
                }
                None => {
                    warn!("Headset stream ended");
                    break;
                }
            },
            Some(window) = triggers.recv() => {
                let class = monitor.evaluate(&window);
                if class != Classification::Normal {
                    info!("Demo trigger classified as {class}");
                }
            }
        }
    }

    info!("{} windows classified", monitor.evaluated());
    if let Err(e) = handle.shutdown().await {
        warn!("Disconnect error: {e}");
    }

    // Give queued alerts a bounded chance to reach the broker.
    drop(monitor);
    alert::drain(alert_worker, ALERT_DRAIN_TIMEOUT).await;
    background.cancel();
    Ok(())
}
