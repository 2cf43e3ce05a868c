//! Incident alert delivery.
//!
//! [`AlertDispatcher::dispatch`] hands an [`IncidentAlert`] to a background
//! worker and returns immediately. The worker serializes it into the wire
//! message below and publishes it through an [`AlertSink`]. Failures are
//! logged and dropped: no retry, no feedback into the pipeline.
//!
//! ```json
//! { "message": "incident_call", "patientId": "p-1", "incidentType": "seizure",
//!   "geoLocation": { "lat": 47.04, "long": 21.92 } }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::types::{GeoLocation, IncidentAlert, IncidentType};

/// Default channel alerts are published to.
pub const DEFAULT_ALERT_TOPIC: &str = "raymed";

/// Value of the `message` field in every alert payload.
pub const INCIDENT_CALL: &str = "incident_call";

/// Requests rumqttc buffers while the broker is unreachable.
const MQTT_REQUEST_QUEUE: usize = 16;

// ── Wire message ──────────────────────────────────────────────────────────────

/// JSON payload published for one incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMessage {
    pub message: &'static str,
    pub patient_id: String,
    pub incident_type: IncidentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<GeoLocation>,
}

impl From<&IncidentAlert> for AlertMessage {
    fn from(alert: &IncidentAlert) -> Self {
        Self {
            message: INCIDENT_CALL,
            patient_id: alert.patient_id.clone(),
            incident_type: alert.incident_type,
            geo_location: alert.geo_location,
        }
    }
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Outbound transport for alert messages.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, message: &AlertMessage) -> Result<(), DispatchError>;
}

/// Writes alerts to the log. Used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn publish(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        let json = serde_json::to_string(message)?;
        warn!("INCIDENT {json}");
        Ok(())
    }
}

/// Broker settings for [`MqttSink`].
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
    /// Pause before polling again after a connection error.
    pub reconnect_delay: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "muse-sentinel".into(),
            topic: DEFAULT_ALERT_TOPIC.into(),
            keep_alive: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Publishes alerts to an MQTT broker.
///
/// The rumqttc event loop runs on its own task until `shutdown` fires; it
/// reconnects on its own after `reconnect_delay`. Publishing never waits:
/// while the broker is unreachable the request queue fills up and further
/// alerts fail with [`DispatchError::Transport`].
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    pub fn connect(config: &MqttConfig, shutdown: CancellationToken) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        let (client, mut eventloop) = AsyncClient::new(options, MQTT_REQUEST_QUEUE);

        let reconnect_delay = config.reconnect_delay;
        let broker = format!("{}:{}", config.host, config.port);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT connected to {broker}"),
                        Ok(Event::Incoming(Packet::PubAck(ack))) => info!("Alert delivered (pkid={})", ack.pkid),
                        Ok(_) => {}
                        Err(e) => {
                            warn!("MQTT connection error ({broker}): {e}");
                            tokio::time::sleep(reconnect_delay).await;
                        }
                    },
                }
            }
            debug!("MQTT event loop stopped");
        });

        Self {
            client,
            topic: config.topic.clone(),
        }
    }
}

#[async_trait]
impl AlertSink for MqttSink {
    async fn publish(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(message)?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| DispatchError::Transport(format!("not queued: {e}")))
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Fire-and-forget front end for an [`AlertSink`].
///
/// Cloning is cheap; the worker exits once every clone has been dropped and
/// the queue has drained.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: mpsc::UnboundedSender<IncidentAlert>,
}

impl AlertDispatcher {
    /// Start the delivery worker for `sink`.
    pub fn spawn<S: AlertSink + 'static>(sink: S) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<IncidentAlert>();
        let worker = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                let message = AlertMessage::from(&alert);
                match sink.publish(&message).await {
                    Ok(()) => info!(
                        "Alert queued: {:?} for patient {} (raised at {} ms)",
                        alert.incident_type, alert.patient_id, alert.timestamp_ms
                    ),
                    Err(e) => error!("Alert publish error: {e}"),
                }
            }
            debug!("Alert worker stopped");
        });
        (Self { tx }, worker)
    }

    /// Queue an alert for delivery. Never blocks.
    pub fn dispatch(&self, alert: IncidentAlert) {
        if self.tx.send(alert).is_err() {
            error!("Alert dropped: {}", DispatchError::WorkerStopped);
        }
    }
}

/// Wait at most `limit` for the alert worker to finish its queue.
///
/// Returns `false` if the worker was still busy; it is aborted then.
pub async fn drain(worker: JoinHandle<()>, limit: Duration) -> bool {
    let abort = worker.abort_handle();
    match tokio::time::timeout(limit, worker).await {
        Ok(_) => true,
        Err(_) => {
            warn!("Alert worker still busy after {limit:?}; abandoning queued alerts");
            abort.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<AlertMessage>>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn publish(&self, message: &AlertMessage) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn publish(&self, _message: &AlertMessage) -> Result<(), DispatchError> {
            Err(DispatchError::Transport("broker unreachable".into()))
        }
    }

    #[test]
    fn test_message_json_shape() {
        let alert = IncidentAlert::new(
            "patient-7",
            IncidentType::Seizure,
            Some(GeoLocation { lat: 47.048013, long: 21.92426 }),
        );
        let json = serde_json::to_value(AlertMessage::from(&alert)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "incident_call",
                "patientId": "patient-7",
                "incidentType": "seizure",
                "geoLocation": { "lat": 47.048013, "long": 21.92426 }
            })
        );
    }

    #[test]
    fn test_message_omits_missing_location() {
        let alert = IncidentAlert::new("p", IncidentType::Faint, None);
        let json = serde_json::to_value(AlertMessage::from(&alert)).unwrap();
        assert_eq!(json["incidentType"], "faint");
        assert!(json.get("geoLocation").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_order() {
        let sink = RecordingSink::default();
        let (dispatcher, worker) = AlertDispatcher::spawn(sink.clone());

        dispatcher.dispatch(IncidentAlert::new("a", IncidentType::Faint, None));
        dispatcher.dispatch(IncidentAlert::new("b", IncidentType::Seizure, None));
        drop(dispatcher);
        worker.await.unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].patient_id, "a");
        assert_eq!(sent[1].incident_type, IncidentType::Seizure);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let (dispatcher, worker) = AlertDispatcher::spawn(FailingSink);
        dispatcher.dispatch(IncidentAlert::new("a", IncidentType::Faint, None));
        drop(dispatcher);
        // Worker drains the failing alert and exits cleanly.
        worker.await.unwrap();
    }

    struct StuckSink;

    #[async_trait]
    impl AlertSink for StuckSink {
        async fn publish(&self, _message: &AlertMessage) -> Result<(), DispatchError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_drain_gives_up_on_stuck_worker() {
        let (dispatcher, worker) = AlertDispatcher::spawn(StuckSink);
        dispatcher.dispatch(IncidentAlert::new("a", IncidentType::Seizure, None));
        drop(dispatcher);
        assert!(!drain(worker, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_delivery() {
        let sink = RecordingSink::default();
        let (dispatcher, worker) = AlertDispatcher::spawn(sink.clone());
        dispatcher.dispatch(IncidentAlert::new("a", IncidentType::Faint, None));
        drop(dispatcher);
        assert!(drain(worker, Duration::from_secs(5)).await);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mqtt_publish_never_waits_for_broker() {
        // Nothing listens on port 1, so the request queue is never drained.
        let config = MqttConfig {
            host: "127.0.0.1".into(),
            port: 1,
            reconnect_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        let sink = MqttSink::connect(&config, shutdown.clone());
        let message = AlertMessage::from(&IncidentAlert::new("p", IncidentType::Seizure, None));

        let results = tokio::time::timeout(Duration::from_secs(2), async {
            let mut results = Vec::new();
            for _ in 0..(MQTT_REQUEST_QUEUE * 3) {
                results.push(sink.publish(&message).await);
            }
            results
        })
        .await
        .expect("publish blocked on an unreachable broker");

        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DispatchError::Transport(_)))));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_log_sink_accepts_messages() {
        let alert = IncidentAlert::new("p", IncidentType::Faint, None);
        assert!(LogSink.publish(&AlertMessage::from(&alert)).await.is_ok());
    }
}
