//! # muse-sentinel
//!
//! Streams PPG and EEG telemetry from an
//! [Interaxon Muse](https://choosemuse.com/) headset over Bluetooth Low Energy,
//! aligns the two channel groups, quantizes every combined instant into a
//! 60-value `i8` window, classifies it, and raises incident alerts for
//! faints and seizures.
//!
//! ## Pipeline
//!
//! ```text
//! MuseClient ─▶ demux (7 channels) ─▶ parse ─▶ sync (strict + latest joins)
//!            ─▶ quantize ─▶ Classifier ─▶ AlertDispatcher ─▶ MQTT
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use muse_sentinel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = MuseClient::new(MuseClientConfig {
//!         device_id: "00:55:DA:B0:12:34".into(),
//!         ..Default::default()
//!     });
//!     let (handle, receivers) = client.connect().await?;
//!     handle.start().await?;
//!
//!     let (dispatcher, _worker) = AlertDispatcher::spawn(LogSink);
//!     let mut monitor = IncidentMonitor::new(
//!         ThresholdClassifier::default(),
//!         dispatcher,
//!         "patient-1",
//!         None,
//!     );
//!     let mut combined =
//!         spawn_synchronizer(receivers, SyncConfig::default(), handle.shutdown_token());
//!     while let Some(instant) = combined.recv().await {
//!         monitor.process(&instant);
//!     }
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the commonly needed types |
//! | [`muse_client`] | BLE discovery, session setup, startup commands, shutdown |
//! | [`demux`] | Per-characteristic notification channels |
//! | [`parse`] | Pure decoders for optical (24-bit) and electrical (12-bit) packets |
//! | [`sync`] | Strict ordinal joins and the latest-value cross-group join |
//! | [`pipeline`] | Synchronizer tasks and the [`pipeline::IncidentMonitor`] |
//! | [`quantize`] | Fixed-point scaling into the classifier's `i8` vector |
//! | [`classify`] | [`classify::Classifier`] trait and the threshold placeholder |
//! | [`alert`] | Fire-and-forget incident delivery (MQTT or log) |
//! | [`protocol`] | GATT UUIDs, wire constants, command encoding |
//! | [`types`] | Data model shared by every stage |
//! | [`error`] | Error taxonomy |
//! | `demo` | Demo HTTP trigger endpoints (feature `demo`) |

pub mod alert;
pub mod classify;
#[cfg(feature = "demo")]
pub mod demo;
pub mod demux;
pub mod error;
pub mod muse_client;
pub mod parse;
pub mod pipeline;
pub mod protocol;
pub mod quantize;
pub mod sync;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for the binaries and downstream crates.
pub mod prelude {
    // ── Acquisition ───────────────────────────────────────────────────────────
    pub use crate::demux::ChannelReceivers;
    pub use crate::muse_client::{CommandSink, MuseClient, MuseClientConfig, MuseHandle};
    pub use crate::pipeline::{spawn_synchronizer, IncidentMonitor, SyncConfig};

    // ── Classification and alerting ───────────────────────────────────────────
    pub use crate::alert::{AlertDispatcher, AlertSink, LogSink, MqttConfig, MqttSink};
    pub use crate::classify::{Classifier, ThresholdClassifier, DEMO_FAINT, DEMO_SEIZURE};
    pub use crate::quantize::quantize;

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::error::{ConnectionError, DecodeError, DispatchError, TransportError};
    pub use crate::types::{
        Classification, CombinedInstant, CombinedSample, ConnectionState, GeoLocation,
        IncidentAlert, IncidentType,
    };
}
