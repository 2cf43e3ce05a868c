use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::{ELECTRICAL_CHANNEL_NAMES, OPTICAL_CHANNEL_NAMES};

/// Lifecycle of the BLE session owned by [`crate::muse_client::MuseHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Startup failed; the session has been (or is being) torn down.
    Failed,
}

/// Identifies the characteristic a raw notification arrived on.
///
/// The inner index follows [`crate::protocol::OPTICAL_CHARACTERISTICS`] and
/// [`crate::protocol::ELECTRICAL_CHARACTERISTICS`] order respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// 0 = ambient, 1 = infrared, 2 = red.
    Optical(usize),
    /// 0 = TP9, 1 = AF7, 2 = AF8, 3 = TP10.
    Electrical(usize),
}

impl ChannelId {
    /// Human-readable sub-channel or lead name, `"?"` for an out-of-range index.
    pub fn name(&self) -> &'static str {
        match *self {
            ChannelId::Optical(i) => OPTICAL_CHANNEL_NAMES.get(i).copied().unwrap_or("?"),
            ChannelId::Electrical(i) => ELECTRICAL_CHANNEL_NAMES.get(i).copied().unwrap_or("?"),
        }
    }
}

/// One undecoded notification. Produced by the demultiplexer, consumed once
/// by the decoder.
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub channel: ChannelId,
    /// Full notification bytes, including the 2-byte packet index header.
    pub payload: Vec<u8>,
}

/// Decoded optical notification from a single sub-channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OpticalReading {
    /// Packet index from the notification header (wraps at 0xFFFF).
    pub index: u16,
    /// 0 = ambient, 1 = infrared, 2 = red.
    pub channel: usize,
    /// Raw 24-bit ADC values, 6 per notification at 64 Hz.
    pub samples: Vec<u32>,
}

/// Decoded electrical notification from a single lead.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectricalReading {
    /// Packet index from the notification header (wraps at 0xFFFF).
    pub index: u16,
    /// 0 = TP9, 1 = AF7, 2 = AF8, 3 = TP10.
    pub electrode: usize,
    /// Calibrated samples in µV, 12 per notification at 256 Hz.
    pub samples: Vec<f64>,
}

/// One synchronized optical instant across ambient, infrared and red.
///
/// All five vectors share the same length: the shortest of the three
/// readings that formed the tick.
#[derive(Debug, Clone, PartialEq)]
pub struct OpticalTick {
    pub ambient: Vec<u32>,
    pub infrared: Vec<u32>,
    pub red: Vec<u32>,
    /// `infrared − ambient` per sample.
    pub ir_corrected: Vec<i64>,
    /// `red − ambient` per sample.
    pub red_corrected: Vec<i64>,
}

/// One synchronized electrical instant across the four leads, in µV.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectricalTick {
    pub tp9: Vec<f64>,
    pub af7: Vec<f64>,
    pub af8: Vec<f64>,
    pub tp10: Vec<f64>,
}

impl ElectricalTick {
    /// Leads in wire order `[TP9, AF7, AF8, TP10]`.
    pub fn leads(&self) -> [&[f64]; 4] {
        [&self.tp9, &self.af7, &self.af8, &self.tp10]
    }

    /// Samples per lead in this tick.
    pub fn len(&self) -> usize {
        self.tp9.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tp9.is_empty()
    }
}

/// Output of the latest-value join: the most recent tick of each group.
///
/// Ticks are shared, so re-emitting an unchanged group does not copy it.
#[derive(Debug, Clone)]
pub struct CombinedInstant {
    pub optical: Arc<OpticalTick>,
    pub electrical: Arc<ElectricalTick>,
}

/// Quantized feature vector handed to the classifier.
///
/// Layout: `[ir₀, red₀, ir₁, red₁, …, tp9₀, af7₀, af8₀, tp10₀, tp9₁, …]`.
/// With the fixed protocol (6 optical + 12 electrical samples per
/// notification) this is 2×6 + 4×12 = 60 values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CombinedSample {
    pub values: Vec<i8>,
}

impl CombinedSample {
    pub fn as_slice(&self) -> &[i8] {
        &self.values
    }
}

/// Discrete event label produced by a [`crate::classify::Classifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Classification {
    Normal,
    Faint,
    Seizure,
}

impl Classification {
    /// The incident this label raises, or `None` for [`Classification::Normal`].
    pub fn incident_type(&self) -> Option<IncidentType> {
        match self {
            Classification::Normal => None,
            Classification::Faint => Some(IncidentType::Faint),
            Classification::Seizure => Some(IncidentType::Seizure),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::Faint => "faint",
            Classification::Seizure => "seizure",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident categories surfaced to the alerting channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentType {
    Seizure,
    Faint,
}

/// Patient position attached to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub long: f64,
}

/// An incident raised by a non-normal classification.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentAlert {
    pub patient_id: String,
    pub geo_location: Option<GeoLocation>,
    pub incident_type: IncidentType,
    /// Milliseconds since the Unix epoch when the incident was raised.
    pub timestamp_ms: u64,
}

impl IncidentAlert {
    /// Build an alert stamped with the current wall-clock time.
    pub fn new(
        patient_id: impl Into<String>,
        incident_type: IncidentType,
        geo_location: Option<GeoLocation>,
    ) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            patient_id: patient_id.into(),
            geo_location,
            incident_type,
            timestamp_ms,
        }
    }
}
