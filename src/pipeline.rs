//! Async wiring from per-characteristic channels to classified windows.
//!
//! ```text
//! optical[0..3]    ─▶ decode ─▶ StrictJoin<3> ─▶ optical_tick    ─┐
//!                                                                 ├─▶ combiner (LatestJoin) ─▶ CombinedInstant
//! electrical[0..4] ─▶ decode ─▶ StrictJoin<4> ─▶ electrical_tick ─┘
//!
//! CombinedInstant ─▶ quantize ─▶ Classifier ─▶ AlertDispatcher (non-normal only)
//! ```
//!
//! Each channel group runs on its own task and hands its ticks to a single
//! combiner task over one FIFO channel. The combiner is the only emitter, so
//! ordinal order within a group holds all the way to the output; across
//! groups only the latest-value semantics apply.

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertDispatcher;
use crate::classify::Classifier;
use crate::demux::ChannelReceivers;
use crate::error::DecodeError;
use crate::parse::{parse_electrical_notification, parse_optical_notification};
use crate::quantize::quantize;
use crate::sync::{
    electrical_tick, optical_tick, GroupTick, LatestJoin, StrictJoin, DEFAULT_MAX_PENDING,
};
use crate::types::{
    Classification, CombinedInstant, ElectricalReading, GeoLocation, IncidentAlert, OpticalReading,
    RawNotification,
};

/// Tuning for the synchronizer tasks.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-source depth of each strict join before drop-oldest kicks in.
    pub max_pending: usize,
    /// Capacity of the combined-instant output channel.
    pub output_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            output_capacity: 256,
        }
    }
}

/// Start the optical and electrical group tasks and the combiner.
///
/// The returned receiver closes once the combiner has stopped, either
/// because `shutdown` fired or because both group tasks have finished.
pub fn spawn_synchronizer(
    receivers: ChannelReceivers,
    config: SyncConfig,
    shutdown: CancellationToken,
) -> mpsc::Receiver<CombinedInstant> {
    let (out_tx, out_rx) = mpsc::channel(config.output_capacity);
    let (tick_tx, tick_rx) = mpsc::channel(config.output_capacity);

    tokio::spawn(run_group(
        "optical",
        receivers.optical,
        parse_optical_notification,
        |readings: [OpticalReading; 3]| GroupTick::Optical(optical_tick(readings)),
        config.max_pending,
        tick_tx.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(run_group(
        "electrical",
        receivers.electrical,
        parse_electrical_notification,
        |readings: [ElectricalReading; 4]| GroupTick::Electrical(electrical_tick(readings)),
        config.max_pending,
        tick_tx,
        shutdown.clone(),
    ));
    tokio::spawn(run_combiner(tick_rx, out_tx, shutdown));

    out_rx
}

/// Merge one group's channels, decode, strict-join and forward ticks.
///
/// A notification that fails to decode still takes its ordinal slot, so the
/// tick it belongs to is skipped and later ticks stay aligned.
async fn run_group<T, const N: usize, D, E>(
    group: &'static str,
    receivers: [mpsc::Receiver<RawNotification>; N],
    decode: D,
    to_tick: E,
    max_pending: usize,
    ticks_out: mpsc::Sender<GroupTick>,
    shutdown: CancellationToken,
) where
    T: Send + 'static,
    D: Fn(&[u8], usize) -> Result<T, DecodeError> + Send + 'static,
    E: Fn([T; N]) -> GroupTick + Send + 'static,
{
    let mut merged = futures::stream::select_all(
        receivers
            .into_iter()
            .enumerate()
            .map(|(source, rx)| ReceiverStream::new(rx).map(move |raw| (source, raw))),
    );
    let mut join: StrictJoin<Option<T>, N> = StrictJoin::new(max_pending);
    let mut ticks: u64 = 0;

    loop {
        let (source, raw) = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = merged.next() => match next {
                Some(item) => item,
                None => break,
            },
        };

        let decoded = match decode(&raw.payload, source) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(
                    "{group}: discarding {} notification ({} bytes): {e}",
                    raw.channel.name(),
                    raw.payload.len()
                );
                None
            }
        };

        let Some(tuple) = join.push(source, decoded) else {
            continue;
        };
        let readings: Option<Vec<T>> = tuple.into_iter().collect();
        let Some(readings) = readings.and_then(|v| <[T; N]>::try_from(v).ok()) else {
            debug!("{group}: skipping tick with an undecodable notification");
            continue;
        };

        ticks += 1;
        if ticks_out.send(to_tick(readings)).await.is_err() {
            debug!("{group}: combiner stopped");
            break;
        }
    }

    info!("{group} synchronizer stopped after {ticks} ticks ({} dropped)", join.dropped());
}

/// Sole owner of the [`LatestJoin`] and sole sender of combined instants.
async fn run_combiner(
    mut ticks: mpsc::Receiver<GroupTick>,
    out: mpsc::Sender<CombinedInstant>,
    shutdown: CancellationToken,
) {
    let mut latest = LatestJoin::new();
    let mut emitted: u64 = 0;
    loop {
        let tick = tokio::select! {
            _ = shutdown.cancelled() => break,
            tick = ticks.recv() => match tick {
                Some(tick) => tick,
                None => break,
            },
        };
        let Some(instant) = latest.update(tick) else {
            continue;
        };
        if out.send(instant).await.is_err() {
            debug!("combiner: combined consumer dropped");
            break;
        }
        emitted += 1;
    }
    debug!("combiner stopped after {emitted} instants");
}

// ── IncidentMonitor ───────────────────────────────────────────────────────────

/// Quantize, classify, and raise alerts for non-normal windows.
pub struct IncidentMonitor<C: Classifier> {
    classifier: C,
    dispatcher: AlertDispatcher,
    patient_id: String,
    geo_location: Option<GeoLocation>,
    evaluated: u64,
}

impl<C: Classifier> IncidentMonitor<C> {
    pub fn new(
        classifier: C,
        dispatcher: AlertDispatcher,
        patient_id: impl Into<String>,
        geo_location: Option<GeoLocation>,
    ) -> Self {
        Self {
            classifier,
            dispatcher,
            patient_id: patient_id.into(),
            geo_location,
            evaluated: 0,
        }
    }

    /// Classify one combined instant.
    pub fn process(&mut self, instant: &CombinedInstant) -> Classification {
        let sample = quantize(instant);
        self.evaluate(sample.as_slice())
    }

    /// Classify an already-quantized window and dispatch an alert if needed.
    ///
    /// Exactly one alert is dispatched per non-normal window. Delivery is
    /// fire-and-forget.
    pub fn evaluate(&mut self, window: &[i8]) -> Classification {
        if self.evaluated % 100 == 0 {
            debug!("window #{}: {:?}", self.evaluated, window);
        }
        self.evaluated += 1;

        let classification = self.classifier.classify(window);
        if let Some(incident_type) = classification.incident_type() {
            warn!("{classification} detected: {window:?}");
            self.dispatcher.dispatch(IncidentAlert::new(
                self.patient_id.clone(),
                incident_type,
                self.geo_location,
            ));
        }
        classification
    }

    /// Windows classified so far.
    pub fn evaluated(&self) -> u64 {
        self.evaluated
    }
}
