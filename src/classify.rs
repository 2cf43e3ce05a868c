//! Window classification.
//!
//! [`Classifier`] is the seam a trained model plugs into. The shipped
//! [`ThresholdClassifier`] is a coarse placeholder: a window that sits
//! entirely below `-120` is a faint, entirely above `120` a seizure.

use crate::types::Classification;

/// Length of the demo windows (one full combined sample).
pub const DEMO_WINDOW_LEN: usize = 60;

/// A window every threshold rule reads as a seizure.
pub const DEMO_SEIZURE: [i8; DEMO_WINDOW_LEN] = [125; DEMO_WINDOW_LEN];

/// A window every threshold rule reads as a faint.
pub const DEMO_FAINT: [i8; DEMO_WINDOW_LEN] = [-125; DEMO_WINDOW_LEN];

/// Maps a quantized window to an event label.
///
/// Implementations must be deterministic for a given window as seen by the
/// caller. A model may keep internal state, but the call stays synchronous.
pub trait Classifier: Send + Sync {
    fn classify(&self, window: &[i8]) -> Classification;
}

/// Whole-window threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdClassifier {
    /// Every value strictly below this → [`Classification::Faint`].
    pub low: i8,
    /// Every value strictly above this → [`Classification::Seizure`].
    pub high: i8,
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self { low: -120, high: 120 }
    }
}

impl Classifier for ThresholdClassifier {
    /// An empty window is `Normal`; the "every value" rules never hold vacuously.
    fn classify(&self, window: &[i8]) -> Classification {
        if window.is_empty() {
            return Classification::Normal;
        }
        if window.iter().all(|&x| x < self.low) {
            return Classification::Faint;
        }
        if window.iter().all(|&x| x > self.high) {
            return Classification::Seizure;
        }
        Classification::Normal
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn classify(&self, window: &[i8]) -> Classification {
        (**self).classify(window)
    }
}
