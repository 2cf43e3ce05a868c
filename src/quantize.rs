//! Fixed-point scaling of combined instants into the classifier's `i8` vector.
//!
//! Optical: `clamp(round(corrected / 2048), -128, 127)`.
//! Electrical: `round(µV / 32)`, saturated to `i8`. For 12-bit input the
//! calibrated range is ±1000 µV, so the result stays within ±32 and the
//! saturation never engages on valid data.
//!
//! Rounding is half-up (`floor(x + 0.5)`), so `-2.5` rounds to `-2`.

use crate::protocol::{ELECTRICAL_QUANT_DIVISOR, OPTICAL_QUANT_DIVISOR};
use crate::types::{CombinedInstant, CombinedSample, ElectricalTick, OpticalTick};

fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn saturate(x: f64) -> i8 {
    x.clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

/// Quantize one ambient-corrected optical value.
///
/// ```
/// # use muse_sentinel::quantize::quantize_optical;
/// assert_eq!(quantize_optical(300_000), 127);
/// assert_eq!(quantize_optical(-300_000), -128);
/// assert_eq!(quantize_optical(4096), 2);
/// ```
pub fn quantize_optical(corrected: i64) -> i8 {
    saturate(round_half_up(corrected as f64 / OPTICAL_QUANT_DIVISOR))
}

/// Quantize one calibrated electrical value (µV).
pub fn quantize_electrical(microvolts: f64) -> i8 {
    saturate(round_half_up(microvolts / ELECTRICAL_QUANT_DIVISOR))
}

/// `[ir₀, red₀, ir₁, red₁, …]`
fn push_optical(out: &mut Vec<i8>, tick: &OpticalTick) {
    for (&ir, &red) in tick.ir_corrected.iter().zip(&tick.red_corrected) {
        out.push(quantize_optical(ir));
        out.push(quantize_optical(red));
    }
}

/// `[tp9₀, af7₀, af8₀, tp10₀, tp9₁, …]`
fn push_electrical(out: &mut Vec<i8>, tick: &ElectricalTick) {
    let leads = tick.leads();
    for i in 0..tick.len() {
        for lead in leads {
            if let Some(&v) = lead.get(i) {
                out.push(quantize_electrical(v));
            }
        }
    }
}

/// Flatten a combined instant into its quantized feature vector.
pub fn quantize(instant: &CombinedInstant) -> CombinedSample {
    let optical = &instant.optical;
    let electrical = &instant.electrical;
    let mut values = Vec::with_capacity(2 * optical.ir_corrected.len() + 4 * electrical.len());
    push_optical(&mut values, optical);
    push_electrical(&mut values, electrical);
    CombinedSample { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_optical_clamps_both_ends() {
        assert_eq!(quantize_optical(300_000), 127);
        assert_eq!(quantize_optical(-300_000), -128);
        assert_eq!(quantize_optical(i64::MAX / 2), 127);
    }

    #[test]
    fn test_optical_rounding() {
        assert_eq!(quantize_optical(0), 0);
        assert_eq!(quantize_optical(1024), 1); // 0.5 rounds up
        assert_eq!(quantize_optical(-1024), 0); // -0.5 rounds up
        assert_eq!(quantize_optical(-3072), -1); // -1.5 rounds up
        assert_eq!(quantize_optical(127 * 2048), 127);
    }

    #[test]
    fn test_electrical_scale() {
        assert_eq!(quantize_electrical(0.0), 0);
        assert_eq!(quantize_electrical(341.796875), 11);
        assert_eq!(quantize_electrical(-1000.0), -31);
        assert_eq!(quantize_electrical(999.51171875), 31);
    }

    #[test]
    fn test_vector_layout() {
        let instant = CombinedInstant {
            optical: Arc::new(OpticalTick {
                ambient: vec![0, 0],
                infrared: vec![2048, 4096],
                red: vec![6144, 8192],
                ir_corrected: vec![2048, 4096],
                red_corrected: vec![6144, 8192],
            }),
            electrical: Arc::new(ElectricalTick {
                tp9: vec![32.0, 320.0],
                af7: vec![64.0, 352.0],
                af8: vec![96.0, 384.0],
                tp10: vec![128.0, 416.0],
            }),
        };
        let sample = quantize(&instant);
        assert_eq!(
            sample.values,
            vec![1, 3, 2, 4, 1, 2, 3, 4, 10, 11, 12, 13]
        );
    }

    #[test]
    fn test_full_protocol_vector_has_sixty_values() {
        let instant = CombinedInstant {
            optical: Arc::new(OpticalTick {
                ambient: vec![0; 6],
                infrared: vec![0; 6],
                red: vec![0; 6],
                ir_corrected: vec![0; 6],
                red_corrected: vec![0; 6],
            }),
            electrical: Arc::new(ElectricalTick {
                tp9: vec![0.0; 12],
                af7: vec![0.0; 12],
                af8: vec![0.0; 12],
                tp10: vec![0.0; 12],
            }),
        };
        assert_eq!(quantize(&instant).values.len(), 60);
    }
}
