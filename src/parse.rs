//! Binary decoders for Muse data notifications.
//!
//! All functions in this module are pure and deterministic: one buffer in,
//! one decoded reading (or a [`DecodeError`]) out. Nothing is kept between
//! calls.
//!
//! | Function | Channel | Format |
//! |---|---|---|
//! | [`decode_unsigned_24bit`] | optical | 24-bit BE unsigned, 3 bytes → 1 sample |
//! | [`decode_unsigned_12bit`] | electrical | 12-bit BE packed, 3 bytes → 2 samples |
//! | [`decode_ppg_samples`] | optical | payload → raw ADC values |
//! | [`decode_eeg_samples`] | electrical | payload → µV, 0.48828125 µV/LSB |
//! | [`parse_optical_notification`] | optical | header + payload → [`OpticalReading`] |
//! | [`parse_electrical_notification`] | electrical | header + payload → [`ElectricalReading`] |
//!
//! A payload that does not split into whole 3-byte groups is rejected rather
//! than truncated, so a short or corrupted notification never yields partial
//! output.

use crate::error::DecodeError;
use crate::protocol::{
    ELECTRICAL_GROUP_LEN, ELECTRICAL_OFFSET, ELECTRICAL_SCALE, NOTIFICATION_HEADER_LEN,
    OPTICAL_GROUP_LEN,
};
use crate::types::{ElectricalReading, OpticalReading};

fn check_groups(data: &[u8], group_len: usize) -> Result<(), DecodeError> {
    if data.len() % group_len != 0 {
        return Err(DecodeError::Misaligned {
            payload_len: data.len(),
            group_len,
        });
    }
    Ok(())
}

/// Split a notification into its packet index and payload.
fn split_header(data: &[u8]) -> Result<(u16, &[u8]), DecodeError> {
    if data.len() < NOTIFICATION_HEADER_LEN {
        return Err(DecodeError::Truncated {
            len: data.len(),
            header: NOTIFICATION_HEADER_LEN,
        });
    }
    let index = u16::from_be_bytes([data[0], data[1]]);
    Ok((index, &data[NOTIFICATION_HEADER_LEN..]))
}

// ── Electrical ───────────────────────────────────────────────────────────────

/// Decode a packed 12-bit unsigned array (big-endian, 3 bytes → 2 samples).
///
/// ```text
/// [AA BB CC] → sample0 = (AA << 4) | (BB >> 4)
///              sample1 = ((BB & 0x0F) << 8) | CC
/// ```
///
/// ```
/// # use muse_sentinel::parse::decode_unsigned_12bit;
/// assert_eq!(decode_unsigned_12bit(&[0xAB, 0xCD, 0xEF]).unwrap(), vec![0xABC, 0xDEF]);
/// ```
pub fn decode_unsigned_12bit(data: &[u8]) -> Result<Vec<u16>, DecodeError> {
    check_groups(data, ELECTRICAL_GROUP_LEN)?;
    let mut out = Vec::with_capacity(data.len() / ELECTRICAL_GROUP_LEN * 2);
    for c in data.chunks_exact(ELECTRICAL_GROUP_LEN) {
        out.push(((c[0] as u16) << 4) | ((c[1] as u16) >> 4));
        out.push((((c[1] as u16) & 0x0F) << 8) | (c[2] as u16));
    }
    Ok(out)
}

/// Decode electrical payload bytes (everything after the header) into µV.
///
/// `µV = 0.48828125 × (raw − 0x800)`
pub fn decode_eeg_samples(data: &[u8]) -> Result<Vec<f64>, DecodeError> {
    Ok(decode_unsigned_12bit(data)?
        .into_iter()
        .map(|n| ELECTRICAL_SCALE * (n as f64 - ELECTRICAL_OFFSET as f64))
        .collect())
}

// ── Optical ──────────────────────────────────────────────────────────────────

/// Decode a 24-bit unsigned big-endian array (3 bytes per sample).
pub fn decode_unsigned_24bit(data: &[u8]) -> Result<Vec<u32>, DecodeError> {
    check_groups(data, OPTICAL_GROUP_LEN)?;
    Ok(data
        .chunks_exact(OPTICAL_GROUP_LEN)
        .map(|c| ((c[0] as u32) << 16) | ((c[1] as u32) << 8) | (c[2] as u32))
        .collect())
}

/// Decode optical payload bytes (after the header) into raw ADC values.
pub fn decode_ppg_samples(data: &[u8]) -> Result<Vec<u32>, DecodeError> {
    decode_unsigned_24bit(data)
}

// ── Notification assembly ─────────────────────────────────────────────────────

/// Parse a full optical notification for sub-channel `channel`.
///
/// Wire layout: `[index_hi, index_lo, s0_b0, s0_b1, s0_b2, …]`
///
/// ```
/// # use muse_sentinel::parse::parse_optical_notification;
/// let reading = parse_optical_notification(&[0x00, 0x07, 0x01, 0x02, 0x03], 1).unwrap();
/// assert_eq!(reading.index, 7);
/// assert_eq!(reading.samples, vec![66051]);
/// ```
pub fn parse_optical_notification(
    data: &[u8],
    channel: usize,
) -> Result<OpticalReading, DecodeError> {
    let (index, payload) = split_header(data)?;
    Ok(OpticalReading {
        index,
        channel,
        samples: decode_ppg_samples(payload)?,
    })
}

/// Parse a full electrical notification for lead `electrode`.
pub fn parse_electrical_notification(
    data: &[u8],
    electrode: usize,
) -> Result<ElectricalReading, DecodeError> {
    let (index, payload) = split_header(data)?;
    Ok(ElectricalReading {
        index,
        electrode,
        samples: decode_eeg_samples(payload)?,
    })
}
