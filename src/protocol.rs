//! GATT UUIDs, wire constants, and the control-command encoding for the
//! Muse headset profile used by the sentinel pipeline.
//!
//! All characteristic UUIDs belong to the Muse vendor namespace
//! `273eXXXX-4c4d-454d-96be-f03bac821358`.

use uuid::Uuid;

use crate::error::TransportError;

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service UUID exposed by the headset.
///
/// Its absence after service discovery is reported as
/// [`crate::error::ConnectionError::ServiceNotFound`].
pub const MUSE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fe8d_0000_1000_8000_00805f9b34fb);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Write-only control channel.
///
/// The host writes length-prefixed ASCII commands; see [`encode_command`].
pub const CONTROL_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x273e0001_4c4d_454d_96be_f03bac821358);

/// Optical (PPG) characteristics, indexed by sub-channel:
///
/// | Index | UUID suffix | Sub-channel |
/// |-------|-------------|-------------|
/// | 0     | 000f        | ambient     |
/// | 1     | 0010        | infrared    |
/// | 2     | 0011        | red         |
pub const OPTICAL_CHARACTERISTICS: [Uuid; 3] = [
    Uuid::from_u128(0x273e000f_4c4d_454d_96be_f03bac821358), // ambient
    Uuid::from_u128(0x273e0010_4c4d_454d_96be_f03bac821358), // infrared
    Uuid::from_u128(0x273e0011_4c4d_454d_96be_f03bac821358), // red
];

/// Electrical (EEG) characteristics, indexed by lead:
///
/// | Index | UUID suffix | Lead |
/// |-------|-------------|------|
/// | 0     | 0003        | TP9  |
/// | 1     | 0004        | AF7  |
/// | 2     | 0005        | AF8  |
/// | 3     | 0006        | TP10 |
pub const ELECTRICAL_CHARACTERISTICS: [Uuid; 4] = [
    Uuid::from_u128(0x273e0003_4c4d_454d_96be_f03bac821358), // TP9
    Uuid::from_u128(0x273e0004_4c4d_454d_96be_f03bac821358), // AF7
    Uuid::from_u128(0x273e0005_4c4d_454d_96be_f03bac821358), // AF8
    Uuid::from_u128(0x273e0006_4c4d_454d_96be_f03bac821358), // TP10
];

/// Number of optical sub-channels joined into one [`crate::types::OpticalTick`].
pub const OPTICAL_CHANNELS: usize = OPTICAL_CHARACTERISTICS.len();

/// Number of electrical leads joined into one [`crate::types::ElectricalTick`].
pub const ELECTRICAL_CHANNELS: usize = ELECTRICAL_CHARACTERISTICS.len();

// ── Sampling constants ────────────────────────────────────────────────────────

/// Electrical sample rate in Hz per lead.
pub const ELECTRICAL_FREQUENCY: f64 = 256.0;

/// Electrical samples packed into one notification (18 payload bytes).
pub const ELECTRICAL_SAMPLES_PER_READING: usize = 12;

/// Optical sample rate in Hz per sub-channel.
pub const OPTICAL_FREQUENCY: f64 = 64.0;

/// Optical samples packed into one notification (18 payload bytes).
pub const OPTICAL_SAMPLES_PER_READING: usize = 6;

// ── Wire layout ───────────────────────────────────────────────────────────────

/// Every data notification starts with a big-endian 16-bit packet index.
pub const NOTIFICATION_HEADER_LEN: usize = 2;

/// Bytes per optical sample (24-bit big-endian unsigned).
pub const OPTICAL_GROUP_LEN: usize = 3;

/// Bytes per pair of packed 12-bit electrical samples.
pub const ELECTRICAL_GROUP_LEN: usize = 3;

/// Electrical ADC mid-scale; raw values are centred here.
pub const ELECTRICAL_OFFSET: u16 = 0x800;

/// Electrical calibration factor in µV per raw LSB (1000 µV / 2048 steps).
pub const ELECTRICAL_SCALE: f64 = 0.48828125;

// ── Quantization ──────────────────────────────────────────────────────────────

/// Ambient-corrected optical values are divided by this before clamping to `i8`.
pub const OPTICAL_QUANT_DIVISOR: f64 = 2048.0;

/// Calibrated electrical values are divided by this before narrowing to `i8`.
pub const ELECTRICAL_QUANT_DIVISOR: f64 = 32.0;

// ── Human-readable labels ─────────────────────────────────────────────────────

/// Lead names in [`ELECTRICAL_CHARACTERISTICS`] index order.
pub const ELECTRICAL_CHANNEL_NAMES: [&str; 4] = ["TP9", "AF7", "AF8", "TP10"];

/// Sub-channel names in [`OPTICAL_CHARACTERISTICS`] index order.
pub const OPTICAL_CHANNEL_NAMES: [&str; 3] = ["ambient", "infrared", "red"];

// ── Control commands ──────────────────────────────────────────────────────────

/// Halt streaming.
pub const CMD_HALT: &str = "h";
/// Preset 50: four EEG leads plus the three PPG sub-channels.
pub const CMD_PRESET_PPG: &str = "p50";
/// Start acquisition.
pub const CMD_START: &str = "s";
/// Enter data (streaming) mode.
pub const CMD_DATA_MODE: &str = "d";

/// Commands sent at startup, in the only order the headset accepts.
///
/// Reordering or omitting one leaves the device uninitialised or silent.
pub const STARTUP_SEQUENCE: [&str; 4] = [CMD_HALT, CMD_PRESET_PPG, CMD_START, CMD_DATA_MODE];

/// Longest command whose length byte (command plus `'\n'`) fits in a `u8`.
pub const MAX_COMMAND_LEN: usize = u8::MAX as usize - 1;

/// Encode a text command for the control characteristic.
///
/// ```text
/// byte 0     : command.len() + 1 (counts the trailing '\n')
/// bytes 1..N : UTF-8 command bytes
/// byte N+1   : '\n'
/// ```
///
/// # Example
///
/// ```
/// # use muse_sentinel::protocol::encode_command;
/// assert_eq!(encode_command("p50").unwrap(), &[0x04, b'p', b'5', b'0', b'\n']);
/// ```
///
/// Commands longer than [`MAX_COMMAND_LEN`] bytes do not fit the length byte
/// and are rejected.
pub fn encode_command(cmd: &str) -> Result<Vec<u8>, TransportError> {
    let len = u8::try_from(cmd.len() + 1).map_err(|_| TransportError::CommandTooLong {
        command_len: cmd.len(),
        max: MAX_COMMAND_LEN,
    })?;
    let mut frame = Vec::with_capacity(cmd.len() + 2);
    frame.push(len);
    frame.extend_from_slice(cmd.as_bytes());
    frame.push(b'\n');
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_letter_command() {
        assert_eq!(encode_command("h").unwrap(), vec![0x02, b'h', b'\n']);
        assert_eq!(encode_command("d").unwrap(), vec![0x02, b'd', b'\n']);
    }

    #[test]
    fn test_length_byte_counts_terminator() {
        let frame = encode_command("p50").unwrap();
        assert_eq!(frame[0] as usize, "p50".len() + 1);
        assert_eq!(frame.len(), "p50".len() + 2);
        assert_eq!(*frame.last().unwrap(), b'\n');
    }

    #[test]
    fn test_longest_command_fills_length_byte() {
        let cmd = "x".repeat(MAX_COMMAND_LEN);
        let frame = encode_command(&cmd).unwrap();
        assert_eq!(frame[0], 255);
        assert_eq!(frame.len(), MAX_COMMAND_LEN + 2);
    }

    #[test]
    fn test_overlong_command_is_rejected() {
        let err = encode_command(&"x".repeat(255)).unwrap_err();
        assert!(matches!(
            err,
            TransportError::CommandTooLong { command_len: 255, max: 254 }
        ));
    }

    #[test]
    fn test_startup_sequence_order() {
        assert_eq!(STARTUP_SEQUENCE, ["h", "p50", "s", "d"]);
    }

    #[test]
    fn test_characteristics_are_distinct() {
        let mut all: Vec<Uuid> = OPTICAL_CHARACTERISTICS
            .iter()
            .chain(ELECTRICAL_CHARACTERISTICS.iter())
            .copied()
            .collect();
        all.push(CONTROL_CHARACTERISTIC);
        let before = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), before);
    }
}
