//! Error taxonomy for the acquisition pipeline.
//!
//! | Error | Phase | Policy |
//! |---|---|---|
//! | [`ConnectionError`] | startup | fatal; any open session is torn down first |
//! | [`TransportError`] | startup | fatal; device cannot be assumed to stream |
//! | [`DecodeError`] | steady state | offending notification discarded, stream continues |
//! | [`DispatchError`] | steady state | logged only, never retried |

use thiserror::Error;
use uuid::Uuid;

/// Failure to reach a streaming-ready session with the headset.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no usable Bluetooth adapter: {0}")]
    AdapterUnavailable(String),

    #[error("device {id} not found after {timeout_secs} s of scanning")]
    DeviceNotFound { id: String, timeout_secs: u64 },

    #[error("primary service {0} not exposed by the device")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found on the primary service")]
    CharacteristicNotFound(Uuid),

    #[error("BLE session failure: {0}")]
    SessionFailure(String),
}

/// A notification payload that cannot be decoded without truncation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("notification of {len} bytes is shorter than the {header} byte header")]
    Truncated { len: usize, header: usize },

    #[error("payload of {payload_len} bytes is not a whole number of {group_len} byte groups")]
    Misaligned { payload_len: usize, group_len: usize },
}

/// Failure to write a command to the control characteristic.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("writing command {command:?} failed: {reason}")]
    Write { command: String, reason: String },

    #[error("command of {command_len} bytes exceeds the {max} byte limit of the length prefix")]
    CommandTooLong { command_len: usize, max: usize },
}

/// Failure to deliver an incident alert. Never surfaced to the pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("alert serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("alert publish failed: {0}")]
    Transport(String),

    #[error("alert worker is no longer running")]
    WorkerStopped,
}
