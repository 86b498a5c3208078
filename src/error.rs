//! Error types for the top-K sampling layer.
//!
//! Only fatal failures live here. Out-of-range `top_k`/`top_p` values are
//! not errors: they are clamped and logged during setup.

use thiserror::Error;

/// Result type alias using the layer's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{name} has {got} entries, expected 1 or batch_size={batch_size}")]
    LengthMismatch {
        name: &'static str,
        got: usize,
        batch_size: usize,
    },

    #[error("batch_size {batch_size} exceeds max_batch_size {max_batch_size}")]
    BatchTooLarge {
        batch_size: usize,
        max_batch_size: usize,
    },

    #[error("batch index {batch_index} maps to slot {slot}, outside [0, {max_batch_size})")]
    SlotOutOfRange {
        batch_index: usize,
        slot: usize,
        max_batch_size: usize,
    },

    #[error("batch index {batch_index} maps to slot {slot}, already used earlier in the batch")]
    DuplicateSlot { batch_index: usize, slot: usize },

    #[error("batch slot mapping has {got} entries, expected batch_size={batch_size}")]
    SlotMappingLength { got: usize, batch_size: usize },

    #[error("no RNG states provided")]
    MissingRngStates,

    #[error("no workspace provided")]
    MissingWorkspace,

    #[error("workspace holds {got} bytes, kernel needs {required}")]
    WorkspaceTooSmall { got: usize, required: usize },

    #[error("invalid layer config: {0}")]
    InvalidConfig(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("kernel error: {0}")]
    Kernel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by the caller breaking the setup/forward
    /// contract, as opposed to device, kernel or IO failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch { .. }
                | Self::BatchTooLarge { .. }
                | Self::SlotOutOfRange { .. }
                | Self::DuplicateSlot { .. }
                | Self::SlotMappingLength { .. }
                | Self::MissingRngStates
                | Self::MissingWorkspace
                | Self::WorkspaceTooSmall { .. }
        )
    }
}

#[cfg(feature = "cuda")]
impl From<cudarc::driver::DriverError> for Error {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Device(e.to_string())
    }
}
