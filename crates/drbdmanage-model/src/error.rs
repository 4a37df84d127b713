//! Domain model errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no free value in range [{min}, {max}]")]
    RangeExhausted { min: u32, max: u32 },

    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: u32, min: u32, max: u32 },

    #[error("value {value} already in use")]
    AlreadyInUse { value: u32 },
}
