//! Error types for instruction decoding.

use thiserror::Error;

/// Hard decoder failures; anything softer (an undecodable byte
/// sequence) comes back as an instruction whose text marks it
/// unacceptable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No bytes were available at the given address.
    #[error("no bytes to decode at {0:#x}")]
    Empty(u32),

    /// The decoder consumed no bytes; the classifier cannot advance.
    #[error("decoder made no progress at {0:#x}")]
    Stalled(u32),
}
