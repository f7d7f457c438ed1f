//! Error types for lxdis-core.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A region insert targeted an address no existing region covers.
    #[error("address {0:#x} is not covered by any region")]
    UnmappedRegion(u32),

    /// A region insert did not fit inside its parent region.
    #[error("region [{child_start:#x}, {child_end:#x}) does not fit inside [{parent_start:#x}, {parent_end:#x})")]
    RegionOutOfBounds {
        child_start: u32,
        child_end: u32,
        parent_start: u32,
        parent_end: u32,
    },

    /// Regions must have a non-zero size.
    #[error("zero-sized region at {0:#x}")]
    EmptyRegion(u32),

    /// An address fell outside every image object.
    #[error("address {0:#x} is not mapped by any object")]
    UnmappedAddress(u32),
}
