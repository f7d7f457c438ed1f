//! Error types for analysis.

use thiserror::Error;

/// Fatal analysis failures. Soft conditions (unmapped trace targets,
/// heuristic reinterpretations) are diagnostics, not errors.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The region or label bookkeeping was driven out of bounds.
    #[error(transparent)]
    Core(#[from] lxdis_core::Error),

    /// The instruction decoder failed to make progress.
    #[error(transparent)]
    Decode(#[from] lxdis_disasm::DecodeError),
}
