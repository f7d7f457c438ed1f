//! # lxdis-disasm
//!
//! The x86 instruction classifier: wraps the `iced-x86` decoder and
//! reduces each instruction to the control-flow facts the analyser
//! consumes: size, normalized text, branch kind, and static target.

pub mod classifier;
pub mod error;

pub use classifier::{Classifier, Insn, InsnKind};
pub use error::DecodeError;
