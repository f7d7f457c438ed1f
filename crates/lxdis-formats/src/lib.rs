//! # lxdis-formats
//!
//! Parsing of the Linear Executable (LE) container format and the
//! services built directly on it: reconstruction of the loaded memory
//! image from on-disk pages plus fixups, and the linker `.MAP` symbol
//! reader.

pub mod error;
pub mod image;
pub mod le;
pub mod map;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::ParseError;
pub use image::build_image;
pub use le::{Fixup, LeHeader, LinearExecutable, ObjectHeader};
pub use map::load_map_symbols;
