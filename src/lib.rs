//! Oxipatch: apply xdelta3/VCDIFF (RFC 3284) patches with bounded memory.
//!
//! The source file is read through a fixed-size LRU cache of blocks, so the
//! working set stays at `block_size * cache_blocks` bytes however large the
//! source is. The crate provides:
//! - A bounded source block cache (`cache`)
//! - A resumable, push-driven VCDIFF decoder (`vcdiff`)
//! - The decode driver joining the two (`session`, `engine`)
//! - File-oriented entry points (`io`) and progress sinks (`progress`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use oxipatch::io::apply_patch;
//! use oxipatch::progress::Totals;
//!
//! let mut totals = Totals::default();
//! let stats = apply_patch(
//!     Path::new("old.bin"),
//!     Path::new("old-to-new.vcdiff"),
//!     Path::new("new.bin"),
//!     &mut totals,
//! )
//! .unwrap();
//! assert_eq!(stats.output_size, totals.written);
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod io;
pub mod progress;
pub mod session;
pub mod vcdiff;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{PatchError, Role};
