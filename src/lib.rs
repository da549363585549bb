//! Safe bindings around a native bwa-mem aligner engine.
//!
//! The engine is a shared library loaded at runtime; this crate owns
//! everything on the managed side of that boundary: building and validating
//! single-file index images, mapping them for shared use across threads,
//! per-session option blocks and pair-end statistics, and the wire codecs
//! that carry sequence batches in and alignment records out.
//!
//! ```no_run
//! use bwamem_bridge::{Aligner, Algorithm, BwaMemIndex};
//! # fn main() -> bwamem_bridge::Result<()> {
//! use std::path::Path;
//!
//! BwaMemIndex::build_image_from_reference(
//!     Path::new("ref.fa"),
//!     Path::new("ref.img"),
//!     Algorithm::Auto,
//! )?;
//! let index = BwaMemIndex::open(Path::new("ref.img"))?;
//! let aligner = Aligner::new(&index)?;
//! for group in aligner.align_seqs(&[b"ACGTACGTACGT"])? {
//!     for alignment in group {
//!         println!("{} {}", alignment.ref_id, alignment.cigar_string());
//!     }
//! }
//! index.close()?;
//! # Ok(())
//! # }
//! ```

pub mod aligner;
pub mod codec;
pub mod error;
mod ffi;
pub mod image;
pub mod index;
pub mod opts;
pub mod pestat;

pub use aligner::Aligner;
pub use codec::{AlignmentRecord, CigarElement, CigarOp};
pub use error::{BwaMemError, Result};
pub use ffi::LIBRARY_PATH_ENV;
pub use index::{Algorithm, BwaMemIndex, IndexOpenOptions};
pub use opts::AlignerOptions;
pub use pestat::PairEndStats;

/// Version string of the loaded engine library, loading it if necessary.
pub fn engine_version() -> Result<String> {
    Ok(ffi::engine()?.engine_version())
}
