use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BwaMemError>;

/// Errors reported by the index manager, the wire codecs, and the boundary
/// into the native aligner engine.
///
/// Every failure is surfaced synchronously at the offending operation; there
/// is no retry anywhere in this layer.
#[derive(Debug, Error)]
pub enum BwaMemError {
    /// A companion index file, image file, or reference is missing, empty,
    /// or unreadable.
    #[error("can't read input file {path}: {reason}")]
    UnreadableInput { path: PathBuf, reason: String },

    /// Bad magic, version, length, or checksum in an index image, or input
    /// that doesn't look like the expected sequence format.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The external index-construction step failed.
    #[error("could not create index: {0}")]
    ConstructionFailure(String),

    /// The external index-packing step failed.
    #[error("could not create index image: {0}")]
    PackingFailure(String),

    /// close() was attempted while aligners still hold the index.
    #[error("index image {path} can't be closed: it's in use")]
    ResourceInUse { path: PathBuf },

    /// An operation was attempted on an index that has been closed.
    #[error("index image {path} has been closed")]
    ResourceClosed { path: PathBuf },

    /// The foreign call returned no result for an unspecified native-side
    /// reason.
    #[error("boundary call failed: {0}")]
    BoundaryCall(String),

    /// The native aligner library could not be located or loaded.
    #[error("unable to load the native aligner library: {0}")]
    LibraryLoad(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A result buffer was truncated or malformed at the given byte offset.
    #[error("malformed buffer at byte {offset}: {what}")]
    Decode { offset: usize, what: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
