//! Index lifecycle: building images from references or pre-built companion
//! files, opening images, and handing out usage-counted references to the
//! engine-side index.
//!
//! An open index may be shared by any number of aligner sessions, possibly
//! on different threads. Each batch holds an [`IndexUsage`] for its
//! duration; `close()` refuses while any usage is live, so the engine never
//! sees a detached index mid-flight.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{BwaMemError, Result};
use crate::ffi::{self, EngineIndex};
use crate::image::{self, MappedImage};

/// Extensions of the companion files a bwa-style indexing run leaves next
/// to its prefix.
pub const INDEX_FILE_EXTENSIONS: [&str; 5] = [".amb", ".ann", ".bwt", ".pac", ".sa"];

/// Conventional extension for index image files.
pub const IMAGE_FILE_EXTENSION: &str = ".img";

/// BWT construction algorithm for index building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Pick by reference size: `Is` below 2 Gbases, `RopeBwt2` above.
    Auto,
    RopeBwt2,
    BwtSw,
    Is,
}

impl Algorithm {
    fn code(self) -> i32 {
        match self {
            Algorithm::Auto => 0,
            Algorithm::RopeBwt2 => 1,
            Algorithm::BwtSw => 2,
            Algorithm::Is => 3,
        }
    }

    fn resolve(self, reference: &Path) -> Result<Algorithm> {
        if self != Algorithm::Auto {
            return Ok(self);
        }
        let len = std::fs::metadata(reference)
            .map_err(|e| BwaMemError::UnreadableInput {
                path: reference.to_path_buf(),
                reason: e.to_string(),
            })?
            .len();
        Ok(if len < 2_000_000_000 {
            Algorithm::Is
        } else {
            Algorithm::RopeBwt2
        })
    }
}

/// Options for [`BwaMemIndex::open_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOpenOptions {
    verify_checksum: bool,
    ignore_version: bool,
}

impl IndexOpenOptions {
    pub fn new() -> IndexOpenOptions {
        IndexOpenOptions::default()
    }

    /// Checksum the whole payload at open time instead of trusting the
    /// structural checks. Faults in every page of the image.
    pub fn verify_checksum(mut self, yes: bool) -> IndexOpenOptions {
        self.verify_checksum = yes;
        self
    }

    /// Skip the engine-version check. The image payload's layout is tied to
    /// the engine build that wrote it, so this is for tooling that only
    /// inspects images, never for alignment.
    pub fn ignore_version(mut self, yes: bool) -> IndexOpenOptions {
        self.ignore_version = yes;
        self
    }
}

#[derive(Debug)]
struct IndexState {
    mapped: Option<MappedImage>,
    handle: Option<NonNull<EngineIndex>>,
}

/// An open, shareable index image.
#[derive(Debug)]
pub struct BwaMemIndex {
    image_path: PathBuf,
    contig_names: Vec<String>,
    state: Mutex<IndexState>,
    usage_count: AtomicI32,
}

// Safety: the engine-side index is immutable once attached and the engine
// documents concurrent alignment against one index as safe. The raw handle
// and the mapping are only mutated under the state mutex.
unsafe impl Send for BwaMemIndex {}
unsafe impl Sync for BwaMemIndex {}

impl BwaMemIndex {
    /// Opens an image with default options: structural validation only,
    /// engine version enforced.
    pub fn open(image: &Path) -> Result<BwaMemIndex> {
        Self::open_with(image, IndexOpenOptions::new())
    }

    pub fn open_with(image: &Path, options: IndexOpenOptions) -> Result<BwaMemIndex> {
        non_empty_readable_file(image)?;
        let mapped = image::map_image(image, options.verify_checksum)?;
        if !options.ignore_version {
            let engine_version = ffi::engine()?.engine_version();
            if mapped.version() != engine_version {
                return Err(BwaMemError::InvalidFormat(format!(
                    "index image {} was written by engine version '{}' but '{}' is loaded",
                    image.display(),
                    mapped.version(),
                    engine_version
                )));
            }
        }
        log::info!(
            "opened index image {} ({} contigs)",
            image.display(),
            mapped.contig_names().len()
        );
        Ok(BwaMemIndex {
            image_path: image.to_path_buf(),
            contig_names: mapped.contig_names().to_vec(),
            state: Mutex::new(IndexState {
                mapped: Some(mapped),
                handle: None,
            }),
            usage_count: AtomicI32::new(0),
        })
    }

    /// Contig names in reference order. Remains available after `close()`.
    pub fn contig_names(&self) -> &[String] {
        &self.contig_names
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn is_open(&self) -> bool {
        self.state().mapped.is_some()
    }

    /// Registers a usage, pinning the index open until the returned guard
    /// drops.
    pub fn acquire(&self) -> Result<IndexUsage<'_>> {
        self.usage_count.fetch_add(1, Ordering::SeqCst);
        // Re-check under the count so a concurrent close() either saw our
        // increment and refused, or completed before it and we back out.
        if !self.is_open() {
            self.usage_count.fetch_sub(1, Ordering::SeqCst);
            return Err(BwaMemError::ResourceClosed {
                path: self.image_path.clone(),
            });
        }
        Ok(IndexUsage { index: self })
    }

    /// Detaches the engine and unmaps the image. Fails if any usage is
    /// live; succeeds trivially if already closed.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state();
        if state.mapped.is_none() {
            return Ok(());
        }
        let users = self.usage_count.load(Ordering::SeqCst);
        if users != 0 {
            return Err(BwaMemError::ResourceInUse {
                path: self.image_path.clone(),
            });
        }
        if let Some(handle) = state.handle.take() {
            if let Some(engine) = ffi::engine_if_loaded() {
                engine.detach(handle);
            }
        }
        state.mapped = None;
        log::info!("closed index image {}", self.image_path.display());
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Builds an index image directly from pre-existing companion files
    /// (`prefix.amb`, `.ann`, `.bwt`, `.pac`, `.sa`).
    pub fn build_image_from_index_files(index_prefix: &Path, image: &Path) -> Result<()> {
        for ext in INDEX_FILE_EXTENSIONS {
            non_empty_readable_file(&with_extension(index_prefix, ext))?;
        }
        let contig_names = contig_names_from_ann(&with_extension(index_prefix, ".ann"))?;
        let engine = ffi::engine()?;
        let payload = engine.flatten(index_prefix)?;
        image::write_image(image, &contig_names, &payload, &engine.engine_version())?;
        log::info!(
            "packed index files at {} into image {}",
            index_prefix.display(),
            image.display()
        );
        Ok(())
    }

    /// Indexes a FASTA reference and packs the result into an image file.
    /// The intermediate companion files live in a scratch directory that is
    /// removed on return.
    pub fn build_image_from_reference(
        reference: &Path,
        image: &Path,
        algorithm: Algorithm,
    ) -> Result<()> {
        non_empty_readable_file(reference)?;
        validate_fasta_header(reference)?;
        let algorithm = algorithm.resolve(reference)?;

        let scratch = tempfile::Builder::new().prefix("bwamem-index").tempdir()?;
        let stem = reference
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "ref".into());
        let prefix = scratch.path().join(stem);

        log::info!(
            "indexing reference {} with algorithm {:?}",
            reference.display(),
            algorithm
        );
        ffi::engine()?.build_raw_index(reference, &prefix, algorithm.code())?;
        Self::build_image_from_index_files(&prefix, image)
    }
}

impl Drop for BwaMemIndex {
    fn drop(&mut self) {
        if self.usage_count.load(Ordering::SeqCst) != 0 {
            // Usages borrow the index, so this indicates a leaked guard.
            log::error!(
                "index image {} dropped while still in use",
                self.image_path.display()
            );
        }
        let mut state = self.state();
        if let Some(handle) = state.handle.take() {
            if let Some(engine) = ffi::engine_if_loaded() {
                engine.detach(handle);
            }
        }
    }
}

/// Guard proving the index is held open by one user.
pub struct IndexUsage<'idx> {
    index: &'idx BwaMemIndex,
}

impl IndexUsage<'_> {
    /// The engine-side handle, attaching the engine to the mapped payload
    /// on first use.
    pub(crate) fn handle(&self) -> Result<NonNull<EngineIndex>> {
        let mut state = self.index.state();
        if let Some(handle) = state.handle {
            return Ok(handle);
        }
        let mapped = state.mapped.as_ref().ok_or_else(|| BwaMemError::ResourceClosed {
            path: self.index.image_path.clone(),
        })?;
        let handle = ffi::engine()?.attach(mapped.payload())?;
        log::debug!(
            "attached engine to index image {}",
            self.index.image_path.display()
        );
        state.handle = Some(handle);
        Ok(handle)
    }
}

impl Drop for IndexUsage<'_> {
    fn drop(&mut self) {
        self.index.usage_count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn with_extension(prefix: &Path, ext: &str) -> PathBuf {
    let mut os = prefix.as_os_str().to_os_string();
    os.push(ext);
    PathBuf::from(os)
}

fn non_empty_readable_file(path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| BwaMemError::UnreadableInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut byte = [0u8; 1];
    let n = file.read(&mut byte).map_err(|e| BwaMemError::UnreadableInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if n == 0 {
        return Err(BwaMemError::UnreadableInput {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(())
}

// The .ann companion file is line-oriented text: a header line whose second
// field is the contig count, then two lines per contig where the second
// field of the first line is the name.
fn contig_names_from_ann(ann: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(ann).map_err(|e| BwaMemError::UnreadableInput {
        path: ann.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| invalid_ann(ann, "missing header line"))?;
    let count: usize = header
        .split_whitespace()
        .nth(1)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| invalid_ann(ann, "malformed header line"))?;

    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let name_line = lines
            .next()
            .ok_or_else(|| invalid_ann(ann, "fewer contig entries than the header declares"))?;
        let name = name_line
            .splitn(3, ' ')
            .nth(1)
            .ok_or_else(|| invalid_ann(ann, "contig line without a name field"))?;
        names.push(name.to_string());
        // The offset/length line for this contig.
        lines
            .next()
            .ok_or_else(|| invalid_ann(ann, "contig entry missing its offsets line"))?;
    }
    Ok(names)
}

fn invalid_ann(ann: &Path, what: &str) -> BwaMemError {
    BwaMemError::InvalidFormat(format!("annotations file {}: {}", ann.display(), what))
}

// Cheap sniff before handing a supposed FASTA to the engine: the first
// non-whitespace byte must open a header line.
fn validate_fasta_header(reference: &Path) -> Result<()> {
    let mut file = File::open(reference).map_err(|e| BwaMemError::UnreadableInput {
        path: reference.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut head = [0u8; 1024];
    let n = file.read(&mut head)?;
    match head[..n].iter().find(|b| !b.is_ascii_whitespace()) {
        Some(&b'>') => Ok(()),
        _ => Err(BwaMemError::InvalidFormat(format!(
            "{} does not look like a FASTA file",
            reference.display()
        ))),
    }
}
