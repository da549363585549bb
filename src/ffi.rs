// Boundary to the native aligner engine.
//
// The engine ships as a shared library loaded at runtime, not linked at
// build time, so the crate builds and its pure-Rust surface tests without
// the library present. Every exported symbol is resolved once, the library
// is leaked for the life of the process, and all pointer handling is
// confined to this module; the rest of the crate sees safe methods that
// traffic in slices, Vecs, and typed errors.

use std::env;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Mutex;

use libloading::Library;

use crate::error::{BwaMemError, Result};

/// Environment variable naming the engine library to load, overriding the
/// platform default.
pub const LIBRARY_PATH_ENV: &str = "BWAMEM_LIBRARY_PATH";

/// Opaque engine-side index attached to a mapped image.
#[repr(C)]
pub(crate) struct EngineIndex {
    _private: [u8; 0],
}

/// Mirror of the engine's mem_pestat_t.
#[repr(C)]
pub(crate) struct PeStatsRaw {
    pub low: i32,
    pub high: i32,
    pub failed: i32,
    pub avg: f64,
    pub std: f64,
}

type IndexReferenceFn =
    unsafe extern "C" fn(reference: *const c_char, prefix: *const c_char, algo: c_int) -> c_int;
type FlattenIndexFn = unsafe extern "C" fn(prefix: *const c_char, out_len: *mut usize) -> *mut u8;
type AttachIndexFn = unsafe extern "C" fn(payload: *const u8, len: usize) -> *mut EngineIndex;
type DetachIndexFn = unsafe extern "C" fn(index: *mut EngineIndex);
type DefaultOptionsFn = unsafe extern "C" fn(out_len: *mut usize) -> *mut u8;
type AlignFn = unsafe extern "C" fn(
    index: *mut EngineIndex,
    opts: *const u8,
    pe_stats: *const PeStatsRaw,
    seq_batch: *const u8,
    out_len: *mut usize,
) -> *mut u8;
type ReleaseFn = unsafe extern "C" fn(buf: *mut u8);
type VersionFn = unsafe extern "C" fn() -> *const c_char;

pub(crate) struct Engine {
    // Keeps the shared object resident; the fn pointers below borrow from it.
    _lib: Library,
    index_reference: IndexReferenceFn,
    flatten_index: FlattenIndexFn,
    attach_index: AttachIndexFn,
    detach_index: DetachIndexFn,
    default_options: DefaultOptionsFn,
    align: AlignFn,
    release: ReleaseFn,
    version: VersionFn,
}

static ENGINE: Mutex<Option<&'static Engine>> = Mutex::new(None);

/// Loads the engine library on first use and hands back the process-wide
/// instance thereafter.
pub(crate) fn engine() -> Result<&'static Engine> {
    let mut slot = ENGINE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(engine) = *slot {
        return Ok(engine);
    }
    let path = library_path()?;
    let engine: &'static Engine = Box::leak(Box::new(Engine::load(&path)?));
    log::info!(
        "loaded native aligner library {} (engine version {})",
        path,
        engine.engine_version()
    );
    *slot = Some(engine);
    Ok(engine)
}

/// True once the library has been loaded; never triggers a load.
pub(crate) fn engine_if_loaded() -> Option<&'static Engine> {
    *ENGINE.lock().unwrap_or_else(|e| e.into_inner())
}

fn library_path() -> Result<String> {
    if let Ok(path) = env::var(LIBRARY_PATH_ENV) {
        return Ok(path);
    }
    if cfg!(target_arch = "x86_64") && cfg!(target_os = "linux") {
        Ok("libbwa.Linux.so".to_string())
    } else if cfg!(target_arch = "x86_64") && cfg!(target_os = "macos") {
        Ok("libbwa.Darwin.dylib".to_string())
    } else {
        Err(BwaMemError::LibraryLoad(format!(
            "no bundled engine library for this platform; set {LIBRARY_PATH_ENV}"
        )))
    }
}

macro_rules! resolve {
    ($lib:expr, $name:literal, $ty:ty) => {{
        let sym = unsafe { $lib.get::<$ty>($name) }
            .map_err(|e| BwaMemError::LibraryLoad(e.to_string()))?;
        *sym
    }};
}

impl Engine {
    fn load(path: &str) -> Result<Engine> {
        // Safety: loading runs the library's initializers; the engine's are
        // inert. The library is never unloaded, so resolved fn pointers
        // stay valid for the process lifetime.
        let lib =
            unsafe { Library::new(path) }.map_err(|e| BwaMemError::LibraryLoad(e.to_string()))?;
        let engine = Engine {
            index_reference: resolve!(lib, b"bwamem_index_reference\0", IndexReferenceFn),
            flatten_index: resolve!(lib, b"bwamem_flatten_index\0", FlattenIndexFn),
            attach_index: resolve!(lib, b"bwamem_attach_index\0", AttachIndexFn),
            detach_index: resolve!(lib, b"bwamem_detach_index\0", DetachIndexFn),
            default_options: resolve!(lib, b"bwamem_default_options\0", DefaultOptionsFn),
            align: resolve!(lib, b"bwamem_align\0", AlignFn),
            release: resolve!(lib, b"bwamem_release\0", ReleaseFn),
            version: resolve!(lib, b"bwamem_version\0", VersionFn),
            _lib: lib,
        };
        Ok(engine)
    }

    pub(crate) fn engine_version(&self) -> String {
        // Safety: the engine returns a pointer to a static NUL-terminated
        // version string.
        let raw = unsafe { (self.version)() };
        if raw.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(raw) }
            .to_string_lossy()
            .into_owned()
    }

    /// Runs the engine's index-construction step, producing the companion
    /// files `prefix.amb` etc. on disk.
    pub(crate) fn build_raw_index(
        &self,
        reference: &Path,
        prefix: &Path,
        algo_code: i32,
    ) -> Result<()> {
        let c_ref = cstring_from_path(reference)?;
        let c_prefix = cstring_from_path(prefix)?;
        // Safety: both pointers are NUL-terminated and live across the call.
        let ret = unsafe { (self.index_reference)(c_ref.as_ptr(), c_prefix.as_ptr(), algo_code) };
        if ret != 0 {
            return Err(BwaMemError::ConstructionFailure(format!(
                "engine indexing of {} failed with status {ret}",
                reference.display()
            )));
        }
        Ok(())
    }

    /// Loads the companion files at `prefix` and returns the flattened,
    /// image-ready index payload.
    pub(crate) fn flatten(&self, prefix: &Path) -> Result<Vec<u8>> {
        let c_prefix = cstring_from_path(prefix)?;
        let mut len = 0usize;
        // Safety: prefix is NUL-terminated; len is written before the
        // returned pointer is used.
        let ptr = unsafe { (self.flatten_index)(c_prefix.as_ptr(), &mut len) };
        let buf = EngineBuffer::claim(ptr, len, self.release).ok_or_else(|| {
            BwaMemError::PackingFailure(format!(
                "engine could not flatten the index at {}",
                prefix.display()
            ))
        })?;
        Ok(buf.to_vec())
    }

    /// Attaches the engine to a flattened index payload. The payload must
    /// stay mapped until `detach`.
    pub(crate) fn attach(&self, payload: &[u8]) -> Result<NonNull<EngineIndex>> {
        // Safety: payload outlives the handle; the index module guarantees
        // the backing mmap is not dropped while the handle exists.
        let ptr = unsafe { (self.attach_index)(payload.as_ptr(), payload.len()) };
        NonNull::new(ptr).ok_or_else(|| {
            BwaMemError::BoundaryCall("engine rejected the index payload".to_string())
        })
    }

    pub(crate) fn detach(&self, handle: NonNull<EngineIndex>) {
        // Safety: handle came from attach() and is dropped exactly once.
        unsafe { (self.detach_index)(handle.as_ptr()) };
    }

    /// The engine's compiled-in default options block.
    pub(crate) fn default_options_block(&self) -> Result<Vec<u8>> {
        let mut len = 0usize;
        // Safety: len is written before the returned pointer is used.
        let ptr = unsafe { (self.default_options)(&mut len) };
        let buf = EngineBuffer::claim(ptr, len, self.release).ok_or_else(|| {
            BwaMemError::BoundaryCall("engine returned no default options".to_string())
        })?;
        Ok(buf.to_vec())
    }

    /// Aligns one encoded sequence batch, returning the raw result buffer.
    pub(crate) fn align_batch(
        &self,
        handle: NonNull<EngineIndex>,
        opts: &[u8],
        pe_stats: Option<&PeStatsRaw>,
        seq_batch: &[u8],
    ) -> Result<Vec<u8>> {
        let pe_ptr = pe_stats.map_or(std::ptr::null(), |s| s as *const PeStatsRaw);
        let mut len = 0usize;
        // Safety: all inputs live across the call; a null pe_stats tells
        // the engine to infer the insert-size distribution itself.
        let ptr = unsafe {
            (self.align)(
                handle.as_ptr(),
                opts.as_ptr(),
                pe_ptr,
                seq_batch.as_ptr(),
                &mut len,
            )
        };
        let buf = EngineBuffer::claim(ptr, len, self.release).ok_or_else(|| {
            BwaMemError::BoundaryCall("engine returned no alignment results".to_string())
        })?;
        Ok(buf.to_vec())
    }
}

/// Engine-allocated buffer, released back to the engine on drop.
struct EngineBuffer {
    ptr: NonNull<u8>,
    len: usize,
    release: ReleaseFn,
}

impl EngineBuffer {
    fn claim(ptr: *mut u8, len: usize, release: ReleaseFn) -> Option<EngineBuffer> {
        NonNull::new(ptr).map(|ptr| EngineBuffer { ptr, len, release })
    }

    fn to_vec(&self) -> Vec<u8> {
        // Safety: ptr/len describe the allocation the engine handed over.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }.to_vec()
    }
}

impl Drop for EngineBuffer {
    fn drop(&mut self) {
        // Safety: claimed from the engine and released exactly once.
        unsafe { (self.release)(self.ptr.as_ptr()) };
    }
}

fn cstring_from_path(path: &Path) -> Result<CString> {
    let text = path.to_str().ok_or_else(|| {
        BwaMemError::InvalidArgument(format!("path {} is not valid UTF-8", path.display()))
    })?;
    CString::new(text).map_err(|_| {
        BwaMemError::InvalidArgument(format!("path {} contains a NUL byte", path.display()))
    })
}
