//! Index image files.
//!
//! An image is a single file holding everything needed to align against one
//! reference: a contig-name table, the engine's flattened index payload, and
//! a fixed-size footer used to validate the file before the payload is ever
//! touched. The payload is opaque to this crate; it is produced and consumed
//! only by the engine. Images are mapped, not read, so a multi-gigabyte
//! index costs address space rather than heap.
//!
//! Layout, all in host byte order:
//!
//! ```text
//! [name table][payload][padding][footer]
//! name table: count:i32, then per contig { len:i32, utf-8 bytes }
//! padding:    0..=7 zero bytes so the footer starts 8-aligned
//! footer:     total_length:u64, checksum:u64, version:[u8;40],
//!             padding_length:u8, magic:[u8;7] = "BWAIMG1"
//! ```
//!
//! The checksum is an Adler-32 over the payload bytes only.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use adler32::RollingAdler32;
use memmap2::Mmap;

use crate::codec::Cursor;
use crate::error::{BwaMemError, Result};

pub const IMAGE_MAGIC: [u8; 7] = *b"BWAIMG1";
pub const FOOTER_SIZE: usize = 64;
pub const VERSION_TAG_LEN: usize = 40;

// Checksum the payload in bounded chunks so progress stays observable on
// very large images.
const CHECKSUM_CHUNK: usize = 1 << 30;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageFooter {
    total_length: u64,
    checksum: u64,
    version: String,
    padding_length: u8,
}

impl ImageFooter {
    fn to_bytes(&self) -> Result<[u8; FOOTER_SIZE]> {
        let version = self.version.as_bytes();
        if version.len() > VERSION_TAG_LEN {
            return Err(BwaMemError::InvalidArgument(format!(
                "engine version tag '{}' exceeds {} bytes",
                self.version, VERSION_TAG_LEN
            )));
        }
        let mut bytes = [0u8; FOOTER_SIZE];
        bytes[0..8].copy_from_slice(&self.total_length.to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.checksum.to_ne_bytes());
        bytes[16..16 + version.len()].copy_from_slice(version);
        bytes[56] = self.padding_length;
        bytes[57..64].copy_from_slice(&IMAGE_MAGIC);
        Ok(bytes)
    }

    fn from_bytes(bytes: &[u8; FOOTER_SIZE]) -> Result<ImageFooter> {
        if bytes[57..64] != IMAGE_MAGIC {
            return Err(BwaMemError::InvalidFormat(
                "bad magic: not an index image".to_string(),
            ));
        }
        let version_field = &bytes[16..16 + VERSION_TAG_LEN];
        let version_len = version_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_TAG_LEN);
        let version = String::from_utf8_lossy(&version_field[..version_len]).into_owned();
        Ok(ImageFooter {
            total_length: u64::from_ne_bytes(bytes[0..8].try_into().unwrap()),
            checksum: u64::from_ne_bytes(bytes[8..16].try_into().unwrap()),
            version,
            padding_length: bytes[56],
        })
    }
}

/// A validated, memory-mapped index image.
#[derive(Debug)]
pub struct MappedImage {
    mmap: Mmap,
    payload_start: usize,
    payload_end: usize,
    contig_names: Vec<String>,
    version: String,
}

impl MappedImage {
    /// Contig names in reference order; alignment records refer to contigs
    /// by index into this list.
    pub fn contig_names(&self) -> &[String] {
        &self.contig_names
    }

    /// Engine version recorded when the image was written.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The engine's flattened index bytes.
    pub fn payload(&self) -> &[u8] {
        &self.mmap[self.payload_start..self.payload_end]
    }
}

fn payload_checksum(payload: &[u8]) -> u64 {
    let mut adler = RollingAdler32::new();
    for chunk in payload.chunks(CHECKSUM_CHUNK) {
        adler.update_buffer(chunk);
    }
    u64::from(adler.hash())
}

fn encode_name_table(names: &[String]) -> Vec<u8> {
    let mut table = Vec::with_capacity(4 + names.iter().map(|n| 4 + n.len()).sum::<usize>());
    table.extend_from_slice(&(names.len() as i32).to_ne_bytes());
    for name in names {
        table.extend_from_slice(&(name.len() as i32).to_ne_bytes());
        table.extend_from_slice(name.as_bytes());
    }
    table
}

fn decode_name_table(cur: &mut Cursor<'_>) -> Result<Vec<String>> {
    let count = cur.read_i32("contig count")?;
    if count < 0 {
        return Err(BwaMemError::InvalidFormat(format!(
            "negative contig count {count} in index image"
        )));
    }
    // Every entry takes at least its 4-byte length prefix, so a count the
    // remaining bytes cannot hold is corruption; reject it before trusting
    // it for an allocation.
    let count = count as usize;
    if count > cur.remaining() / 4 {
        return Err(BwaMemError::InvalidFormat(format!(
            "index image declares {count} contigs but only {} bytes follow",
            cur.remaining()
        )));
    }
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let len = cur.read_i32("contig name length")?;
        if len < 0 {
            return Err(BwaMemError::InvalidFormat(format!(
                "negative contig name length {len} in index image"
            )));
        }
        let bytes = cur.take(len as usize, "contig name bytes")?;
        names.push(String::from_utf8_lossy(bytes).into_owned());
    }
    Ok(names)
}

/// Writes an index image. The file appears atomically: bytes go to a
/// temporary in the same directory, which is renamed into place only after
/// everything has been written.
pub fn write_image(
    path: &Path,
    contig_names: &[String],
    payload: &[u8],
    version: &str,
) -> Result<()> {
    let name_table = encode_name_table(contig_names);
    let padding_length = (8 - (name_table.len() + payload.len()) % 8) % 8;
    let total_length = name_table.len() + payload.len() + padding_length + FOOTER_SIZE;
    let footer = ImageFooter {
        total_length: total_length as u64,
        checksum: payload_checksum(payload),
        version: version.to_string(),
        padding_length: padding_length as u8,
    };
    let footer_bytes = footer.to_bytes()?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&name_table)?;
    tmp.write_all(payload)?;
    tmp.write_all(&[0u8; 8][..padding_length])?;
    tmp.write_all(&footer_bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    log::debug!(
        "wrote index image {} ({} bytes, {} contigs)",
        path.display(),
        total_length,
        contig_names.len()
    );
    Ok(())
}

/// Maps an image and validates its structure. With `verify_checksum` the
/// whole payload is checksummed up front, which faults in every page; leave
/// it off to validate lazily as the engine touches the index.
pub fn map_image(path: &Path, verify_checksum: bool) -> Result<MappedImage> {
    let file = File::open(path).map_err(|e| BwaMemError::UnreadableInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    // Safety: the mapping is read-only and images are written atomically,
    // so no writer mutates the file underneath us.
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < FOOTER_SIZE {
        return Err(BwaMemError::InvalidFormat(format!(
            "index image {} is too short to hold a footer",
            path.display()
        )));
    }
    let footer_bytes: [u8; FOOTER_SIZE] = mmap[mmap.len() - FOOTER_SIZE..]
        .try_into()
        .unwrap();
    let footer = ImageFooter::from_bytes(&footer_bytes)?;
    if footer.total_length != mmap.len() as u64 {
        return Err(BwaMemError::InvalidFormat(format!(
            "index image {} is {} bytes but its footer says {}",
            path.display(),
            mmap.len(),
            footer.total_length
        )));
    }
    if footer.padding_length >= 8 {
        return Err(BwaMemError::InvalidFormat(format!(
            "index image {} has impossible padding length {}",
            path.display(),
            footer.padding_length
        )));
    }

    let body_end = mmap.len() - FOOTER_SIZE - footer.padding_length as usize;
    let mut cur = Cursor::new(&mmap[..body_end]);
    let contig_names = decode_name_table(&mut cur)?;
    let payload_start = cur.position();
    let payload_end = body_end;

    if verify_checksum {
        let computed = payload_checksum(&mmap[payload_start..payload_end]);
        if computed != footer.checksum {
            return Err(BwaMemError::InvalidFormat(format!(
                "index image {} checksum mismatch: stored {:#x}, computed {:#x}",
                path.display(),
                footer.checksum,
                computed
            )));
        }
    }

    log::debug!(
        "mapped index image {}: {} contigs, {} payload bytes, engine version '{}'",
        path.display(),
        contig_names.len(),
        payload_end - payload_start,
        footer.version
    );
    Ok(MappedImage {
        mmap,
        payload_start,
        payload_end,
        contig_names,
        version: footer.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn footer_round_trip() {
        let footer = ImageFooter {
            total_length: 123_456_789,
            checksum: 0xdead_beef,
            version: "0.7.17-r1188".to_string(),
            padding_length: 5,
        };
        let bytes = footer.to_bytes().unwrap();
        assert_eq!(bytes.len(), FOOTER_SIZE);
        assert_eq!(&bytes[57..], &IMAGE_MAGIC);
        assert_eq!(ImageFooter::from_bytes(&bytes).unwrap(), footer);
    }

    #[test]
    fn footer_rejects_overlong_version() {
        let footer = ImageFooter {
            total_length: 0,
            checksum: 0,
            version: "v".repeat(VERSION_TAG_LEN + 1),
            padding_length: 0,
        };
        assert!(footer.to_bytes().is_err());
    }

    #[test]
    fn footer_rejects_bad_magic() {
        let mut bytes = ImageFooter {
            total_length: 64,
            checksum: 0,
            version: String::new(),
            padding_length: 0,
        }
        .to_bytes()
        .unwrap();
        bytes[60] ^= 0xff;
        assert!(ImageFooter::from_bytes(&bytes).is_err());
    }

    #[test]
    fn write_then_map_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.img");
        let contigs = names(&["chr1", "chr2", "chrM"]);
        let payload = [7u8; 1000];
        write_image(&path, &contigs, &payload, "0.7.17-r1188").unwrap();

        let image = map_image(&path, true).unwrap();
        assert_eq!(image.contig_names(), contigs.as_slice());
        assert_eq!(image.version(), "0.7.17-r1188");
        assert_eq!(image.payload(), &payload);
    }

    #[test]
    fn empty_contig_list_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.img");
        write_image(&path, &[], &[], "x").unwrap();
        let image = map_image(&path, true).unwrap();
        assert!(image.contig_names().is_empty());
        assert!(image.payload().is_empty());
    }

    #[test]
    fn file_size_is_footer_aligned() {
        let dir = tempfile::tempdir().unwrap();
        for payload_len in 0..9 {
            let path = dir.path().join(format!("p{payload_len}.img"));
            write_image(&path, &names(&["c"]), &vec![1u8; payload_len], "v").unwrap();
            let len = std::fs::metadata(&path).unwrap().len();
            assert_eq!(
                (len as usize - FOOTER_SIZE) % 8,
                0,
                "footer misaligned for payload_len={payload_len}"
            );
            map_image(&path, true).unwrap();
        }
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.img");
        write_image(&path, &names(&["c"]), &[1, 2, 3], "v").unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        match map_image(&path, false) {
            Err(BwaMemError::InvalidFormat(msg)) => assert!(msg.contains("magic"), "{msg}"),
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }

    #[test]
    fn absurd_contig_count_is_rejected_not_allocated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge-count.img");
        write_image(&path, &names(&["c"]), &[0u8; 8], "v").unwrap();
        // The name-table count is the first word of the file; claim more
        // contigs than the file could possibly hold.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0..4].copy_from_slice(&i32::MAX.to_ne_bytes());
        std::fs::write(&path, &bytes).unwrap();

        match map_image(&path, false) {
            Err(BwaMemError::InvalidFormat(msg)) => assert!(msg.contains("contigs"), "{msg}"),
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }

    #[test]
    fn truncated_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.img");
        write_image(&path, &names(&["c"]), &[1u8; 64], "v").unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(map_image(&path, false).is_err());
    }

    #[test]
    fn flipped_payload_byte_fails_checksum_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flip.img");
        write_image(&path, &names(&["c"]), &[9u8; 256], "v").unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        // The payload starts right after the one-entry name table.
        bytes[4 + 4 + 1 + 10] ^= 1;
        std::fs::write(&path, &bytes).unwrap();

        match map_image(&path, true) {
            Err(BwaMemError::InvalidFormat(msg)) => assert!(msg.contains("checksum"), "{msg}"),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
        // Without verification the structural checks still pass.
        assert!(map_image(&path, false).is_ok());
    }

    #[test]
    fn missing_file_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.img");
        match map_image(&path, false) {
            Err(BwaMemError::UnreadableInput { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected UnreadableInput, got {other:?}"),
        }
    }
}
