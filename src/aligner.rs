//! Alignment sessions.
//!
//! An [`Aligner`] borrows an open [`BwaMemIndex`] and carries its own
//! options block and optional pair-end statistics, so independent sessions
//! over one index never interfere. Batches are synchronous: encode, cross
//! the boundary once, decode.

use crate::codec::{self, AlignmentRecord};
use crate::error::{BwaMemError, Result};
use crate::ffi;
use crate::index::BwaMemIndex;
use crate::opts::AlignerOptions;
use crate::pestat::PairEndStats;

/// One alignment session against an open index.
pub struct Aligner<'idx> {
    index: &'idx BwaMemIndex,
    opts: AlignerOptions,
    pe_stats: Option<PairEndStats>,
}

impl<'idx> Aligner<'idx> {
    /// Creates a session with the engine's default options.
    pub fn new(index: &'idx BwaMemIndex) -> Result<Aligner<'idx>> {
        if !index.is_open() {
            return Err(BwaMemError::ResourceClosed {
                path: index.image_path().to_path_buf(),
            });
        }
        let opts = AlignerOptions::from_raw_block(ffi::engine()?.default_options_block()?)?;
        Ok(Aligner {
            index,
            opts,
            pe_stats: None,
        })
    }

    pub fn index(&self) -> &'idx BwaMemIndex {
        self.index
    }

    pub fn options(&self) -> &AlignerOptions {
        &self.opts
    }

    pub fn options_mut(&mut self) -> &mut AlignerOptions {
        &mut self.opts
    }

    /// Switches the session to paired-end mode. Batches must then interleave
    /// mates: read1 of pair 1, read2 of pair 1, read1 of pair 2, and so on.
    pub fn align_pairs(&mut self) {
        self.opts.align_pairs();
    }

    /// Fixes the insert-size distribution instead of letting the engine
    /// infer one per batch. Pass [`PairEndStats::FAILED`] to forbid pairing
    /// rescue outright.
    pub fn set_pair_end_stats(&mut self, stats: PairEndStats) {
        self.pe_stats = Some(stats);
    }

    pub fn pair_end_stats(&self) -> Option<&PairEndStats> {
        self.pe_stats.as_ref()
    }

    /// Aligns a batch of sequences, returning one group of alignment
    /// records per input sequence, in input order.
    pub fn align_seqs<S: AsRef<[u8]>>(&self, seqs: &[S]) -> Result<Vec<Vec<AlignmentRecord>>> {
        if seqs.is_empty() {
            return Ok(Vec::new());
        }
        let usage = self.index.acquire()?;
        let batch = codec::encode_seq_batch(seqs)?;
        let handle = usage.handle()?;
        let raw_pe = self.pe_stats.map(PairEndStats::to_raw);
        log::debug!(
            "aligning batch of {} sequences against {}",
            seqs.len(),
            self.index.image_path().display()
        );
        let result =
            ffi::engine()?.align_batch(handle, self.opts.as_bytes(), raw_pe.as_ref(), &batch)?;
        codec::decode_alignments(&result, seqs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image;
    use crate::index::IndexOpenOptions;
    use std::path::Path;

    fn test_index(dir: &Path) -> BwaMemIndex {
        let path = dir.join("ref.img");
        image::write_image(&path, &["chr1".to_string()], &[1u8; 128], "t").unwrap();
        BwaMemIndex::open_with(&path, IndexOpenOptions::new().ignore_version(true)).unwrap()
    }

    #[test]
    fn new_against_closed_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        index.close().unwrap();
        assert!(matches!(
            Aligner::new(&index),
            Err(BwaMemError::ResourceClosed { .. })
        ));
    }

    // Sessions with a live engine are covered by integration tests gated on
    // the native library; here we only pin the engine-free paths.
    #[test]
    fn empty_batch_needs_no_engine() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        let aligner = Aligner {
            index: &index,
            opts: AlignerOptions::from_raw_block(vec![0u8; crate::opts::OPTS_BLOCK_SIZE]).unwrap(),
            pe_stats: None,
        };
        let seqs: [&[u8]; 0] = [];
        assert!(aligner.align_seqs(&seqs).unwrap().is_empty());
    }

    #[test]
    fn pair_end_stats_are_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        let mut a = Aligner {
            index: &index,
            opts: AlignerOptions::from_raw_block(vec![0u8; crate::opts::OPTS_BLOCK_SIZE]).unwrap(),
            pe_stats: None,
        };
        let b = Aligner {
            index: &index,
            opts: AlignerOptions::from_raw_block(vec![0u8; crate::opts::OPTS_BLOCK_SIZE]).unwrap(),
            pe_stats: None,
        };
        a.set_pair_end_stats(PairEndStats::from_average(400.0).unwrap());
        a.align_pairs();
        assert!(a.pair_end_stats().is_some());
        assert!(b.pair_end_stats().is_none());
        assert_eq!(b.options().flags(), 0);
    }
}
