// The aligner options block.
//
// The engine consumes its parameters as a single fixed-layout struct passed
// by pointer across the boundary (the `mem_opt_t` of bwa-mem). Rather than
// mirror the struct field-by-field and fight the C compiler over padding,
// the block is kept as raw bytes with typed accessors at the offsets the
// engine compiled with; defaults come from the engine itself so they can
// never drift from the wrapped build.

use crate::error::{BwaMemError, Result};

/// Size of the engine's options struct. Checked against the block the
/// engine hands back at session construction.
pub const OPTS_BLOCK_SIZE: usize = 168;

// Bits of the flag word at offset 60.
pub const MEM_F_PE: i32 = 0x2;
pub const MEM_F_NOPAIRING: i32 = 0x4;
pub const MEM_F_ALL: i32 = 0x8;
pub const MEM_F_NO_MULTI: i32 = 0x10;
pub const MEM_F_NO_RESCUE: i32 = 0x20;
pub const MEM_F_REF_HDR: i32 = 0x100;
pub const MEM_F_SOFTCLIP: i32 = 0x200;
pub const MEM_F_SMARTPE: i32 = 0x400;
pub const MEM_F_PRIMARY5: i32 = 0x800;

const SCORING_MATRIX_OFFSET: usize = 140;
const SCORING_MATRIX_LEN: usize = 25;

/// Fixed-layout parameter table for one aligner session.
///
/// Mutate freely between batches; each `Aligner` owns its own copy, so
/// changes never affect other sessions.
#[derive(Debug, Clone)]
pub struct AlignerOptions {
    block: Vec<u8>,
}

impl AlignerOptions {
    /// Wraps a raw options block, validating its size against the layout
    /// this crate was written for.
    pub(crate) fn from_raw_block(block: Vec<u8>) -> Result<Self> {
        if block.len() != OPTS_BLOCK_SIZE {
            return Err(BwaMemError::InvalidFormat(format!(
                "engine options block is {} bytes, expected {}",
                block.len(),
                OPTS_BLOCK_SIZE
            )));
        }
        Ok(AlignerOptions { block })
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.block
    }

    fn get_i32(&self, offset: usize) -> i32 {
        i32::from_ne_bytes(self.block[offset..offset + 4].try_into().unwrap())
    }

    fn put_i32(&mut self, offset: usize, value: i32) {
        self.block[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn get_i64(&self, offset: usize) -> i64 {
        i64::from_ne_bytes(self.block[offset..offset + 8].try_into().unwrap())
    }

    fn put_i64(&mut self, offset: usize, value: i64) {
        self.block[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
    }

    fn get_f32(&self, offset: usize) -> f32 {
        f32::from_ne_bytes(self.block[offset..offset + 4].try_into().unwrap())
    }

    fn put_f32(&mut self, offset: usize, value: f32) {
        self.block[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    // Scoring parameters

    pub fn match_score(&self) -> i32 {
        self.get_i32(0)
    }
    pub fn set_match_score(&mut self, a: i32) {
        self.put_i32(0, a);
    }
    pub fn mismatch_penalty(&self) -> i32 {
        self.get_i32(4)
    }
    pub fn set_mismatch_penalty(&mut self, b: i32) {
        self.put_i32(4, b);
    }
    pub fn gap_open_del(&self) -> i32 {
        self.get_i32(8)
    }
    pub fn set_gap_open_del(&mut self, o_del: i32) {
        self.put_i32(8, o_del);
    }
    pub fn gap_extend_del(&self) -> i32 {
        self.get_i32(12)
    }
    pub fn set_gap_extend_del(&mut self, e_del: i32) {
        self.put_i32(12, e_del);
    }
    pub fn gap_open_ins(&self) -> i32 {
        self.get_i32(16)
    }
    pub fn set_gap_open_ins(&mut self, o_ins: i32) {
        self.put_i32(16, o_ins);
    }
    pub fn gap_extend_ins(&self) -> i32 {
        self.get_i32(20)
    }
    pub fn set_gap_extend_ins(&mut self, e_ins: i32) {
        self.put_i32(20, e_ins);
    }
    pub fn unpaired_penalty(&self) -> i32 {
        self.get_i32(24)
    }
    pub fn set_unpaired_penalty(&mut self, pen_unpaired: i32) {
        self.put_i32(24, pen_unpaired);
    }
    pub fn clip5_penalty(&self) -> i32 {
        self.get_i32(28)
    }
    pub fn set_clip5_penalty(&mut self, pen_clip5: i32) {
        self.put_i32(28, pen_clip5);
    }
    pub fn clip3_penalty(&self) -> i32 {
        self.get_i32(32)
    }
    pub fn set_clip3_penalty(&mut self, pen_clip3: i32) {
        self.put_i32(32, pen_clip3);
    }

    // Alignment parameters

    pub fn bandwidth(&self) -> i32 {
        self.get_i32(36)
    }
    pub fn set_bandwidth(&mut self, w: i32) {
        self.put_i32(36, w);
    }
    pub fn z_drop(&self) -> i32 {
        self.get_i32(40)
    }
    pub fn set_z_drop(&mut self, zdrop: i32) {
        self.put_i32(40, zdrop);
    }
    pub fn max_mem_interval(&self) -> i64 {
        self.get_i64(48)
    }
    pub fn set_max_mem_interval(&mut self, max_mem_intv: i64) {
        self.put_i64(48, max_mem_intv);
    }
    pub fn output_score_threshold(&self) -> i32 {
        self.get_i32(56)
    }
    pub fn set_output_score_threshold(&mut self, t: i32) {
        self.put_i32(56, t);
    }

    pub fn flags(&self) -> i32 {
        self.get_i32(60)
    }
    pub fn set_flags(&mut self, flags: i32) {
        self.put_i32(60, flags);
    }

    /// Turns on paired-end mode without disturbing the other flag bits.
    pub fn align_pairs(&mut self) {
        self.set_flags(self.flags() | MEM_F_PE);
    }

    // Seeding parameters

    pub fn min_seed_len(&self) -> i32 {
        self.get_i32(64)
    }
    pub fn set_min_seed_len(&mut self, min_seed_len: i32) {
        self.put_i32(64, min_seed_len);
    }
    pub fn min_chain_weight(&self) -> i32 {
        self.get_i32(68)
    }
    pub fn set_min_chain_weight(&mut self, min_chain_weight: i32) {
        self.put_i32(68, min_chain_weight);
    }
    pub fn max_chain_extend(&self) -> i32 {
        self.get_i32(72)
    }
    pub fn set_max_chain_extend(&mut self, max_chain_extend: i32) {
        self.put_i32(72, max_chain_extend);
    }
    pub fn split_factor(&self) -> f32 {
        self.get_f32(76)
    }
    pub fn set_split_factor(&mut self, split_factor: f32) {
        self.put_f32(76, split_factor);
    }
    pub fn split_width(&self) -> i32 {
        self.get_i32(80)
    }
    pub fn set_split_width(&mut self, split_width: i32) {
        self.put_i32(80, split_width);
    }
    pub fn max_seed_occurrences(&self) -> i32 {
        self.get_i32(84)
    }
    pub fn set_max_seed_occurrences(&mut self, max_occ: i32) {
        self.put_i32(84, max_occ);
    }
    pub fn max_chain_gap(&self) -> i32 {
        self.get_i32(88)
    }
    pub fn set_max_chain_gap(&mut self, max_chain_gap: i32) {
        self.put_i32(88, max_chain_gap);
    }

    // Processing parameters

    pub fn thread_count(&self) -> i32 {
        self.get_i32(92)
    }
    pub fn set_thread_count(&mut self, n_threads: i32) {
        self.put_i32(92, n_threads);
    }
    pub fn chunk_size(&self) -> i32 {
        self.get_i32(96)
    }
    pub fn set_chunk_size(&mut self, chunk_size: i32) {
        self.put_i32(96, chunk_size);
    }

    // Filtering parameters

    pub fn mask_level(&self) -> f32 {
        self.get_f32(100)
    }
    pub fn set_mask_level(&mut self, mask_level: f32) {
        self.put_f32(100, mask_level);
    }
    pub fn drop_ratio(&self) -> f32 {
        self.get_f32(104)
    }
    pub fn set_drop_ratio(&mut self, drop_ratio: f32) {
        self.put_f32(104, drop_ratio);
    }
    pub fn xa_drop_ratio(&self) -> f32 {
        self.get_f32(108)
    }
    pub fn set_xa_drop_ratio(&mut self, xa_drop_ratio: f32) {
        self.put_f32(108, xa_drop_ratio);
    }
    pub fn mask_level_redundancy(&self) -> f32 {
        self.get_f32(112)
    }
    pub fn set_mask_level_redundancy(&mut self, mask_level_redun: f32) {
        self.put_f32(112, mask_level_redun);
    }

    // Mapping quality parameters

    pub fn mapq_coef_len(&self) -> f32 {
        self.get_f32(116)
    }
    pub fn set_mapq_coef_len(&mut self, mapq_coef_len: f32) {
        self.put_f32(116, mapq_coef_len);
    }
    pub fn mapq_coef_fac(&self) -> i32 {
        self.get_i32(120)
    }
    pub fn set_mapq_coef_fac(&mut self, mapq_coef_fac: i32) {
        self.put_i32(120, mapq_coef_fac);
    }

    // Paired-end parameters

    pub fn max_insert(&self) -> i32 {
        self.get_i32(124)
    }
    pub fn set_max_insert(&mut self, max_ins: i32) {
        self.put_i32(124, max_ins);
    }
    pub fn max_mate_rescue(&self) -> i32 {
        self.get_i32(128)
    }
    pub fn set_max_mate_rescue(&mut self, max_matesw: i32) {
        self.put_i32(128, max_matesw);
    }

    // Output parameters

    pub fn max_xa_hits(&self) -> i32 {
        self.get_i32(132)
    }
    pub fn set_max_xa_hits(&mut self, max_xa_hits: i32) {
        self.put_i32(132, max_xa_hits);
    }
    pub fn max_xa_hits_alt(&self) -> i32 {
        self.get_i32(136)
    }
    pub fn set_max_xa_hits_alt(&mut self, max_xa_hits_alt: i32) {
        self.put_i32(136, max_xa_hits_alt);
    }

    /// The 5x5 scoring matrix (A, C, G, T, N on both axes).
    pub fn scoring_matrix(&self) -> [i8; SCORING_MATRIX_LEN] {
        let mut mat = [0i8; SCORING_MATRIX_LEN];
        for (dst, src) in mat
            .iter_mut()
            .zip(&self.block[SCORING_MATRIX_OFFSET..SCORING_MATRIX_OFFSET + SCORING_MATRIX_LEN])
        {
            *dst = *src as i8;
        }
        mat
    }

    pub fn set_scoring_matrix(&mut self, mat: &[i8; SCORING_MATRIX_LEN]) {
        for (dst, src) in self.block[SCORING_MATRIX_OFFSET..SCORING_MATRIX_OFFSET + SCORING_MATRIX_LEN]
            .iter_mut()
            .zip(mat)
        {
            *dst = *src as u8;
        }
    }

    /// Biases penalties toward non-split, intra-contig alignments: heavier
    /// gap-open and mismatch costs with mild clipping.
    pub fn set_intra_contig_options(&mut self) {
        self.set_gap_open_del(16);
        self.set_gap_open_ins(16);
        self.set_mismatch_penalty(9);
        self.set_clip5_penalty(5);
        self.set_clip3_penalty(5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed() -> AlignerOptions {
        AlignerOptions::from_raw_block(vec![0u8; OPTS_BLOCK_SIZE]).unwrap()
    }

    #[test]
    fn rejects_wrong_block_size() {
        assert!(AlignerOptions::from_raw_block(vec![0u8; OPTS_BLOCK_SIZE - 1]).is_err());
        assert!(AlignerOptions::from_raw_block(vec![0u8; OPTS_BLOCK_SIZE + 8]).is_err());
    }

    #[test]
    fn int_accessors_land_on_their_offsets() {
        let mut opts = zeroed();
        opts.set_match_score(1);
        opts.set_mismatch_penalty(4);
        opts.set_gap_open_del(6);
        opts.set_gap_extend_del(1);
        opts.set_gap_open_ins(7);
        opts.set_gap_extend_ins(2);
        opts.set_unpaired_penalty(17);
        opts.set_clip5_penalty(5);
        opts.set_clip3_penalty(3);
        opts.set_bandwidth(100);
        opts.set_z_drop(100);
        opts.set_max_mem_interval(20);
        opts.set_output_score_threshold(30);
        opts.set_min_seed_len(19);
        opts.set_min_chain_weight(0);
        opts.set_max_chain_extend(1 << 30);
        opts.set_split_width(10);
        opts.set_max_seed_occurrences(500);
        opts.set_max_chain_gap(10000);
        opts.set_thread_count(4);
        opts.set_chunk_size(10_000_000);
        opts.set_mapq_coef_fac(3);
        opts.set_max_insert(10000);
        opts.set_max_mate_rescue(50);
        opts.set_max_xa_hits(5);
        opts.set_max_xa_hits_alt(200);

        let block = opts.as_bytes();
        let at = |off: usize| i32::from_ne_bytes(block[off..off + 4].try_into().unwrap());
        assert_eq!(at(0), 1);
        assert_eq!(at(4), 4);
        assert_eq!(at(8), 6);
        assert_eq!(at(12), 1);
        assert_eq!(at(16), 7);
        assert_eq!(at(20), 2);
        assert_eq!(at(24), 17);
        assert_eq!(at(28), 5);
        assert_eq!(at(32), 3);
        assert_eq!(at(36), 100);
        assert_eq!(at(40), 100);
        assert_eq!(
            i64::from_ne_bytes(block[48..56].try_into().unwrap()),
            20
        );
        assert_eq!(at(56), 30);
        assert_eq!(at(64), 19);
        assert_eq!(at(68), 0);
        assert_eq!(at(72), 1 << 30);
        assert_eq!(at(80), 10);
        assert_eq!(at(84), 500);
        assert_eq!(at(88), 10000);
        assert_eq!(at(92), 4);
        assert_eq!(at(96), 10_000_000);
        assert_eq!(at(120), 3);
        assert_eq!(at(124), 10000);
        assert_eq!(at(128), 50);
        assert_eq!(at(132), 5);
        assert_eq!(at(136), 200);
    }

    #[test]
    fn float_accessors_land_on_their_offsets() {
        let mut opts = zeroed();
        opts.set_split_factor(1.5);
        opts.set_mask_level(0.5);
        opts.set_drop_ratio(0.5);
        opts.set_xa_drop_ratio(0.8);
        opts.set_mask_level_redundancy(0.95);
        opts.set_mapq_coef_len(50.0);

        let block = opts.as_bytes();
        let at = |off: usize| f32::from_ne_bytes(block[off..off + 4].try_into().unwrap());
        assert_eq!(at(76), 1.5);
        assert_eq!(at(100), 0.5);
        assert_eq!(at(104), 0.5);
        assert_eq!(at(108), 0.8);
        assert_eq!(at(112), 0.95);
        assert_eq!(at(116), 50.0);

        assert_eq!(opts.split_factor(), 1.5);
        assert_eq!(opts.mapq_coef_len(), 50.0);
    }

    #[test]
    fn setters_do_not_clobber_neighbors() {
        let mut opts = zeroed();
        opts.set_match_score(i32::MAX);
        opts.set_mismatch_penalty(i32::MIN);
        opts.set_gap_open_del(-1);
        assert_eq!(opts.match_score(), i32::MAX);
        assert_eq!(opts.mismatch_penalty(), i32::MIN);
        assert_eq!(opts.gap_open_del(), -1);
        assert_eq!(opts.gap_extend_del(), 0);
    }

    #[test]
    fn align_pairs_preserves_other_flag_bits() {
        let mut opts = zeroed();
        opts.set_flags(MEM_F_ALL | MEM_F_SOFTCLIP);
        opts.align_pairs();
        assert_eq!(opts.flags(), MEM_F_ALL | MEM_F_SOFTCLIP | MEM_F_PE);
        // A second call is a no-op.
        opts.align_pairs();
        assert_eq!(opts.flags(), MEM_F_ALL | MEM_F_SOFTCLIP | MEM_F_PE);
    }

    #[test]
    fn scoring_matrix_round_trip() {
        let mut opts = zeroed();
        let mut mat = [0i8; 25];
        for i in 0..4 {
            for j in 0..4 {
                mat[i * 5 + j] = if i == j { 1 } else { -4 };
            }
            mat[i * 5 + 4] = -1;
            mat[4 * 5 + i] = -1;
        }
        mat[24] = -1;
        opts.set_scoring_matrix(&mat);
        assert_eq!(opts.scoring_matrix(), mat);
        assert_eq!(opts.as_bytes()[140], 1);
        assert_eq!(opts.as_bytes()[141] as i8, -4);
        assert_eq!(opts.as_bytes()[164] as i8, -1);
    }

    #[test]
    fn set_intra_contig_options_touches_five_fields() {
        let mut opts = zeroed();
        opts.set_intra_contig_options();
        assert_eq!(opts.gap_open_del(), 16);
        assert_eq!(opts.gap_open_ins(), 16);
        assert_eq!(opts.mismatch_penalty(), 9);
        assert_eq!(opts.clip5_penalty(), 5);
        assert_eq!(opts.clip3_penalty(), 5);
        assert_eq!(opts.gap_extend_del(), 0);
        assert_eq!(opts.bandwidth(), 0);
    }
}
