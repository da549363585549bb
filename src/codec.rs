// Wire codecs for the aligner boundary.
//
// Two formats live here, both in host (native) byte order:
//
// Sequence batch (managed -> engine):
//   [count:u32][ for each sequence: base bytes..., 0x00 ]
//
// Alignment results (engine -> managed), one group per input sequence:
//   [n_alignments:i32]
//   per alignment: a packed word `flags << 16 | mapq`, then -- only when the
//   unmapped bit is clear -- refId, refStart, NM, AS, XS, nCigar, the packed
//   cigar words (`len << 4 | op`), and two length-prefixed tags whose storage
//   is rounded up to a 4-byte boundary. When the flags say "paired" and the
//   mate is mapped, three more words follow: mate refId, mate start, tlen.
//
// Decoding goes through a bounds-checked cursor so a truncated or corrupt
// buffer surfaces as a typed error rather than a slice panic.

use crate::error::{BwaMemError, Result};

// SAM flag bits as reported in the high half of the packed flag/mapq word.
pub const SAM_FLAG_PAIRED: u16 = 0x1;
pub const SAM_FLAG_PROPER_PAIR: u16 = 0x2;
pub const SAM_FLAG_UNMAPPED: u16 = 0x4;
pub const SAM_FLAG_MATE_UNMAPPED: u16 = 0x8;
pub const SAM_FLAG_REVERSE_STRAND: u16 = 0x10;
pub const SAM_FLAG_MATE_REVERSE_STRAND: u16 = 0x20;
pub const SAM_FLAG_FIRST_IN_PAIR: u16 = 0x40;
pub const SAM_FLAG_SECOND_IN_PAIR: u16 = 0x80;
pub const SAM_FLAG_SECONDARY: u16 = 0x100;
pub const SAM_FLAG_SUPPLEMENTARY: u16 = 0x800;

/// One CIGAR operation as reported by the engine.
///
/// The engine only ever reports these four; N/H/P codes never appear in a
/// result buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    Match,
    Insertion,
    Deletion,
    SoftClip,
}

impl CigarOp {
    /// Maps a BAM-style opcode from a packed cigar word. Codes other than
    /// M/I/D/S are not produced by the engine and decode as an error.
    fn from_code(code: u32) -> Option<CigarOp> {
        match code {
            0 => Some(CigarOp::Match),
            1 => Some(CigarOp::Insertion),
            2 => Some(CigarOp::Deletion),
            4 => Some(CigarOp::SoftClip),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            CigarOp::Match => 'M',
            CigarOp::Insertion => 'I',
            CigarOp::Deletion => 'D',
            CigarOp::SoftClip => 'S',
        }
    }

    pub fn consumes_reference(self) -> bool {
        matches!(self, CigarOp::Match | CigarOp::Deletion)
    }

    pub fn consumes_query(self) -> bool {
        matches!(self, CigarOp::Match | CigarOp::Insertion | CigarOp::SoftClip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarElement {
    pub len: u32,
    pub op: CigarOp,
}

/// One reported alignment for one input sequence.
///
/// Reference ids index the contig-name list of the index the alignment was
/// produced against; they won't necessarily agree with ids in a SAM/BAM
/// header. Coordinate fields are 0-based, end-exclusive, and are all -1
/// together when the record is unmapped.
#[derive(Debug, Clone)]
pub struct AlignmentRecord {
    pub sam_flags: u16,
    pub map_qual: u8,
    pub ref_id: i32,
    pub ref_start: i32,
    pub ref_end: i32,
    pub seq_start: i32,
    pub seq_end: i32,
    pub n_mismatches: i32,
    pub aligner_score: i32,
    pub suboptimal_score: i32,
    pub cigar: Vec<CigarElement>,
    /// MD mismatch-descriptor tag, when the engine reported one.
    pub md_tag: Option<String>,
    /// XA alternate-alignment tag, when the engine reported one.
    pub xa_tag: Option<String>,
    pub mate_ref_id: i32,
    pub mate_ref_start: i32,
    /// Inferred template length; 0 when unpaired or the mate is unmapped.
    pub template_len: i32,
}

impl AlignmentRecord {
    pub fn is_unmapped(&self) -> bool {
        self.sam_flags & SAM_FLAG_UNMAPPED != 0
    }

    pub fn is_paired(&self) -> bool {
        self.sam_flags & SAM_FLAG_PAIRED != 0
    }

    pub fn is_reverse_strand(&self) -> bool {
        self.sam_flags & SAM_FLAG_REVERSE_STRAND != 0
    }

    pub fn is_secondary(&self) -> bool {
        self.sam_flags & SAM_FLAG_SECONDARY != 0
    }

    /// The CIGAR in its usual text form, e.g. "30S40M". Empty when unmapped.
    pub fn cigar_string(&self) -> String {
        let mut out = String::with_capacity(self.cigar.len() * 4);
        for elem in &self.cigar {
            out.push_str(&elem.len.to_string());
            out.push(elem.op.as_char());
        }
        out
    }

    fn unmapped_defaults(sam_flags: u16, map_qual: u8) -> AlignmentRecord {
        AlignmentRecord {
            sam_flags,
            map_qual,
            ref_id: -1,
            ref_start: -1,
            ref_end: -1,
            seq_start: -1,
            seq_end: -1,
            n_mismatches: 0,
            aligner_score: 0,
            suboptimal_score: 0,
            cigar: Vec::new(),
            md_tag: None,
            xa_tag: None,
            mate_ref_id: -1,
            mate_ref_start: -1,
            template_len: 0,
        }
    }
}

/// Bounds-checked reader over a result buffer.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(BwaMemError::Decode {
                offset: self.pos,
                what,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_i32(&mut self, what: &'static str) -> Result<i32> {
        let bytes = self.take(4, what)?;
        Ok(i32::from_ne_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn read_u32(&mut self, what: &'static str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_ne_bytes(bytes.try_into().unwrap()))
    }
}

/// Packs a batch of sequences into the engine's input format.
///
/// The total capacity is computed in one pass before allocating, so the
/// buffer is filled without ever resizing. Sequences are raw base bytes
/// ('A'/'C'/'G'/'T'); the engine reads each as a C string, so an interior
/// NUL is rejected here rather than silently truncating the batch.
pub fn encode_seq_batch<S: AsRef<[u8]>>(seqs: &[S]) -> Result<Vec<u8>> {
    let mut capacity = 4usize;
    for seq in seqs {
        capacity += seq.as_ref().len() + 1;
    }
    let mut buf = Vec::with_capacity(capacity);
    buf.extend_from_slice(&(seqs.len() as u32).to_ne_bytes());
    for seq in seqs {
        let seq = seq.as_ref();
        if seq.contains(&0) {
            return Err(BwaMemError::InvalidArgument(
                "sequence contains a NUL byte".to_string(),
            ));
        }
        buf.extend_from_slice(seq);
        buf.push(0);
    }
    debug_assert_eq!(buf.len(), capacity);
    Ok(buf)
}

/// Decodes an engine result buffer into one group of alignment records per
/// input sequence. `n_seqs` must be the count the batch was encoded with.
pub fn decode_alignments(buf: &[u8], n_seqs: usize) -> Result<Vec<Vec<AlignmentRecord>>> {
    let mut cur = Cursor::new(buf);
    let mut groups = Vec::with_capacity(n_seqs);
    for _ in 0..n_seqs {
        let n_aligns = cur.read_i32("alignment count")?;
        // Cap the pre-allocation by what the buffer could possibly hold
        // (every record is at least one word) so a corrupt count surfaces
        // as a decode error instead of an allocation failure.
        let cap = (n_aligns.max(0) as usize).min(cur.remaining() / 4);
        let mut records = Vec::with_capacity(cap);
        for _ in 0..n_aligns {
            records.push(decode_record(&mut cur)?);
        }
        groups.push(records);
    }
    Ok(groups)
}

fn decode_record(cur: &mut Cursor<'_>) -> Result<AlignmentRecord> {
    let flag_mapq = cur.read_u32("flag/mapq word")?;
    let flags = (flag_mapq >> 16) as u16;
    let map_qual = (flag_mapq & 0xff) as u8;

    let mut rec = AlignmentRecord::unmapped_defaults(flags, map_qual);

    if flags & SAM_FLAG_UNMAPPED == 0 {
        rec.ref_id = cur.read_i32("reference id")?;
        rec.ref_start = cur.read_i32("reference start")?;
        rec.n_mismatches = cur.read_i32("mismatch count")?;
        rec.aligner_score = cur.read_i32("alignment score")?;
        rec.suboptimal_score = cur.read_i32("suboptimal score")?;
        let n_cigar = cur.read_i32("cigar op count")?;
        if n_cigar <= 0 {
            rec.seq_start = 0;
            rec.seq_end = 0;
            rec.ref_end = rec.ref_start;
        } else {
            let mut ref_len = 0i32;
            let mut seq_len = 0i32;
            for idx in 0..n_cigar {
                let len_op = cur.read_u32("cigar op")?;
                let len = (len_op >> 4) as i32;
                let op = CigarOp::from_code(len_op & 0xf).ok_or(BwaMemError::Decode {
                    offset: cur.position() - 4,
                    what: "unrecognized cigar opcode",
                })?;
                if idx == 0 {
                    rec.seq_start = if op == CigarOp::SoftClip { len } else { 0 };
                }
                if op.consumes_reference() {
                    ref_len += len;
                }
                // Soft clips are counted via seq_start, not the matched span.
                if op == CigarOp::Match || op == CigarOp::Insertion {
                    seq_len += len;
                }
                rec.cigar.push(CigarElement {
                    len: len as u32,
                    op,
                });
            }
            rec.ref_end = rec.ref_start + ref_len;
            rec.seq_end = rec.seq_start + seq_len;
        }
        rec.md_tag = read_tag(cur)?;
        rec.xa_tag = read_tag(cur)?;
    }

    // Mate fields are present whenever the record is paired with a mapped
    // mate, even if the record itself is unmapped.
    if flags & SAM_FLAG_PAIRED != 0 && flags & SAM_FLAG_MATE_UNMAPPED == 0 {
        rec.mate_ref_id = cur.read_i32("mate reference id")?;
        rec.mate_ref_start = cur.read_i32("mate reference start")?;
        rec.template_len = cur.read_i32("template length")?;
    }

    Ok(rec)
}

// Tags are length-prefixed, with storage rounded up to the next multiple of
// four; only the first `len` bytes are meaningful. A zero length means the
// tag is absent.
fn read_tag(cur: &mut Cursor<'_>) -> Result<Option<String>> {
    let len = cur.read_i32("tag length")?;
    if len < 0 {
        return Err(BwaMemError::Decode {
            offset: cur.position() - 4,
            what: "negative tag length",
        });
    }
    if len == 0 {
        return Ok(None);
    }
    let padded = (len as usize + 3) & !3;
    let bytes = cur.take(padded, "tag bytes")?;
    Ok(Some(
        String::from_utf8_lossy(&bytes[..len as usize]).into_owned(),
    ))
}
