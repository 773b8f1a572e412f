//! STR read merging into biallelic-filtered consensus blocks. (spec §4.5)

use std::collections::HashMap;

use crate::align::{align_flank, FlankSide};
use crate::error::StrResult;
use crate::kmer;

#[derive(Clone, Copy, Debug, Default)]
pub struct MergeConfig {
    pub k: usize,
    pub min_threshold: u32,
    pub max_threshold: u32,
}

/// Acceptance gate (spec §4.5.2): a read's flank alignment must clear both
/// of these on both flanks before it is folded into a block's consensus.
const ACCEPT_MIN_IDENTITY: f64 = 0.90;
const ACCEPT_MAX_GAPS: usize = 2;

/// The key a read buckets under: its motif plus the first `k` bases of
/// each flank, forward-oriented (spec §4.5.1). Reads whose forward key
/// misses fall back to trying the reverse-complement orientation before
/// opening a new block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlankKey {
    motif: String,
    lflank_k: Vec<u8>,
    rflank_k: Vec<u8>,
}

impl FlankKey {
    fn forward(motif: &str, seq: &[u8], zstart: usize, end: usize, k: usize) -> Option<Self> {
        if zstart < k || end + k > seq.len() {
            return None;
        }
        Some(Self {
            motif: motif.to_string(),
            lflank_k: seq[zstart - k..zstart].to_vec(),
            rflank_k: seq[end..end + k].to_vec(),
        })
    }

    fn reverse(motif: &str, seq: &[u8], zstart: usize, end: usize, k: usize) -> Option<Self> {
        let fwd = Self::forward(motif, seq, zstart, end, k)?;
        let rc_motif = revcomp_str(motif);
        let rc_l = revcomp_bytes(&fwd.rflank_k);
        let rc_r = revcomp_bytes(&fwd.lflank_k);
        Some(Self {
            motif: rc_motif,
            lflank_k: rc_l,
            rflank_k: rc_r,
        })
    }
}

fn revcomp_bytes(s: &[u8]) -> Vec<u8> {
    s.iter()
        .rev()
        .map(|&b| match b {
            b'A' | b'a' => b'T',
            b'C' | b'c' => b'G',
            b'G' | b'g' => b'C',
            b'T' | b't' => b'A',
            other => other,
        })
        .collect()
}

fn revcomp_str(s: &str) -> String {
    String::from_utf8(revcomp_bytes(s.as_bytes())).unwrap_or_default()
}

/// A single candidate read entering the merge: name, full sequence and
/// quality, motif interval, and copy number for one orientation.
pub struct Candidate<'a> {
    pub seq: &'a [u8],
    pub qual: &'a [u8],
    pub motif: &'a str,
    pub zstart: usize,
    pub end: usize,
    pub copies: u32,
}

/// An accumulating consensus block: one per distinct (motif, flank) locus,
/// tracking up to three distinct copy-number alleles (spec §4.5.3).
pub struct Block {
    pub motif: String,
    pub lflank_consensus: Vec<u8>,
    pub lflank_quals: Vec<u8>,
    pub rflank_consensus: Vec<u8>,
    pub rflank_quals: Vec<u8>,
    pub copy_support: HashMap<u32, u32>,
    pub total_reads: u32,
}

impl Block {
    fn new(motif: String, lflank: Vec<u8>, lqual: Vec<u8>, rflank: Vec<u8>, rqual: Vec<u8>, copies: u32) -> Self {
        let mut copy_support = HashMap::new();
        copy_support.insert(copies, 1);
        Self {
            motif,
            lflank_consensus: lflank,
            lflank_quals: lqual,
            rflank_consensus: rflank,
            rflank_quals: rqual,
            copy_support,
            total_reads: 1,
        }
    }

    /// Folds one more supporting read into the block: realigns each flank
    /// against the running consensus and records the copy-number vote.
    /// Once three distinct copy numbers are present, a fourth is dropped
    /// (spec §4.5.3: "at most 3 distinct alleles tracked per block").
    ///
    /// Acceptance (spec §4.5.2): identity >= 90% and gaps <= 2 on *both*
    /// flanks. A read failing either flank's gate is rejected outright — it
    /// returns `false` and leaves the block untouched, rather than folding a
    /// divergent alignment into the consensus.
    fn update(&mut self, lflank: &[u8], lqual: &[u8], rflank: &[u8], rqual: &[u8], copies: u32) -> bool {
        let l = align_flank(&self.lflank_consensus, &self.lflank_quals, lflank, lqual, FlankSide::Left);
        let r = align_flank(&self.rflank_consensus, &self.rflank_quals, rflank, rqual, FlankSide::Right);

        let accepted = l.identity >= ACCEPT_MIN_IDENTITY
            && l.gaps <= ACCEPT_MAX_GAPS
            && r.identity >= ACCEPT_MIN_IDENTITY
            && r.gaps <= ACCEPT_MAX_GAPS;
        if !accepted {
            return false;
        }

        self.lflank_consensus = l.consensus_bases;
        self.lflank_quals = l.consensus_quals;
        self.rflank_consensus = r.consensus_bases;
        self.rflank_quals = r.consensus_quals;

        self.total_reads += 1;
        if self.copy_support.contains_key(&copies) || self.copy_support.len() < 3 {
            *self.copy_support.entry(copies).or_insert(0) += 1;
        }
        true
    }

    /// Biallelic filter (spec §4.5.4): exactly two distinct copy numbers,
    /// each with support in `[min_threshold, max_threshold]`.
    fn biallelic_alleles(&self, cfg: &MergeConfig) -> Option<(u32, u32, u32, u32)> {
        let mut alleles: Vec<(&u32, &u32)> = self
            .copy_support
            .iter()
            .filter(|(_, &support)| support >= cfg.min_threshold && support <= cfg.max_threshold)
            .collect();
        if alleles.len() != 2 {
            return None;
        }
        alleles.sort_by_key(|(copies, _)| **copies);
        let (c1, s1) = alleles[0];
        let (c2, s2) = alleles[1];
        Some((*c1, *s1, *c2, *s2))
    }
}

pub struct MergedLocus {
    pub motif: String,
    pub allele_low_copies: u32,
    pub allele_low_support: u32,
    pub allele_high_copies: u32,
    pub allele_high_support: u32,
    pub lflank: Vec<u8>,
    pub rflank: Vec<u8>,
}

/// Buckets every candidate read by flank key, building consensus blocks as
/// it goes (spec §4.5.1/§4.5.3). A read whose forward key misses an
/// existing block is retried under its reverse-complement orientation
/// before a new block is opened, so a read sequenced from either strand
/// lands in the same locus.
pub fn merge_reads(candidates: &[Candidate<'_>], cfg: &MergeConfig) -> StrResult<Vec<Block>> {
    kmer::validate_k(cfg.k)?;
    let mut blocks: Vec<Block> = Vec::new();
    let mut index: HashMap<FlankKey, usize> = HashMap::new();

    for c in candidates {
        let fwd_key = FlankKey::forward(c.motif, c.seq, c.zstart, c.end, cfg.k);
        let rev_key = FlankKey::reverse(c.motif, c.seq, c.zstart, c.end, cfg.k);

        let existing = fwd_key
            .as_ref()
            .and_then(|k| index.get(k).copied())
            .or_else(|| rev_key.as_ref().and_then(|k| index.get(k).copied()));

        let lflank = &c.seq[..c.zstart];
        let lqual = &c.qual[..c.zstart];
        let rflank = &c.seq[c.end..];
        let rqual = &c.qual[c.end..];

        match existing {
            Some(idx) => {
                if !blocks[idx].update(lflank, lqual, rflank, rqual, c.copies) {
                    eprintln!(
                        "warning: read rejected from locus {:?} (flank identity/gaps below acceptance gate)",
                        c.motif
                    );
                }
            }
            None => {
                let idx = blocks.len();
                blocks.push(Block::new(
                    c.motif.to_string(),
                    lflank.to_vec(),
                    lqual.to_vec(),
                    rflank.to_vec(),
                    rqual.to_vec(),
                    c.copies,
                ));
                if let Some(k) = fwd_key {
                    index.insert(k, idx);
                }
            }
        }
    }

    Ok(blocks)
}

/// Filters merged blocks down to the biallelic loci (spec §4.5.4): exactly
/// two distinct copy-number alleles, each within the support thresholds.
pub fn biallelic_loci(blocks: &[Block], cfg: &MergeConfig) -> Vec<MergedLocus> {
    blocks
        .iter()
        .filter_map(|b| {
            let (c1, s1, c2, s2) = b.biallelic_alleles(cfg)?;
            Some(MergedLocus {
                motif: b.motif.clone(),
                allele_low_copies: c1,
                allele_low_support: s1,
                allele_high_copies: c2,
                allele_high_support: s2,
                lflank: b.lflank_consensus.clone(),
                rflank: b.rflank_consensus.clone(),
            })
        })
        .collect()
}

pub fn format_locus(locus: &MergedLocus) -> String {
    format!(
        "{}\t{}:{}\t{}:{}\t{}\t{}\n",
        locus.motif,
        locus.allele_low_copies,
        locus.allele_low_support,
        locus.allele_high_copies,
        locus.allele_high_support,
        String::from_utf8_lossy(&locus.lflank),
        String::from_utf8_lossy(&locus.rflank),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_locus_two_alleles_pass_biallelic_filter() {
        let cfg = MergeConfig { k: 4, min_threshold: 2, max_threshold: 100 };
        let seq = b"GGGGCAGCAGCAGTTTT";
        let qual = vec![b'I'; seq.len()];
        let zstart = 4;
        let end = 13; // "CAGCAGCAG"

        let mut candidates = Vec::new();
        for _ in 0..3 {
            candidates.push(Candidate { seq, qual: &qual, motif: "CAG", zstart, end, copies: 3 });
        }
        for _ in 0..2 {
            candidates.push(Candidate { seq, qual: &qual, motif: "CAG", zstart, end, copies: 4 });
        }

        let blocks = merge_reads(&candidates, &cfg).unwrap();
        assert_eq!(blocks.len(), 1);
        let loci = biallelic_loci(&blocks, &cfg);
        assert_eq!(loci.len(), 1);
        assert_eq!(loci[0].allele_low_copies, 3);
        assert_eq!(loci[0].allele_low_support, 3);
        assert_eq!(loci[0].allele_high_copies, 4);
        assert_eq!(loci[0].allele_high_support, 2);
    }

    #[test]
    fn monoallelic_locus_is_filtered_out() {
        let cfg = MergeConfig { k: 4, min_threshold: 2, max_threshold: 100 };
        let seq = b"GGGGCAGCAGCAGTTTT";
        let qual = vec![b'I'; seq.len()];
        let candidates: Vec<_> = (0..5)
            .map(|_| Candidate { seq, qual: &qual, motif: "CAG", zstart: 4, end: 13, copies: 3 })
            .collect();
        let blocks = merge_reads(&candidates, &cfg).unwrap();
        let loci = biallelic_loci(&blocks, &cfg);
        assert!(loci.is_empty());
    }

    #[test]
    fn fourth_distinct_copy_number_is_dropped() {
        let cfg = MergeConfig { k: 4, min_threshold: 1, max_threshold: 100 };
        let seq = b"GGGGCAGCAGCAGTTTT";
        let qual = vec![b'I'; seq.len()];
        let mut candidates = Vec::new();
        for copies in [2u32, 3, 4, 5] {
            candidates.push(Candidate { seq, qual: &qual, motif: "CAG", zstart: 4, end: 13, copies });
        }
        let blocks = merge_reads(&candidates, &cfg).unwrap();
        assert_eq!(blocks[0].copy_support.len(), 3);
        assert!(!blocks[0].copy_support.contains_key(&5));
    }

    #[test]
    fn reverse_complement_orientation_joins_same_block() {
        let cfg = MergeConfig { k: 4, min_threshold: 1, max_threshold: 100 };
        let fwd_seq = b"GGGGCAGCAGCAGTTTT".to_vec();
        let fwd_qual = vec![b'I'; fwd_seq.len()];
        let rc_seq = revcomp_bytes(&fwd_seq);
        let rc_qual = fwd_qual.clone();
        let rc_motif = revcomp_str("CAG");
        // On the rc strand, the interval [fzstart=4,fend=13) flips to the
        // mirrored coordinates in the rc sequence.
        let rc_zstart = fwd_seq.len() - 13;
        let rc_end = fwd_seq.len() - 4;

        let candidates = vec![
            Candidate { seq: &fwd_seq, qual: &fwd_qual, motif: "CAG", zstart: 4, end: 13, copies: 3 },
            Candidate { seq: &rc_seq, qual: &rc_qual, motif: &rc_motif, zstart: rc_zstart, end: rc_end, copies: 4 },
        ];
        let blocks = merge_reads(&candidates, &cfg).unwrap();
        assert_eq!(blocks.len(), 1);
    }
}
