//! De Bruijn-style flank extension pipeline. (spec §4.4)

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use rayon::prelude::*;

use crate::error::StrResult;
use crate::fastq::FastqReader;
use crate::kmer::{self, canonical};
use crate::sparse_table::SparseKmerTable;
use crate::str_read::ExtendReadName;

pub const DEFAULT_FLANK_CHUNK: usize = 1024;
pub const DEFAULT_MIN_THRESHOLD: u8 = 2;
pub const DEFAULT_MAX_THRESHOLD: u8 = 255;
const IDENTITY_THRESHOLD: f64 = 0.95;

#[derive(Clone, Copy, Debug)]
pub struct ExtendConfig {
    pub genome_size: f64,
    pub ploidy: u32,
    pub heterozygosity: f64,
    pub coverage: f64,
    pub error_rate: f64,
    pub k: usize,
    pub min_threshold: u8,
    pub max_threshold: u8,
    pub flank_chunk: usize,
    pub debug: bool,
}

/// Expected unique k-mer count (spec §4.4.1):
/// n ≈ G·(1 + H·(P−1)·k)·(1 + C·(1 − (1−E)^k))
pub fn expected_unique_kmers(cfg: &ExtendConfig) -> f64 {
    let het_term = 1.0 + cfg.heterozygosity * (cfg.ploidy as f64 - 1.0) * cfg.k as f64;
    let err_term = 1.0 + cfg.coverage * (1.0 - (1.0 - cfg.error_rate).powi(cfg.k as i32));
    cfg.genome_size * het_term * err_term
}

/// Runs the two-pass Bloom-gated counting over the bulk FASTQ files and
/// returns the threshold-filtered sparse table (spec §4.4.1).
pub fn build_counts<P: AsRef<Path> + Sync>(
    cfg: &ExtendConfig,
    bulk_files: &[P],
) -> StrResult<SparseKmerTable> {
    kmer::validate_k(cfg.k)?;
    let n = expected_unique_kmers(cfg).max(1.0) as usize;
    let table = SparseKmerTable::with_capacity(cfg.genome_size.max(1.0) as usize);
    let mut bloom = crate::bloom::BloomFilter::with_fp_rate(n, 0.1, 0x9e3779b97f4a7c15);

    // Pass 1: singleton-filtered promotion into the table.
    for path in bulk_files {
        let mut reader = FastqReader::from_path(path, false)?;
        while let Some(rec) = reader.read_next()? {
            if rec.bases.len() < cfg.k {
                continue;
            }
            for (_, c) in kmer::canonical_kmers(&rec.bases, cfg.k)? {
                if table.contains(c) {
                    continue;
                }
                if bloom.contains(c) {
                    table.insert_if_absent(c);
                } else {
                    bloom.add(c);
                }
            }
        }
        if table.load_factor() > 0.8 {
            eprintln!(
                "warning: sparse k-mer table load factor {:.2} exceeds 0.8",
                table.load_factor()
            );
        }
    }

    // Pass 2: count promoted k-mers, saturating at 255.
    for path in bulk_files {
        let mut reader = FastqReader::from_path(path, false)?;
        while let Some(rec) = reader.read_next()? {
            if rec.bases.len() < cfg.k {
                continue;
            }
            for (_, c) in kmer::canonical_kmers(&rec.bases, cfg.k)? {
                table.increment_if_present(c);
            }
        }
    }

    table.retain_in_threshold(cfg.min_threshold, cfg.max_threshold);
    Ok(table)
}

/// Parallel variant of [`build_counts`]: shards the bulk file list across
/// the rayon pool. The sparse table is associative/commutative across
/// k-mers (spec §5), so sharding by file preserves the same final table —
/// but only if pass 1's promotion decisions are made against the same Bloom
/// state a sequential run would see. A k-mer appearing once in file A and
/// once in file B must still be promoted on its second sighting regardless
/// of which file that sighting falls in, so pass 1 shares one filter behind
/// a mutex instead of sharding it per file; pass 2 stays lock-free since
/// `SparseKmerTable` is already safe for concurrent increments.
pub fn build_counts_parallel<P: AsRef<Path> + Sync>(
    cfg: &ExtendConfig,
    bulk_files: &[P],
) -> StrResult<SparseKmerTable> {
    kmer::validate_k(cfg.k)?;
    let n = expected_unique_kmers(cfg).max(1.0) as usize;
    let table = SparseKmerTable::with_capacity(cfg.genome_size.max(1.0) as usize);
    let bloom = Mutex::new(crate::bloom::BloomFilter::with_fp_rate(n, 0.1, 0x9e3779b97f4a7c15));

    bulk_files.par_iter().try_for_each(|path| -> StrResult<()> {
        let mut reader = FastqReader::from_path(path, false)?;
        while let Some(rec) = reader.read_next()? {
            if rec.bases.len() < cfg.k {
                continue;
            }
            for (_, c) in kmer::canonical_kmers(&rec.bases, cfg.k)? {
                if table.contains(c) {
                    continue;
                }
                let mut bloom = bloom.lock().expect("bloom filter mutex poisoned");
                if bloom.contains(c) {
                    drop(bloom);
                    table.insert_if_absent(c);
                } else {
                    bloom.add(c);
                }
            }
        }
        Ok(())
    })?;

    bulk_files.par_iter().try_for_each(|path| -> StrResult<()> {
        let mut reader = FastqReader::from_path(path, false)?;
        while let Some(rec) = reader.read_next()? {
            if rec.bases.len() < cfg.k {
                continue;
            }
            for (_, c) in kmer::canonical_kmers(&rec.bases, cfg.k)? {
                table.increment_if_present(c);
            }
        }
        Ok(())
    })?;

    if table.load_factor() > 0.8 {
        eprintln!(
            "warning: sparse k-mer table load factor {:.2} exceeds 0.8",
            table.load_factor()
        );
    }
    table.retain_in_threshold(cfg.min_threshold, cfg.max_threshold);
    Ok(table)
}

#[inline]
fn complement_base(b: u8) -> u8 {
    match b {
        b'A' | b'a' => b'T',
        b'C' | b'c' => b'G',
        b'G' | b'g' => b'C',
        b'T' | b't' => b'A',
        other => other,
    }
}

/// The four length-k successors of oriented k-mer `w` (appending one base).
fn fw_kmers(w: u64, k: usize) -> [u64; 4] {
    let mask = if k >= 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
    let shifted = (w << 2) & mask;
    [shifted, shifted | 1, shifted | 2, shifted | 3]
}

/// The four length-k predecessors of oriented k-mer `w` (prepending one base).
fn rv_kmers(w: u64, k: usize) -> [u64; 4] {
    let shifted = w >> 2;
    let top = 2 * (k - 1);
    [
        shifted,
        shifted | (1u64 << top),
        shifted | (2u64 << top),
        shifted | (3u64 << top),
    ]
}

#[derive(Clone, Copy)]
struct Candidate {
    oriented: u64,
    from_fw: bool,
}

fn step_candidates(w: u64, k: usize) -> [Candidate; 8] {
    let rc_w = kmer::reverse_complement(w, k);
    let fw = fw_kmers(w, k);
    let rv = rv_kmers(rc_w, k);
    [
        Candidate { oriented: fw[0], from_fw: true },
        Candidate { oriented: fw[1], from_fw: true },
        Candidate { oriented: fw[2], from_fw: true },
        Candidate { oriented: fw[3], from_fw: true },
        Candidate { oriented: rv[0], from_fw: false },
        Candidate { oriented: rv[1], from_fw: false },
        Candidate { oriented: rv[2], from_fw: false },
        Candidate { oriented: rv[3], from_fw: false },
    ]
}

#[inline]
fn next_oriented(c: &Candidate, k: usize) -> u64 {
    if c.from_fw {
        c.oriented
    } else {
        kmer::reverse_complement(c.oriented, k)
    }
}

fn hits_at(w: u64, k: usize, table: &SparseKmerTable) -> Vec<Candidate> {
    step_candidates(w, k)
        .into_iter()
        .filter(|c| table.contains(canonical(c.oriented, k)))
        .collect()
}

/// Walks `steps` forced-unique steps from `start`, failing as soon as any
/// step is not exactly 1-hit. Used by the SNP rescue bubble check.
fn walk_unambiguous(start: u64, table: &SparseKmerTable, k: usize, steps: usize) -> Option<u64> {
    let mut cur = start;
    for _ in 0..steps {
        let hits = hits_at(cur, k, table);
        if hits.len() != 1 {
            return None;
        }
        cur = next_oriented(&hits[0], k);
    }
    Some(cur)
}

/// SNP rescue (spec §4.4.3): for exactly two hits, walk each branch up to
/// k+1 unambiguous steps; if both converge on the same oriented k-mer,
/// this is a substitution bubble. Per the original implementation's
/// `CheckForSNPForwards`/`CheckForSNPBackwards` (spec's Open Question (a)),
/// a confirmed bubble does NOT halt the walk — the caller continues through
/// the branch point on the last candidate examined. Only an unconfirmed
/// 2-way split halts the walk.
fn snp_rescue_confirms(hits: &[Candidate], table: &SparseKmerTable, k: usize) -> bool {
    if hits.len() != 2 {
        return false;
    }
    let b1 = walk_unambiguous(next_oriented(&hits[0], k), table, k, k + 1);
    let b2 = walk_unambiguous(next_oriented(&hits[1], k), table, k, k + 1);
    matches!((b1, b2), (Some(x), Some(y)) if x == y)
}

#[derive(Debug, PartialEq, Eq)]
pub enum HaltReason {
    DeadEnd,
    Ambiguous,
    Cycle,
    Cap,
}

struct WalkOutcome {
    bases: Vec<u8>,
    #[allow(dead_code)]
    halted_by: HaltReason,
}

/// Extends rightward from `start` (an oriented, trusted k-mer already in
/// the table) by one base per step, applying the unique-extension rule.
fn walk_right(start: u64, table: &SparseKmerTable, k: usize, flank_chunk: usize) -> WalkOutcome {
    let mut cur = start;
    let mut visited = HashSet::new();
    visited.insert(cur);
    let mut bases = Vec::new();
    let mut halted_by = HaltReason::Cap;

    for _ in 0..flank_chunk {
        let hits = hits_at(cur, k, table);
        let chosen = match hits.len() {
            0 => {
                halted_by = HaltReason::DeadEnd;
                break;
            }
            1 => &hits[0],
            2 => {
                if snp_rescue_confirms(&hits, table, k) {
                    // Confirmed substitution bubble: the walk does not halt here.
                    // Mirrors CheckForSNPForwards/Backwards in the original
                    // implementation, which continue through the branch point
                    // on the last candidate examined rather than stopping.
                    hits.last().unwrap()
                } else {
                    halted_by = HaltReason::Ambiguous;
                    break;
                }
            }
            _ => {
                halted_by = HaltReason::Ambiguous;
                break;
            }
        };

        let next = next_oriented(chosen, k);
        if visited.contains(&next) {
            halted_by = HaltReason::Cycle;
            break;
        }
        bases.push(kmer::decode_base(next));
        visited.insert(next);
        cur = next;
    }

    WalkOutcome { bases, halted_by }
}

/// Extends leftward from `start` by walking rightward on the
/// reverse-complement strand, then reverse-complementing the result back.
fn walk_left(start: u64, table: &SparseKmerTable, k: usize, flank_chunk: usize) -> WalkOutcome {
    let rc_start = kmer::reverse_complement(start, k);
    let rightward = walk_right(rc_start, table, k, flank_chunk);
    let bases = rightward
        .bases
        .iter()
        .rev()
        .map(|&b| complement_base(b))
        .collect();
    WalkOutcome {
        bases,
        halted_by: rightward.halted_by,
    }
}

/// Scans forward from the read's 5' end for the first position whose
/// k-mer anchors into the table, anchoring as close to the motif as
/// possible (spec §4.4.1 "Starting k-mer selection"). Returns the anchor's
/// start position (== `scan_left`), or `None` if `z < k` or no hit exists.
fn find_left_anchor(read: &[u8], z: usize, k: usize, table: &SparseKmerTable) -> Option<usize> {
    if z < k {
        return None;
    }
    (0..=(z - k)).find(|&i| match kmer::from_string(&read[i..i + k], k) {
        Ok(w) => table.contains(canonical(w, k)),
        Err(_) => false,
    })
}

/// Scans the trailing region (from the motif end `e` onward) for the
/// *last* position whose k-mer anchors into the table. Returns
/// `scan_right`, the position immediately after the anchor.
fn find_right_anchor(read: &[u8], e: usize, k: usize, table: &SparseKmerTable) -> Option<usize> {
    if read.len() < k || e > read.len() - k {
        return None;
    }
    (e..=(read.len() - k))
        .rev()
        .find(|&j| match kmer::from_string(&read[j..j + k], k) {
            Ok(w) => table.contains(canonical(w, k)),
            Err(_) => false,
        })
        .map(|j| j + k)
}

/// Post-extension sanity check (spec §4.4.2): the flank must share >= 95%
/// identity with the source read over the overlap region.
fn flank_identity_ok(flank: &[u8], read: &[u8], anchor_pos: usize, is_left: bool) -> bool {
    let overlap = if is_left {
        flank.len().min(anchor_pos)
    } else {
        flank.len().min(read.len() - anchor_pos)
    };
    if overlap == 0 {
        return true;
    }
    let (flank_region, read_region) = if is_left {
        (&flank[flank.len() - overlap..], &read[anchor_pos - overlap..anchor_pos])
    } else {
        (&flank[..overlap], &read[anchor_pos..anchor_pos + overlap])
    };
    let matches = flank_region
        .iter()
        .zip(read_region.iter())
        .filter(|(a, b)| a.eq_ignore_ascii_case(b))
        .count();
    (matches as f64 / overlap as f64) >= IDENTITY_THRESHOLD
}

pub struct ExtendedRead {
    pub name: String,
    pub motif: String,
    pub copies: u32,
    pub l_motif_start: usize,
    pub l_motif_end: usize,
    pub seq: String,
}

/// Extends a single STR read's flanks and produces the emission record, or
/// `None` if either flank cannot be produced or fails the sanity check
/// (spec §4.4.4: "Reads for which either flank is NULL are skipped
/// silently").
pub fn extend_read(
    read: &ExtendReadName,
    bases: &[u8],
    table: &SparseKmerTable,
    k: usize,
    flank_chunk: usize,
) -> Option<ExtendedRead> {
    let scan_left = find_left_anchor(bases, read.zstart, k, table)?;
    let scan_right = find_right_anchor(bases, read.end, k, table)?;
    if scan_right < scan_left + k {
        return None;
    }

    let left_anchor_kmer = kmer::from_string(&bases[scan_left..scan_left + k], k).ok()?;
    let right_anchor_kmer = kmer::from_string(&bases[scan_right - k..scan_right], k).ok()?;

    let lflank_walk = walk_left(left_anchor_kmer, table, k, flank_chunk);
    let rflank_walk = walk_right(right_anchor_kmer, table, k, flank_chunk);

    if !flank_identity_ok(&lflank_walk.bases, bases, scan_left, true) {
        return None;
    }
    if !flank_identity_ok(&rflank_walk.bases, bases, scan_right, false) {
        return None;
    }

    let lflank = lflank_walk.bases;
    let rflank = rflank_walk.bases;

    let mut seq = String::with_capacity(lflank.len() + (scan_right - scan_left) + rflank.len());
    seq.push_str(std::str::from_utf8(&lflank).ok()?);
    seq.push_str(std::str::from_utf8(&bases[scan_left..scan_right]).ok()?);
    seq.push_str(std::str::from_utf8(&rflank).ok()?);

    let l_motif_start = lflank.len() + read.zstart - scan_left;
    let l_motif_end = lflank.len() + read.end - scan_left;

    Some(ExtendedRead {
        name: read.name.clone(),
        motif: read.motif.clone(),
        copies: read.copies,
        l_motif_start,
        l_motif_end,
        seq,
    })
}

/// Formats the FASTA emission record (spec §4.4.4).
pub fn format_contig(read: &ExtendedRead) -> String {
    format!(
        ">{}\t{}:{}:{}:{}\n{}\n",
        read.name, read.motif, read.copies, read.l_motif_start, read.l_motif_end, read.seq
    )
}

/// Flank extension cap, as a count of k-mers (spec §3 `flank_chunk`, §8 P7:
/// the emitted flank never exceeds `flanks + k` bases since the anchor
/// k-mer itself contributes the trailing `k` bases).
pub fn extension_cap_bases(flank_chunk: usize, k: usize) -> usize {
    flank_chunk + k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_from_reads(reads: &[&[u8]], k: usize, repeats: usize) -> SparseKmerTable {
        let table = SparseKmerTable::new();
        let mut bloom = crate::bloom::BloomFilter::new(1 << 16, 4, 1);
        for _ in 0..repeats {
            for &r in reads {
                for (_, c) in kmer::canonical_kmers(r, k).unwrap() {
                    if table.contains(c) {
                        continue;
                    }
                    if bloom.contains(c) {
                        table.insert_if_absent(c);
                    } else {
                        bloom.add(c);
                    }
                }
            }
        }
        for _ in 0..repeats {
            for &r in reads {
                for (_, c) in kmer::canonical_kmers(r, k).unwrap() {
                    table.increment_if_present(c);
                }
            }
        }
        table.retain_in_threshold(2, 255);
        table
    }

    #[test]
    fn forward_walk_unique_path() {
        // Scenario 4: k=3, bulk = "AAACGTTTT" x3.
        let k = 3;
        let bulk: &[u8] = b"AAACGTTTT";
        let table = table_from_reads(&[bulk], k, 3);

        let anchor = kmer::from_string(b"AAC", k).unwrap();
        let result = walk_right(anchor, &table, k, 1024);
        // AAC -> ACG -> CGT -> GTT -> TTT, then dead end.
        assert_eq!(result.bases, b"GTTTT");
        assert_eq!(result.halted_by, HaltReason::DeadEnd);
    }

    #[test]
    fn single_base_kmer_pass_builds_table() {
        // Scenario 1: k=3, "ACGTAC" x2 enters the table for every k-mer.
        let k = 3;
        let table = table_from_reads(&[b"ACGTAC"], k, 2);
        assert!(table.len() > 0);
        for (_, c) in kmer::canonical_kmers(b"ACGTAC", k).unwrap() {
            assert!(table.contains(c));
        }
    }

    #[test]
    fn singleton_filtering_leaves_table_empty() {
        // Scenario 2: each k-mer appears exactly once across two disjoint reads.
        let k = 3;
        let table = table_from_reads(&[b"AAACCC", b"GGGTTT"], k, 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn saturation_caps_at_255() {
        // Scenario 3.
        let table = table_from_reads(&[b"AAAA"], 3, 300);
        for entry in table.iter() {
            assert!(entry.value().count <= 255);
        }
    }

    /// Builds a table holding exactly the canonical forms of `kmers`, bypassing
    /// the Bloom-gated counting passes entirely so a test can pin down precisely
    /// which de Bruijn edges exist.
    fn table_from_kmer_strings(kmers: &[&[u8]], k: usize) -> SparseKmerTable {
        let table = SparseKmerTable::new();
        for &s in kmers {
            table.insert_if_absent(canonical(kmer::from_string(s, k).unwrap(), k));
        }
        table
    }

    #[test]
    fn snp_bubble_confirmed_continues_through() {
        // Two alleles differing by one substitution at the base following
        // "AAACG": allele A continues ...ACGA..., allele C continues ...ACGC...,
        // reconverging on the shared suffix "CTTGA".
        let k = 5;
        let table = table_from_kmer_strings(
            &[
                b"AAAAC", b"AAACG", // shared prefix
                b"AACGA", b"ACGAC", b"CGACC", b"GACCT", b"ACCTT", // allele A arm
                b"AACGC", b"ACGCC", b"CGCCC", b"GCCCT", b"CCCTT", // allele C arm
                b"CCTTG", b"CTTGA", // shared, reconverged suffix
            ],
            k,
        );

        let branch = kmer::from_string(b"AAACG", k).unwrap();
        let hits = hits_at(branch, k, &table);
        assert_eq!(hits.len(), 2);
        assert!(snp_rescue_confirms(&hits, &table, k));

        let start = kmer::from_string(b"AAAAC", k).unwrap();
        let outcome = walk_right(start, &table, k, 1024);
        // The walk crosses the confirmed bubble instead of halting at "AAACG":
        // it picks the last-examined branch (allele C) and continues all the
        // way to the dead end past the reconverged suffix.
        assert_eq!(outcome.bases, b"GCCCTTGA");
        assert_eq!(outcome.halted_by, HaltReason::DeadEnd);
    }

    #[test]
    fn extension_cap_matches_p7() {
        assert_eq!(extension_cap_bases(1024, 21), 1045);
    }

    #[test]
    fn flank_identity_rejects_divergent_region() {
        let read = b"AAAAAAAAAA".to_vec();
        let bad_flank = b"TTTTT".to_vec();
        assert!(!flank_identity_ok(&bad_flank, &read, 5, true));
        let good_flank = b"AAAAA".to_vec();
        assert!(flank_identity_ok(&good_flank, &read, 5, true));
    }
}
