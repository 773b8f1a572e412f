//! Local Smith-Waterman alignment for STR flank reconciliation. (spec §4.5.2)
//!
//! Scoring: match +1, mismatch -1, gap -3. Traceback follows a direction
//! matrix {0=diag, 1=up, 2=left} back from the max-scoring cell to a cell of
//! value 0. The two flanks are aligned asymmetrically: the left-flank
//! alignment pads with the *longer* sequence's unaligned prefix, the
//! right-flank alignment pads with the longer sequence's unaligned suffix.

const MATCH: i32 = 1;
const MISMATCH: i32 = -1;
const GAP: i32 = -3;
const MIN_QUAL_TO_KEEP_ON_GAP: u8 = b'5'; // ASCII 53, ~Q20 in Phred+33

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Dir {
    Diag,
    Up,
    Left,
}

struct SwResult {
    start1: usize,
    end1: usize,
    start2: usize,
    end2: usize,
    aligned1: Vec<u8>,
    aligned2: Vec<u8>,
}

fn smith_waterman(seq1: &[u8], seq2: &[u8]) -> SwResult {
    let (n, m) = (seq1.len(), seq2.len());
    let mut a = vec![vec![0i32; m + 1]; n + 1];
    let mut b = vec![vec![Dir::Diag; m + 1]; n + 1];

    let mut best = (0usize, 0usize, 0i32);
    for i in 1..=n {
        for j in 1..=m {
            let sub = if seq1[i - 1].eq_ignore_ascii_case(&seq2[j - 1]) {
                MATCH
            } else {
                MISMATCH
            };
            let diag = a[i - 1][j - 1] + sub;
            let up = a[i - 1][j] + GAP;
            let left = a[i][j - 1] + GAP;

            let mut score = diag;
            let mut dir = Dir::Diag;
            if up > score {
                score = up;
                dir = Dir::Up;
            }
            if left > score {
                score = left;
                dir = Dir::Left;
            }
            if score < 0 {
                score = 0;
            }

            a[i][j] = score;
            b[i][j] = dir;
            if score > best.2 {
                best = (i, j, score);
            }
        }
    }

    let (mut i, mut j, _) = best;
    let (end1, end2) = (i, j);
    let mut aligned1 = Vec::new();
    let mut aligned2 = Vec::new();

    while i > 0 && j > 0 && a[i][j] > 0 {
        match b[i][j] {
            Dir::Diag => {
                aligned1.push(seq1[i - 1]);
                aligned2.push(seq2[j - 1]);
                i -= 1;
                j -= 1;
            }
            Dir::Up => {
                aligned1.push(seq1[i - 1]);
                aligned2.push(b'-');
                i -= 1;
            }
            Dir::Left => {
                aligned1.push(b'-');
                aligned2.push(seq2[j - 1]);
                j -= 1;
            }
        }
    }
    aligned1.reverse();
    aligned2.reverse();

    SwResult {
        start1: i,
        end1,
        start2: j,
        end2,
        aligned1,
        aligned2,
    }
}

pub enum FlankSide {
    Left,
    Right,
}

pub struct FlankAlignment {
    pub identity: f64,
    pub gaps: usize,
    pub consensus_bases: Vec<u8>,
    pub consensus_quals: Vec<u8>,
}

/// Aligns one flank of two candidate reads and produces a quality-weighted
/// consensus over the (possibly padded) alignment.
pub fn align_flank(
    seq1: &[u8],
    qual1: &[u8],
    seq2: &[u8],
    qual2: &[u8],
    side: FlankSide,
) -> FlankAlignment {
    let sw = smith_waterman(seq1, seq2);
    let mut aligned1 = sw.aligned1;
    let mut aligned2 = sw.aligned2;
    // Shadow quality strings, one char per column of `aligned*`, built up
    // alongside the padding below.
    let mut qcol1: Vec<u8> = qual1[sw.start1..sw.end1].to_vec();
    let mut qcol2: Vec<u8> = qual2[sw.start2..sw.end2].to_vec();

    match side {
        FlankSide::Left => {
            let prefix1 = sw.start1;
            let prefix2 = sw.start2;
            if prefix1 >= prefix2 {
                let mut p1 = seq1[..prefix1].to_vec();
                p1.extend_from_slice(&aligned1);
                aligned1 = p1;
                let mut pq1 = qual1[..prefix1].to_vec();
                pq1.extend_from_slice(&qcol1);
                qcol1 = pq1;

                let mut p2 = vec![b'-'; prefix1];
                p2.extend_from_slice(&aligned2);
                aligned2 = p2;
                let mut pq2 = vec![0u8; prefix1];
                pq2.extend_from_slice(&qcol2);
                qcol2 = pq2;
            } else {
                let mut p2 = seq2[..prefix2].to_vec();
                p2.extend_from_slice(&aligned2);
                aligned2 = p2;
                let mut pq2 = qual2[..prefix2].to_vec();
                pq2.extend_from_slice(&qcol2);
                qcol2 = pq2;

                let mut p1 = vec![b'-'; prefix2];
                p1.extend_from_slice(&aligned1);
                aligned1 = p1;
                let mut pq1 = vec![0u8; prefix2];
                pq1.extend_from_slice(&qcol1);
                qcol1 = pq1;
            }
        }
        FlankSide::Right => {
            let suffix1 = seq1.len() - sw.end1;
            let suffix2 = seq2.len() - sw.end2;
            if suffix1 >= suffix2 {
                aligned1.extend_from_slice(&seq1[sw.end1..]);
                qcol1.extend_from_slice(&qual1[sw.end1..]);
                aligned2.extend(std::iter::repeat(b'-').take(suffix1));
                qcol2.extend(std::iter::repeat(0u8).take(suffix1));
            } else {
                aligned2.extend_from_slice(&seq2[sw.end2..]);
                qcol2.extend_from_slice(&qual2[sw.end2..]);
                aligned1.extend(std::iter::repeat(b'-').take(suffix2));
                qcol1.extend(std::iter::repeat(0u8).take(suffix2));
            }
        }
    }

    let mut matches = 0usize;
    let mut mismatches = 0usize;
    let mut gaps = 0usize;
    let mut consensus_bases = Vec::with_capacity(aligned1.len());
    let mut consensus_quals = Vec::with_capacity(aligned1.len());

    for idx in 0..aligned1.len() {
        let (c1, c2) = (aligned1[idx], aligned2[idx]);
        let (q1, q2) = (qcol1[idx], qcol2[idx]);
        match (c1 == b'-', c2 == b'-') {
            (false, false) => {
                if c1.eq_ignore_ascii_case(&c2) {
                    matches += 1;
                } else {
                    mismatches += 1;
                }
                let (base, qual) = if q1 >= q2 { (c1, q1) } else { (c2, q2) };
                consensus_bases.push(base);
                consensus_quals.push(qual);
            }
            (true, false) => {
                gaps += 1;
                if q2 > MIN_QUAL_TO_KEEP_ON_GAP {
                    consensus_bases.push(c2);
                    consensus_quals.push(q2);
                }
            }
            (false, true) => {
                gaps += 1;
                if q1 > MIN_QUAL_TO_KEEP_ON_GAP {
                    consensus_bases.push(c1);
                    consensus_quals.push(q1);
                }
            }
            (true, true) => unreachable!("both sides cannot be gaps in the same column"),
        }
    }

    let compared = matches + mismatches;
    let identity = if compared == 0 {
        0.0
    } else {
        matches as f64 / compared as f64
    };

    FlankAlignment {
        identity,
        gaps,
        consensus_bases,
        consensus_quals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_align_perfectly() {
        let r = align_flank(b"ACGTACG", b"IIIIIII", b"ACGTACG", b"IIIIIII", FlankSide::Left);
        assert_eq!(r.identity, 1.0);
        assert_eq!(r.gaps, 0);
        assert_eq!(r.consensus_bases, b"ACGTACG");
    }

    #[test]
    fn single_mismatch_keeps_high_identity() {
        let r = align_flank(b"ACGTACG", b"IIIIIII", b"ACGTCCG", b"IIIIIII", FlankSide::Right);
        assert!(r.identity >= 0.8);
    }

    #[test]
    fn longer_prefix_pads_shorter_on_left() {
        let r = align_flank(b"TTACGT", b"IIIIII", b"ACGT", b"IIII", FlankSide::Left);
        assert_eq!(r.gaps, 2);
        assert_eq!(r.consensus_bases, b"TTACGT");
    }

    #[test]
    fn longer_suffix_pads_shorter_on_right() {
        let r = align_flank(b"ACGT", b"IIII", b"ACGTTT", b"IIIIII", FlankSide::Right);
        assert_eq!(r.gaps, 2);
        assert_eq!(r.consensus_bases, b"ACGTTT");
    }

    #[test]
    fn low_quality_gap_column_is_dropped() {
        // Unaligned suffix "TT" has quals "I!": the high-quality T is kept,
        // the '!' (Phred 0, under the '5' cutoff) one is dropped.
        let r = align_flank(b"ACGTTT", b"IIIII!", b"ACGT", b"IIII", FlankSide::Right);
        assert_eq!(r.consensus_bases, b"ACGTT");
    }
}
