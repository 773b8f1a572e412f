//! Canonical 2-bit k-mer primitives. (spec §4.1)
//!
//! A k-mer of length `k` (odd, 3 <= k < 64) is packed into a `u64`, two bits
//! per base, leftmost base in the highest-order bit pair — the same
//! bit-packing convention `seqkmer::feat` uses for minimizers, generalized
//! here from a fixed 64-bit l-mer window to an arbitrary odd k.

use crate::error::{StrError, StrResult};

/// A is the only value that means "keep the top bit-pair zero" for the k-1
/// prefix computed by [`build_index`].
#[inline]
pub fn encode_base(c: u8) -> Option<u64> {
    match c {
        b'A' | b'a' => Some(0b00),
        b'C' | b'c' => Some(0b01),
        b'G' | b'g' => Some(0b10),
        b'T' | b't' => Some(0b11),
        _ => None,
    }
}

#[inline]
pub fn decode_base(v: u64) -> u8 {
    match v & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b10 => b'G',
        _ => b'T',
    }
}

/// Validates k is in range and odd (invariant I5: canonical form is
/// unambiguous only for odd k, since an even-k palindrome can tie itself
/// against its own reverse complement).
pub fn validate_k(k: usize) -> StrResult<()> {
    if !(3..64).contains(&k) {
        return Err(StrError::Usage(format!(
            "kmer length {k} out of range (must satisfy 3 <= k < 64)"
        )));
    }
    if k % 2 == 0 {
        return Err(StrError::Usage(format!(
            "kmer length {k} must be odd for an unambiguous canonical form"
        )));
    }
    Ok(())
}

/// Normalizes a user-supplied k-mer length: an even `k` is rounded down to
/// the next odd value with a warning rather than rejected outright (spec
/// §7c categorizes "kmer_length even" as a warning, not a fatal usage
/// error); anything still out of `[3, 64)` after rounding is fatal.
pub fn normalize_k(k: usize) -> StrResult<usize> {
    let k = if k % 2 == 0 {
        eprintln!("warning: kmer length {k} is even, rounding down to {}", k - 1);
        k - 1
    } else {
        k
    };
    validate_k(k)?;
    Ok(k)
}

#[inline]
fn mask_for(k: usize) -> u64 {
    if k >= 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Builds the (k-1)-base prefix a `next_kmer` walk starts from: the leading
/// `k-1` bases of `s` packed so that appending one more base via
/// [`next_kmer`] yields the first full k-mer.
///
/// Returns `None` if `s` is shorter than `k - 1` or contains a non-ACGT
/// base in the prefix.
pub fn build_index(s: &[u8], k: usize) -> Option<u64> {
    if s.len() < k.saturating_sub(1) {
        return None;
    }
    let mut idx = 0u64;
    for &c in &s[..k - 1] {
        idx = (idx << 2) | encode_base(c)?;
    }
    Some(idx)
}

/// Given the k-mer (or (k-1)-mer prefix) ending just before index `i + k -
/// 1`, folds in `s[i + k - 1]` to produce the k-mer starting at `i`.
///
/// Contract (spec §4.1): for any valid ACGT sequence `s` of length >= k,
/// iterating `next_kmer` from `build_index(s, k)` yields all length-k
/// substrings of `s` in order, each equal to `from_string(&s[i..i+k], k)`.
pub fn next_kmer(prev: u64, s: &[u8], k: usize, i: usize) -> Option<u64> {
    let incoming = encode_base(*s.get(i + k - 1)?)?;
    Some(((prev << 2) | incoming) & mask_for(k))
}

/// Reverse-complements a packed k-mer: bit-reverse the 2-bit codes, then
/// complement each (3 - base), matching `seqkmer::feat::reverse_complement`'s
/// byte/nibble-swap trick generalized to non-64-bit k.
pub fn reverse_complement(w: u64, k: usize) -> u64 {
    let mut kmer = w;
    kmer = (kmer >> 2 & 0x3333_3333_3333_3333) | (kmer << 2 & 0xCCCC_CCCC_CCCC_CCCC);
    kmer = (kmer >> 4 & 0x0F0F_0F0F_0F0F_0F0F) | (kmer << 4 & 0xF0F0_F0F0_F0F0_F0F0);
    kmer = (kmer >> 8 & 0x00FF_00FF_00FF_00FF) | (kmer << 8 & 0xFF00_FF00_FF00_FF00);
    kmer = (kmer >> 16 & 0x0000_FFFF_0000_FFFF) | (kmer << 16 & 0xFFFF_0000_FFFF_0000);
    kmer = (kmer >> 32) | (kmer << 32);
    (!kmer >> (64 - 2 * k)) & mask_for(k)
}

/// The canonical form min(w, reverse_complement(w, k)). (invariant I1/I3)
#[inline]
pub fn canonical(w: u64, k: usize) -> u64 {
    let rc = reverse_complement(w, k);
    w.min(rc)
}

/// Renders a packed k-mer back to an ACGT string.
pub fn to_string(w: u64, k: usize) -> String {
    let mut out = Vec::with_capacity(k);
    for i in (0..k).rev() {
        out.push(decode_base(w >> (2 * i)));
    }
    String::from_utf8(out).expect("decode_base only emits ASCII")
}

/// Parses an ACGT string of length exactly `k` into a packed k-mer.
///
/// Errors (spec §7b, fatal input): non-ACGT bases or wrong length.
pub fn from_string(s: &[u8], k: usize) -> StrResult<u64> {
    if s.len() != k {
        return Err(StrError::Input(format!(
            "expected a {k}-base string, got {} bases",
            s.len()
        )));
    }
    let mut w = 0u64;
    for &c in s {
        let code = encode_base(c).ok_or_else(|| {
            StrError::Input(format!("non-ACGT base {:?} in k-mer string", c as char))
        })?;
        w = (w << 2) | code;
    }
    Ok(w)
}

/// Iterates every length-k canonical k-mer of `s` in order, position-tagged.
///
/// Rejects any non-ACGT base in `s` outright (spec §3: "Non-ACGT bases are
/// invalid ... must be rejected explicitly in a rewrite"), rather than
/// silently skipping or treating it as a boundary, since sequencing reads
/// that reach this point have already gone through FASTQ parsing.
pub fn canonical_kmers(s: &[u8], k: usize) -> StrResult<Vec<(usize, u64)>> {
    if s.len() < k {
        return Ok(Vec::new());
    }
    let prefix = build_index(s, k).ok_or_else(|| {
        StrError::Input("non-ACGT base in read while building kmer prefix".to_string())
    })?;
    let mut prev = prefix;
    let mut out = Vec::with_capacity(s.len() - k + 1);
    for i in 0..=(s.len() - k) {
        let kmer = next_kmer(prev, s, k, i)
            .ok_or_else(|| StrError::Input("non-ACGT base in read".to_string()))?;
        out.push((i, canonical(kmer, k)));
        prev = kmer;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_to_from_string() {
        for s in ["AAA", "ACG", "TTTTT", "GATTACA"] {
            let k = s.len();
            let w = from_string(s.as_bytes(), k).unwrap();
            assert_eq!(to_string(w, k), s);
        }
    }

    #[test]
    fn reverse_complement_involution() {
        // P5
        let w = from_string(b"ACGTACG", 7).unwrap();
        assert_eq!(reverse_complement(reverse_complement(w, 7), 7), w);
    }

    #[test]
    fn reverse_complement_known_value() {
        let w = from_string(b"AAACCC", 6).unwrap();
        assert_eq!(to_string(reverse_complement(w, 6), 6), "GGGTTT");
    }

    #[test]
    fn canonical_is_min_of_self_and_rc() {
        // P1
        let w = from_string(b"ACGTACG", 7).unwrap();
        let rc = reverse_complement(w, 7);
        assert_eq!(canonical(w, 7), w.min(rc));
    }

    #[test]
    fn next_kmer_consistency() {
        // P6
        let s = b"ACGTACGTTT";
        let k = 3;
        let prefix = build_index(s, k).unwrap();
        let mut prev = prefix;
        for i in 0..=(s.len() - k) {
            let got = next_kmer(prev, s, k, i).unwrap();
            let want = from_string(&s[i..i + k], k).unwrap();
            assert_eq!(got, want);
            prev = got;
        }
    }

    #[test]
    fn canonical_kmers_matches_substrings() {
        let s = b"AAACGTTTT";
        let result = canonical_kmers(s, 3).unwrap();
        assert_eq!(result.len(), s.len() - 2);
        for (i, (pos, c)) in result.iter().enumerate() {
            assert_eq!(*pos, i);
            let raw = from_string(&s[i..i + 3], 3).unwrap();
            assert_eq!(*c, canonical(raw, 3));
        }
    }

    #[test]
    fn rejects_non_acgt() {
        assert!(canonical_kmers(b"ACGNACGT", 3).is_err());
        assert!(from_string(b"ACN", 3).is_err());
    }

    #[test]
    fn validate_k_rejects_even_and_out_of_range() {
        assert!(validate_k(4).is_err());
        assert!(validate_k(1).is_err());
        assert!(validate_k(65).is_err());
        assert!(validate_k(21).is_ok());
    }

    #[test]
    fn normalize_k_rounds_even_down() {
        assert_eq!(normalize_k(22).unwrap(), 21);
        assert_eq!(normalize_k(21).unwrap(), 21);
        assert!(normalize_k(2).is_err());
    }
}
