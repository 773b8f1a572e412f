//! Bloom filter gating the first counting pass. (spec §4.2)

use crate::bitset::Bitset;
use crate::murmur::hash_u64;

#[derive(Clone)]
pub struct BloomFilter {
    bits: Bitset,
    num_bits: usize,
    num_hashes: usize,
    seed: u64,
}

impl BloomFilter {
    pub fn new(num_bits: usize, num_hashes: usize, seed: u64) -> Self {
        assert!(num_bits > 0 && num_hashes > 0);
        Self {
            bits: Bitset::new(num_bits),
            num_bits,
            num_hashes,
            seed,
        }
    }

    /// Sizes a filter from a target false-positive rate `p` and expected
    /// entry count `n` (spec §3: m = ceil(-n*ln(p) / (ln 2)^2), k = ceil(m *
    /// ln 2 / n)).
    pub fn with_fp_rate(n: usize, p: f64, seed: u64) -> Self {
        let n = n.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * p.ln() / (ln2 * ln2)).ceil().max(8.0) as usize;
        let k = ((m as f64) * ln2 / n).ceil().max(1.0) as usize;
        Self::new(m, k, seed)
    }

    /// Sizes a filter from a fixed memory budget `mib` (spec §3b): m = 8 *
    /// 2^20 * M bits, with the resulting false-positive rate derived from n.
    pub fn with_memory_budget(mib: usize, n: usize, seed: u64) -> Self {
        let m = 8 * (1 << 20) * mib.max(1);
        let n = n.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let k = ((m as f64) * ln2 / n).ceil().max(1.0) as usize;
        Self::new(m, k, seed)
    }

    fn hash_indices(&self, kmer: u64) -> impl Iterator<Item = usize> + '_ {
        let mut h = self.seed;
        (0..self.num_hashes).map(move |_| {
            let full = hash_u64(kmer, h);
            h = full as u64;
            ((full >> 64) as u64 % self.num_bits as u64) as usize
        })
    }

    /// Sets all `k` bits for `kmer`. Returns whether the entry was *new*
    /// (every bit had been previously unset).
    pub fn add(&mut self, kmer: u64) -> bool {
        let indices: Vec<usize> = self.hash_indices(kmer).collect();
        let mut was_new = false;
        for idx in indices {
            if !self.bits.set(idx) {
                was_new = true;
            }
        }
        was_new
    }

    /// Short-circuits on the first unset bit (no false negatives — P4).
    pub fn contains(&self, kmer: u64) -> bool {
        self.hash_indices(kmer).all(|idx| self.bits.get(idx))
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_contains() {
        let mut bf = BloomFilter::new(4096, 4, 0);
        assert!(bf.add(123));
        assert!(bf.contains(123));
    }

    #[test]
    fn no_false_negatives() {
        // P4: everything added must be reported as contained.
        let mut bf = BloomFilter::new(2048, 3, 7);
        let keys: Vec<u64> = (0..200).collect();
        for &k in &keys {
            bf.add(k);
        }
        for &k in &keys {
            assert!(bf.contains(k));
        }
    }

    #[test]
    fn add_reports_new_only_once() {
        let mut bf = BloomFilter::new(4096, 4, 0);
        assert!(bf.add(55));
        assert!(!bf.add(55));
    }

    #[test]
    fn sizing_from_fp_rate_is_sane() {
        let bf = BloomFilter::with_fp_rate(10_000, 0.1, 1);
        assert!(bf.num_bits() > 10_000);
        assert!(bf.num_hashes() >= 1);
    }
}
