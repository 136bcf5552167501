// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use ndarray::Array2;

use crate::config::LikelihoodParams;
use crate::constants;

/// Dense per-sample log10 likelihoods of each read given each allele.
///
/// Rows and columns are positionally ordered exactly as the caller supplied
/// alleles and reads; the consumer addresses the matrix by position, not by
/// name. Ownership passes to the caller after building, the engine retains
/// nothing.
#[derive(Debug, Getters, CopyGetters)]
pub struct AlleleLikelihoods {
    #[getset(get = "pub")]
    samples: Vec<String>,
    #[getset(get_copy = "pub")]
    n_alleles: usize,
    matrices: Vec<Array2<f64>>,
    informative: Vec<Vec<bool>>,
}

impl AlleleLikelihoods {
    pub(crate) fn new(samples: Vec<String>, n_alleles: usize, reads_per_sample: &[usize]) -> Self {
        let matrices = reads_per_sample
            .iter()
            .map(|&n_reads| Array2::zeros((n_alleles, n_reads)))
            .collect();
        let informative = reads_per_sample
            .iter()
            .map(|&n_reads| vec![true; n_reads])
            .collect();
        AlleleLikelihoods {
            samples,
            n_alleles,
            matrices,
            informative,
        }
    }

    pub fn sample_matrix(&self, sample: usize) -> &Array2<f64> {
        &self.matrices[sample]
    }

    pub fn likelihood(&self, sample: usize, allele: usize, read: usize) -> f64 {
        self.matrices[sample][(allele, read)]
    }

    pub(crate) fn set(&mut self, sample: usize, allele: usize, read: usize, value: f64) {
        self.matrices[sample][(allele, read)] = value;
    }

    /// Whether the read contributed information, i.e. was neither invalid in
    /// flow space nor filtered as poorly modeled.
    pub fn is_informative(&self, sample: usize, read: usize) -> bool {
        self.informative[sample][read]
    }

    pub(crate) fn set_uninformative(&mut self, sample: usize, read: usize) {
        self.informative[sample][read] = false;
    }

    /// Cap how much worse a read may score against any allele than against
    /// its best one. Beyond the global mismapping rate, mismapping is the
    /// better explanation than a genuine mismatch, so the likelihood gap is
    /// bounded by it.
    pub fn normalize_likelihoods(&mut self, log10_global_read_mismapping_rate: f64) {
        for matrix in &mut self.matrices {
            for read in 0..matrix.ncols() {
                let best = matrix
                    .column(read)
                    .iter()
                    .cloned()
                    .fold(f64::NEG_INFINITY, f64::max);
                if !best.is_finite() {
                    continue;
                }
                let cap = best + log10_global_read_mismapping_rate;
                for allele in 0..matrix.nrows() {
                    if matrix[(allele, read)] < cap {
                        matrix[(allele, read)] = cap;
                    }
                }
            }
        }
    }

    /// Flag reads whose best likelihood falls below the given per-read-length
    /// threshold as poorly modeled. They stay in the matrix but are reported
    /// uninformative, never silently dropped. Returns the number of newly
    /// excluded reads.
    pub fn filter_poorly_modeled_evidence<F>(
        &mut self,
        read_lens: &[Vec<usize>],
        threshold: F,
    ) -> usize
    where
        F: Fn(usize) -> f64,
    {
        let mut n_filtered = 0;
        for sample in 0..self.matrices.len() {
            let matrix = &self.matrices[sample];
            for read in 0..matrix.ncols() {
                if !self.informative[sample][read] {
                    continue;
                }
                let best = matrix
                    .column(read)
                    .iter()
                    .cloned()
                    .fold(f64::NEG_INFINITY, f64::max);
                if best < threshold(read_lens[sample][read]) {
                    self.informative[sample][read] = false;
                    n_filtered += 1;
                    debug!(
                        "read {} of sample {} excluded as poorly modeled (best likelihood {:.2})",
                        read, self.samples[sample], best
                    );
                }
            }
        }
        n_filtered
    }
}

/// Minimum log10 likelihood a read of the given length can plausibly reach
/// against the haplotype it actually originated from.
///
/// Every tolerated error may cost at most the floored per-flow probability,
/// so the threshold is the floor's log10 times the number of ordinary plus
/// catastrophic errors budgeted for the read length. Both counts use the
/// capped form `max(2, ceil(len * rate))`, so short reads keep a minimum
/// tolerance of two errors each.
pub fn log10_min_true_likelihood(params: &LikelihoodParams, read_len: usize) -> f64 {
    let floor_log10 = params.prob_floor.log10();
    let max_errors = f64::max(
        constants::MIN_ERRORS_PER_READ,
        (read_len as f64 * params.expected_error_rate_per_base).ceil(),
    );
    let max_catastrophes = f64::max(
        constants::MIN_ERRORS_PER_READ,
        (read_len as f64 * params.catastrophic_error_rate_per_base).ceil(),
    );
    (max_errors + max_catastrophes) * floor_log10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn likelihoods() -> AlleleLikelihoods {
        let mut likelihoods = AlleleLikelihoods::new(vec!["s1".to_owned()], 2, &[2]);
        likelihoods.set(0, 0, 0, -1.0);
        likelihoods.set(0, 1, 0, -10.0);
        likelihoods.set(0, 0, 1, -20.0);
        likelihoods.set(0, 1, 1, -21.0);
        likelihoods
    }

    #[test]
    fn test_normalize_caps_likelihood_gap() {
        let mut likelihoods = likelihoods();
        likelihoods.normalize_likelihoods(-3.0);
        assert_relative_eq!(likelihoods.likelihood(0, 0, 0), -1.0);
        assert_relative_eq!(likelihoods.likelihood(0, 1, 0), -4.0);
        // gaps within the cap stay untouched
        assert_relative_eq!(likelihoods.likelihood(0, 0, 1), -20.0);
        assert_relative_eq!(likelihoods.likelihood(0, 1, 1), -21.0);
    }

    #[test]
    fn test_filter_poorly_modeled_evidence() {
        let mut likelihoods = likelihoods();
        let n_filtered =
            likelihoods.filter_poorly_modeled_evidence(&[vec![100, 100]], |_| -16.0);
        assert_eq!(n_filtered, 1);
        assert!(likelihoods.is_informative(0, 0));
        assert!(!likelihoods.is_informative(0, 1));
    }

    #[test]
    fn test_log10_min_true_likelihood() {
        let params = LikelihoodParams::default();
        // short reads keep the two-error minimum for both rates
        assert_relative_eq!(log10_min_true_likelihood(&params, 10), -16.0, epsilon = 1e-9);
        // long reads scale with the error rates
        let long = log10_min_true_likelihood(&params, 10_000);
        assert_relative_eq!(long, (10.0 + 2.0) * -4.0, epsilon = 1e-9);
    }
}
