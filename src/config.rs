// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use crate::constants;

/// Parameters of the flow-space likelihood model.
///
/// Deserializable so that callers can load them from a scenario/config file;
/// all fields fall back to their defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodParams {
    /// Largest hmer length the instrument distinguishes. Longer runs saturate;
    /// a read calling a run of this length or more is excluded as invalid.
    /// Overridden per read group by an `mc` field on the `@RG` header line.
    pub max_hmer_class: usize,
    /// Number of flows the haplotype window is padded by on each edge, and the
    /// step width of the best-offset scan.
    pub alignment_uncertainty: usize,
    /// Probability substituted for zero or NaN matrix lookups before taking logs.
    pub prob_floor: f64,
    /// Cap on the likelihood gap between any allele and a read's best allele.
    /// A value of -4.5 means a read is never more than 4.5 log10 units worse
    /// against an allele than against its best one, since beyond that point
    /// mismapping is the more plausible explanation.
    pub log10_global_read_mismapping_rate: f64,
    /// Expected rate of ordinary sequencing errors for a read originating from
    /// its true haplotype.
    pub expected_error_rate_per_base: f64,
    /// Expected rate of catastrophic (multi-unit hmer) miscalls.
    pub catastrophic_error_rate_per_base: f64,
    /// Exclude reads whose best likelihood falls below the length-scaled
    /// threshold derived from the two error rates.
    pub filter_poorly_modeled_reads: bool,
}

impl Default for LikelihoodParams {
    fn default() -> Self {
        Self {
            max_hmer_class: constants::DEFAULT_MAX_HMER_CLASS,
            alignment_uncertainty: constants::DEFAULT_ALIGNMENT_UNCERTAINTY,
            prob_floor: constants::PROB_FLOOR,
            log10_global_read_mismapping_rate: -4.5,
            expected_error_rate_per_base: 1e-3,
            catastrophic_error_rate_per_base: 1e-4,
            filter_poorly_modeled_reads: true,
        }
    }
}
