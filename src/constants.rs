// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

/// Probability substituted for zero or NaN matrix lookups before taking logs,
/// so that a single mismatching flow degrades a score instead of annihilating it.
pub const PROB_FLOOR: f64 = 1e-4;

/// Number of flows the best-offset scan may be off on either side of the
/// CIGAR-derived haplotype window.
pub const DEFAULT_ALIGNMENT_UNCERTAINTY: usize = 4;

/// Largest homopolymer run length distinguished by default; longer runs saturate.
pub const DEFAULT_MAX_HMER_CLASS: usize = 12;

/// Minimum number of sequencing errors budgeted per read when deriving the
/// poorly-modeled-evidence threshold, regardless of read length.
pub const MIN_ERRORS_PER_READ: f64 = 2.0;

/// Phred score assumed for flows that emit no base, when projecting per-base
/// scores into key space.
pub const DEFAULT_FLOW_PHRED: u8 = 40;
