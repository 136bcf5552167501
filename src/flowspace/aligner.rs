// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::cmp;

use rust_htslib::bam::record::Cigar;

use crate::config::LikelihoodParams;
use crate::flowspace::haplotype::FlowHaplotype;
use crate::flowspace::read::{Direction, FlowRead};

/// Scores a single read against a single haplotype in flow space.
///
/// Flow-based miscalls are almost exclusively wrong run lengths rather than
/// missing or spurious flows, so no insertions or deletions are modeled
/// between read and haplotype. Only the best starting offset of the read's
/// key inside the haplotype window has to be found, which keeps the scan at
/// O(read flows x uncertainty) instead of quadratic dynamic programming.
#[derive(Debug, new)]
pub struct FlowAligner<'a> {
    params: &'a LikelihoodParams,
}

impl<'a> FlowAligner<'a> {
    /// Log10 likelihood of the read given the haplotype.
    ///
    /// The read must be reference oriented and trimmed to (approximately) the
    /// haplotype's span; both are guaranteed by the engine, and violating
    /// either is an integration bug rather than a data condition.
    pub fn score(&self, haplotype: &FlowHaplotype, read: &FlowRead) -> f64 {
        assert_eq!(
            read.direction(),
            Direction::Reference,
            "flow aligner requires a reference-oriented read"
        );
        assert!(
            read.is_trimmed(),
            "flow aligner requires a read trimmed to the haplotype window"
        );

        let floor_log10 = self.params.prob_floor.log10();
        let n_flows = read.n_flows();
        if !read.is_valid() || n_flows == 0 {
            return floor_log10 * cmp::max(n_flows, 1) as f64;
        }

        // haplotype-local offsets of the read's reference span
        let hap_start = ref_to_hap_offset(haplotype, read.ref_start());
        let hap_end = ref_to_hap_offset(haplotype, read.ref_end());

        let left_bases = hap_start;
        let right_bases = haplotype.len() - hap_end;

        let mut uncertainty = self.params.alignment_uncertainty;
        let overlap = hap_end.saturating_sub(hap_start);
        if read.len() > overlap {
            // the read sits inside a deletion relative to this haplotype, so
            // the naive overlap underestimates where it can start
            uncertainty += read.len() - overlap;
        }

        // clip flow counts on each edge, padded outward by the uncertainty
        let (left_flows, _) = haplotype.find_left_clipping(left_bases);
        let (right_flows, _) = haplotype.find_right_clipping(right_bases);
        let clip_left = left_flows.saturating_sub(uncertainty);
        let clip_right = right_flows.saturating_sub(uncertainty);
        if clip_left + clip_right >= haplotype.key_len() {
            return floor_log10 * n_flows as f64;
        }

        let window_key = &haplotype.key()[clip_left..haplotype.key_len() - clip_right];
        let window_order = &haplotype.flow_order()[clip_left..haplotype.key_len() - clip_right];

        // best-guess start: the first window flow querying the read's first nucleotide
        let first_nuc = read.flow_order()[0];
        let starting_point = window_order
            .iter()
            .position(|&nuc| nuc == first_nuc)
            .unwrap_or(0);

        let step = cmp::max(self.params.alignment_uncertainty, 1);
        let mut best: Option<f64> = None;
        let mut offset = starting_point;
        while offset + n_flows <= window_key.len() {
            let mut sum = 0.0;
            for flow in 0..n_flows {
                let hap_hmer = cmp::min(window_key[offset + flow] as usize, read.max_hmer() + 1);
                let mut prob = read.prob(flow, hap_hmer);
                if !(prob > 0.0) {
                    // zero or NaN lookups are floored so a single mismatching
                    // flow degrades rather than annihilates the score
                    prob = self.params.prob_floor;
                }
                sum += prob.log10();
            }
            best = Some(match best {
                Some(current) => f64::max(current, sum),
                None => sum,
            });
            offset += step;
        }

        match best {
            Some(score) => score,
            None => floor_log10 * n_flows as f64,
        }
    }
}

/// Project a reference coordinate onto the haplotype sequence by walking the
/// haplotype's alignment CIGAR. Positions inside a deletion map to the flow
/// right of it; positions outside the span clamp to the edges.
fn ref_to_hap_offset(haplotype: &FlowHaplotype, ref_pos: u64) -> usize {
    let mut ref_cursor = haplotype.start();
    let mut hap_cursor = 0usize;
    if ref_pos <= ref_cursor {
        return 0;
    }
    for c in haplotype.cigar().iter() {
        match c {
            Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => {
                let len = *len as u64;
                if ref_pos < ref_cursor + len {
                    return hap_cursor + (ref_pos - ref_cursor) as usize;
                }
                ref_cursor += len;
                hap_cursor += len as usize;
            }
            Cigar::Ins(len) | Cigar::SoftClip(len) => {
                hap_cursor += *len as usize;
            }
            Cigar::Del(len) | Cigar::RefSkip(len) => {
                let len = *len as u64;
                if ref_pos < ref_cursor + len {
                    return hap_cursor;
                }
                ref_cursor += len;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => (),
        }
    }
    hap_cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use bio_types::genome;
    use rust_htslib::bam::record::CigarString;

    use crate::flowspace::key::FlowOrder;
    use crate::flowspace::read::{AlignmentInfo, ClipMode, FlowCallData};

    fn order() -> FlowOrder {
        FlowOrder::new(b"TGCA").unwrap()
    }

    fn reference_read(bases: &[u8], ref_start: u64, ref_end: u64) -> FlowRead {
        let quals = vec![30u8; bases.len()];
        let calls = FlowCallData::BaseOutlier {
            outlier_phreds: vec![20u8; bases.len()],
        };
        let alignment = AlignmentInfo::new(false, 0, 0, ref_start, ref_end);
        let mut read = FlowRead::new(bases, &quals, &calls, alignment, &order(), 12).unwrap();
        read.apply_alignment();
        read.apply_base_clipping(0, 0, ClipMode::Shift);
        read
    }

    fn haplotype(bases: &[u8], start: u64) -> FlowHaplotype {
        FlowHaplotype::new(
            bases,
            genome::Interval::new("chr1".to_owned(), start..start + bases.len() as u64),
            CigarString(vec![Cigar::Match(bases.len() as u32)]),
            false,
            &order(),
        )
        .unwrap()
    }

    fn self_match_score(read: &FlowRead) -> f64 {
        (0..read.n_flows())
            .map(|flow| read.prob(flow, read.key()[flow] as usize).log10())
            .sum()
    }

    #[test]
    fn test_self_match() {
        let read = reference_read(b"TTAATG", 100, 106);
        let hap = haplotype(b"TTAATG", 100);
        let params = LikelihoodParams::default();
        let aligner = FlowAligner::new(&params);

        assert_relative_eq!(
            aligner.score(&hap, &read),
            self_match_score(&read),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_perturbed_haplotype_scores_worse() {
        let read = reference_read(b"TTAATG", 100, 106);
        let params = LikelihoodParams::default();
        let aligner = FlowAligner::new(&params);

        let same = aligner.score(&haplotype(b"TTAATG", 100), &read);
        // one hmer length off
        let longer = aligner.score(&haplotype(b"TTTAATG", 100), &read);
        assert!(same > longer, "{} should beat {}", same, longer);
        assert_relative_eq!(same, self_match_score(&read), epsilon = 1e-12);
    }

    #[test]
    fn test_offset_scan_recovers_shifted_read() {
        // the read covers only the tail of the haplotype
        let read = reference_read(b"TTAATG", 102, 108);
        let hap = haplotype(b"CATTAATG", 100);
        let params = LikelihoodParams::default();
        let aligner = FlowAligner::new(&params);

        assert_relative_eq!(
            aligner.score(&hap, &read),
            self_match_score(&read),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_zero_lookup_is_floored() {
        let read = reference_read(b"TTAATG", 100, 106);
        let params = LikelihoodParams::default();
        let aligner = FlowAligner::new(&params);

        // a five-unit hmer has no modeled probability in this read
        let hap = haplotype(b"TTTTTAATG", 100);
        let score = aligner.score(&hap, &read);
        assert!(score.is_finite());
        let floored: f64 = params.prob_floor.log10()
            + (1..read.n_flows())
                .map(|flow| read.prob(flow, read.key()[flow] as usize).log10())
                .sum::<f64>();
        assert_relative_eq!(score, floored, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_read_gets_floor_score() {
        let bases = vec![b'T'; 20];
        let quals = vec![30u8; 20];
        let calls = FlowCallData::BaseOutlier {
            outlier_phreds: vec![20u8; 20],
        };
        let alignment = AlignmentInfo::new(false, 0, 0, 100, 120);
        let mut read = FlowRead::new(&bases, &quals, &calls, alignment, &order(), 12).unwrap();
        read.apply_alignment();
        read.apply_base_clipping(0, 0, ClipMode::Shift);
        assert!(!read.is_valid());

        let params = LikelihoodParams::default();
        let aligner = FlowAligner::new(&params);
        let score = aligner.score(&haplotype(b"TTAATG", 100), &read);
        assert_relative_eq!(score, params.prob_floor.log10(), epsilon = 1e-12);
    }

    #[test]
    fn test_ref_to_hap_offset_with_indels() {
        let hap = FlowHaplotype::new(
            b"TTAACCATG",
            genome::Interval::new("chr1".to_owned(), 100..110),
            // 4M 2I 3M 3D over a ten base reference window
            CigarString(vec![
                Cigar::Match(4),
                Cigar::Ins(2),
                Cigar::Match(3),
                Cigar::Del(3),
            ]),
            false,
            &order(),
        )
        .unwrap();

        assert_eq!(ref_to_hap_offset(&hap, 100), 0);
        assert_eq!(ref_to_hap_offset(&hap, 103), 3);
        // past the insertion, reference positions shift by two
        assert_eq!(ref_to_hap_offset(&hap, 104), 6);
        assert_eq!(ref_to_hap_offset(&hap, 106), 8);
        // inside the deletion, positions map to its right edge
        assert_eq!(ref_to_hap_offset(&hap, 108), 9);
        // beyond the span, clamp to the full length
        assert_eq!(ref_to_hap_offset(&hap, 200), 9);
    }
}
