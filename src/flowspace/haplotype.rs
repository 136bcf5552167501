// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio_types::genome::{self, AbstractInterval};
use rust_htslib::bam::record::CigarString;

use crate::errors::Error;
use crate::flowspace::key::{self, FlowOrder};

/// Flow-space representation of a candidate haplotype.
///
/// Holds only the key and its clip lookup tables; unlike reads, haplotypes
/// carry no probability matrix. Haplotypes are not directionally oriented the
/// way reads are, so the flow-to-base index is kept for both the forward and
/// the reversed key, allowing the two edges to be clipped independently.
/// One instance per (haplotype, flow order) pair; never shared across orders.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct FlowHaplotype {
    #[getset(get = "pub")]
    bases: Vec<u8>,
    #[getset(get = "pub")]
    key: Vec<u32>,
    flow2base: Vec<i32>,
    rev_key: Vec<u32>,
    rev_flow2base: Vec<i32>,
    /// Expected nucleotide per flow, aligned with the key.
    #[getset(get = "pub")]
    flow_order: Vec<u8>,
    #[getset(get = "pub")]
    interval: genome::Interval,
    /// Alignment of the haplotype sequence against the reference.
    #[getset(get = "pub")]
    cigar: CigarString,
    #[getset(get_copy = "pub")]
    is_ref: bool,
}

impl FlowHaplotype {
    pub fn new(
        bases: &[u8],
        interval: genome::Interval,
        cigar: CigarString,
        is_ref: bool,
        order: &FlowOrder,
    ) -> Result<Self, Error> {
        let key = key::base_to_key(bases, order)?;
        let flow2base = key::flow_to_base(&key);
        let rev_key: Vec<u32> = key.iter().rev().cloned().collect();
        let rev_flow2base = key::flow_to_base(&rev_key);
        let flow_order = key::flow_order_array(order, key.len());

        Ok(FlowHaplotype {
            bases: bases.to_vec(),
            key,
            flow2base,
            rev_key,
            rev_flow2base,
            flow_order,
            interval,
            cigar,
            is_ref,
        })
    }

    pub fn start(&self) -> u64 {
        self.interval.range().start
    }

    pub fn end(&self) -> u64 {
        self.interval.range().end
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    /// `(flows to remove, hmer units to subtract from the boundary flow)` for
    /// trimming the given number of bases off the left edge.
    pub fn find_left_clipping(&self, base_clipping: usize) -> (usize, u32) {
        key::find_clipping(base_clipping, &self.flow2base, &self.key)
    }

    /// Right-edge counterpart of [`find_left_clipping`](Self::find_left_clipping),
    /// computed over the reversed key.
    pub fn find_right_clipping(&self, base_clipping: usize) -> (usize, u32) {
        key::find_clipping(base_clipping, &self.rev_flow2base, &self.rev_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::Cigar;

    fn haplotype(bases: &[u8], order: &str) -> FlowHaplotype {
        FlowHaplotype::new(
            bases,
            genome::Interval::new("chr1".to_owned(), 100..100 + bases.len() as u64),
            CigarString(vec![Cigar::Match(bases.len() as u32)]),
            true,
            &FlowOrder::new(order.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn stripped(key: &[u32]) -> Vec<u32> {
        let start = key.iter().position(|&c| c != 0).unwrap_or(key.len());
        let end = key.iter().rposition(|&c| c != 0).map_or(start, |i| i + 1);
        key[start..end].to_vec()
    }

    #[test]
    fn test_clip_identity() {
        let hap = haplotype(b"ATCGCAGGGAATTGTCCCCATGAAACTAAG", "TACG");
        assert_eq!(hap.find_left_clipping(0), (0, 0));
        assert_eq!(hap.find_right_clipping(0), (0, 0));
    }

    #[test]
    fn test_left_clip_round_trip() {
        let bases = b"ATCGCAGGGAATTGTCCCCATGAAACTAAG";
        let order = FlowOrder::new(b"TACG").unwrap();
        let hap = haplotype(bases, "TACG");

        for trim in 0..bases.len() {
            let (flows, residual) = hap.find_left_clipping(trim);
            let mut clipped = hap.key()[flows..].to_vec();
            clipped[0] -= residual;

            // the freshly encoded suffix starts at cycle phase zero, so both
            // keys are compared with boundary zero flows stripped
            let expected = key::base_to_key(&bases[trim..], &order).unwrap();
            assert_eq!(
                stripped(&clipped),
                stripped(&expected),
                "mismatch for left trim {}",
                trim
            );
        }
    }

    #[test]
    fn test_right_clip_round_trip() {
        let bases = b"ATCGCAGGGAATTGTCCCCATGAAACTAAG";
        let order = FlowOrder::new(b"TACG").unwrap();
        let hap = haplotype(bases, "TACG");

        for trim in 0..bases.len() {
            let (flows, residual) = hap.find_right_clipping(trim);
            let keep = hap.key_len() - flows;
            let mut clipped = hap.key()[..keep].to_vec();
            *clipped.last_mut().unwrap() -= residual;

            // prefixes share the cycle phase, so the comparison is exact up to
            // trailing zero flows
            let expected = key::base_to_key(&bases[..bases.len() - trim], &order).unwrap();
            assert_eq!(
                stripped(&clipped),
                stripped(&expected),
                "mismatch for right trim {}",
                trim
            );
        }
    }
}
