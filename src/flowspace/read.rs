// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::cmp;

use anyhow::{Context, Result};
use bio::alphabets::dna;
use ndarray::Array2;
use rust_htslib::bam;
use rust_htslib::bam::record::{Aux, Cigar, CigarStringView};

use crate::constants;
use crate::errors::Error;
use crate::flowspace::key::{self, FlowOrder};
use crate::readgroup::ReadGroupInfo;
use crate::utils;

/// Orientation of a read's flow data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Instrument emission order (5'→3' as sequenced).
    Synthesis,
    /// Reference genome order (after applying the alignment).
    Reference,
}

/// How clipping treats the probability column of a partially consumed
/// boundary flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipMode {
    /// Shift the column by the clipped residual so the distribution matches
    /// the shortened run.
    Shift,
    /// Shift, then take for every length the maximum over the residual range.
    /// For callers clipping on estimated rather than exact coordinates.
    Spread,
}

/// Per-flow call information attached to a read, in one of the two tag
/// encodings emitted by the basecaller.
#[derive(Debug, Clone)]
pub enum FlowCallData {
    /// Per-flow arrays: called hmer length, offset of the most likely
    /// alternative call, phred of that alternative, phred of the call itself.
    MultiArray {
        called: Vec<u8>,
        alt_offsets: Vec<i8>,
        alt_phreds: Vec<u8>,
        call_phreds: Vec<u8>,
    },
    /// Per-base outlier phred; the modeled alternatives are the one-shorter
    /// and one-longer run lengths.
    BaseOutlier { outlier_phreds: Vec<u8> },
}

impl FlowCallData {
    /// Reorder per-base data into synthesis order for a reverse-strand
    /// record. Per-flow arrays are already stored in synthesis order.
    fn into_synthesis_order(self, reverse_strand: bool) -> Self {
        match self {
            FlowCallData::BaseOutlier { mut outlier_phreds } if reverse_strand => {
                outlier_phreds.reverse();
                FlowCallData::BaseOutlier { outlier_phreds }
            }
            other => other,
        }
    }
}

/// Base-space alignment facts a read carries into flow space.
#[derive(Debug, Clone, Copy, new, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct AlignmentInfo {
    reverse_strand: bool,
    hard_clip_left: usize,
    hard_clip_right: usize,
    ref_start: u64,
    ref_end: u64,
}

/// One sequencing read in flow space: key plus per-flow probability matrix.
///
/// The matrix is indexed `[possible hmer length][flow]` and holds the
/// probability that the true call at that flow has the given length, for
/// lengths `0..=max_hmer`; each column sums to at most one, the residual
/// mass sitting at unmodeled lengths.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct FlowRead {
    bases: Vec<u8>,
    #[getset(get = "pub")]
    key: Vec<u8>,
    flow2base: Vec<i32>,
    /// Expected nucleotide per flow, aligned with the key.
    #[getset(get = "pub")]
    flow_order: Vec<u8>,
    matrix: Array2<f64>,
    #[getset(get_copy = "pub")]
    direction: Direction,
    #[getset(get_copy = "pub")]
    max_hmer: usize,
    valid: bool,
    trimmed: bool,
    reverse_strand: bool,
    hard_clip_left: usize,
    hard_clip_right: usize,
    #[getset(get_copy = "pub")]
    ref_start: u64,
    #[getset(get_copy = "pub")]
    ref_end: u64,
}

impl FlowRead {
    /// Build the flow representation of a read from its synthesis-order bases,
    /// base qualities and flow call data.
    ///
    /// A read whose uncapped key exceeds `max_hmer - 1` anywhere is
    /// constructed but flagged invalid; invalidity is an ordinary data
    /// condition, not an error.
    pub fn new(
        bases: &[u8],
        quals: &[u8],
        calls: &FlowCallData,
        alignment: AlignmentInfo,
        order: &FlowOrder,
        max_hmer: usize,
    ) -> Result<Self, Error> {
        let uncapped = key::base_to_key(bases, order)?;
        let valid =
            !bases.is_empty() && uncapped.iter().all(|&count| (count as usize) < max_hmer);
        let flow_key: Vec<u8> = uncapped
            .iter()
            .map(|&count| cmp::min(count, max_hmer as u32) as u8)
            .collect();
        let flow2base = key::flow_to_base(&flow_key);
        let flow_order = key::flow_order_array(order, flow_key.len());
        let matrix = fill_matrix(&flow_key, &uncapped, quals, calls, max_hmer)?;

        Ok(FlowRead {
            bases: bases.to_vec(),
            key: flow_key,
            flow2base,
            flow_order,
            matrix,
            direction: Direction::Synthesis,
            max_hmer,
            valid,
            trimmed: false,
            reverse_strand: alignment.reverse_strand(),
            hard_clip_left: alignment.hard_clip_left(),
            hard_clip_right: alignment.hard_clip_right(),
            ref_start: alignment.ref_start(),
            ref_end: alignment.ref_end(),
        })
    }

    /// Build a flow read from an aligned BAM record, taking bases, qualities,
    /// strand, CIGAR hard clips and flow call tags from the record and flow
    /// order plus maximum hmer class from its read group.
    ///
    /// The record is expected to store the full sequence the flow call tags
    /// describe, with aligner clipping expressed as CIGAR hard clip elements;
    /// [`apply_alignment`](Self::apply_alignment) removes the clipped flows.
    pub fn from_record(record: &bam::Record, rg: &ReadGroupInfo) -> Result<Self> {
        let qname = String::from_utf8_lossy(record.qname()).into_owned();
        let mut bases = record.seq().as_bytes();
        let mut quals = record.qual().to_vec();
        let reverse_strand = utils::is_reverse_strand(record);
        let calls = flow_call_data(record, &qname)?.into_synthesis_order(reverse_strand);
        if reverse_strand {
            // BAM stores reverse-strand reads in reference orientation, while
            // flow data is modeled in synthesis order; flip back here, forward
            // again in apply_alignment
            bases = dna::revcomp(&bases);
            quals.reverse();
        }
        let cigar = record.cigar();
        let (hard_clip_left, hard_clip_right) = hard_clips(&cigar);
        let alignment = AlignmentInfo::new(
            reverse_strand,
            hard_clip_left,
            hard_clip_right,
            record.pos() as u64,
            cigar.end_pos() as u64,
        );

        FlowRead::new(
            &bases,
            &quals,
            &calls,
            alignment,
            rg.flow_order(),
            rg.max_class(),
        )
        .with_context(|| format!("failed to convert read {} into flow space", qname))
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_trimmed(&self) -> bool {
        self.trimmed
    }

    pub fn n_flows(&self) -> usize {
        self.key.len()
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Probability of observing hmer length `hmer` at the given flow; `hmer`
    /// is clamped to the modeled range.
    pub fn prob(&self, flow: usize, hmer: usize) -> f64 {
        self.matrix[(cmp::min(hmer, self.max_hmer), flow)]
    }

    /// Convert the read from synthesis to reference orientation and trim the
    /// flows covered by the aligner's hard clips.
    ///
    /// This transition happens exactly once per read; calling it twice is a
    /// contract violation and panics, unlike data-driven invalidity which is
    /// reported through [`is_valid`](Self::is_valid).
    pub fn apply_alignment(&mut self) {
        assert_eq!(
            self.direction,
            Direction::Synthesis,
            "apply_alignment must be called exactly once, on a synthesis-order read"
        );
        if self.reverse_strand {
            self.flip_to_reference_orientation();
        }
        self.clip_bases(self.hard_clip_left, self.hard_clip_right, ClipMode::Shift);
        self.direction = Direction::Reference;
    }

    /// Trim an already reference-oriented read to an arbitrary window, e.g.
    /// the span shared by all candidate haplotypes. May render the read
    /// invalid if the clip removes every informative flow.
    pub fn apply_base_clipping(&mut self, left_bases: usize, right_bases: usize, mode: ClipMode) {
        assert_eq!(
            self.direction,
            Direction::Reference,
            "base clipping requires a reference-oriented read"
        );
        self.clip_bases(left_bases, right_bases, mode);
        self.ref_start += left_bases as u64;
        self.ref_end = self.ref_end.saturating_sub(right_bases as u64);
        self.trimmed = true;
    }

    fn flip_to_reference_orientation(&mut self) {
        self.key.reverse();
        self.bases = dna::revcomp(&self.bases);

        let n_flows = self.matrix.ncols();
        let mut flipped = Array2::zeros(self.matrix.dim());
        for flow in 0..n_flows {
            flipped
                .column_mut(flow)
                .assign(&self.matrix.column(n_flows - 1 - flow));
        }
        self.matrix = flipped;

        self.flow_order = self
            .flow_order
            .iter()
            .rev()
            .map(|&nuc| dna::complement(nuc))
            .collect();
        self.flow2base = key::flow_to_base(&self.key);
    }

    /// Remove the given number of bases from each edge in flow space. All
    /// arrays are rebuilt and replaced only on success, so no partially
    /// shifted state can leak.
    fn clip_bases(&mut self, left_bases: usize, right_bases: usize, mode: ClipMode) {
        if left_bases == 0 && right_bases == 0 {
            return;
        }
        if left_bases + right_bases >= self.bases.len() {
            self.valid = false;
            return;
        }

        let (left_flows, left_residual) =
            key::find_clipping(left_bases, &self.flow2base, &self.key);
        let rev_key: Vec<u8> = self.key.iter().rev().cloned().collect();
        let rev_flow2base = key::flow_to_base(&rev_key);
        let (right_flows, right_residual) =
            key::find_clipping(right_bases, &rev_flow2base, &rev_key);

        let start = left_flows;
        let end = self.key.len() - right_flows;
        if start >= end {
            // possible for saturated (already invalid) keys, whose flow-space
            // base count undercounts the true one
            self.valid = false;
            return;
        }

        let mut new_key: Vec<u8> = self.key[start..end].to_vec();
        new_key[0] -= left_residual as u8;
        let last = new_key.len() - 1;
        new_key[last] -= right_residual as u8;

        let mut new_matrix = Array2::zeros((self.max_hmer + 1, end - start));
        for new_flow in 0..(end - start) {
            let flow = start + new_flow;
            let mut shift = 0;
            if new_flow == 0 {
                shift += left_residual as usize;
            }
            if new_flow == end - start - 1 {
                shift += right_residual as usize;
            }
            let old_col = self.matrix.column(flow);
            let mut col = new_matrix.column_mut(new_flow);
            if shift == 0 {
                col.assign(&old_col);
                continue;
            }
            match mode {
                ClipMode::Shift => {
                    for hmer in 0..=self.max_hmer {
                        col[hmer] = if hmer + shift <= self.max_hmer {
                            old_col[hmer + shift]
                        } else {
                            0.0
                        };
                    }
                }
                ClipMode::Spread => {
                    for hmer in 0..=self.max_hmer {
                        let mut best = 0.0;
                        for offset in 0..=shift {
                            if hmer + offset <= self.max_hmer {
                                best = f64::max(best, old_col[hmer + offset]);
                            }
                        }
                        col[hmer] = best;
                    }
                }
            }
        }

        self.key = new_key;
        self.matrix = new_matrix;
        self.flow_order = self.flow_order[start..end].to_vec();
        self.flow2base = key::flow_to_base(&self.key);
        self.bases = self.bases[left_bases..self.bases.len() - right_bases].to_vec();
    }
}

fn fill_matrix(
    flow_key: &[u8],
    uncapped_key: &[u32],
    quals: &[u8],
    calls: &FlowCallData,
    max_hmer: usize,
) -> Result<Array2<f64>, Error> {
    let n_flows = flow_key.len();
    let mut matrix = Array2::zeros((max_hmer + 1, n_flows));

    match calls {
        FlowCallData::MultiArray {
            called,
            alt_offsets,
            alt_phreds,
            call_phreds,
        } => {
            if called.len() != n_flows
                || alt_offsets.len() != n_flows
                || alt_phreds.len() != n_flows
                || call_phreds.len() != n_flows
                || called.as_slice() != flow_key
            {
                return Err(Error::InconsistentFlowData);
            }
            for flow in 0..n_flows {
                let called_hmer = cmp::min(flow_key[flow] as usize, max_hmer);
                let alt = flow_key[flow] as i32 + alt_offsets[flow] as i32;
                let alt = cmp::min(cmp::max(alt, 0) as usize, max_hmer);
                matrix[(alt, flow)] = utils::prob_flow_error(alt_phreds[flow]);
                matrix[(called_hmer, flow)] = utils::prob_flow_call(call_phreds[flow]);
            }
        }
        FlowCallData::BaseOutlier { outlier_phreds } => {
            // run boundaries follow the uncapped key, since saturation changes
            // counts but not which bases belong to which flow
            let n_bases = uncapped_key
                .iter()
                .map(|&count| count as usize)
                .sum::<usize>();
            if outlier_phreds.len() != n_bases || quals.len() != n_bases {
                return Err(Error::InconsistentFlowData);
            }
            let call_phreds =
                key::base_array_to_key_space(quals, uncapped_key, constants::DEFAULT_FLOW_PHRED);
            let outlier = key::base_array_to_key_space(
                outlier_phreds,
                uncapped_key,
                constants::DEFAULT_FLOW_PHRED,
            );
            for flow in 0..n_flows {
                let called_hmer = cmp::min(flow_key[flow] as usize, max_hmer);
                let prob_outlier = utils::prob_flow_error(outlier[flow]);
                if called_hmer > 0 {
                    matrix[(called_hmer - 1, flow)] = prob_outlier;
                }
                if called_hmer + 1 <= max_hmer {
                    matrix[(called_hmer + 1, flow)] = prob_outlier;
                }
                matrix[(called_hmer, flow)] = utils::prob_flow_call(call_phreds[flow]);
            }
        }
    }

    Ok(matrix)
}

fn hard_clips(cigar: &CigarStringView) -> (usize, usize) {
    let left = match cigar.iter().next() {
        Some(Cigar::HardClip(len)) => *len as usize,
        _ => 0,
    };
    let right = match cigar.iter().last() {
        Some(Cigar::HardClip(len)) if cigar.len() > 1 => *len as usize,
        _ => 0,
    };
    (left, right)
}

fn flow_call_data(record: &bam::Record, qname: &str) -> Result<FlowCallData> {
    let missing = |tag: &str| Error::MissingAuxTag {
        qname: qname.to_owned(),
        tag: tag.to_owned(),
    };
    let malformed = |tag: &str| Error::MalformedAuxTag {
        qname: qname.to_owned(),
        tag: tag.to_owned(),
    };

    match record.aux(b"kr") {
        Ok(Aux::ArrayU8(called)) => {
            let called: Vec<u8> = called.iter().collect();
            let alt_offsets: Vec<i8> = match record.aux(b"ti") {
                Ok(Aux::ArrayI8(values)) => values.iter().collect(),
                Ok(_) => return Err(malformed("ti").into()),
                Err(_) => return Err(missing("ti").into()),
            };
            let alt_phreds: Vec<u8> = match record.aux(b"fi") {
                Ok(Aux::ArrayU8(values)) => values.iter().collect(),
                Ok(_) => return Err(malformed("fi").into()),
                Err(_) => return Err(missing("fi").into()),
            };
            let call_phreds: Vec<u8> = match record.aux(b"kp") {
                Ok(Aux::ArrayU8(values)) => values.iter().collect(),
                Ok(_) => return Err(malformed("kp").into()),
                Err(_) => return Err(missing("kp").into()),
            };
            Ok(FlowCallData::MultiArray {
                called,
                alt_offsets,
                alt_phreds,
                call_phreds,
            })
        }
        Ok(_) => Err(malformed("kr").into()),
        Err(_) => match record.aux(b"t0") {
            // phred+33, like the QUAL column
            Ok(Aux::String(values)) => Ok(FlowCallData::BaseOutlier {
                outlier_phreds: values.bytes().map(|c| c.saturating_sub(33)).collect(),
            }),
            Ok(_) => Err(malformed("t0").into()),
            Err(_) => Err(missing("t0").into()),
        },
    }
}
