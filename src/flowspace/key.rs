// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Stateless conversions between base space and flow space.
//!
//! The flow-space key of a sequence holds one entry per flow: the length of
//! the homopolymer run read while the instrument queried that flow's
//! nucleotide. Summing a key recovers the base count, expanding it through
//! the flow order recovers the bases themselves.

use std::cmp;

use crate::errors::Error;

/// Cyclic nucleotide order queried by the instrument, e.g. `TGCA`.
///
/// Index `i` maps to `order[i mod cycle_len]`; the cycle length is whatever
/// the instrument defines, commonly but not necessarily four.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOrder {
    symbols: Vec<u8>,
}

impl FlowOrder {
    pub fn new(symbols: &[u8]) -> Result<Self, Error> {
        if symbols.is_empty() {
            return Err(Error::EmptyFlowOrder);
        }
        for &symbol in symbols {
            if !matches!(symbol.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T') {
                return Err(Error::InvalidFlowOrder {
                    symbol: symbol as char,
                });
            }
        }
        Ok(FlowOrder {
            symbols: symbols.to_ascii_uppercase(),
        })
    }

    pub fn cycle_len(&self) -> usize {
        self.symbols.len()
    }

    /// Nucleotide queried at the given flow.
    #[inline]
    pub fn nucleotide(&self, flow: usize) -> u8 {
        self.symbols[flow % self.symbols.len()]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.symbols
    }
}

#[inline]
fn base_matches_flow(base: u8, expected: u8) -> bool {
    let base = base.to_ascii_uppercase();
    // 'N' is a wildcard and matches whatever nucleotide the flow queries
    base == expected || base == b'N'
}

/// Convert a base sequence into its flow-space key.
///
/// Scans left to right; at each flow the maximal run of bases matching that
/// flow's nucleotide is consumed as the flow's count (zero if none match),
/// until all bases are consumed. A base matching no nucleotide of the cycle
/// is a data error, not an endless scan.
pub fn base_to_key(bases: &[u8], order: &FlowOrder) -> Result<Vec<u32>, Error> {
    let mut key = Vec::with_capacity(bases.len() + order.cycle_len());
    let mut pos = 0;
    let mut flow = 0;
    let mut idle_flows = 0;

    while pos < bases.len() {
        let expected = order.nucleotide(flow);
        let mut run = 0u32;
        while pos < bases.len() && base_matches_flow(bases[pos], expected) {
            run += 1;
            pos += 1;
        }
        if run == 0 {
            idle_flows += 1;
            if idle_flows >= order.cycle_len() {
                return Err(Error::UnexpectedBase {
                    base: bases[pos] as char,
                });
            }
        } else {
            idle_flows = 0;
        }
        key.push(run);
        flow += 1;
    }

    Ok(key)
}

/// Like [`base_to_key`], but saturates each count at `max_class` for compact
/// byte-sized keys.
pub fn base_to_key_capped(
    bases: &[u8],
    order: &FlowOrder,
    max_class: usize,
) -> Result<Vec<u8>, Error> {
    Ok(base_to_key(bases, order)?
        .into_iter()
        .map(|count| cmp::min(count, max_class as u32) as u8)
        .collect())
}

/// Expand a key back into bases. Inverse of [`base_to_key`] except that
/// wildcard 'N' bases come back as the flow nucleotide they matched.
pub fn key_to_bases<T>(key: &[T], order: &FlowOrder) -> Vec<u8>
where
    T: Copy + Into<i64>,
{
    let mut bases = Vec::new();
    for (flow, &count) in key.iter().enumerate() {
        for _ in 0..count.into() {
            bases.push(order.nucleotide(flow));
        }
    }
    bases
}

/// Derive the flow-to-base index: entry `i` is the base-space offset of the
/// last base emitted strictly before flow `i` begins (`-1` for flow 0).
pub fn flow_to_base<T>(key: &[T]) -> Vec<i32>
where
    T: Copy + Into<i64>,
{
    let mut index = vec![-1i32; key.len()];
    for i in 1..key.len() {
        index[i] = index[i - 1] + key[i - 1].into() as i32;
    }
    index
}

/// Materialize the expected nucleotide for each of `len` flows.
pub fn flow_order_array(order: &FlowOrder, len: usize) -> Vec<u8> {
    (0..len).map(|flow| order.nucleotide(flow)).collect()
}

/// Project a per-base score array into key space.
///
/// Each non-empty flow takes the minimum score of its run, so that a single
/// bad base degrades the whole run; empty flows inherit the last filled
/// flow's value, leading empty flows the given default.
pub fn base_array_to_key_space<T>(values: &[u8], key: &[T], default: u8) -> Vec<u8>
where
    T: Copy + Into<i64>,
{
    assert_eq!(
        values.len() as i64,
        key.iter().map(|&count| count.into()).sum::<i64>(),
        "per-base array and key describe different base counts"
    );

    let mut projected = Vec::with_capacity(key.len());
    let mut pos = 0;
    let mut last = default;
    for &count in key {
        let count = count.into() as usize;
        if count > 0 {
            let run = &values[pos..pos + count];
            last = run.iter().cloned().min().unwrap();
            pos += count;
        }
        projected.push(last);
    }
    projected
}

/// Translate a base-space clip amount into `(flows to remove, hmer units to
/// subtract from the boundary flow)`.
///
/// The scan stops on the flow holding the first surviving base, so flows
/// wholly consumed by the clip (including empty ones) are removed outright
/// and the boundary flow's count stays positive after the residual is taken
/// off. A zero clip request is the explicit identity `(0, 0)`.
pub fn find_clipping<T>(base_clipping: usize, flow2base: &[i32], key: &[T]) -> (usize, u32)
where
    T: Copy + Into<i64>,
{
    if base_clipping == 0 {
        return (0, 0);
    }
    for i in 0..flow2base.len() {
        if flow2base[i] as i64 + key[i].into() >= base_clipping as i64 {
            let residual = base_clipping as i64 - flow2base[i] as i64 - 1;
            return (i, residual as u32);
        }
    }
    // clip swallows the whole sequence
    (flow2base.len(), 0)
}
