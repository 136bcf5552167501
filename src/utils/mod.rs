// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::{LogProb, PHREDProb, Prob};
use rust_htslib::bam;

pub(crate) mod worker_pool;

pub(crate) fn is_reverse_strand(record: &bam::Record) -> bool {
    record.flags() & 0x10 != 0
}

fn _phred_to_prob_error(phred: u8) -> f64 {
    *Prob::from(LogProb::from(PHREDProb(phred as f64)))
}

lazy_static! {
    /// Phred score to linear error probability.
    pub(crate) static ref PHRED_TO_PROB_ERROR: [f64; 256] = {
        let mut probs = [0.0; 256];
        for (phred, prob) in probs.iter_mut().enumerate() {
            *prob = _phred_to_prob_error(phred as u8);
        }
        probs
    };
    /// Phred score to probability that the call is correct (1 - 10^(-phred/10)).
    pub(crate) static ref PHRED_TO_PROB_CALL: [f64; 256] = {
        let mut probs = [0.0; 256];
        for (phred, prob) in PHRED_TO_PROB_ERROR.iter().enumerate() {
            probs[phred] = 1.0 - prob;
        }
        probs
    };
}

/// Probability that a flow call with the given phred score is wrong.
pub(crate) fn prob_flow_error(phred: u8) -> f64 {
    PHRED_TO_PROB_ERROR[phred as usize]
}

/// Probability that a flow call with the given phred score is correct.
pub(crate) fn prob_flow_call(phred: u8) -> f64 {
    PHRED_TO_PROB_CALL[phred as usize]
}
