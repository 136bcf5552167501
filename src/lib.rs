// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Flow-space likelihood computation for reads from flow-based (cyclic
//! nucleotide flow-cell) sequencers.
//!
//! Instead of aligning read and haplotype base by base with a pair HMM, the
//! model works on the flow-space key of each sequence: one homopolymer run
//! length per flow of the cyclic nucleotide order. Since flow-based miscalls
//! are almost exclusively wrong run lengths, comparing two keys reduces to
//! finding the best starting offset and summing per-flow call probabilities.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate getset;
#[macro_use]
extern crate derive_new;
#[cfg(test)]
#[macro_use]
extern crate approx;

pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod flowspace;
pub mod readgroup;
pub(crate) mod utils;

pub use crate::config::LikelihoodParams;
pub use crate::engine::{AlleleLikelihoods, FlowLikelihoodEngine};
pub use crate::flowspace::FlowOrder;
