// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Orchestration of flow-space scoring over every (haplotype, read) pair of
//! every sample of a genomic region.

use std::cmp;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bio_types::genome::{self, AbstractInterval};
use crossbeam::channel::{Receiver, Sender};
use itertools::Itertools;
use rayon::prelude::*;
use rust_htslib::bam::{self, record::CigarString, HeaderView};

use crate::config::LikelihoodParams;
use crate::errors::Error;
use crate::flowspace::{ClipMode, FlowAligner, FlowHaplotype, FlowRead};
use crate::readgroup::{record_read_group, ReadGroupCache};
use crate::utils::worker_pool::{worker_pool, Orderable};

pub mod likelihoods;

pub use likelihoods::{log10_min_true_likelihood, AlleleLikelihoods};

/// One candidate allele over the active region: its sequence, the reference
/// span it covers and its alignment against the reference.
#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
pub struct HaplotypeAllele {
    #[getset(get = "pub")]
    bases: Vec<u8>,
    #[getset(get = "pub")]
    interval: genome::Interval,
    #[getset(get = "pub")]
    cigar: CigarString,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    is_ref: bool,
}

/// Reads of one sample over the active region.
#[derive(Debug, Clone, new, Getters)]
#[getset(get = "pub")]
pub struct SampleReads {
    name: String,
    records: Vec<bam::Record>,
}

/// A self-contained unit of work: alleles and reads of one genomic region.
#[derive(Debug, new)]
pub struct Region {
    pub alleles: Vec<HaplotypeAllele>,
    pub samples: Vec<SampleReads>,
}

/// Computed matrices of one region, tagged with their submission index so
/// the worker pool can emit them in input order.
#[derive(Debug, new)]
struct RegionLikelihoods {
    index: usize,
    likelihoods: AlleleLikelihoods,
}

impl Orderable for RegionLikelihoods {
    fn index(&self) -> usize {
        self.index
    }
}

/// Computes the read versus haplotype likelihood matrix of genomic regions.
///
/// The engine owns the per-read-group metadata cache; all flow
/// representations are created per region and discarded with it.
#[derive(Debug)]
pub struct FlowLikelihoodEngine {
    params: LikelihoodParams,
    read_groups: ReadGroupCache,
}

impl FlowLikelihoodEngine {
    pub fn new(params: LikelihoodParams) -> Self {
        FlowLikelihoodEngine {
            params,
            read_groups: ReadGroupCache::new(),
        }
    }

    pub fn params(&self) -> &LikelihoodParams {
        &self.params
    }

    /// Compute the per-sample log10 likelihood matrices of one region.
    ///
    /// Every read is converted to flow space, reoriented and clipped to the
    /// common haplotype window; every haplotype is converted once per flow
    /// order; every (allele, read) pair is scored; finally the matrix is
    /// mismapping-normalized and poorly modeled reads are flagged.
    pub fn compute_log10_likelihoods(
        &self,
        header: &HeaderView,
        alleles: &[HaplotypeAllele],
        samples: &[SampleReads],
    ) -> Result<AlleleLikelihoods> {
        for sample in samples {
            for record in sample.records() {
                let rg_id = record_read_group(record)?;
                self.read_groups
                    .get_or_parse(header, &rg_id, self.params.max_hmer_class)?;
            }
        }
        self.compute_with_cached_read_groups(alleles, samples)
    }

    /// Process independent regions concurrently on a scoped worker pool,
    /// handing each matrix to the consumer in submission order.
    pub fn process_regions<I, F>(
        &self,
        header: &HeaderView,
        regions: I,
        n_workers: usize,
        consumer: F,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Region> + Send,
        F: FnMut(AlleleLikelihoods) -> Result<()> + Send,
    {
        // resolve all read groups up front; the workers then run without
        // touching the header
        self.read_groups
            .populate(header, self.params.max_hmer_class)?;

        let n_workers = cmp::max(n_workers, 1);
        let mut consumer = consumer;
        worker_pool(
            move |sender: Sender<(usize, Region)>| {
                for item in regions.into_iter().enumerate() {
                    if sender.send(item).is_err() {
                        break;
                    }
                }
                Ok(())
            },
            (0..n_workers).map(|_| {
                |receiver: Receiver<(usize, Region)>,
                 sender: Sender<Box<RegionLikelihoods>>|
                 -> Result<()> {
                    for (index, region) in receiver {
                        let likelihoods =
                            self.compute_with_cached_read_groups(&region.alleles, &region.samples)?;
                        if sender
                            .send(Box::new(RegionLikelihoods::new(index, likelihoods)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(())
                }
            }),
            |item: Box<RegionLikelihoods>| consumer(item.likelihoods),
            n_workers * 2,
            n_workers * 2,
        )
    }

    fn compute_with_cached_read_groups(
        &self,
        alleles: &[HaplotypeAllele],
        samples: &[SampleReads],
    ) -> Result<AlleleLikelihoods> {
        let window = common_window(alleles)?;

        let mut likelihoods = AlleleLikelihoods::new(
            samples
                .iter()
                .map(|sample| sample.name().clone())
                .collect_vec(),
            alleles.len(),
            &samples
                .iter()
                .map(|sample| sample.records().len())
                .collect_vec(),
        );
        let mut read_lens = Vec::with_capacity(samples.len());

        // flow haplotypes are immutable and shared by every read of the same
        // flow order, but never across flow orders
        let mut flow_haplotypes: HashMap<Vec<u8>, Arc<Vec<FlowHaplotype>>> = HashMap::new();

        for (sample_index, sample) in samples.iter().enumerate() {
            let mut reads = Vec::with_capacity(sample.records().len());
            for record in sample.records() {
                let rg = self.read_groups.get(&record_read_group(record)?)?;
                let mut read = FlowRead::from_record(record, &rg)?;
                read.apply_alignment();
                let left = window.range().start.saturating_sub(read.ref_start()) as usize;
                let right = read.ref_end().saturating_sub(window.range().end) as usize;
                read.apply_base_clipping(left, right, ClipMode::Shift);

                let order_key = rg.flow_order().as_bytes().to_vec();
                let haplotypes = match flow_haplotypes.get(&order_key) {
                    Some(haplotypes) => Arc::clone(haplotypes),
                    None => {
                        let built = alleles
                            .iter()
                            .map(|allele| {
                                FlowHaplotype::new(
                                    allele.bases(),
                                    allele.interval().clone(),
                                    allele.cigar().clone(),
                                    allele.is_ref(),
                                    rg.flow_order(),
                                )
                            })
                            .collect::<Result<Vec<_>, Error>>()?;
                        let built = Arc::new(built);
                        flow_haplotypes.insert(order_key, Arc::clone(&built));
                        built
                    }
                };
                reads.push((read, haplotypes));
            }

            // each pair is independent and the scan is pure, so score them in
            // parallel at read granularity
            let aligner = FlowAligner::new(&self.params);
            let columns: Vec<Vec<f64>> = reads
                .par_iter()
                .map(|(read, haplotypes)| {
                    haplotypes
                        .iter()
                        .map(|haplotype| aligner.score(haplotype, read))
                        .collect()
                })
                .collect();

            for (read_index, ((read, _), column)) in reads.iter().zip(columns).enumerate() {
                if !read.is_valid() {
                    likelihoods.set_uninformative(sample_index, read_index);
                    debug!(
                        "read {} of sample {} is invalid in flow space and contributes no information",
                        read_index,
                        sample.name()
                    );
                }
                for (allele_index, value) in column.into_iter().enumerate() {
                    likelihoods.set(sample_index, allele_index, read_index, value);
                }
            }
            read_lens.push(reads.iter().map(|(read, _)| read.len()).collect());
        }

        likelihoods.normalize_likelihoods(self.params.log10_global_read_mismapping_rate);
        if self.params.filter_poorly_modeled_reads {
            let params = &self.params;
            let n_filtered = likelihoods.filter_poorly_modeled_evidence(&read_lens, |len| {
                log10_min_true_likelihood(params, len)
            });
            if n_filtered > 0 {
                debug!("{} reads excluded as poorly modeled", n_filtered);
            }
        }

        Ok(likelihoods)
    }
}

/// Window shared by all candidate alleles of a region: the span of the
/// reference allele, or of the first allele if none is flagged as reference.
fn common_window(alleles: &[HaplotypeAllele]) -> Result<genome::Interval> {
    alleles
        .iter()
        .find(|allele| allele.is_ref())
        .or_else(|| alleles.first())
        .map(|allele| allele.interval().clone())
        .ok_or_else(|| Error::NoAlleles.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::header::HeaderRecord;
    use rust_htslib::bam::record::Cigar;

    fn header_view() -> HeaderView {
        let mut header = bam::Header::new();
        let mut sq = HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", &"chr1");
        sq.push_tag(b"LN", &1000);
        header.push_record(&sq);
        let mut rg = HeaderRecord::new(b"RG");
        rg.push_tag(b"ID", &"rg1");
        rg.push_tag(b"SM", &"s1");
        rg.push_tag(b"FO", &"TGCA");
        header.push_record(&rg);
        HeaderView::from_header(&header)
    }

    fn record(header: &HeaderView, sam: &str) -> bam::Record {
        bam::Record::from_sam(header, sam.as_bytes()).unwrap()
    }

    fn alleles() -> Vec<HaplotypeAllele> {
        vec![
            HaplotypeAlleleBuilder::default()
                .bases(b"TTAATG".to_vec())
                .interval(genome::Interval::new("chr1".to_owned(), 100..106))
                .cigar(CigarString(vec![Cigar::Match(6)]))
                .is_ref(true)
                .build()
                .unwrap(),
            // one T inserted into the first hmer
            HaplotypeAlleleBuilder::default()
                .bases(b"TTTAATG".to_vec())
                .interval(genome::Interval::new("chr1".to_owned(), 100..106))
                .cigar(CigarString(vec![
                    Cigar::Match(2),
                    Cigar::Ins(1),
                    Cigar::Match(4),
                ]))
                .build()
                .unwrap(),
        ]
    }

    fn sample_reads(header: &HeaderView) -> SampleReads {
        sample_reads_with_qual(header, '?')
    }

    fn sample_reads_with_qual(header: &HeaderView, qual: char) -> SampleReads {
        let sam = format!(
            "read1\t0\tchr1\t101\t60\t6M\t*\t0\t0\tTTAATG\t{}\tRG:Z:rg1\tt0:Z:555555",
            qual.to_string().repeat(6)
        );
        SampleReads::new("s1".to_owned(), vec![record(header, &sam)])
    }

    #[test]
    fn test_compute_log10_likelihoods() {
        let header = header_view();
        let engine = FlowLikelihoodEngine::new(LikelihoodParams::default());
        let likelihoods = engine
            .compute_log10_likelihoods(&header, &alleles(), &[sample_reads(&header)])
            .unwrap();

        assert_eq!(likelihoods.n_alleles(), 2);
        assert_eq!(likelihoods.sample_matrix(0).ncols(), 1);
        assert!(likelihoods.is_informative(0, 0));

        let prob_ref = likelihoods.likelihood(0, 0, 0);
        let prob_alt = likelihoods.likelihood(0, 1, 0);
        assert!(prob_ref.is_finite() && prob_ref < 0.0);
        assert!(
            prob_ref > prob_alt,
            "read from the reference allele must prefer it ({} vs {})",
            prob_ref,
            prob_alt
        );
    }

    #[test]
    fn test_missing_read_group_is_an_error() {
        let header = header_view();
        let engine = FlowLikelihoodEngine::new(LikelihoodParams::default());
        let reads = SampleReads::new(
            "s1".to_owned(),
            vec![record(
                &header,
                "read1\t0\tchr1\t101\t60\t6M\t*\t0\t0\tTTAATG\t??????\tt0:Z:555555",
            )],
        );
        assert!(engine
            .compute_log10_likelihoods(&header, &alleles(), &[reads])
            .is_err());
    }

    #[test]
    fn test_process_regions_preserves_order() {
        let header = header_view();
        let engine = FlowLikelihoodEngine::new(LikelihoodParams::default());
        // rising base qualities make each region's likelihood strictly larger
        // than its predecessor's, so submission order is observable
        let regions = (0..8)
            .map(|i| {
                Region::new(
                    alleles(),
                    vec![sample_reads_with_qual(&header, (b'#' + i as u8) as char)],
                )
            })
            .collect_vec();

        let mut collected = Vec::new();
        engine
            .process_regions(&header, regions, 4, |likelihoods| {
                collected.push(likelihoods.likelihood(0, 0, 0));
                Ok(())
            })
            .unwrap();

        assert_eq!(collected.len(), 8);
        for pair in collected.windows(2) {
            assert!(pair[0] < pair[1], "out of order: {} !< {}", pair[0], pair[1]);
        }
    }
}
