// Copyright 2020 Johannes Köster.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::str;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rust_htslib::bam::{self, record::Aux, HeaderView};

use crate::errors::Error;
use crate::flowspace::FlowOrder;

/// Flow metadata of a single read group, parsed from its `@RG` header line.
///
/// The flow order comes from the `FO` field; the maximum hmer class from the
/// vendor `mc` field, falling back to the engine default when absent. A read
/// group without a flow order is a fatal configuration error, since nothing
/// in flow space can be computed without one.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct ReadGroupInfo {
    #[getset(get = "pub")]
    id: String,
    #[getset(get = "pub")]
    flow_order: FlowOrder,
    #[getset(get_copy = "pub")]
    max_class: usize,
}

impl ReadGroupInfo {
    pub fn parse(header: &HeaderView, rg_id: &str, default_max_class: usize) -> Result<Self> {
        let text = str::from_utf8(header.as_bytes())?;
        for line in text.lines() {
            if !line.starts_with("@RG") {
                continue;
            }
            let mut id = None;
            let mut flow_order = None;
            let mut max_class = default_max_class;
            for field in line.split('\t').skip(1) {
                if let Some(value) = field.strip_prefix("ID:") {
                    id = Some(value);
                } else if let Some(value) = field.strip_prefix("FO:") {
                    flow_order = Some(value);
                } else if let Some(value) = field.strip_prefix("mc:") {
                    if let Ok(value) = value.parse() {
                        max_class = value;
                    }
                }
            }
            if id != Some(rg_id) {
                continue;
            }
            let flow_order = flow_order.ok_or_else(|| Error::MissingFlowOrder {
                rg_id: rg_id.to_owned(),
            })?;
            // keys are periodic in the flow order, so the FO field may spell
            // out many cycles; a single cycle is all that is needed
            let cycle = single_cycle(flow_order.as_bytes());
            return Ok(ReadGroupInfo {
                id: rg_id.to_owned(),
                flow_order: FlowOrder::new(cycle)?,
                max_class,
            });
        }
        Err(Error::UnknownReadGroup {
            rg_id: rg_id.to_owned(),
        }
        .into())
    }
}

/// Reduce a possibly repeated flow order spelling to one cycle.
fn single_cycle(spelled: &[u8]) -> &[u8] {
    for cycle_len in 1..spelled.len() {
        if spelled.len() % cycle_len == 0
            && spelled
                .iter()
                .enumerate()
                .all(|(i, &symbol)| symbol == spelled[i % cycle_len])
        {
            return &spelled[..cycle_len];
        }
    }
    spelled
}

/// Read group id a record belongs to, from its `RG` aux tag.
pub fn record_read_group(record: &bam::Record) -> Result<String> {
    match record.aux(b"RG") {
        Ok(Aux::String(rg_id)) => Ok(rg_id.to_owned()),
        _ => Err(Error::MissingReadGroup {
            qname: String::from_utf8_lossy(record.qname()).into_owned(),
        }
        .into()),
    }
}

/// Cache of read group metadata, owned by the engine session.
///
/// Populated lazily under the lock; values are immutable once inserted and
/// never evicted for the lifetime of the session, so concurrent first-time
/// population from multiple regions is safe.
#[derive(Debug, Default)]
pub struct ReadGroupCache {
    inner: Mutex<HashMap<String, Arc<ReadGroupInfo>>>,
}

impl ReadGroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a read group already known to the cache.
    pub fn get(&self, rg_id: &str) -> Result<Arc<ReadGroupInfo>> {
        self.inner
            .lock()
            .unwrap()
            .get(rg_id)
            .cloned()
            .ok_or_else(|| {
                Error::UnknownReadGroup {
                    rg_id: rg_id.to_owned(),
                }
                .into()
            })
    }

    /// Look up a read group, parsing it from the header on first access.
    pub fn get_or_parse(
        &self,
        header: &HeaderView,
        rg_id: &str,
        default_max_class: usize,
    ) -> Result<Arc<ReadGroupInfo>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(info) = inner.get(rg_id) {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(ReadGroupInfo::parse(header, rg_id, default_max_class)?);
        inner.insert(rg_id.to_owned(), Arc::clone(&info));
        Ok(info)
    }

    /// Parse every read group of the header into the cache, so that lookups
    /// can afterwards proceed without header access (e.g. from worker
    /// threads).
    pub fn populate(&self, header: &HeaderView, default_max_class: usize) -> Result<()> {
        let text = str::from_utf8(header.as_bytes())?.to_owned();
        for line in text.lines() {
            if !line.starts_with("@RG") {
                continue;
            }
            if let Some(rg_id) = line
                .split('\t')
                .skip(1)
                .find_map(|field| field.strip_prefix("ID:"))
            {
                self.get_or_parse(header, rg_id, default_max_class)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::header::HeaderRecord;

    fn header(rg_fields: &[(&str, &str)]) -> HeaderView {
        let mut header = bam::Header::new();
        let mut rg = HeaderRecord::new(b"RG");
        for (tag, value) in rg_fields {
            rg.push_tag(tag.as_bytes(), value);
        }
        header.push_record(&rg);
        HeaderView::from_header(&header)
    }

    #[test]
    fn test_parse_read_group() {
        let header = header(&[("ID", "rg1"), ("SM", "s1"), ("FO", "TGCA"), ("mc", "10")]);
        let info = ReadGroupInfo::parse(&header, "rg1", 12).unwrap();
        assert_eq!(info.flow_order().as_bytes(), b"TGCA");
        assert_eq!(info.max_class(), 10);
    }

    #[test]
    fn test_spelled_out_flow_order_is_reduced() {
        let header = header(&[("ID", "rg1"), ("FO", "TGCATGCATGCA")]);
        let info = ReadGroupInfo::parse(&header, "rg1", 12).unwrap();
        assert_eq!(info.flow_order().as_bytes(), b"TGCA");
        assert_eq!(info.max_class(), 12);
    }

    #[test]
    fn test_missing_flow_order_is_fatal() {
        let header = header(&[("ID", "rg1"), ("SM", "s1")]);
        let err = ReadGroupInfo::parse(&header, "rg1", 12).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::MissingFlowOrder {
                rg_id: "rg1".to_owned()
            })
        );
    }

    #[test]
    fn test_cache_inserts_once() {
        let header = header(&[("ID", "rg1"), ("FO", "TGCA")]);
        let cache = ReadGroupCache::new();
        assert!(cache.get("rg1").is_err());
        let first = cache.get_or_parse(&header, "rg1", 12).unwrap();
        let second = cache.get_or_parse(&header, "rg1", 12).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.get("rg1").is_ok());
    }
}
