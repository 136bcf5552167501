use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("flow order is empty; at least one nucleotide per cycle is required")]
    EmptyFlowOrder,
    #[error("flow order contains invalid symbol '{symbol}'; only A, C, G and T are allowed")]
    InvalidFlowOrder { symbol: char },
    #[error("no flow order (FO) defined for read group {rg_id}; flow-space likelihoods cannot be computed without one")]
    MissingFlowOrder { rg_id: String },
    #[error("read group {rg_id} is not defined in the given header")]
    UnknownReadGroup { rg_id: String },
    #[error("read {qname} carries no RG aux tag and cannot be assigned a flow order")]
    MissingReadGroup { qname: String },
    #[error("expected aux tag {tag} missing from read {qname}")]
    MissingAuxTag { qname: String, tag: String },
    #[error("aux tag {tag} of read {qname} has unexpected type or length")]
    MalformedAuxTag { qname: String, tag: String },
    #[error("flow call arrays are inconsistent with the base sequence")]
    InconsistentFlowData,
    #[error("base '{base}' matches no nucleotide of the flow order")]
    UnexpectedBase { base: char },
    #[error("no candidate alleles given for likelihood computation")]
    NoAlleles,
}
