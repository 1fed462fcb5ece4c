//! Aggregation: executing invocations in single, routed, or fan-out mode
//! and merging multi-backend results into one answer.

pub mod aggregator;
pub mod merge;

pub use aggregator::{
    Aggregator, BranchFailure, BranchOutcome, InvocationMode, ResultEnvelope, DEFAULT_CALL_TIMEOUT,
};
pub use merge::{
    HighestConfidenceMerger, ListUnionMerger, MergerRegistry, NumericAverageMerger, ResultMerger,
    TaggedMapMerger,
};
