//! Priority scoring for task scheduling.
//!
//! This module provides the pure priority calculator: given a snapshot
//! of a task's stored fields plus resolver-derived graph metrics, it
//! returns a deterministic score. Higher scores are claimed first; ties
//! break by submission time, then task id.

mod priority;

pub use priority::{
    DEPENDENTS_MAX, PriorityInputs, SOURCE_AGENT, SOURCE_DECOMPOSITION, SOURCE_HUMAN,
    SOURCE_MAINTENANCE, STARVATION_MAX, STARVATION_PER_MINUTE, URGENCY_HORIZON_MS, URGENCY_MAX,
    WEIGHT_BASE, WEIGHT_DEPENDENCY, WEIGHT_SOURCE, WEIGHT_STARVATION, WEIGHT_URGENCY,
    calculate_priority, compare_tasks, source_score,
};
