//! Priority calculation for ready and pending tasks.
//!
//! Tasks are scored by:
//! - Base priority declared at submission (0..=10)
//! - Urgency as an optional deadline approaches
//! - Dependency score (tasks blocking more work are boosted)
//! - Starvation score (+ per minute waiting, capped)
//! - Source boost (human > decomposition > agent > maintenance)
//!
//! The calculator is pure: the same `PriorityInputs` always produce the
//! same score.

use std::cmp::Ordering;

use crate::domain::{TaskRecord, TaskSource};

/// Component weights.
pub const WEIGHT_BASE: f64 = 1.0;
pub const WEIGHT_URGENCY: f64 = 2.0;
pub const WEIGHT_DEPENDENCY: f64 = 1.5;
pub const WEIGHT_STARVATION: f64 = 0.5;
pub const WEIGHT_SOURCE: f64 = 1.0;

/// Urgency ramps from 0 to this cap as the deadline closes in.
pub const URGENCY_MAX: f64 = 10.0;
/// Urgency starts rising once the deadline is within this window.
pub const URGENCY_HORIZON_MS: i64 = 24 * 60 * 60 * 1000;

/// Starvation boost: + per minute waiting since submission.
pub const STARVATION_PER_MINUTE: f64 = 0.1;
/// Maximum starvation boost.
pub const STARVATION_MAX: f64 = 10.0;

/// Dependency score saturates at this many transitive dependents.
pub const DEPENDENTS_MAX: f64 = 20.0;

/// Source boosts by origin tier.
pub const SOURCE_HUMAN: f64 = 3.0;
pub const SOURCE_DECOMPOSITION: f64 = 2.0;
pub const SOURCE_AGENT: f64 = 1.0;
pub const SOURCE_MAINTENANCE: f64 = 0.5;

/// Snapshot of everything the calculator needs.
///
/// `dependents` comes from the resolver's score cache; everything else
/// is stored task state. `now` is passed in so scoring stays pure and
/// testable.
#[derive(Debug, Clone, Copy)]
pub struct PriorityInputs {
    pub base_priority: i32,
    pub source: TaskSource,
    pub created_at: i64,
    pub deadline: Option<i64>,
    pub dependents: usize,
    pub now: i64,
}

impl PriorityInputs {
    /// Build inputs from a task record plus resolver output.
    pub fn from_task(task: &TaskRecord, dependents: usize, now: i64) -> Self {
        Self {
            base_priority: task.base_priority,
            source: task.source,
            created_at: task.created_at,
            deadline: task.deadline,
            dependents,
            now,
        }
    }
}

/// Get the fixed source boost for an origin tier.
pub fn source_score(source: TaskSource) -> f64 {
    match source {
        TaskSource::Human => SOURCE_HUMAN,
        TaskSource::Decomposition => SOURCE_DECOMPOSITION,
        TaskSource::Agent => SOURCE_AGENT,
        TaskSource::Maintenance => SOURCE_MAINTENANCE,
    }
}

/// Calculate the priority score for a task.
///
/// Higher scores are claimed first.
pub fn calculate_priority(inputs: &PriorityInputs) -> f64 {
    let base = inputs.base_priority as f64;
    let urgency = urgency_score(inputs.deadline, inputs.now);
    let dependency = (inputs.dependents as f64).min(DEPENDENTS_MAX);
    let starvation = starvation_score(inputs.created_at, inputs.now);
    let source = source_score(inputs.source);

    base * WEIGHT_BASE
        + urgency * WEIGHT_URGENCY
        + dependency * WEIGHT_DEPENDENCY
        + starvation * WEIGHT_STARVATION
        + source * WEIGHT_SOURCE
}

/// Urgency component: 0 with no deadline, ramping to `URGENCY_MAX` as
/// the deadline approaches, saturated once past due.
fn urgency_score(deadline: Option<i64>, now: i64) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let remaining = deadline - now;
    if remaining <= 0 {
        return URGENCY_MAX;
    }
    if remaining >= URGENCY_HORIZON_MS {
        return 0.0;
    }
    URGENCY_MAX * (1.0 - remaining as f64 / URGENCY_HORIZON_MS as f64)
}

/// Starvation component: grows with wall-clock age, capped.
fn starvation_score(created_at: i64, now: i64) -> f64 {
    let age_minutes = ((now - created_at).max(0) / 60_000) as f64;
    (age_minutes * STARVATION_PER_MINUTE).min(STARVATION_MAX)
}

/// Deterministic claim ordering: computed priority descending, then
/// submission time ascending (FIFO), then id ascending.
pub fn compare_tasks(a: &TaskRecord, b: &TaskRecord) -> Ordering {
    b.computed_priority
        .partial_cmp(&a.computed_priority)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_800_000_000_000;

    fn inputs() -> PriorityInputs {
        PriorityInputs {
            base_priority: 5,
            source: TaskSource::Agent,
            created_at: NOW,
            deadline: None,
            dependents: 0,
            now: NOW,
        }
    }

    #[test]
    fn test_baseline_score() {
        // base 5*1.0 + source agent 1.0*1.0, no urgency/starvation/deps
        let score = calculate_priority(&inputs());
        assert_eq!(score, 6.0);
    }

    #[test]
    fn test_deterministic() {
        let i = inputs();
        assert_eq!(calculate_priority(&i), calculate_priority(&i));
    }

    #[test]
    fn test_more_dependents_scores_higher() {
        let leaf = inputs();
        let mut blocking = inputs();
        blocking.dependents = 4;

        assert!(calculate_priority(&blocking) > calculate_priority(&leaf));
        // 4 dependents * 1.5
        assert_eq!(
            calculate_priority(&blocking) - calculate_priority(&leaf),
            6.0
        );
    }

    #[test]
    fn test_dependents_capped() {
        let mut at_cap = inputs();
        at_cap.dependents = 20;
        let mut over_cap = inputs();
        over_cap.dependents = 500;

        assert_eq!(calculate_priority(&at_cap), calculate_priority(&over_cap));
    }

    #[test]
    fn test_no_deadline_no_urgency() {
        let mut far = inputs();
        far.deadline = Some(NOW + URGENCY_HORIZON_MS * 2);
        // Outside the horizon scores the same as no deadline at all
        assert_eq!(calculate_priority(&far), calculate_priority(&inputs()));
    }

    #[test]
    fn test_urgency_rises_as_deadline_approaches() {
        let mut soon = inputs();
        soon.deadline = Some(NOW + 60 * 60 * 1000); // 1 hour out
        let mut later = inputs();
        later.deadline = Some(NOW + 12 * 60 * 60 * 1000); // 12 hours out

        assert!(calculate_priority(&soon) > calculate_priority(&later));
    }

    #[test]
    fn test_past_due_saturates_urgency() {
        let mut overdue = inputs();
        overdue.deadline = Some(NOW - 1);
        // URGENCY_MAX * WEIGHT_URGENCY on top of baseline
        assert_eq!(
            calculate_priority(&overdue),
            calculate_priority(&inputs()) + URGENCY_MAX * WEIGHT_URGENCY
        );
    }

    #[test]
    fn test_starvation_grows_with_age() {
        let mut old = inputs();
        old.created_at = NOW - 30 * 60_000; // 30 minutes old

        // 30 min * 0.1 * weight 0.5 = 1.5
        assert_eq!(
            calculate_priority(&old) - calculate_priority(&inputs()),
            1.5
        );
    }

    #[test]
    fn test_starvation_capped() {
        let mut ancient = inputs();
        ancient.created_at = NOW - 365 * 24 * 60 * 60_000;

        assert_eq!(
            calculate_priority(&ancient) - calculate_priority(&inputs()),
            STARVATION_MAX * WEIGHT_STARVATION
        );
    }

    #[test]
    fn test_source_tiers_ordered() {
        let mut human = inputs();
        human.source = TaskSource::Human;
        let mut decomposition = inputs();
        decomposition.source = TaskSource::Decomposition;
        let mut agent = inputs();
        agent.source = TaskSource::Agent;
        let mut maintenance = inputs();
        maintenance.source = TaskSource::Maintenance;

        let scores = [
            calculate_priority(&human),
            calculate_priority(&decomposition),
            calculate_priority(&agent),
            calculate_priority(&maintenance),
        ];
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
        assert!(scores[2] > scores[3]);
    }

    #[test]
    fn test_compare_tasks_by_priority_then_fifo_then_id() {
        use crate::domain::TaskRecord;

        let mut a = TaskRecord::new("a", "a", "shell", TaskSource::Agent);
        let mut b = TaskRecord::new("b", "b", "shell", TaskSource::Agent);

        a.computed_priority = 10.0;
        b.computed_priority = 5.0;
        assert_eq!(compare_tasks(&a, &b), Ordering::Less); // a first

        b.computed_priority = 10.0;
        a.created_at = 100;
        b.created_at = 200;
        assert_eq!(compare_tasks(&a, &b), Ordering::Less); // FIFO

        b.created_at = 100;
        a.id = "aaa".to_string();
        b.id = "bbb".to_string();
        assert_eq!(compare_tasks(&a, &b), Ordering::Less); // id order
    }
}
