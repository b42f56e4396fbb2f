//! Queue-depth driven worker scaling.

use serde::{Deserialize, Serialize};

/// What the control loop should do with the worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDecision {
    /// Add one worker.
    Up,
    /// Retire one worker.
    Down,
    /// Leave the worker count unchanged.
    Hold,
}

impl ScaleDecision {
    /// Worker count after applying the decision to `workers`.
    #[must_use]
    pub const fn apply(self, workers: usize) -> usize {
        match self {
            Self::Up => workers.saturating_add(1),
            Self::Down => workers.saturating_sub(1),
            Self::Hold => workers,
        }
    }
}

/// Scaling rule evaluated once per autoscale interval.
///
/// Scales up one step while the backlog exceeds `backlog_factor` jobs per worker,
/// and down one step when the queues are empty. Always stays within `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Queued jobs per worker tolerated before adding a worker.
    pub backlog_factor: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self { backlog_factor: 2 }
    }
}

impl ScalingPolicy {
    /// Decide the next step for the given queue depth and live worker count.
    #[must_use]
    pub const fn decide(&self, queue_depth: usize, workers: usize, min: usize, max: usize) -> ScaleDecision {
        if workers < max && queue_depth > workers.saturating_mul(self.backlog_factor) {
            ScaleDecision::Up
        } else if workers > min && queue_depth == 0 {
            ScaleDecision::Down
        } else {
            ScaleDecision::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_up_on_backlog() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.decide(5, 2, 1, 4), ScaleDecision::Up);
        assert_eq!(policy.decide(4, 2, 1, 4), ScaleDecision::Hold);
        // From zero workers any backlog scales up.
        assert_eq!(policy.decide(1, 0, 0, 4), ScaleDecision::Up);
    }

    #[test]
    fn test_scale_down_when_idle() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.decide(0, 3, 1, 4), ScaleDecision::Down);
        assert_eq!(policy.decide(0, 1, 1, 4), ScaleDecision::Hold);
    }

    #[test]
    fn test_respects_bounds() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.decide(100, 4, 1, 4), ScaleDecision::Hold);
        for depth in [0, 1, 3, 9, 100] {
            for workers in 1..=4 {
                let next = policy.decide(depth, workers, 1, 4).apply(workers);
                assert!((1..=4).contains(&next), "depth={depth} workers={workers}");
            }
        }
    }
}
