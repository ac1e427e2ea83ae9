//! Simulation time types and the per-step clock cursor.
//!
//! Time is measured in integer ticks. The resolution engine walks *backward*
//! in simulated time, so instants are signed: speculative walks may legally
//! dip below zero before being rolled back.

use serde::{Deserialize, Serialize};

/// An instant on the simulation timeline, in ticks.
pub type TimePoint = i64;

/// A signed duration in ticks.
pub type TimeDelta = i64;

// ---------------------------------------------------------------------------
// TimeData
// ---------------------------------------------------------------------------

/// Mutable clock cursor for one process step.
///
/// The cursor is part of the checkpointed simulation state: it is cloned by
/// [`crate::navigator::BranchNavigator::store_current_simulation_data`] and
/// replaced wholesale on rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeData {
    /// First instant of the simulation horizon.
    pub global_start: TimePoint,

    /// Last instant of the simulation horizon. Backward resolution begins here.
    pub global_end: TimePoint,

    /// End time of the stream request currently being resolved. Drives
    /// `SwitchPolicy::AtNextDiscreteEvent`.
    pub next_stream_end: TimePoint,

    /// Instant of the most recent process-state switch. Each backward step
    /// closes the interval `[event_time, last_switch_time]`.
    pub last_switch_time: TimePoint,

    /// Earliest instant committed so far: the step filled its timeline from
    /// `global_end` down to here. New requests ending later than this are
    /// infeasible and get shifted.
    pub last_idle_time: TimePoint,
}

impl TimeData {
    /// Create a clock cursor for the given horizon, positioned at the end.
    pub fn new(global_start: TimePoint, global_end: TimePoint) -> Self {
        Self {
            global_start,
            global_end,
            next_stream_end: global_end,
            last_switch_time: global_end,
            last_idle_time: global_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_data_starts_at_horizon_end() {
        let time = TimeData::new(0, 1_000);
        assert_eq!(time.next_stream_end, 1_000);
        assert_eq!(time.last_switch_time, 1_000);
        assert_eq!(time.last_idle_time, 1_000);
    }

    #[test]
    fn time_data_clone_is_independent() {
        let mut time = TimeData::new(0, 500);
        let checkpoint = time.clone();
        time.last_idle_time = 100;
        assert_eq!(checkpoint.last_idle_time, 500);
    }
}
