//! Per-process-step storage: an inventory buffer that decouples input
//! delivery timing from output production timing.
//!
//! [`Storage::build_level_entries`] converts a set of stream-state events into
//! a temporally ordered, gap-free sequence of storage-level intervals, walking
//! either forward from the simulation start or backward from a branch
//! deadline. The running level is threaded through the walk (never recomputed
//! from scratch), so interval generation must stay monotone and
//! non-overlapping.

use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::stream::{Commodity, StreamRole, StreamState};
use crate::time::TimePoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Level entries
// ---------------------------------------------------------------------------

/// One discretized storage-level interval. Batch deliveries appear as
/// zero-length entries so discrete jumps are visible in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub process_step_name: String,
    pub commodity: Commodity,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub level_at_start: Mass,
    pub level_at_end: Mass,
}

/// Direction of the discretization walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelDirection {
    /// Ascending from the earliest instant; the anchor level is the level at
    /// the walk's first instant.
    Forward,
    /// Descending from the latest instant; the anchor level is the level at
    /// the walk's last instant.
    Backward,
}

/// Independently toggleable instant-exclusion policies. Different state
/// variants discard instants that precede the first input's start or end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantExclusion {
    pub before_first_input_start: bool,
    pub before_first_input_end: bool,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Inventory for one process step, in output-commodity units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub process_step_name: String,
    pub commodity: Commodity,
    pub current_level: Mass,
    /// Lower bound of the optional over-production band, checked at branch
    /// start time.
    pub minimum_level_at_branch_start: Option<Mass>,
    /// Upper bound of the optional over-production band.
    pub maximum_level_at_branch_start: Option<Mass>,
}

impl Storage {
    pub fn new(process_step_name: impl Into<String>, commodity: Commodity) -> Self {
        Self {
            process_step_name: process_step_name.into(),
            commodity,
            current_level: Mass::ZERO,
            minimum_level_at_branch_start: None,
            maximum_level_at_branch_start: None,
        }
    }

    pub fn with_band(mut self, minimum: Mass, maximum: Mass) -> Self {
        self.minimum_level_at_branch_start = Some(minimum);
        self.maximum_level_at_branch_start = Some(maximum);
        self
    }

    /// Add delivered mass to the level.
    pub fn add_to_level(&mut self, mass: Mass) {
        self.current_level += mass;
    }

    /// Draw produced mass from the level. Going negative is an internal
    /// consistency error, never clamped.
    pub fn remove_from_level(&mut self, mass: Mass, at: TimePoint) -> Result<(), SchedulingError> {
        let next = self.current_level - mass;
        if next < Mass::ZERO {
            return Err(SchedulingError::StorageLevelInconsistent { at, level: next });
        }
        self.current_level = next;
        Ok(())
    }

    /// Whether the current level alone can satisfy an output of `mass`.
    /// With a band configured the post-draw level must stay strictly above
    /// the lower bound; without one it may reach exactly zero.
    pub fn can_supply_directly(&self, mass: Mass) -> bool {
        let after = self.current_level - mass;
        match self.minimum_level_at_branch_start {
            Some(minimum) => after > minimum,
            None => after >= Mass::ZERO,
        }
    }

    // -----------------------------------------------------------------------
    // Discretization
    // -----------------------------------------------------------------------

    /// Build the ordered storage-level intervals induced by the given input
    /// and output stream states.
    ///
    /// `anchor_level` is the level at the walk origin: the earliest instant
    /// for [`LevelDirection::Forward`], the latest for
    /// [`LevelDirection::Backward`]. The entries returned are always in
    /// chronological order with `start_time <= end_time`.
    pub fn build_level_entries(
        &self,
        inputs: &[StreamState],
        outputs: &[StreamState],
        direction: LevelDirection,
        exclusion: InstantExclusion,
        anchor_level: Mass,
    ) -> Result<Vec<StorageEntry>, SchedulingError> {
        let mut instants: BTreeSet<TimePoint> = BTreeSet::new();
        let mut batch_instants: BTreeSet<TimePoint> = BTreeSet::new();

        let mut collect = |state: &StreamState, role: StreamRole| match state {
            StreamState::Continuous(s) => {
                instants.insert(s.start_time);
                instants.insert(s.end_time);
            }
            StreamState::Batch(_) => {
                let at = state.delivery_time(role);
                instants.insert(at);
                batch_instants.insert(at);
            }
        };
        for input in inputs {
            collect(input, StreamRole::Input);
        }
        for output in outputs {
            collect(output, StreamRole::Output);
        }

        // Exclusion thresholds are relative to the chronologically first input.
        let first_input = inputs.iter().min_by_key(|s| s.start_time());
        if let Some(first) = first_input {
            if exclusion.before_first_input_start {
                instants.retain(|t| *t >= first.start_time());
                batch_instants.retain(|t| *t >= first.start_time());
            }
            if exclusion.before_first_input_end {
                instants.retain(|t| *t >= first.end_time());
                batch_instants.retain(|t| *t >= first.end_time());
            }
        }

        // Duplicate batch instants so discrete jumps become their own
        // zero-length interval.
        let mut walk: Vec<TimePoint> = Vec::with_capacity(instants.len() + batch_instants.len());
        for t in &instants {
            walk.push(*t);
            if batch_instants.contains(t) {
                walk.push(*t);
            }
        }
        if direction == LevelDirection::Backward {
            walk.reverse();
        }

        let mut entries = Vec::new();
        let mut running = anchor_level;

        for pair in walk.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (lo, hi) = (a.min(b), a.max(b));

            let mut net_in = Mass::ZERO;
            for input in inputs {
                net_in += input.mass_in_interval(lo, hi, StreamRole::Input)?;
            }
            let mut net_out = Mass::ZERO;
            for output in outputs {
                net_out += output.mass_in_interval(lo, hi, StreamRole::Output)?;
            }

            let (level_at_start, level_at_end) = match direction {
                LevelDirection::Forward => {
                    let end = running + net_in - net_out;
                    let start = running;
                    running = end;
                    (start, end)
                }
                LevelDirection::Backward => {
                    let end = running;
                    let start = running - net_in + net_out;
                    running = start;
                    (start, end)
                }
            };

            if level_at_start < Mass::ZERO || level_at_end < Mass::ZERO {
                return Err(SchedulingError::StorageLevelInconsistent {
                    at: lo,
                    level: level_at_start.min(level_at_end),
                });
            }

            entries.push(StorageEntry {
                process_step_name: self.process_step_name.clone(),
                commodity: self.commodity.clone(),
                start_time: lo,
                end_time: hi,
                level_at_start,
                level_at_end,
            });
        }

        if direction == LevelDirection::Backward {
            entries.reverse();
        }
        Ok(entries)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_mass;
    use crate::stream::{BatchStreamState, ContinuousStreamState};

    fn storage() -> Storage {
        Storage::new("furnace", Commodity::new("steel"))
    }

    fn continuous_input(start: TimePoint, end: TimePoint, mass: f64) -> StreamState {
        StreamState::Continuous(
            ContinuousStreamState::new("in".into(), start, end, f64_to_mass(mass)).unwrap(),
        )
    }

    fn continuous_output(start: TimePoint, end: TimePoint, mass: f64) -> StreamState {
        StreamState::Continuous(
            ContinuousStreamState::new("out".into(), start, end, f64_to_mass(mass)).unwrap(),
        )
    }

    fn batch_input(delivery: TimePoint, mass: f64) -> StreamState {
        StreamState::Batch(BatchStreamState {
            stream_name: "in".into(),
            start_time: delivery - 5,
            end_time: delivery,
            batch_mass: f64_to_mass(mass),
        })
    }

    // -----------------------------------------------------------------------
    // Test 1: Forward walk with one input and one output stream
    // -----------------------------------------------------------------------
    #[test]
    fn forward_walk_continuous() {
        // Input fills 100 over [0, 50]; output drains 100 over [50, 100].
        let entries = storage()
            .build_level_entries(
                &[continuous_input(0, 50, 100.0)],
                &[continuous_output(50, 100, 100.0)],
                LevelDirection::Forward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level_at_start, Mass::ZERO);
        assert_eq!(entries[0].level_at_end, f64_to_mass(100.0));
        assert_eq!(entries[1].level_at_start, f64_to_mass(100.0));
        assert_eq!(entries[1].level_at_end, Mass::ZERO);
    }

    // -----------------------------------------------------------------------
    // Test 2: Batch delivery appears as its own zero-length entry
    // -----------------------------------------------------------------------
    #[test]
    fn batch_jump_is_zero_length_entry() {
        // Batch of 60 delivered at t=20; output drains 60 over [20, 80].
        let entries = storage()
            .build_level_entries(
                &[batch_input(20, 60.0)],
                &[continuous_output(20, 80, 60.0)],
                LevelDirection::Forward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap();

        let jump = entries
            .iter()
            .find(|e| e.start_time == 20 && e.end_time == 20)
            .expect("zero-length entry at the delivery instant");
        assert_eq!(jump.level_at_start, Mass::ZERO);
        assert_eq!(jump.level_at_end, f64_to_mass(60.0));

        // The final entry drains back to zero.
        assert_eq!(entries.last().unwrap().level_at_end, Mass::ZERO);
    }

    // -----------------------------------------------------------------------
    // Test 3: Backward walk reproduces the forward levels
    // -----------------------------------------------------------------------
    #[test]
    fn backward_walk_matches_forward() {
        let inputs = [batch_input(20, 60.0)];
        let outputs = [continuous_output(20, 80, 60.0)];

        let forward = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Forward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap();
        let backward = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Backward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap();

        assert_eq!(forward, backward);
    }

    // -----------------------------------------------------------------------
    // Test 4: Replay determinism
    // -----------------------------------------------------------------------
    #[test]
    fn replay_is_idempotent() {
        let inputs = [batch_input(20, 60.0), batch_input(50, 40.0)];
        let outputs = [continuous_output(20, 100, 100.0)];

        let first = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Forward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap();
        let second = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Forward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap();
        assert_eq!(first, second);
    }

    // -----------------------------------------------------------------------
    // Test 5: Exclusion policies drop early instants independently
    // -----------------------------------------------------------------------
    #[test]
    fn exclusion_policies_drop_early_instants() {
        // First input loads over [15, 20]; an output boundary sits at t=5.
        let inputs = [batch_input(20, 60.0)];
        let outputs = [continuous_output(5, 80, 60.0)];

        let all = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Forward,
                InstantExclusion::default(),
                f64_to_mass(60.0),
            )
            .unwrap();
        assert_eq!(all.first().unwrap().start_time, 5);

        let from_start = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Forward,
                InstantExclusion {
                    before_first_input_start: true,
                    before_first_input_end: false,
                },
                f64_to_mass(60.0),
            )
            .unwrap();
        assert!(from_start.iter().all(|e| e.start_time >= 15));

        let from_end = storage()
            .build_level_entries(
                &inputs,
                &outputs,
                LevelDirection::Forward,
                InstantExclusion {
                    before_first_input_start: false,
                    before_first_input_end: true,
                },
                f64_to_mass(60.0),
            )
            .unwrap();
        assert!(from_end.iter().all(|e| e.start_time >= 20));
    }

    // -----------------------------------------------------------------------
    // Test 6: Negative level is a fatal inconsistency
    // -----------------------------------------------------------------------
    #[test]
    fn negative_level_is_fatal() {
        // Output drains 50 with nothing delivered.
        let err = storage()
            .build_level_entries(
                &[],
                &[continuous_output(0, 10, 50.0)],
                LevelDirection::Forward,
                InstantExclusion::default(),
                Mass::ZERO,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::StorageLevelInconsistent { .. }
        ));
    }

    // -----------------------------------------------------------------------
    // Test 7: Level mutation helpers
    // -----------------------------------------------------------------------
    #[test]
    fn level_mutation_helpers() {
        let mut s = storage();
        s.add_to_level(f64_to_mass(30.0));
        assert_eq!(s.current_level, f64_to_mass(30.0));

        s.remove_from_level(f64_to_mass(30.0), 0).unwrap();
        assert_eq!(s.current_level, Mass::ZERO);

        let err = s.remove_from_level(f64_to_mass(1.0), 7).unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::StorageLevelInconsistent { at: 7, .. }
        ));
    }

    // -----------------------------------------------------------------------
    // Test 8: Direct-supply check honours the band
    // -----------------------------------------------------------------------
    #[test]
    fn direct_supply_check() {
        let mut plain = storage();
        plain.add_to_level(f64_to_mass(10.0));
        // Without a band, draining to exactly zero is allowed.
        assert!(plain.can_supply_directly(f64_to_mass(10.0)));
        assert!(!plain.can_supply_directly(f64_to_mass(10.5)));

        let mut banded = storage().with_band(f64_to_mass(5.0), f64_to_mass(50.0));
        banded.add_to_level(f64_to_mass(15.0));
        // Post-draw level must stay strictly above the lower bound.
        assert!(banded.can_supply_directly(f64_to_mass(9.0)));
        assert!(!banded.can_supply_directly(f64_to_mass(10.0)));
    }
}
