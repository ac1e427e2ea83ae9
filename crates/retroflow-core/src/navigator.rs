//! The branch navigator: the feasibility layer above the raw Petri net.
//!
//! The navigator owns the step's only undo mechanism -- a deep-cloned
//! checkpoint of `(clock, cursor, branch, temporary plan, storage level)` --
//! and uses it to try speculative adaptations and discard them when rejected.
//! Every adaptation attempt checkpoints before mutating; after any accepted
//! adaptation the checkpoint is refreshed so it always reflects the adapted
//! state, never an intermediate one.

use crate::branch::OutputBranch;
use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::handler::{CursorPhase, ProcessStateHandler, ProcessStepData, ProductionCursor};
use crate::id::BranchId;
use crate::plan::BranchPlan;
use crate::state::{ProcessStateKind, SelectionContext};
use crate::stream::{StreamHandler, StreamState};
use crate::time::TimeData;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Snapshot of everything a rollback must restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationCheckpoint {
    time: TimeData,
    cursor: ProductionCursor,
    branch: Option<OutputBranch>,
    temp_plan: BranchPlan,
    storage_level: Mass,
}

// ---------------------------------------------------------------------------
// Adaption decider
// ---------------------------------------------------------------------------

/// Records which feasibility adaptations fired for an output request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptionDecider {
    /// The request window was moved earlier to the first manageable date.
    pub shifted: bool,
    /// The request mass was truncated to the serving state's maximum.
    pub mass_capped: bool,
}

impl AdaptionDecider {
    pub fn requires_adaption(&self) -> bool {
        self.shifted || self.mass_capped
    }
}

/// The adapted request together with what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptionOutcome {
    pub adapted: StreamState,
    pub decider: AdaptionDecider,
}

// ---------------------------------------------------------------------------
// BranchNavigator
// ---------------------------------------------------------------------------

/// Drives speculative resolution for one process step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchNavigator {
    checkpoint: Option<SimulationCheckpoint>,
}

impl BranchNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Checkpoint / restore
    // -----------------------------------------------------------------------

    /// Snapshot the step's mutable simulation state.
    pub fn store_current_simulation_data(&mut self, data: &ProcessStepData) {
        self.checkpoint = Some(SimulationCheckpoint {
            time: data.time.clone(),
            cursor: data.cursor.clone(),
            branch: data.branch.clone(),
            temp_plan: data.temp_plan.clone(),
            storage_level: data.balance.storage.current_level,
        });
    }

    /// Restore the step to the stored checkpoint, discarding all speculative
    /// mutations since.
    pub fn reset_temporal_branch(
        &self,
        data: &mut ProcessStepData,
    ) -> Result<(), SchedulingError> {
        let checkpoint =
            self.checkpoint
                .as_ref()
                .ok_or_else(|| SchedulingError::MissingCheckpoint {
                    step: data.step_name.clone(),
                })?;
        data.time = checkpoint.time.clone();
        data.cursor = checkpoint.cursor.clone();
        data.branch = checkpoint.branch.clone();
        data.temp_plan = checkpoint.temp_plan.clone();
        data.balance.storage.current_level = checkpoint.storage_level;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Branch preparation
    // -----------------------------------------------------------------------

    /// Set up a fresh production branch for an output request and position
    /// the cursor for backward resolution.
    pub fn prepare_branch(&mut self, data: &mut ProcessStepData, request: StreamState) -> BranchId {
        let id = BranchId(data.next_branch_id);
        data.next_branch_id += 1;

        data.temp_plan.clear();
        data.cursor.phase = CursorPhase::PreProduction;
        data.cursor.current_output = Some(request.clone());
        data.cursor.pending_input = None;
        data.cursor.storage_level_at_branch_start = data.balance.storage.current_level;
        data.time.next_stream_end = request.end_time();
        data.branch = Some(OutputBranch::new(id, request));
        id
    }

    // -----------------------------------------------------------------------
    // Selection context
    // -----------------------------------------------------------------------

    /// Facts about the in-flight branch that drive switch selection.
    pub fn selection_context(
        &self,
        data: &ProcessStepData,
    ) -> Result<SelectionContext, SchedulingError> {
        let Some(output) = data.cursor.current_output.clone() else {
            return Ok(SelectionContext::default());
        };
        let remaining = self.remaining_request_mass(data)?;
        let branch_fulfilled = match data
            .balance
            .branch_fulfilled_with_over_production(output.total_mass())
        {
            Some(band_fulfilled) => band_fulfilled,
            None => data.balance.branch_fulfilled(remaining),
        };
        let probe = if remaining > Mass::ZERO {
            remaining
        } else {
            output.total_mass()
        };
        Ok(SelectionContext {
            branch_fulfilled,
            storage_can_supply: data.balance.storage.can_supply_directly(probe),
        })
    }

    /// Output-unit mass the branch still has to request.
    ///
    /// Without a storage band this is the exact missing mass. With a band the
    /// judged quantity is the level the branch will leave behind
    /// (`current_level − output_mass`, since validated inputs are already in
    /// the level and the output is drawn at completion); requests keep coming
    /// until that projection sits strictly inside the band, each one aiming
    /// at the band midpoint so the loop terminates and never parks the level
    /// on a boundary.
    pub fn remaining_request_mass(
        &self,
        data: &ProcessStepData,
    ) -> Result<Mass, SchedulingError> {
        let Some(output) = &data.cursor.current_output else {
            return Ok(Mass::ZERO);
        };
        let storage = &data.balance.storage;
        if let (Some(minimum), Some(maximum)) = (
            storage.minimum_level_at_branch_start,
            storage.maximum_level_at_branch_start,
        ) {
            let projected = storage.current_level - output.total_mass();
            if minimum < projected && projected < maximum {
                return Ok(Mass::ZERO);
            }
            let midpoint = (minimum + maximum) / Mass::from_num(2);
            return Ok((midpoint - projected).max(Mass::ZERO));
        }
        let validated = data
            .branch
            .as_ref()
            .map(|b| b.validated_inputs(&data.balance.input_stream_name))
            .unwrap_or_default();
        data.balance.missing_mass_for_output(output, &validated)
    }

    // -----------------------------------------------------------------------
    // Adaptation
    // -----------------------------------------------------------------------

    /// Compose the two independent feasibility checks on the prepared output
    /// request: the temporal shift to the first manageable date and the
    /// per-state maximum-mass clamp.
    ///
    /// A checkpoint of the prepared branch must already be stored. The
    /// speculative walk used to find the serving output state is always
    /// rolled back; the (possibly adapted) request is then re-applied and
    /// re-checkpointed.
    pub fn determine_if_output_stream_requires_adaption(
        &mut self,
        handler: &ProcessStateHandler,
        data: &mut ProcessStepData,
    ) -> Result<AdaptionOutcome, SchedulingError> {
        let request = data.cursor.current_output.clone().ok_or_else(|| {
            SchedulingError::UnsupportedBranchShape(format!(
                "adaption check on '{}' with no output request",
                data.step_name
            ))
        })?;

        // Temporal feasibility: the step has filled its timeline from the
        // horizon end down to `last_idle_time`; a request ending beyond that
        // boundary is moved earlier by the deficit, mass and window length
        // unchanged.
        let first_manageable = data.time.last_idle_time;
        let mut adapted = request.clone();
        let mut shifted = false;
        if adapted.end_time() > first_manageable {
            let deficit = adapted.end_time() - first_manageable;
            adapted = adapted.shifted_earlier(deficit);
            shifted = true;
            tracing::debug!(
                step = %data.step_name,
                deficit,
                end = first_manageable,
                "output request shifted to first manageable date"
            );
        }

        // Mass-cap feasibility: walk backward to the state that would serve
        // this request and apply its clamp. The walk is speculative.
        let ctx = self.selection_context(data)?;
        let serving_state = handler.switch_to_output_providing_state(data, &ctx)?;
        let (capped, mass_capped) =
            handler.clamp_to_maximum_stream_mass(&serving_state, &adapted)?;
        adapted = capped;
        if mass_capped {
            tracing::debug!(
                step = %data.step_name,
                state = %serving_state,
                mass = %adapted.total_mass(),
                "output request truncated to maximum stream mass"
            );
        }

        // Roll the speculative walk back, re-apply the accepted request, and
        // refresh the checkpoint so it reflects the adaptation.
        self.reset_temporal_branch(data)?;
        data.cursor.current_output = Some(adapted.clone());
        data.time.next_stream_end = adapted.end_time();
        if let Some(branch) = data.branch.as_mut() {
            branch.adapt_output(adapted.clone());
        }
        self.store_current_simulation_data(data);

        Ok(AdaptionOutcome {
            adapted,
            decider: AdaptionDecider {
                shifted,
                mass_capped,
            },
        })
    }

    // -----------------------------------------------------------------------
    // Input requests
    // -----------------------------------------------------------------------

    /// First request of a branch: walk from idle into the output-providing
    /// state (landing exactly at the request deadline), continue into the
    /// input-requesting state, and size the request that state demands.
    pub fn determine_input_stream_from_output_stream(
        &mut self,
        handler: &ProcessStateHandler,
        data: &mut ProcessStepData,
        streams: &StreamHandler,
    ) -> Result<StreamState, SchedulingError> {
        let ctx = self.selection_context(data)?;
        handler.switch_to_output_providing_state(data, &ctx)?;
        let input_state = handler.switch_to_input_requesting_state(data, &ctx)?;
        self.issue_input_request(handler, data, streams, &input_state)
    }

    /// Subsequent request of a branch: the cursor stays in the already
    /// active input state and sizes the next request from what is still
    /// missing.
    pub fn fulfill_temporal_branch(
        &mut self,
        handler: &ProcessStateHandler,
        data: &mut ProcessStepData,
        streams: &StreamHandler,
    ) -> Result<StreamState, SchedulingError> {
        let current = data.cursor.current_state.clone();
        if !handler.state(&current)?.kind.is_input_requesting() {
            return Err(SchedulingError::UnsupportedBranchShape(format!(
                "fulfill called on '{}' while in non-input state '{current}'",
                data.step_name
            )));
        }
        self.issue_input_request(handler, data, streams, &current)
    }

    fn issue_input_request(
        &mut self,
        handler: &ProcessStateHandler,
        data: &mut ProcessStepData,
        streams: &StreamHandler,
        input_state: &str,
    ) -> Result<StreamState, SchedulingError> {
        let output = data.cursor.current_output.clone().ok_or_else(|| {
            SchedulingError::UnsupportedBranchShape(format!(
                "input request on '{}' with no output request",
                data.step_name
            ))
        })?;
        let input_stream_name = data.balance.input_stream_name.clone();
        let validated = data
            .branch
            .as_ref()
            .map(|b| b.validated_inputs(&input_stream_name))
            .unwrap_or_default();
        let missing = self.remaining_request_mass(data)?;
        let delivery = data
            .balance
            .required_input_delivery_time(output.start_time(), &validated);

        let kind = handler.state(input_state)?.kind.clone();
        let request = match kind {
            ProcessStateKind::BatchInput => {
                let cfg = streams.batch(&input_stream_name)?;
                let mass = data.balance.size_batch_input(cfg, missing);
                cfg.create_state(delivery, mass)
            }
            ProcessStateKind::FullBatchInput => {
                let cfg = streams.batch(&input_stream_name)?;
                let mass = data.balance.size_full_batch_input(cfg, missing)?;
                cfg.create_state(delivery, mass)
            }
            ProcessStateKind::ContinuousInput => {
                let cfg = streams.continuous(&input_stream_name)?;
                let sizing = data.balance.size_continuous_input(cfg, &output, missing)?;
                if sizing.storage_required {
                    tracing::trace!(
                        step = %data.step_name,
                        rate = %sizing.rate,
                        "input rate clipped to stream bounds, storage buffers the mismatch"
                    );
                }
                cfg.create_state(delivery, sizing.input_mass, sizing.rate)?
            }
            ProcessStateKind::ParallelInputOutputWithStorage => {
                // Input runs concurrently with production: mirror the output
                // window and let storage absorb the phase difference.
                let cfg = streams.continuous(&input_stream_name)?;
                let input_mass = missing / data.balance.conversion_factor;
                cfg.create_state_in_window(output.start_time(), output.end_time(), input_mass)?
            }
            other => {
                return Err(SchedulingError::UnsupportedBranchShape(format!(
                    "state '{input_state}' of kind {other:?} cannot request input"
                )));
            }
        };

        data.cursor.pending_input = Some(request.clone());
        if let Some(branch) = data.branch.as_mut() {
            branch.push_request(request.clone());
        }
        tracing::debug!(
            step = %data.step_name,
            stream = %request.stream_name(),
            mass = %request.total_mass(),
            end = request.end_time(),
            "input stream requested"
        );
        Ok(request)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::MassBalance;
    use crate::fixed::f64_to_mass;
    use crate::state::{
        GuardedSwitch, ProcessState, ProcessStateSwitch, StateConnector, SwitchGuard,
        SwitchPolicy, SwitchSelector,
    };
    use crate::storage::Storage;
    use crate::stream::{BatchStream, Commodity, ContinuousStream, Stream};

    fn single(start: &str, end: &str, policy: SwitchPolicy) -> SwitchSelector {
        SwitchSelector::Single(ProcessStateSwitch {
            connector: StateConnector::new(start, end),
            policy,
        })
    }

    fn handler() -> ProcessStateHandler {
        let mut h = ProcessStateHandler::new("idle");
        h.add_state(ProcessState::new("load", ProcessStateKind::BatchInput))
            .unwrap();
        h.add_state(ProcessState::new(
            "produce",
            ProcessStateKind::ContinuousOutput {
                maximum_stream_mass: Some(f64_to_mass(400.0)),
            },
        ))
        .unwrap();
        h.add_selector(
            "idle",
            single("produce", "idle", SwitchPolicy::AtNextDiscreteEvent),
        )
        .unwrap();
        h.add_selector(
            "produce",
            single("load", "produce", SwitchPolicy::AtOutputStreamProvided),
        )
        .unwrap();
        h.add_selector(
            "load",
            SwitchSelector::MultiTarget(vec![
                GuardedSwitch {
                    guard: SwitchGuard::BranchUnfulfilled,
                    switch: ProcessStateSwitch {
                        connector: StateConnector::new("load", "load"),
                        policy: SwitchPolicy::AtInputStreamProvided,
                    },
                },
                GuardedSwitch {
                    guard: SwitchGuard::Always,
                    switch: ProcessStateSwitch {
                        connector: StateConnector::new("idle", "load"),
                        policy: SwitchPolicy::AtInputStreamProvided,
                    },
                },
            ]),
        )
        .unwrap();
        h
    }

    fn streams() -> StreamHandler {
        let mut s = StreamHandler::new();
        s.add_stream(Stream::Batch(BatchStream {
            name: "ore_feed".into(),
            upstream_node: "source".into(),
            downstream_node: "furnace".into(),
            commodity: Commodity::new("ore"),
            maximum_batch_mass: f64_to_mass(200.0),
            batch_transfer_duration: 10,
        }));
        s.add_stream(Stream::Continuous(ContinuousStream {
            name: "metal_flow".into(),
            upstream_node: "furnace".into(),
            downstream_node: "sink".into(),
            commodity: Commodity::new("metal"),
            minimum_operation_rate: None,
            maximum_operation_rate: Some(f64_to_mass(3.0)),
        }));
        s
    }

    fn data() -> ProcessStepData {
        let balance = MassBalance::new(
            f64_to_mass(1.0),
            "ore_feed",
            "metal_flow",
            Storage::new("furnace", Commodity::new("metal")),
        );
        ProcessStepData::new("furnace", crate::time::TimeData::new(0, 1_000), balance, "idle")
    }

    fn output_request(streams: &StreamHandler, deadline: i64, mass: f64) -> StreamState {
        streams
            .continuous("metal_flow")
            .unwrap()
            .create_state(deadline, f64_to_mass(mass), f64_to_mass(3.0))
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: Checkpoint and rollback restore everything
    // -----------------------------------------------------------------------
    #[test]
    fn checkpoint_rollback_restores_everything() {
        let mut nav = BranchNavigator::new();
        let mut d = data();
        let s = streams();

        nav.prepare_branch(&mut d, output_request(&s, 900, 300.0));
        nav.store_current_simulation_data(&d);
        let before = d.clone();

        // Speculative mutations.
        d.time.last_switch_time = 123;
        d.cursor.current_state = "produce".into();
        d.balance.storage.current_level = f64_to_mass(99.0);
        d.temp_plan.state_entries.push(crate::plan::ProcessStateEntry {
            process_step_name: "furnace".into(),
            state_name: "produce".into(),
            start_time: 0,
            end_time: 1,
            energy: None,
        });

        nav.reset_temporal_branch(&mut d).unwrap();
        assert_eq!(d, before);
    }

    // -----------------------------------------------------------------------
    // Test 2: Rollback without a checkpoint is fatal
    // -----------------------------------------------------------------------
    #[test]
    fn rollback_without_checkpoint_is_fatal() {
        let nav = BranchNavigator::new();
        let mut d = data();
        let err = nav.reset_temporal_branch(&mut d).unwrap_err();
        assert!(matches!(err, SchedulingError::MissingCheckpoint { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 3: Feasible request needs no adaptation
    // -----------------------------------------------------------------------
    #[test]
    fn feasible_request_needs_no_adaptation() {
        let (h, s) = (handler(), streams());
        let mut nav = BranchNavigator::new();
        let mut d = data();

        nav.prepare_branch(&mut d, output_request(&s, 900, 300.0));
        nav.store_current_simulation_data(&d);
        let outcome = nav
            .determine_if_output_stream_requires_adaption(&h, &mut d)
            .unwrap();

        assert!(!outcome.decider.requires_adaption());
        assert_eq!(outcome.adapted.end_time(), 900);
        // The speculative walk left no trace.
        assert!(d.temp_plan.state_entries.is_empty());
        assert_eq!(d.cursor.current_state, "idle");
    }

    // -----------------------------------------------------------------------
    // Test 4: Busy step shifts the window to the first manageable date
    // -----------------------------------------------------------------------
    #[test]
    fn busy_step_shifts_window() {
        let (h, s) = (handler(), streams());
        let mut nav = BranchNavigator::new();
        let mut d = data();
        // A previous branch committed the timeline down to t=700.
        d.time.last_idle_time = 700;

        nav.prepare_branch(&mut d, output_request(&s, 900, 300.0));
        nav.store_current_simulation_data(&d);
        let outcome = nav
            .determine_if_output_stream_requires_adaption(&h, &mut d)
            .unwrap();

        assert!(outcome.decider.shifted);
        assert!(!outcome.decider.mass_capped);
        // Same mass and window length, new end at the manageable date.
        assert_eq!(outcome.adapted.end_time(), 700);
        assert_eq!(outcome.adapted.start_time(), 600);
        assert_eq!(outcome.adapted.total_mass(), f64_to_mass(300.0));
        // The re-applied request is what the checkpoint now holds.
        assert_eq!(d.cursor.current_output, Some(outcome.adapted.clone()));
        assert_eq!(d.time.next_stream_end, 700);
    }

    // -----------------------------------------------------------------------
    // Test 5: Oversized request is truncated to the state maximum
    // -----------------------------------------------------------------------
    #[test]
    fn oversized_request_is_truncated() {
        let (h, s) = (handler(), streams());
        let mut nav = BranchNavigator::new();
        let mut d = data();

        nav.prepare_branch(&mut d, output_request(&s, 900, 600.0));
        nav.store_current_simulation_data(&d);
        let outcome = nav
            .determine_if_output_stream_requires_adaption(&h, &mut d)
            .unwrap();

        assert!(outcome.decider.mass_capped);
        assert_eq!(outcome.adapted.total_mass(), f64_to_mass(400.0));
        assert_eq!(outcome.adapted.end_time(), 900);
    }

    // -----------------------------------------------------------------------
    // Test 6: First input request walks the net and sizes a capped batch
    // -----------------------------------------------------------------------
    #[test]
    fn first_input_request_sizes_capped_batch() {
        let (h, s) = (handler(), streams());
        let mut nav = BranchNavigator::new();
        let mut d = data();

        nav.prepare_branch(&mut d, output_request(&s, 900, 300.0));
        nav.store_current_simulation_data(&d);
        nav.determine_if_output_stream_requires_adaption(&h, &mut d)
            .unwrap();
        let request = nav
            .determine_input_stream_from_output_stream(&h, &mut d, &s)
            .unwrap();

        // 300 missing, batch cap 200: first request carries exactly 200,
        // delivered at the production start.
        assert_eq!(request.total_mass(), f64_to_mass(200.0));
        assert_eq!(request.end_time(), 800);
        assert_eq!(d.cursor.current_state, "load");
        assert_eq!(d.cursor.pending_input, Some(request));
    }

    // -----------------------------------------------------------------------
    // Test 7: Subsequent request chains seamlessly backward
    // -----------------------------------------------------------------------
    #[test]
    fn subsequent_request_chains_backward() {
        let (h, s) = (handler(), streams());
        let mut nav = BranchNavigator::new();
        let mut d = data();

        nav.prepare_branch(&mut d, output_request(&s, 900, 300.0));
        nav.store_current_simulation_data(&d);
        nav.determine_if_output_stream_requires_adaption(&h, &mut d)
            .unwrap();
        let first = nav
            .determine_input_stream_from_output_stream(&h, &mut d, &s)
            .unwrap();

        // Upstream validates the first request verbatim.
        d.branch
            .as_mut()
            .unwrap()
            .validate_open_request(first.clone())
            .unwrap();
        d.cursor.pending_input = None;
        d.balance.storage.add_to_level(f64_to_mass(200.0));

        let second = nav.fulfill_temporal_branch(&h, &mut d, &s).unwrap();
        // 100 still missing; delivery pulled forward to the first request's
        // window start so the deliveries chain without a gap.
        assert_eq!(second.total_mass(), f64_to_mass(100.0));
        assert_eq!(second.end_time(), first.start_time());
    }

    // -----------------------------------------------------------------------
    // Test 8: Parallel state draws input across its own output window
    // -----------------------------------------------------------------------
    #[test]
    fn parallel_state_mirrors_output_window() {
        // idle -> convey (parallel input/output with storage) -> idle
        let mut h = ProcessStateHandler::new("idle");
        h.add_state(ProcessState::new(
            "convey",
            ProcessStateKind::ParallelInputOutputWithStorage,
        ))
        .unwrap();
        h.add_selector(
            "idle",
            single("convey", "idle", SwitchPolicy::AtNextDiscreteEvent),
        )
        .unwrap();
        h.add_selector(
            "convey",
            single("idle", "convey", SwitchPolicy::AfterInputAndOutputStream),
        )
        .unwrap();

        let mut s = StreamHandler::new();
        s.add_stream(Stream::Continuous(ContinuousStream {
            name: "feed_belt".into(),
            upstream_node: "source".into(),
            downstream_node: "mill".into(),
            commodity: Commodity::new("ore"),
            minimum_operation_rate: None,
            maximum_operation_rate: None,
        }));
        s.add_stream(Stream::Continuous(ContinuousStream {
            name: "meal_belt".into(),
            upstream_node: "mill".into(),
            downstream_node: "sink".into(),
            commodity: Commodity::new("meal"),
            minimum_operation_rate: None,
            maximum_operation_rate: Some(f64_to_mass(3.0)),
        }));

        let balance = MassBalance::new(
            f64_to_mass(1.0),
            "feed_belt",
            "meal_belt",
            Storage::new("mill", Commodity::new("meal")),
        );
        let mut d =
            ProcessStepData::new("mill", crate::time::TimeData::new(0, 1_000), balance, "idle");
        let mut nav = BranchNavigator::new();

        let request = s
            .continuous("meal_belt")
            .unwrap()
            .create_state(900, f64_to_mass(300.0), f64_to_mass(3.0))
            .unwrap();
        nav.prepare_branch(&mut d, request);
        nav.store_current_simulation_data(&d);
        let input = nav
            .determine_input_stream_from_output_stream(&h, &mut d, &s)
            .unwrap();

        // The input mirrors the output window; storage absorbs the phase
        // difference.
        assert_eq!(input.start_time(), 800);
        assert_eq!(input.end_time(), 900);
        assert_eq!(input.total_mass(), f64_to_mass(300.0));
        assert_eq!(d.cursor.current_state, "convey");
    }

    // -----------------------------------------------------------------------
    // Test 9: Full-batch input never splits
    // -----------------------------------------------------------------------
    #[test]
    fn full_batch_refuses_partial_requests() {
        let h = ProcessStateHandler::standard_net(
            ProcessStateKind::FullBatchInput,
            ProcessStateKind::ContinuousOutput {
                maximum_stream_mass: None,
            },
        )
        .unwrap();
        let s = streams();
        let mut nav = BranchNavigator::new();

        // 300 missing exceeds the 200-mass batch cap: the full-batch policy
        // fails instead of splitting.
        let mut d = data();
        nav.prepare_branch(&mut d, output_request(&s, 900, 300.0));
        nav.store_current_simulation_data(&d);
        let err = nav
            .determine_input_stream_from_output_stream(&h, &mut d, &s)
            .unwrap_err();
        assert!(matches!(err, SchedulingError::UnsupportedBranchShape(_)));

        // Within the cap, the entire missing mass is requested at once.
        let mut d = data();
        nav.prepare_branch(&mut d, output_request(&s, 900, 150.0));
        nav.store_current_simulation_data(&d);
        let request = nav
            .determine_input_stream_from_output_stream(&h, &mut d, &s)
            .unwrap();
        assert_eq!(request.total_mass(), f64_to_mass(150.0));
    }

    // -----------------------------------------------------------------------
    // Test 10: Band-configured storage requests toward the band midpoint
    // -----------------------------------------------------------------------
    #[test]
    fn band_requests_toward_midpoint() {
        let nav = BranchNavigator::new();
        let mut d = data();
        d.balance.storage = Storage::new("furnace", Commodity::new("metal"))
            .with_band(f64_to_mass(10.0), f64_to_mass(50.0));
        // Output of 20 is drawn at completion, so the projection trails the
        // level by 20.
        d.cursor.current_output = Some(output_request(&streams(), 900, 20.0));

        // Level 10 projects to -10: request up to the midpoint (30 - (-10)).
        d.balance.storage.current_level = f64_to_mass(10.0);
        assert_eq!(nav.remaining_request_mass(&d).unwrap(), f64_to_mass(40.0));

        // Level 50 projects to 30, strictly inside: nothing to request.
        d.balance.storage.current_level = f64_to_mass(50.0);
        assert_eq!(nav.remaining_request_mass(&d).unwrap(), Mass::ZERO);
    }
}
