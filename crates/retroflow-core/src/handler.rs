//! The process-state handler: owns one step's Petri net and implements the
//! single backward stepping primitive plus the composite walks built on it.
//!
//! The engine resolves an output request by walking the net *backward* in
//! simulated time -- from "output must be ready by the deadline" toward
//! "idle" -- discovering along the way the input requests that make the
//! output possible. Every backward step closes a process-state interval into
//! the temporary branch plan.

use crate::balance::MassBalance;
use crate::branch::OutputBranch;
use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::plan::{BranchPlan, ProcessStateEntry};
use crate::state::{
    ProcessState, ProcessStateKind, SelectionContext, SwitchPolicy, SwitchSelector,
};
use crate::stream::StreamState;
use crate::time::{TimeData, TimePoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Production cursor
// ---------------------------------------------------------------------------

/// Lifecycle phase of the cursor with respect to the current branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorPhase {
    #[default]
    Uninitialized,
    PreProduction,
    PostProduction,
    ValidatedPostProduction,
}

/// The mutable simulation cursor of one process step. Exactly one is active
/// per step at any simulated instant; it is deep-cloned on checkpoint and
/// replaced wholesale on rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionCursor {
    pub phase: CursorPhase,
    pub current_state: String,
    /// The output stream state being resolved, if a branch is in flight.
    pub current_output: Option<StreamState>,
    /// The input request awaiting upstream confirmation.
    pub pending_input: Option<StreamState>,
    /// Storage level recorded when the current branch was prepared.
    pub storage_level_at_branch_start: Mass,
}

impl ProductionCursor {
    pub fn new(idle_state_name: impl Into<String>) -> Self {
        Self {
            phase: CursorPhase::Uninitialized,
            current_state: idle_state_name.into(),
            current_output: None,
            pending_input: None,
            storage_level_at_branch_start: Mass::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Process step data
// ---------------------------------------------------------------------------

/// The checkpointable state bundle of one process step: clock, cursor, mass
/// balance (with storage), in-flight branch, and the temporary branch plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStepData {
    pub step_name: String,
    pub time: TimeData,
    pub cursor: ProductionCursor,
    pub balance: MassBalance,
    pub branch: Option<OutputBranch>,
    pub temp_plan: BranchPlan,
    /// Branch id of the downstream requester, echoed in responses.
    pub reply_branch: Option<crate::id::BranchId>,
    /// Counter for this step's own outgoing request branches.
    pub next_branch_id: u64,
}

impl ProcessStepData {
    pub fn new(
        step_name: impl Into<String>,
        time: TimeData,
        balance: MassBalance,
        idle_state_name: &str,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            time,
            cursor: ProductionCursor::new(idle_state_name),
            balance,
            branch: None,
            temp_plan: BranchPlan::default(),
            reply_branch: None,
            next_branch_id: 0,
        }
    }

    /// Earliest start among pending and validated inputs of the in-flight
    /// branch. This is the reference boundary for input-side switch policies.
    fn input_reference_start(&self) -> Option<TimePoint> {
        if let Some(pending) = &self.cursor.pending_input {
            return Some(pending.start_time());
        }
        let branch = self.branch.as_ref()?;
        branch
            .validated_inputs(&self.balance.input_stream_name)
            .iter()
            .map(|s| s.start_time())
            .min()
    }
}

// ---------------------------------------------------------------------------
// ProcessStateHandler
// ---------------------------------------------------------------------------

/// One step's Petri net: named states plus the switch table, keyed by the
/// state the switches enter (the walk's *current* state, since stepping goes
/// backward).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStateHandler {
    states: BTreeMap<String, ProcessState>,
    selectors: BTreeMap<String, SwitchSelector>,
    idle_state_name: String,
}

impl ProcessStateHandler {
    /// Create a handler with its mandatory idle state.
    pub fn new(idle_state_name: impl Into<String>) -> Self {
        let idle_state_name = idle_state_name.into();
        let mut states = BTreeMap::new();
        states.insert(
            idle_state_name.clone(),
            ProcessState::new(idle_state_name.clone(), ProcessStateKind::Idle),
        );
        Self {
            states,
            selectors: BTreeMap::new(),
            idle_state_name,
        }
    }

    pub fn idle_state_name(&self) -> &str {
        &self.idle_state_name
    }

    /// The common straight net: `idle -> load_input -> provide_output ->
    /// idle`, plus a storage discharge path taken when the level alone can
    /// serve a request. Batch-style input states get a loop-back switch for
    /// repeated partial deliveries.
    pub fn standard_net(
        input_kind: ProcessStateKind,
        output_kind: ProcessStateKind,
    ) -> Result<Self, SchedulingError> {
        use crate::state::{GuardedSwitch, ProcessStateSwitch, StateConnector, SwitchGuard};

        if !input_kind.is_input_requesting() {
            return Err(SchedulingError::UnsupportedBranchShape(format!(
                "standard net needs an input-requesting kind, got {input_kind:?}"
            )));
        }
        if !output_kind.is_output_providing() {
            return Err(SchedulingError::UnsupportedBranchShape(format!(
                "standard net needs an output-providing kind, got {output_kind:?}"
            )));
        }

        let mut net = Self::new("idle");
        net.add_state(ProcessState::new("load_input", input_kind))?;
        net.add_state(ProcessState::new("provide_output", output_kind))?;
        net.add_state(ProcessState::new(
            "discharge",
            ProcessStateKind::OutputFromStorage,
        ))?;

        net.add_selector(
            "idle",
            SwitchSelector::MultiTarget(vec![
                GuardedSwitch {
                    guard: SwitchGuard::StorageCanSupply,
                    switch: ProcessStateSwitch {
                        connector: StateConnector::new("discharge", "idle"),
                        policy: SwitchPolicy::AtNextDiscreteEvent,
                    },
                },
                GuardedSwitch {
                    guard: SwitchGuard::Always,
                    switch: ProcessStateSwitch {
                        connector: StateConnector::new("provide_output", "idle"),
                        policy: SwitchPolicy::AtNextDiscreteEvent,
                    },
                },
            ]),
        )?;
        net.add_selector(
            "discharge",
            SwitchSelector::Single(ProcessStateSwitch {
                connector: StateConnector::new("idle", "discharge"),
                policy: SwitchPolicy::AtOutputStreamProvided,
            }),
        )?;
        net.add_selector(
            "provide_output",
            SwitchSelector::Single(ProcessStateSwitch {
                connector: StateConnector::new("load_input", "provide_output"),
                policy: SwitchPolicy::AtOutputStreamProvided,
            }),
        )?;
        net.add_selector(
            "load_input",
            SwitchSelector::MultiTarget(vec![
                GuardedSwitch {
                    guard: SwitchGuard::BranchUnfulfilled,
                    switch: ProcessStateSwitch {
                        connector: StateConnector::new("load_input", "load_input"),
                        policy: SwitchPolicy::AtInputStreamProvided,
                    },
                },
                GuardedSwitch {
                    guard: SwitchGuard::Always,
                    switch: ProcessStateSwitch {
                        connector: StateConnector::new("idle", "load_input"),
                        policy: SwitchPolicy::AtInputStreamProvided,
                    },
                },
            ]),
        )?;
        Ok(net)
    }

    pub fn add_state(&mut self, state: ProcessState) -> Result<(), SchedulingError> {
        if self.states.contains_key(&state.name) {
            return Err(SchedulingError::DuplicateProcessState(state.name));
        }
        self.states.insert(state.name.clone(), state);
        Ok(())
    }

    /// Register the selector for switches entering `end_state`. Enforces the
    /// one-switch-per-connector invariant across the whole table.
    pub fn add_selector(
        &mut self,
        end_state: &str,
        selector: SwitchSelector,
    ) -> Result<(), SchedulingError> {
        for switch in selector.switches() {
            if switch.connector.end_state != end_state {
                return Err(SchedulingError::DuplicateSwitch {
                    start: switch.connector.start_state.clone(),
                    end: switch.connector.end_state.clone(),
                });
            }
        }
        let mut connectors: Vec<_> = self
            .selectors
            .values()
            .flat_map(|s| s.switches())
            .map(|s| s.connector.clone())
            .collect();
        for switch in selector.switches() {
            if connectors.contains(&switch.connector) {
                return Err(SchedulingError::DuplicateSwitch {
                    start: switch.connector.start_state.clone(),
                    end: switch.connector.end_state.clone(),
                });
            }
            connectors.push(switch.connector.clone());
        }
        if self.selectors.contains_key(end_state) {
            return Err(SchedulingError::DuplicateSwitch {
                start: "*".into(),
                end: end_state.to_owned(),
            });
        }
        self.selectors.insert(end_state.to_owned(), selector);
        Ok(())
    }

    pub fn state(&self, name: &str) -> Result<&ProcessState, SchedulingError> {
        self.states
            .get(name)
            .ok_or_else(|| SchedulingError::UnknownProcessState(name.to_owned()))
    }

    pub fn current_state<'a>(
        &'a self,
        data: &ProcessStepData,
    ) -> Result<&'a ProcessState, SchedulingError> {
        self.state(&data.cursor.current_state)
    }

    // -----------------------------------------------------------------------
    // Switch event times
    // -----------------------------------------------------------------------

    fn switch_event_time(
        &self,
        policy: &SwitchPolicy,
        data: &ProcessStepData,
    ) -> Result<TimePoint, SchedulingError> {
        match policy {
            SwitchPolicy::AtNextDiscreteEvent => Ok(data.time.next_stream_end),
            SwitchPolicy::AtInputStreamProvided => data.input_reference_start().ok_or_else(|| {
                SchedulingError::UnsupportedBranchShape(format!(
                    "input-provided switch on '{}' with no input stream state",
                    data.step_name
                ))
            }),
            SwitchPolicy::AtOutputStreamProvided => data
                .cursor
                .current_output
                .as_ref()
                .map(|o| o.start_time())
                .ok_or_else(|| {
                    SchedulingError::UnsupportedBranchShape(format!(
                        "output-provided switch on '{}' with no output stream state",
                        data.step_name
                    ))
                }),
            SwitchPolicy::FixedDelay { delay } => Ok(data.time.last_switch_time - delay),
            SwitchPolicy::AfterInputAndOutputStream => {
                let input = data.input_reference_start();
                let output = data.cursor.current_output.as_ref().map(|o| o.start_time());
                match (input, output) {
                    (Some(i), Some(o)) => Ok(i.min(o)),
                    _ => Err(SchedulingError::UnsupportedBranchShape(format!(
                        "after-input-and-output switch on '{}' with an unresolved side",
                        data.step_name
                    ))),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stepping primitive
    // -----------------------------------------------------------------------

    /// Step one transition backward: select the switch entering the current
    /// state, compute the backward event time, close the current state into
    /// the temporary plan, and activate the predecessor.
    pub fn switch_to_previous_state(
        &self,
        data: &mut ProcessStepData,
        ctx: &SelectionContext,
    ) -> Result<String, SchedulingError> {
        let current_name = data.cursor.current_state.clone();
        let selector = self.selectors.get(&current_name).ok_or_else(|| {
            SchedulingError::NoSwitchForState {
                state: current_name.clone(),
            }
        })?;
        let switch = selector
            .select(ctx)
            .ok_or_else(|| SchedulingError::NoSwitchForState {
                state: current_name.clone(),
            })?;

        let event_time = self.switch_event_time(&switch.policy, data)?;
        let current = self.state(&current_name)?;

        let energy = match &current.kind {
            ProcessStateKind::IntermediateEnergyBased {
                specific_energy_demand,
            } => data
                .cursor
                .current_output
                .as_ref()
                .map(|o| o.total_mass() * *specific_energy_demand),
            _ => None,
        };

        data.temp_plan.state_entries.push(ProcessStateEntry {
            process_step_name: data.step_name.clone(),
            state_name: current_name.clone(),
            start_time: event_time,
            end_time: data.time.last_switch_time,
            energy,
        });

        let previous = switch.connector.start_state.clone();
        data.cursor.current_state = previous.clone();
        data.time.last_switch_time = event_time;
        if self.state(&previous)?.kind.is_idle() {
            data.time.last_idle_time = event_time;
        }
        Ok(previous)
    }

    // -----------------------------------------------------------------------
    // Composite walks
    // -----------------------------------------------------------------------

    pub fn switch_to_output_providing_state(
        &self,
        data: &mut ProcessStepData,
        ctx: &SelectionContext,
    ) -> Result<String, SchedulingError> {
        self.walk_until(data, ctx, ProcessStateKind::is_output_providing)
    }

    pub fn switch_to_input_requesting_state(
        &self,
        data: &mut ProcessStepData,
        ctx: &SelectionContext,
    ) -> Result<String, SchedulingError> {
        self.walk_until(data, ctx, ProcessStateKind::is_input_requesting)
    }

    pub fn switch_to_idle_state(
        &self,
        data: &mut ProcessStepData,
        ctx: &SelectionContext,
    ) -> Result<String, SchedulingError> {
        self.walk_until(data, ctx, ProcessStateKind::is_idle)
    }

    /// Repeat the stepping primitive until a state matching `pred` is
    /// reached. Every visited state is archived; revisiting an archived
    /// state is a closed loop and fatal.
    fn walk_until(
        &self,
        data: &mut ProcessStepData,
        ctx: &SelectionContext,
        pred: fn(&ProcessStateKind) -> bool,
    ) -> Result<String, SchedulingError> {
        let mut archive: Vec<String> = Vec::new();
        loop {
            let current = data.cursor.current_state.clone();
            if pred(&self.state(&current)?.kind) {
                return Ok(current);
            }
            if archive.contains(&current) {
                return Err(SchedulingError::ClosedLoopDetected { state: current });
            }
            archive.push(current);
            self.switch_to_previous_state(data, ctx)?;
        }
    }

    // -----------------------------------------------------------------------
    // Maximum stream mass
    // -----------------------------------------------------------------------

    /// Truncate an output request to the state's `maximum_stream_mass`, when
    /// one is configured. The result keeps the stream kind and the original
    /// window (and thus `end_time`); the flag reports whether the clamp fired.
    pub fn clamp_to_maximum_stream_mass(
        &self,
        state_name: &str,
        request: &StreamState,
    ) -> Result<(StreamState, bool), SchedulingError> {
        let kind = &self.state(state_name)?.kind;
        match kind.maximum_stream_mass() {
            Some(maximum) if request.total_mass() > maximum => {
                Ok((request.with_reduced_mass(maximum), true))
            }
            _ => Ok((request.clone(), false)),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
