//! Process states and the switch table of the per-step Petri net.
//!
//! States are a closed enum dispatched via `match` -- category behaviour
//! lives in small predicate functions, not virtual inheritance. States are
//! created once at topology construction and reused for the whole run.

use crate::fixed::Mass;
use crate::time::TimeDelta;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State kinds
// ---------------------------------------------------------------------------

/// The closed set of process-state variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessStateKind {
    /// Terminal/initial rest state.
    Idle,
    /// Provides a continuous output stream.
    ContinuousOutput { maximum_stream_mass: Option<Mass> },
    /// Provides a batch output stream.
    BatchOutput { maximum_stream_mass: Option<Mass> },
    /// Serves an output request from storage alone, no fresh input.
    OutputFromStorage,
    /// Requests a continuous input stream.
    ContinuousInput,
    /// Requests batch inputs, possibly repeatedly (partial deliveries).
    BatchInput,
    /// Requests the entire missing mass in one batch; never splits.
    FullBatchInput,
    /// Requests input and provides output in the same phase, buffering
    /// through storage.
    ParallelInputOutputWithStorage,
    /// A phase between input and output with no stream of its own.
    Intermediate,
    /// An intermediate phase with a specific energy demand per unit of
    /// output mass; closed entries report the resulting energy quantity.
    IntermediateEnergyBased { specific_energy_demand: Mass },
}

impl ProcessStateKind {
    pub fn is_idle(&self) -> bool {
        matches!(self, ProcessStateKind::Idle)
    }

    pub fn is_output_providing(&self) -> bool {
        matches!(
            self,
            ProcessStateKind::ContinuousOutput { .. }
                | ProcessStateKind::BatchOutput { .. }
                | ProcessStateKind::OutputFromStorage
                | ProcessStateKind::ParallelInputOutputWithStorage
        )
    }

    pub fn is_input_requesting(&self) -> bool {
        matches!(
            self,
            ProcessStateKind::ContinuousInput
                | ProcessStateKind::BatchInput
                | ProcessStateKind::FullBatchInput
                | ProcessStateKind::ParallelInputOutputWithStorage
        )
    }

    /// The per-activation output mass cap, when this kind carries one.
    pub fn maximum_stream_mass(&self) -> Option<Mass> {
        match self {
            ProcessStateKind::ContinuousOutput {
                maximum_stream_mass,
            }
            | ProcessStateKind::BatchOutput {
                maximum_stream_mass,
            } => *maximum_stream_mass,
            _ => None,
        }
    }
}

/// A named state of one process step. Names are unique within the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub name: String,
    pub kind: ProcessStateKind,
}

impl ProcessState {
    pub fn new(name: impl Into<String>, kind: ProcessStateKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Switches
// ---------------------------------------------------------------------------

/// A directed edge of the Petri net, in forward-time direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConnector {
    pub start_state: String,
    pub end_state: String,
}

impl StateConnector {
    pub fn new(start_state: impl Into<String>, end_state: impl Into<String>) -> Self {
        Self {
            start_state: start_state.into(),
            end_state: end_state.into(),
        }
    }
}

/// When, walking backward, the switch across a connector fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchPolicy {
    /// At the externally triggered event: the end of the stream request
    /// currently being resolved.
    AtNextDiscreteEvent,
    /// At the start boundary of the input stream state just computed.
    AtInputStreamProvided,
    /// At the start boundary of the current output stream state.
    AtOutputStreamProvided,
    /// A configured delay before the neighbouring switch event.
    FixedDelay { delay: TimeDelta },
    /// Both sides resolved; fires at the earlier of the two starts.
    AfterInputAndOutputStream,
}

/// A connector plus its switch-time policy. At most one switch may exist per
/// connector in a step's switch table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStateSwitch {
    pub connector: StateConnector,
    pub policy: SwitchPolicy,
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Predicate deciding whether a guarded switch applies in the current
/// resolution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchGuard {
    Always,
    BranchFulfilled,
    BranchUnfulfilled,
    StorageCanSupply,
    StorageCannotSupply,
}

impl SwitchGuard {
    pub fn passes(self, ctx: &SelectionContext) -> bool {
        match self {
            SwitchGuard::Always => true,
            SwitchGuard::BranchFulfilled => ctx.branch_fulfilled,
            SwitchGuard::BranchUnfulfilled => !ctx.branch_fulfilled,
            SwitchGuard::StorageCanSupply => ctx.storage_can_supply,
            SwitchGuard::StorageCannotSupply => !ctx.storage_can_supply,
        }
    }
}

/// Facts about the in-flight branch that drive multi-target selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionContext {
    pub branch_fulfilled: bool,
    pub storage_can_supply: bool,
}

/// A switch with the guard under which it is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardedSwitch {
    pub guard: SwitchGuard,
    pub switch: ProcessStateSwitch,
}

/// The switches entering one state, from one or several predecessors.
///
/// `Single` is the common case. `MultiTarget` picks the first switch whose
/// guard passes, in declaration order -- e.g. a batch input state loops back
/// for more input while the branch is unfulfilled, or an output state is
/// served from storage when the level suffices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwitchSelector {
    Single(ProcessStateSwitch),
    MultiTarget(Vec<GuardedSwitch>),
}

impl SwitchSelector {
    /// Choose the switch to fire for the current context.
    pub fn select(&self, ctx: &SelectionContext) -> Option<&ProcessStateSwitch> {
        match self {
            SwitchSelector::Single(switch) => Some(switch),
            SwitchSelector::MultiTarget(guarded) => guarded
                .iter()
                .find(|g| g.guard.passes(ctx))
                .map(|g| &g.switch),
        }
    }

    /// All switches wrapped by this selector, for table validation.
    pub fn switches(&self) -> Vec<&ProcessStateSwitch> {
        match self {
            SwitchSelector::Single(switch) => vec![switch],
            SwitchSelector::MultiTarget(guarded) => guarded.iter().map(|g| &g.switch).collect(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
