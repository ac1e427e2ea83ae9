//! The inter-node negotiation protocol.
//!
//! Four message types flow in a strict request/response shape between
//! adjacent nodes. Every protocol step is a plain function call returning the
//! next message -- no queueing, no background execution. Within one process
//! step, messages for a production branch are strictly sequential.
//!
//! ```text
//! downstream -- UpstreamNewProductionOrder --> upstream   "provide this input"
//! upstream   -- DownstreamValidationOrder --> downstream  "confirmed as delivered"
//! upstream   -- DownstreamAdaptionOrder   --> downstream  "I can only deliver this"
//! downstream -- UpstreamAdaptionOrder     --> upstream    "acknowledged, adapting"
//! ```

use crate::balance::MassBalance;
use crate::error::SchedulingError;
use crate::handler::{CursorPhase, ProcessStateHandler, ProcessStepData};
use crate::id::BranchId;
use crate::navigator::BranchNavigator;
use crate::plan::ProductionPlan;
use crate::state::SelectionContext;
use crate::storage::{InstantExclusion, LevelDirection};
use crate::stream::{StreamHandler, StreamState};
use crate::time::TimeData;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// "Please provide this input stream." Routed to the stream's upstream node.
/// `branch` is the requester's branch id, echoed in every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamNewProductionOrder {
    pub stream_state: StreamState,
    pub branch: BranchId,
}

/// "The requested stream is confirmed as delivered." Routed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamValidationOrder {
    pub stream_state: StreamState,
    pub branch: BranchId,
}

/// "I can only deliver this different stream." Routed downstream; a refusal
/// with counter-offer, nothing is validated yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamAdaptionOrder {
    pub stream_state: StreamState,
    pub branch: BranchId,
}

/// "Acknowledged, adapting my request to match." Routed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamAdaptionOrder {
    pub stream_state: StreamState,
    pub branch: BranchId,
}

/// Emitted by the sink once every order is fulfilled exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminateProduction {
    pub orders_completed: usize,
}

/// The protocol alphabet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeMessage {
    UpstreamNewProductionOrder(UpstreamNewProductionOrder),
    DownstreamValidationOrder(DownstreamValidationOrder),
    DownstreamAdaptionOrder(DownstreamAdaptionOrder),
    UpstreamAdaptionOrder(UpstreamAdaptionOrder),
    TerminateProduction(TerminateProduction),
}

// ---------------------------------------------------------------------------
// ProcessStep
// ---------------------------------------------------------------------------

/// A process step node: the Petri net, its checkpointable data bundle, the
/// navigator, and the protocol face built on top of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub name: String,
    pub handler: ProcessStateHandler,
    pub data: ProcessStepData,
    pub navigator: BranchNavigator,
    /// Input streams beyond the main one. Resolving a branch that needs one
    /// of these is intentionally unsupported and fails explicitly.
    pub additional_input_streams: Vec<String>,
}

impl ProcessStep {
    pub fn new(
        name: impl Into<String>,
        handler: ProcessStateHandler,
        balance: MassBalance,
        time: TimeData,
    ) -> Self {
        let name = name.into();
        let idle = handler.idle_state_name().to_owned();
        Self {
            data: ProcessStepData::new(name.clone(), time, balance, &idle),
            name,
            handler,
            navigator: BranchNavigator::new(),
            additional_input_streams: Vec::new(),
        }
    }

    pub fn with_additional_input_stream(mut self, stream_name: impl Into<String>) -> Self {
        self.additional_input_streams.push(stream_name.into());
        self
    }

    fn own_branch_id(&self) -> Result<BranchId, SchedulingError> {
        self.data
            .branch
            .as_ref()
            .map(|b| b.id)
            .ok_or_else(|| SchedulingError::IncompleteBranch {
                step: self.name.clone(),
            })
    }

    // -----------------------------------------------------------------------
    // Protocol step 1: a new production order arrives from downstream
    // -----------------------------------------------------------------------

    /// Prepare a fresh branch, checkpoint, and run the feasibility checks.
    /// Adapted requests are refused with a counter-offer; feasible ones are
    /// served from storage or turned into the first upstream input request.
    pub fn process_upstream_new_production_order(
        &mut self,
        order: &UpstreamNewProductionOrder,
        streams: &StreamHandler,
        plan: &mut ProductionPlan,
    ) -> Result<NodeMessage, SchedulingError> {
        let request = order.stream_state.clone();
        if request.stream_name() != self.data.balance.output_stream_name {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: format!(
                    "production order for '{}' is not this step's output stream",
                    request.stream_name()
                ),
            });
        }
        tracing::debug!(
            step = %self.name,
            stream = %request.stream_name(),
            mass = %request.total_mass(),
            deadline = request.end_time(),
            "new production order received"
        );

        self.data.reply_branch = Some(order.branch);
        self.navigator.prepare_branch(&mut self.data, request);
        self.navigator.store_current_simulation_data(&self.data);

        let outcome = self
            .navigator
            .determine_if_output_stream_requires_adaption(&self.handler, &mut self.data)?;
        if outcome.decider.requires_adaption() {
            return Ok(NodeMessage::DownstreamAdaptionOrder(DownstreamAdaptionOrder {
                stream_state: outcome.adapted,
                branch: order.branch,
            }));
        }
        self.continue_accepted_request(streams, plan)
    }

    // -----------------------------------------------------------------------
    // Protocol step 2: upstream validated our pending input request
    // -----------------------------------------------------------------------

    /// Move the pending input into the validated list, update storage, and
    /// either request the next partial delivery or complete the branch.
    pub fn process_downstream_validation_order(
        &mut self,
        order: &DownstreamValidationOrder,
        streams: &StreamHandler,
        plan: &mut ProductionPlan,
    ) -> Result<NodeMessage, SchedulingError> {
        if order.branch != self.own_branch_id()? {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: "validation echoes an unknown branch".into(),
            });
        }
        let validated = order.stream_state.clone();
        if validated.stream_name() != self.data.balance.input_stream_name {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: format!(
                    "validation for '{}' is not this step's input stream",
                    validated.stream_name()
                ),
            });
        }

        let branch = self
            .data
            .branch
            .as_mut()
            .ok_or_else(|| SchedulingError::IncompleteBranch {
                step: self.name.clone(),
            })?;
        branch.validate_open_request(validated.clone())?;
        self.data.cursor.pending_input = None;
        self.data.cursor.phase = CursorPhase::PostProduction;

        let gained = validated.total_mass() * self.data.balance.conversion_factor;
        self.data.balance.storage.add_to_level(gained);
        self.data.temp_plan.stream_entries.push(validated.clone());
        tracing::debug!(
            step = %self.name,
            stream = %validated.stream_name(),
            mass = %validated.total_mass(),
            level = %self.data.balance.storage.current_level,
            "input stream validated"
        );

        let ctx = self.navigator.selection_context(&self.data)?;
        if !ctx.branch_fulfilled {
            // Close this delivery's input interval (the loop-back switch)
            // and size the next request from what is still missing.
            self.handler.switch_to_previous_state(&mut self.data, &ctx)?;
            let request =
                self.navigator
                    .fulfill_temporal_branch(&self.handler, &mut self.data, streams)?;
            return Ok(NodeMessage::UpstreamNewProductionOrder(
                UpstreamNewProductionOrder {
                    stream_state: request,
                    branch: self.own_branch_id()?,
                },
            ));
        }

        // The main stream branch is fulfilled. A branch that still needs a
        // different input stream is an explicit unsupported shape.
        if !self.additional_input_streams.is_empty() {
            return Err(SchedulingError::UnsupportedBranchShape(format!(
                "step '{}' would need additional input stream '{}' to complete the branch",
                self.name, self.additional_input_streams[0]
            )));
        }
        self.complete_branch(plan)
    }

    // -----------------------------------------------------------------------
    // Protocol step 3: upstream counter-offered a different input stream
    // -----------------------------------------------------------------------

    /// Harmonize the counter-offer into this node's branch and acknowledge.
    /// Under the monotone-backward policy an offer only moves earlier or
    /// shrinks, so adopting it never invalidates the step's own output
    /// commitment; remaining mass is recovered by the validation loop.
    pub fn process_downstream_adaption_order(
        &mut self,
        order: &DownstreamAdaptionOrder,
    ) -> Result<NodeMessage, SchedulingError> {
        if order.branch != self.own_branch_id()? {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: "adaption echoes an unknown branch".into(),
            });
        }
        let adapted = order.stream_state.clone();
        if adapted.stream_name() != self.data.balance.input_stream_name {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: format!(
                    "adaption for '{}' is not this step's input stream",
                    adapted.stream_name()
                ),
            });
        }
        tracing::debug!(
            step = %self.name,
            stream = %adapted.stream_name(),
            mass = %adapted.total_mass(),
            end = adapted.end_time(),
            "counter-offer adopted"
        );

        self.data.cursor.pending_input = Some(adapted.clone());
        self.data
            .branch
            .as_mut()
            .ok_or_else(|| SchedulingError::IncompleteBranch {
                step: self.name.clone(),
            })?
            .adapt_open_request(adapted.clone())?;

        Ok(NodeMessage::UpstreamAdaptionOrder(UpstreamAdaptionOrder {
            stream_state: adapted,
            branch: order.branch,
        }))
    }

    // -----------------------------------------------------------------------
    // Protocol step 4: downstream acknowledged our counter-offer
    // -----------------------------------------------------------------------

    /// Continue the branch prepared during the adaptation round-trip.
    pub fn process_upstream_adaption_order(
        &mut self,
        order: &UpstreamAdaptionOrder,
        streams: &StreamHandler,
        plan: &mut ProductionPlan,
    ) -> Result<NodeMessage, SchedulingError> {
        if self.data.reply_branch != Some(order.branch) {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: "adaption acknowledgement echoes an unknown branch".into(),
            });
        }
        if order.stream_state.stream_name() != self.data.balance.output_stream_name {
            return Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: format!(
                    "acknowledgement for '{}' is not this step's output stream",
                    order.stream_state.stream_name()
                ),
            });
        }
        self.continue_accepted_request(streams, plan)
    }

    // -----------------------------------------------------------------------
    // Shared continuation and completion
    // -----------------------------------------------------------------------

    /// The accepted-request path shared by steps 1 and 4: walk to the state
    /// that serves this request. When the selector routes to the
    /// storage-discharge state, validate immediately without requesting any
    /// input; otherwise issue the first input request.
    fn continue_accepted_request(
        &mut self,
        streams: &StreamHandler,
        plan: &mut ProductionPlan,
    ) -> Result<NodeMessage, SchedulingError> {
        let ctx = self.navigator.selection_context(&self.data)?;
        let serving = self
            .handler
            .switch_to_output_providing_state(&mut self.data, &ctx)?;
        if matches!(
            self.handler.state(&serving)?.kind,
            crate::state::ProcessStateKind::OutputFromStorage
        ) {
            tracing::debug!(step = %self.name, "output served directly from storage");
            return self.complete_branch(plan);
        }

        // Already positioned in the output state; the navigator's walk is a
        // no-op there and continues into the input-requesting state.
        let request = self.navigator.determine_input_stream_from_output_stream(
            &self.handler,
            &mut self.data,
            streams,
        )?;
        Ok(NodeMessage::UpstreamNewProductionOrder(
            UpstreamNewProductionOrder {
                stream_state: request,
                branch: self.own_branch_id()?,
            },
        ))
    }

    /// Close the branch: walk to idle, settle storage, build the backward
    /// storage entries, promote the temporary plan, and validate downstream.
    fn complete_branch(
        &mut self,
        plan: &mut ProductionPlan,
    ) -> Result<NodeMessage, SchedulingError> {
        let ctx = SelectionContext {
            branch_fulfilled: true,
            storage_can_supply: false,
        };
        self.handler.switch_to_idle_state(&mut self.data, &ctx)?;
        self.data.cursor.phase = CursorPhase::ValidatedPostProduction;

        let output = self.data.cursor.current_output.clone().ok_or_else(|| {
            SchedulingError::UnsupportedBranchShape(format!(
                "completing a branch on '{}' with no output request",
                self.name
            ))
        })?;
        self.data
            .balance
            .storage
            .remove_from_level(output.total_mass(), output.end_time())?;

        let validated_inputs = self
            .data
            .branch
            .as_ref()
            .map(|b| b.validated_inputs(&self.data.balance.input_stream_name))
            .unwrap_or_default();
        let exclusion = match validated_inputs.first() {
            Some(StreamState::Batch(_)) => InstantExclusion {
                before_first_input_start: false,
                before_first_input_end: true,
            },
            Some(StreamState::Continuous(_)) => InstantExclusion {
                before_first_input_start: true,
                before_first_input_end: false,
            },
            None => InstantExclusion::default(),
        };
        let storage_entries = self.data.balance.storage.build_level_entries(
            &validated_inputs,
            std::slice::from_ref(&output),
            LevelDirection::Backward,
            exclusion,
            self.data.balance.storage.current_level,
        )?;
        self.data.temp_plan.storage_entries.extend(storage_entries);
        self.data.temp_plan.stream_entries.push(output.clone());

        let branch = self
            .data
            .branch
            .as_mut()
            .ok_or_else(|| SchedulingError::IncompleteBranch {
                step: self.name.clone(),
            })?;
        branch.check_temporal_branches_fulfilled(&self.name)?;
        branch.completed = true;

        plan.append_branch(std::mem::take(&mut self.data.temp_plan));
        self.navigator.store_current_simulation_data(&self.data);

        let reply = self
            .data
            .reply_branch
            .ok_or_else(|| SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: "branch completed with no downstream requester".into(),
            })?;
        tracing::debug!(
            step = %self.name,
            mass = %output.total_mass(),
            window_start = output.start_time(),
            window_end = output.end_time(),
            "production branch completed"
        );
        Ok(NodeMessage::DownstreamValidationOrder(
            DownstreamValidationOrder {
                stream_state: output,
                branch: reply,
            },
        ))
    }

    /// Dispatch any protocol message addressed to this step.
    pub fn dispatch(
        &mut self,
        message: NodeMessage,
        streams: &StreamHandler,
        plan: &mut ProductionPlan,
    ) -> Result<NodeMessage, SchedulingError> {
        match message {
            NodeMessage::UpstreamNewProductionOrder(order) => {
                self.process_upstream_new_production_order(&order, streams, plan)
            }
            NodeMessage::DownstreamValidationOrder(order) => {
                self.process_downstream_validation_order(&order, streams, plan)
            }
            NodeMessage::DownstreamAdaptionOrder(order) => {
                self.process_downstream_adaption_order(&order)
            }
            NodeMessage::UpstreamAdaptionOrder(order) => {
                self.process_upstream_adaption_order(&order, streams, plan)
            }
            NodeMessage::TerminateProduction(_) => Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: "termination addressed to a process step".into(),
            }),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
