//! The speculative request tree built while resolving one output request.
//!
//! An [`OutputBranch`] corresponds to one requested output-stream state. It
//! owns one [`StreamBranch`] per distinct input stream name, each holding an
//! ordered sequence of [`TemporalBranch`]es -- one per individual input
//! request. Completion cascades bottom-up: a branch is complete only when all
//! of its children are.

use crate::error::SchedulingError;
use crate::id::{BranchId, TemporalBranchId};
use crate::stream::StreamState;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Temporal branch
// ---------------------------------------------------------------------------

/// One individual input-stream request and, once confirmed, its validated
/// counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalBranch {
    pub id: TemporalBranchId,
    pub requested: StreamState,
    pub validated: Option<StreamState>,
}

impl TemporalBranch {
    pub fn is_complete(&self) -> bool {
        self.validated.is_some()
    }
}

// ---------------------------------------------------------------------------
// Stream branch
// ---------------------------------------------------------------------------

/// All requests issued against one input stream name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBranch {
    pub stream_name: String,
    pub temporal_branches: Vec<TemporalBranch>,
}

impl StreamBranch {
    pub fn is_complete(&self) -> bool {
        self.temporal_branches.iter().all(|t| t.is_complete())
    }

    /// The single open (unvalidated) request, if any. The protocol issues at
    /// most one request at a time per stream branch.
    pub fn open_branch_mut(&mut self) -> Option<&mut TemporalBranch> {
        self.temporal_branches.iter_mut().find(|t| !t.is_complete())
    }

    pub fn validated_states(&self) -> Vec<StreamState> {
        self.temporal_branches
            .iter()
            .filter_map(|t| t.validated.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Output branch
// ---------------------------------------------------------------------------

/// The complete speculative resolution of one requested output-stream state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBranch {
    pub id: BranchId,
    pub requested_output: StreamState,
    pub stream_branches: Vec<StreamBranch>,
    /// Set once the owning step has written its plan entries and emitted the
    /// final validation downstream.
    pub completed: bool,
    next_temporal_id: u64,
}

impl OutputBranch {
    pub fn new(id: BranchId, requested_output: StreamState) -> Self {
        Self {
            id,
            requested_output,
            stream_branches: Vec::new(),
            completed: false,
            next_temporal_id: 0,
        }
    }

    /// Replace the requested output after an accepted adaptation.
    pub fn adapt_output(&mut self, adapted: StreamState) {
        self.requested_output = adapted;
    }

    /// Record a new input request, creating the stream branch on first use.
    pub fn push_request(&mut self, request: StreamState) -> TemporalBranchId {
        let id = TemporalBranchId(self.next_temporal_id);
        self.next_temporal_id += 1;

        let name = request.stream_name().to_owned();
        let position = self
            .stream_branches
            .iter()
            .position(|b| b.stream_name == name)
            .unwrap_or_else(|| {
                self.stream_branches.push(StreamBranch {
                    stream_name: name,
                    temporal_branches: Vec::new(),
                });
                self.stream_branches.len() - 1
            });
        self.stream_branches[position]
            .temporal_branches
            .push(TemporalBranch {
                id,
                requested: request,
                validated: None,
            });
        id
    }

    /// Replace the open request for its stream after a counter-offer.
    pub fn adapt_open_request(&mut self, adapted: StreamState) -> Result<(), SchedulingError> {
        let name = adapted.stream_name().to_owned();
        let open = self
            .stream_branch_mut(&name)?
            .open_branch_mut()
            .ok_or(SchedulingError::IncompleteBranch { step: name })?;
        open.requested = adapted;
        Ok(())
    }

    /// Confirm the open request for the validated state's stream.
    pub fn validate_open_request(
        &mut self,
        validated: StreamState,
    ) -> Result<(), SchedulingError> {
        let name = validated.stream_name().to_owned();
        let open = self
            .stream_branch_mut(&name)?
            .open_branch_mut()
            .ok_or(SchedulingError::IncompleteBranch { step: name })?;
        open.validated = Some(validated);
        Ok(())
    }

    pub fn stream_branch(&self, stream_name: &str) -> Result<&StreamBranch, SchedulingError> {
        self.stream_branches
            .iter()
            .find(|b| b.stream_name == stream_name)
            .ok_or_else(|| SchedulingError::UnknownStream(stream_name.to_owned()))
    }

    fn stream_branch_mut(
        &mut self,
        stream_name: &str,
    ) -> Result<&mut StreamBranch, SchedulingError> {
        self.stream_branches
            .iter_mut()
            .find(|b| b.stream_name == stream_name)
            .ok_or_else(|| SchedulingError::UnknownStream(stream_name.to_owned()))
    }

    /// All validated input states for one stream, in request order.
    pub fn validated_inputs(&self, stream_name: &str) -> Vec<StreamState> {
        self.stream_branch(stream_name)
            .map(|b| b.validated_states())
            .unwrap_or_default()
    }

    /// Bottom-up completion: every stream branch fulfilled.
    pub fn all_stream_branches_complete(&self) -> bool {
        self.stream_branches.iter().all(|b| b.is_complete())
    }

    /// Invariant checker run after every validation: no temporal branch may
    /// be left open once the production branch is declared complete.
    pub fn check_temporal_branches_fulfilled(
        &self,
        step_name: &str,
    ) -> Result<(), SchedulingError> {
        if self.all_stream_branches_complete() {
            Ok(())
        } else {
            Err(SchedulingError::IncompleteBranch {
                step: step_name.to_owned(),
            })
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_mass;
    use crate::stream::BatchStreamState;

    fn batch(name: &str, delivery: i64, mass: f64) -> StreamState {
        StreamState::Batch(BatchStreamState {
            stream_name: name.into(),
            start_time: delivery - 10,
            end_time: delivery,
            batch_mass: f64_to_mass(mass),
        })
    }

    fn branch() -> OutputBranch {
        OutputBranch::new(BranchId(0), batch("out", 900, 300.0))
    }

    // -----------------------------------------------------------------------
    // Test 1: Completion cascades bottom-up
    // -----------------------------------------------------------------------
    #[test]
    fn completion_cascades_bottom_up() {
        let mut b = branch();
        assert!(b.all_stream_branches_complete()); // vacuously, no requests yet

        b.push_request(batch("in", 800, 200.0));
        assert!(!b.all_stream_branches_complete());

        b.validate_open_request(batch("in", 800, 200.0)).unwrap();
        assert!(b.all_stream_branches_complete());

        b.push_request(batch("in", 780, 100.0));
        assert!(!b.all_stream_branches_complete());
        b.validate_open_request(batch("in", 780, 100.0)).unwrap();
        assert!(b.all_stream_branches_complete());
    }

    // -----------------------------------------------------------------------
    // Test 2: Temporal branch ids are sequential per output branch
    // -----------------------------------------------------------------------
    #[test]
    fn temporal_ids_sequential() {
        let mut b = branch();
        let first = b.push_request(batch("in", 800, 200.0));
        b.validate_open_request(batch("in", 800, 200.0)).unwrap();
        let second = b.push_request(batch("in", 780, 100.0));
        assert_eq!(first, crate::id::TemporalBranchId(0));
        assert_eq!(second, crate::id::TemporalBranchId(1));
    }

    // -----------------------------------------------------------------------
    // Test 3: Validation without an open request is fatal
    // -----------------------------------------------------------------------
    #[test]
    fn validation_without_open_request_is_fatal() {
        let mut b = branch();
        b.push_request(batch("in", 800, 200.0));
        b.validate_open_request(batch("in", 800, 200.0)).unwrap();

        let err = b.validate_open_request(batch("in", 780, 100.0)).unwrap_err();
        assert!(matches!(err, SchedulingError::IncompleteBranch { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 4: Adaption replaces the open request in place
    // -----------------------------------------------------------------------
    #[test]
    fn adaption_replaces_open_request() {
        let mut b = branch();
        b.push_request(batch("in", 800, 250.0));
        b.adapt_open_request(batch("in", 790, 200.0)).unwrap();

        let open = &b.stream_branch("in").unwrap().temporal_branches[0];
        assert_eq!(open.requested.total_mass(), f64_to_mass(200.0));
        assert_eq!(open.requested.end_time(), 790);
    }

    // -----------------------------------------------------------------------
    // Test 5: Validated inputs accumulate in request order
    // -----------------------------------------------------------------------
    #[test]
    fn validated_inputs_accumulate() {
        let mut b = branch();
        b.push_request(batch("in", 800, 200.0));
        b.validate_open_request(batch("in", 800, 200.0)).unwrap();
        b.push_request(batch("in", 780, 100.0));
        b.validate_open_request(batch("in", 780, 100.0)).unwrap();

        let validated = b.validated_inputs("in");
        assert_eq!(validated.len(), 2);
        assert_eq!(validated[0].total_mass(), f64_to_mass(200.0));
        assert_eq!(validated[1].total_mass(), f64_to_mass(100.0));
    }

    // -----------------------------------------------------------------------
    // Test 6: Invariant checker flags an open branch
    // -----------------------------------------------------------------------
    #[test]
    fn invariant_checker_flags_open_branch() {
        let mut b = branch();
        b.push_request(batch("in", 800, 200.0));
        let err = b.check_temporal_branches_fulfilled("step").unwrap_err();
        assert!(matches!(err, SchedulingError::IncompleteBranch { .. }));
    }
}
