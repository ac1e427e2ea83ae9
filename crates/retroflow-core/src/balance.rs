//! Mass balance: the input↔output reconciliation arithmetic of one process
//! step.
//!
//! The invariant is exact: `output_mass == input_mass * conversion_factor`
//! with no loss term. Fulfillment checks use exact equality, never an
//! epsilon; all arithmetic is Q32.32 fixed-point.

use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::storage::Storage;
use crate::stream::{BatchStream, ContinuousStream, StreamState};
use crate::time::TimePoint;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sizing results
// ---------------------------------------------------------------------------

/// A sized continuous-input request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousInputSizing {
    /// Mass to request, in input-commodity units.
    pub input_mass: Mass,
    /// Operation rate after clipping to the stream's bounds.
    pub rate: Mass,
    /// True when the wanted rate fell outside the stream's bounds: the step's
    /// storage must absorb the rate mismatch.
    pub storage_required: bool,
}

// ---------------------------------------------------------------------------
// MassBalance
// ---------------------------------------------------------------------------

/// Owns the conversion factor and storage of one process step and sizes the
/// input requests needed to satisfy an output request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassBalance {
    /// Output mass produced per unit of input mass. Exact, no loss term.
    pub conversion_factor: Mass,
    pub input_stream_name: String,
    pub output_stream_name: String,
    pub storage: Storage,
}

impl MassBalance {
    pub fn new(
        conversion_factor: Mass,
        input_stream_name: impl Into<String>,
        output_stream_name: impl Into<String>,
        storage: Storage,
    ) -> Self {
        Self {
            conversion_factor,
            input_stream_name: input_stream_name.into(),
            output_stream_name: output_stream_name.into(),
            storage,
        }
    }

    // -----------------------------------------------------------------------
    // Fulfillment checks
    // -----------------------------------------------------------------------

    /// Output mass still unaccounted for: `output − Σ validated_inputs × factor`,
    /// in output-commodity units. A negative result means over-delivery and is
    /// a fatal internal-consistency error.
    pub fn missing_mass_for_output(
        &self,
        output: &StreamState,
        validated_inputs: &[StreamState],
    ) -> Result<Mass, SchedulingError> {
        let mut delivered = Mass::ZERO;
        for input in validated_inputs {
            delivered += input.total_mass() * self.conversion_factor;
        }
        let missing = output.total_mass() - delivered;
        if missing < Mass::ZERO {
            return Err(SchedulingError::NegativeMissingMass {
                stream: output.stream_name().to_owned(),
                missing,
            });
        }
        Ok(missing)
    }

    /// Exact-equality fulfillment check.
    pub fn branch_fulfilled(&self, missing: Mass) -> bool {
        missing == Mass::ZERO
    }

    /// Band fulfillment check, available only when a `[min, max]` storage
    /// band is configured. The judged quantity is the level the branch will
    /// leave behind: validated inputs are already in `current_level`, the
    /// output is drawn at completion, so the projection is
    /// `current_level − output_mass`. Fulfilled iff that projection lies
    /// strictly inside the band; a projection exactly at a bound is NOT
    /// fulfilled, which pushes one more request and keeps the level off the
    /// boundary.
    pub fn branch_fulfilled_with_over_production(&self, output_mass: Mass) -> Option<bool> {
        match (
            self.storage.minimum_level_at_branch_start,
            self.storage.maximum_level_at_branch_start,
        ) {
            (Some(minimum), Some(maximum)) => {
                let projected = self.storage.current_level - output_mass;
                Some(minimum < projected && projected < maximum)
            }
            _ => None,
        }
    }

    /// Fulfillment of one stream branch: the band check when a band is
    /// configured, exact missing-mass equality otherwise.
    pub fn stream_branch_fulfilled(
        &self,
        output: &StreamState,
        validated_inputs: &[StreamState],
    ) -> Result<bool, SchedulingError> {
        if let Some(fulfilled) = self.branch_fulfilled_with_over_production(output.total_mass()) {
            return Ok(fulfilled);
        }
        let missing = self.missing_mass_for_output(output, validated_inputs)?;
        Ok(self.branch_fulfilled(missing))
    }

    // -----------------------------------------------------------------------
    // Input sizing
    // -----------------------------------------------------------------------

    /// Batch sizing: `min(missing in input units, maximum_batch_mass)`.
    /// A single batch can under-supply, which forces repeated requests.
    pub fn size_batch_input(&self, stream: &BatchStream, missing_output_units: Mass) -> Mass {
        let input_units = missing_output_units / self.conversion_factor;
        input_units.min(stream.maximum_batch_mass)
    }

    /// Full-batch sizing: the entire missing mass in one batch. Exceeding the
    /// stream's cap is an unsupported shape, not a partial request.
    pub fn size_full_batch_input(
        &self,
        stream: &BatchStream,
        missing_output_units: Mass,
    ) -> Result<Mass, SchedulingError> {
        let input_units = missing_output_units / self.conversion_factor;
        if input_units > stream.maximum_batch_mass {
            return Err(SchedulingError::UnsupportedBranchShape(format!(
                "full-batch request of {input_units} exceeds maximum batch mass {} on '{}'",
                stream.maximum_batch_mass, stream.name
            )));
        }
        Ok(input_units)
    }

    /// Continuous sizing: wanted rate = output rate ÷ conversion factor,
    /// clipped to the stream's configured bounds. Clipping flags that storage
    /// must buffer the rate mismatch.
    pub fn size_continuous_input(
        &self,
        stream: &ContinuousStream,
        output: &StreamState,
        missing_output_units: Mass,
    ) -> Result<ContinuousInputSizing, SchedulingError> {
        let input_mass = missing_output_units / self.conversion_factor;
        let window = output.end_time() - output.start_time();
        if window <= 0 {
            return Err(SchedulingError::InfinitesimalStream {
                stream: output.stream_name().to_owned(),
                at: output.start_time(),
            });
        }
        let wanted = input_mass / Mass::from_num(window);

        let mut rate = wanted;
        let mut storage_required = false;
        if let Some(maximum) = stream.maximum_operation_rate
            && wanted > maximum
        {
            rate = maximum;
            storage_required = true;
        }
        if let Some(minimum) = stream.minimum_operation_rate
            && wanted < minimum
        {
            rate = minimum;
            storage_required = true;
        }

        Ok(ContinuousInputSizing {
            input_mass,
            rate,
            storage_required,
        })
    }

    // -----------------------------------------------------------------------
    // Request timing
    // -----------------------------------------------------------------------

    /// The delivery time the next input request must meet, working backward
    /// from the production start of the current output commitment. When a
    /// previously validated input starts earlier, the request is pulled
    /// forward to that time so consecutive deliveries chain seamlessly.
    pub fn required_input_delivery_time(
        &self,
        production_start: TimePoint,
        validated_inputs: &[StreamState],
    ) -> TimePoint {
        let earliest_validated = validated_inputs.iter().map(|s| s.start_time()).min();
        match earliest_validated {
            Some(earliest) if earliest < production_start => earliest,
            _ => production_start,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
