//! Streams: typed mass transfers between chain nodes.
//!
//! A [`Stream`] is immutable static configuration (endpoints, commodity, rate
//! or batch bounds). Each resolution request creates a fresh [`StreamState`]
//! value describing one concrete transfer window; states are never mutated
//! after construction.

use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::time::{TimeDelta, TimePoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Commodity
// ---------------------------------------------------------------------------

/// A named material or product type. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commodity(pub String);

impl Commodity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Stream roles
// ---------------------------------------------------------------------------

/// Which side of a process step a stream state is queried for. Determines the
/// delivery instant of batch transfers: a batch arrives at `end_time` when
/// feeding a step and leaves at `start_time` when drawn from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamRole {
    Input,
    Output,
}

// ---------------------------------------------------------------------------
// Static stream configuration
// ---------------------------------------------------------------------------

/// A continuous-rate stream: mass flows at an operation rate over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousStream {
    pub name: String,
    /// Name of the node that provides this stream.
    pub upstream_node: String,
    /// Name of the node that receives this stream.
    pub downstream_node: String,
    pub commodity: Commodity,
    /// Lower bound on the operation rate, in mass per tick.
    pub minimum_operation_rate: Option<Mass>,
    /// Upper bound on the operation rate, in mass per tick.
    pub maximum_operation_rate: Option<Mass>,
}

impl ContinuousStream {
    /// Create a stream state delivering `total_mass` at `rate`, ending at
    /// `end_time`. The window length is `ceil(total_mass / rate)` ticks; the
    /// recorded rate is recomputed from the integral window so that
    /// `total_mass` stays the authoritative quantity.
    pub fn create_state(
        &self,
        end_time: TimePoint,
        total_mass: Mass,
        rate: Mass,
    ) -> Result<StreamState, SchedulingError> {
        let raw = total_mass
            .checked_div(rate)
            .unwrap_or(Mass::ZERO)
            .ceil()
            .to_num::<i64>();
        let duration = raw.max(1);
        self.create_state_in_window(end_time - duration, end_time, total_mass)
    }

    /// Create a stream state over an explicit window, solving the rate from
    /// mass and window length. Used for unconstrained-rate requests.
    pub fn create_state_in_window(
        &self,
        start_time: TimePoint,
        end_time: TimePoint,
        total_mass: Mass,
    ) -> Result<StreamState, SchedulingError> {
        ContinuousStreamState::new(self.name.clone(), start_time, end_time, total_mass)
            .map(StreamState::Continuous)
    }
}

/// A batch stream: a fixed mass transferred at a delivery instant, preceded
/// by a fixed load/unload window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStream {
    pub name: String,
    pub upstream_node: String,
    pub downstream_node: String,
    pub commodity: Commodity,
    /// Largest mass a single batch can carry.
    pub maximum_batch_mass: Mass,
    /// Length of the load/unload window. Zero means instant transfer.
    pub batch_transfer_duration: TimeDelta,
}

impl BatchStream {
    /// Create a batch state delivering `batch_mass` at `delivery_time`
    /// (the window end). The caller is responsible for capping the mass at
    /// [`BatchStream::maximum_batch_mass`]; see `MassBalance`.
    pub fn create_state(&self, delivery_time: TimePoint, batch_mass: Mass) -> StreamState {
        StreamState::Batch(BatchStreamState {
            stream_name: self.name.clone(),
            start_time: delivery_time - self.batch_transfer_duration,
            end_time: delivery_time,
            batch_mass,
        })
    }
}

/// Static stream configuration. Dispatches via enum match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stream {
    Continuous(ContinuousStream),
    Batch(BatchStream),
}

impl Stream {
    pub fn name(&self) -> &str {
        match self {
            Stream::Continuous(s) => &s.name,
            Stream::Batch(s) => &s.name,
        }
    }

    pub fn commodity(&self) -> &Commodity {
        match self {
            Stream::Continuous(s) => &s.commodity,
            Stream::Batch(s) => &s.commodity,
        }
    }

    pub fn upstream_node(&self) -> &str {
        match self {
            Stream::Continuous(s) => &s.upstream_node,
            Stream::Batch(s) => &s.upstream_node,
        }
    }

    pub fn downstream_node(&self) -> &str {
        match self {
            Stream::Continuous(s) => &s.downstream_node,
            Stream::Batch(s) => &s.downstream_node,
        }
    }
}

// ---------------------------------------------------------------------------
// Stream states
// ---------------------------------------------------------------------------

/// One concrete continuous transfer window. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousStreamState {
    pub stream_name: String,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub total_mass: Mass,
    /// Derived: `total_mass / (end_time - start_time)`. Informational;
    /// `total_mass` is authoritative in all balance arithmetic.
    pub operation_rate: Mass,
}

impl ContinuousStreamState {
    pub fn new(
        stream_name: String,
        start_time: TimePoint,
        end_time: TimePoint,
        total_mass: Mass,
    ) -> Result<Self, SchedulingError> {
        if start_time >= end_time {
            return Err(SchedulingError::InfinitesimalStream {
                stream: stream_name,
                at: start_time,
            });
        }
        let duration = Mass::from_num(end_time - start_time);
        let operation_rate = total_mass / duration;
        Ok(Self {
            stream_name,
            start_time,
            end_time,
            total_mass,
            operation_rate,
        })
    }
}

/// One concrete batch transfer. The window `[start_time, end_time]` is the
/// load/unload phase; the mass moves atomically at the delivery instant.
/// Zero-length windows are legal here (instant transfer bookkeeping points).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStreamState {
    pub stream_name: String,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub batch_mass: Mass,
}

/// A concrete transfer, continuous or batch. Created fresh on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamState {
    Continuous(ContinuousStreamState),
    Batch(BatchStreamState),
}

impl StreamState {
    pub fn stream_name(&self) -> &str {
        match self {
            StreamState::Continuous(s) => &s.stream_name,
            StreamState::Batch(s) => &s.stream_name,
        }
    }

    pub fn start_time(&self) -> TimePoint {
        match self {
            StreamState::Continuous(s) => s.start_time,
            StreamState::Batch(s) => s.start_time,
        }
    }

    pub fn end_time(&self) -> TimePoint {
        match self {
            StreamState::Continuous(s) => s.end_time,
            StreamState::Batch(s) => s.end_time,
        }
    }

    /// Total mass moved by this state, regardless of kind.
    pub fn total_mass(&self) -> Mass {
        match self {
            StreamState::Continuous(s) => s.total_mass,
            StreamState::Batch(s) => s.batch_mass,
        }
    }

    /// The instant the mass changes hands for the given role.
    pub fn delivery_time(&self, role: StreamRole) -> TimePoint {
        match self {
            StreamState::Continuous(s) => match role {
                StreamRole::Input => s.end_time,
                StreamRole::Output => s.start_time,
            },
            StreamState::Batch(s) => match role {
                StreamRole::Input => s.end_time,
                StreamRole::Output => s.start_time,
            },
        }
    }

    /// Same transfer, moved earlier by `delta` ticks. Mass and window length
    /// are unchanged.
    pub fn shifted_earlier(&self, delta: TimeDelta) -> Self {
        match self {
            StreamState::Continuous(s) => StreamState::Continuous(ContinuousStreamState {
                stream_name: s.stream_name.clone(),
                start_time: s.start_time - delta,
                end_time: s.end_time - delta,
                total_mass: s.total_mass,
                operation_rate: s.operation_rate,
            }),
            StreamState::Batch(s) => StreamState::Batch(BatchStreamState {
                stream_name: s.stream_name.clone(),
                start_time: s.start_time - delta,
                end_time: s.end_time - delta,
                batch_mass: s.batch_mass,
            }),
        }
    }

    /// Same kind and window, smaller mass. Used by the maximum-stream-mass
    /// clamp: the window (and thus `end_time`) is preserved, a continuous
    /// state's rate is rescaled.
    pub fn with_reduced_mass(&self, new_mass: Mass) -> Self {
        match self {
            StreamState::Continuous(s) => {
                let duration = Mass::from_num(s.end_time - s.start_time);
                StreamState::Continuous(ContinuousStreamState {
                    stream_name: s.stream_name.clone(),
                    start_time: s.start_time,
                    end_time: s.end_time,
                    total_mass: new_mass,
                    operation_rate: new_mass / duration,
                })
            }
            StreamState::Batch(s) => StreamState::Batch(BatchStreamState {
                stream_name: s.stream_name.clone(),
                start_time: s.start_time,
                end_time: s.end_time,
                batch_mass: new_mass,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Mass-share query
    // -----------------------------------------------------------------------

    /// Mass attributable to the query interval `[from, to]`.
    ///
    /// Continuous: proportional to the fractional overlap with the state's
    /// own window; zero if disjoint; a degenerate query against a continuous
    /// state is zero. Querying a zero-duration continuous state is fatal.
    ///
    /// Batch: the full batch mass lands at the delivery instant. A proper
    /// interval attributes the batch only if the instant lies strictly
    /// inside; a degenerate query `[t, t]` attributes it only at `t` exactly.
    /// Together these rules keep duplicated discretization instants from
    /// double counting.
    pub fn mass_in_interval(
        &self,
        from: TimePoint,
        to: TimePoint,
        role: StreamRole,
    ) -> Result<Mass, SchedulingError> {
        debug_assert!(from <= to);
        match self {
            StreamState::Continuous(s) => {
                if s.start_time >= s.end_time {
                    return Err(SchedulingError::InfinitesimalStream {
                        stream: s.stream_name.clone(),
                        at: s.start_time,
                    });
                }
                if from == to {
                    return Ok(Mass::ZERO);
                }
                let overlap = (s.end_time.min(to) - s.start_time.max(from)).max(0);
                if overlap == 0 {
                    return Ok(Mass::ZERO);
                }
                let fraction =
                    Mass::from_num(overlap) / Mass::from_num(s.end_time - s.start_time);
                Ok(s.total_mass * fraction)
            }
            StreamState::Batch(s) => {
                let instant = match role {
                    StreamRole::Input => s.end_time,
                    StreamRole::Output => s.start_time,
                };
                let inside = if from == to {
                    instant == from
                } else {
                    from < instant && instant < to
                };
                Ok(if inside { s.batch_mass } else { Mass::ZERO })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StreamHandler
// ---------------------------------------------------------------------------

/// Registry of all streams in a chain, keyed by unique name. Frozen after
/// topology construction; the core only reads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamHandler {
    streams: BTreeMap<String, Stream>,
}

impl StreamHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&mut self, stream: Stream) {
        self.streams.insert(stream.name().to_owned(), stream);
    }

    pub fn get_stream(&self, name: &str) -> Result<&Stream, SchedulingError> {
        self.streams
            .get(name)
            .ok_or_else(|| SchedulingError::UnknownStream(name.to_owned()))
    }

    pub fn continuous(&self, name: &str) -> Result<&ContinuousStream, SchedulingError> {
        match self.get_stream(name)? {
            Stream::Continuous(s) => Ok(s),
            Stream::Batch(_) => Err(SchedulingError::UnexpectedStreamKind(name.to_owned())),
        }
    }

    pub fn batch(&self, name: &str) -> Result<&BatchStream, SchedulingError> {
        match self.get_stream(name)? {
            Stream::Batch(s) => Ok(s),
            Stream::Continuous(_) => Err(SchedulingError::UnexpectedStreamKind(name.to_owned())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
