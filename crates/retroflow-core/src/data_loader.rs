//! Data-driven chain construction from JSON scenario files.
//!
//! Feature-gated behind `data-loader`. A scenario names the source, the
//! steps (wired by stream references), the sink, and the orders; each step
//! gets the standard state net derived from its stream kinds.

use crate::balance::MassBalance;
use crate::chain::{ProcessChain, SinkNode, SourceNode};
use crate::communicator::ProcessStep;
use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::handler::ProcessStateHandler;
use crate::order::ProductionOrder;
use crate::state::ProcessStateKind;
use crate::storage::Storage;
use crate::stream::{BatchStream, Commodity, ContinuousStream, Stream, StreamHandler};
use crate::time::{TimeData, TimePoint};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioLoadError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("unknown stream reference: {0}")]
    UnknownStreamRef(String),
    #[error("scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),
}

// ---------------------------------------------------------------------------
// JSON data structures
// ---------------------------------------------------------------------------

/// Top-level scenario for JSON deserialization.
#[derive(Debug, serde::Deserialize)]
pub struct ScenarioData {
    pub time: TimeWindowData,
    pub source: String,
    pub sink: SinkData,
    #[serde(default)]
    pub streams: Vec<StreamData>,
    #[serde(default)]
    pub steps: Vec<StepData>,
    #[serde(default)]
    pub orders: Vec<OrderData>,
}

#[derive(Debug, serde::Deserialize)]
pub struct TimeWindowData {
    pub start: TimePoint,
    pub end: TimePoint,
}

#[derive(Debug, serde::Deserialize)]
pub struct SinkData {
    pub name: String,
    pub demand_stream: String,
    #[serde(default)]
    pub demand_rate: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct StreamData {
    pub name: String,
    /// `"batch"` or `"continuous"`.
    pub kind: String,
    pub upstream: String,
    pub downstream: String,
    pub commodity: String,
    #[serde(default)]
    pub maximum_batch_mass: Option<f64>,
    #[serde(default)]
    pub batch_transfer_duration: Option<i64>,
    #[serde(default)]
    pub minimum_operation_rate: Option<f64>,
    #[serde(default)]
    pub maximum_operation_rate: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct StepData {
    pub name: String,
    pub input_stream: String,
    pub output_stream: String,
    #[serde(default = "default_conversion_factor")]
    pub conversion_factor: f64,
    #[serde(default)]
    pub maximum_stream_mass: Option<f64>,
    #[serde(default)]
    pub storage_band: Option<StorageBandData>,
}

fn default_conversion_factor() -> f64 {
    1.0
}

#[derive(Debug, serde::Deserialize)]
pub struct StorageBandData {
    pub minimum: f64,
    pub maximum: f64,
}

#[derive(Debug, serde::Deserialize)]
pub struct OrderData {
    pub commodity: String,
    pub mass: f64,
    pub deadline: TimePoint,
}

// ---------------------------------------------------------------------------
// Loading functions
// ---------------------------------------------------------------------------

/// Build a resolvable chain from a JSON scenario string.
pub fn load_chain_json(json: &str) -> Result<ProcessChain, ScenarioLoadError> {
    let data: ScenarioData = serde_json::from_str(json)?;
    build_chain(data)
}

/// Build a resolvable chain from JSON scenario bytes.
pub fn load_chain_json_bytes(bytes: &[u8]) -> Result<ProcessChain, ScenarioLoadError> {
    let data: ScenarioData = serde_json::from_slice(bytes)?;
    build_chain(data)
}

fn build_chain(data: ScenarioData) -> Result<ProcessChain, ScenarioLoadError> {
    let mut streams = StreamHandler::new();
    for stream in &data.streams {
        streams.add_stream(parse_stream(stream));
    }

    let mut chain = ProcessChain::new(streams);
    chain.add_source(SourceNode::new(data.source.clone()));

    for step in &data.steps {
        chain.add_step(build_step(step, &data, &chain)?);
    }

    chain.add_sink(SinkNode::new(
        data.sink.name.clone(),
        data.sink.demand_stream.clone(),
        data.orders
            .iter()
            .map(|o| {
                ProductionOrder::new(
                    Commodity::new(o.commodity.clone()),
                    Mass::from_num(o.mass),
                    o.deadline,
                )
            })
            .collect(),
        data.sink.demand_rate.map(Mass::from_num),
    ));
    Ok(chain)
}

fn parse_stream(stream: &StreamData) -> Stream {
    if stream.kind == "batch" {
        Stream::Batch(BatchStream {
            name: stream.name.clone(),
            upstream_node: stream.upstream.clone(),
            downstream_node: stream.downstream.clone(),
            commodity: Commodity::new(stream.commodity.clone()),
            maximum_batch_mass: Mass::from_num(stream.maximum_batch_mass.unwrap_or(1_000_000.0)),
            batch_transfer_duration: stream.batch_transfer_duration.unwrap_or(0),
        })
    } else {
        Stream::Continuous(ContinuousStream {
            name: stream.name.clone(),
            upstream_node: stream.upstream.clone(),
            downstream_node: stream.downstream.clone(),
            commodity: Commodity::new(stream.commodity.clone()),
            minimum_operation_rate: stream.minimum_operation_rate.map(Mass::from_num),
            maximum_operation_rate: stream.maximum_operation_rate.map(Mass::from_num),
        })
    }
}

fn build_step(
    step: &StepData,
    data: &ScenarioData,
    chain: &ProcessChain,
) -> Result<ProcessStep, ScenarioLoadError> {
    let input = chain
        .streams
        .get_stream(&step.input_stream)
        .map_err(|_| ScenarioLoadError::UnknownStreamRef(step.input_stream.clone()))?;
    let output = chain
        .streams
        .get_stream(&step.output_stream)
        .map_err(|_| ScenarioLoadError::UnknownStreamRef(step.output_stream.clone()))?;

    let input_kind = match input {
        Stream::Batch(_) => ProcessStateKind::BatchInput,
        Stream::Continuous(_) => ProcessStateKind::ContinuousInput,
    };
    let maximum_stream_mass = step.maximum_stream_mass.map(Mass::from_num);
    let output_kind = match output {
        Stream::Batch(_) => ProcessStateKind::BatchOutput {
            maximum_stream_mass,
        },
        Stream::Continuous(_) => ProcessStateKind::ContinuousOutput {
            maximum_stream_mass,
        },
    };
    let handler = ProcessStateHandler::standard_net(input_kind, output_kind)?;

    let mut storage = Storage::new(step.name.clone(), output.commodity().clone());
    if let Some(band) = &step.storage_band {
        storage = storage.with_band(Mass::from_num(band.minimum), Mass::from_num(band.maximum));
    }
    let balance = MassBalance::new(
        Mass::from_num(step.conversion_factor),
        step.input_stream.clone(),
        step.output_stream.clone(),
        storage,
    );
    Ok(ProcessStep::new(
        step.name.clone(),
        handler,
        balance,
        TimeData::new(data.time.start, data.time.end),
    ))
}

// ===========================================================================
// Tests
// ===========================================================================
