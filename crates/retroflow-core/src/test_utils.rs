//! Shared test helpers for unit, integration, and property tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so the same
//! builders serve in-crate unit tests and the `tests/` directory (via the
//! `test-utils` feature).

use crate::balance::MassBalance;
use crate::chain::{ProcessChain, SinkNode, SourceNode};
use crate::communicator::ProcessStep;
use crate::fixed::Mass;
use crate::handler::ProcessStateHandler;
use crate::order::ProductionOrder;
use crate::state::ProcessStateKind;
use crate::storage::Storage;
use crate::stream::{BatchStream, Commodity, ContinuousStream, Stream, StreamHandler};
use crate::time::{TimeData, TimePoint};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Mass {
    Mass::from_num(v)
}

// ===========================================================================
// Commodities
// ===========================================================================

pub fn ore() -> Commodity {
    Commodity::new("ore")
}
pub fn metal() -> Commodity {
    Commodity::new("metal")
}
pub fn gravel() -> Commodity {
    Commodity::new("gravel")
}

// ===========================================================================
// Streams
// ===========================================================================

/// Batch stream `mine -> furnace`: cap 200, 10-tick transfer window.
pub fn ore_feed() -> BatchStream {
    BatchStream {
        name: "ore_feed".into(),
        upstream_node: "mine".into(),
        downstream_node: "furnace".into(),
        commodity: ore(),
        maximum_batch_mass: fixed(200.0),
        batch_transfer_duration: 10,
    }
}

/// Continuous stream `furnace -> depot`: 3.0 mass per tick.
pub fn metal_flow() -> ContinuousStream {
    ContinuousStream {
        name: "metal_flow".into(),
        upstream_node: "furnace".into(),
        downstream_node: "depot".into(),
        commodity: metal(),
        minimum_operation_rate: None,
        maximum_operation_rate: Some(fixed(3.0)),
    }
}

// ===========================================================================
// Steps and chains
// ===========================================================================

/// A furnace with the standard net: batch input, continuous output.
pub fn batch_to_continuous_step(conversion_factor: f64) -> ProcessStep {
    let handler = ProcessStateHandler::standard_net(
        ProcessStateKind::BatchInput,
        ProcessStateKind::ContinuousOutput {
            maximum_stream_mass: None,
        },
    )
    .unwrap();
    let balance = MassBalance::new(
        fixed(conversion_factor),
        "ore_feed",
        "metal_flow",
        Storage::new("furnace", metal()),
    );
    ProcessStep::new("furnace", handler, balance, TimeData::new(0, 1_000))
}

/// `mine --ore_feed--> furnace --metal_flow--> depot` with the given
/// `(mass, deadline)` orders.
pub fn batch_to_continuous_chain(orders: &[(f64, TimePoint)]) -> ProcessChain {
    batch_to_continuous_chain_with_factor(orders, 1.0)
}

pub fn batch_to_continuous_chain_with_factor(
    orders: &[(f64, TimePoint)],
    conversion_factor: f64,
) -> ProcessChain {
    let mut streams = StreamHandler::new();
    streams.add_stream(Stream::Batch(ore_feed()));
    streams.add_stream(Stream::Continuous(metal_flow()));

    let mut chain = ProcessChain::new(streams);
    chain.add_source(SourceNode::new("mine"));
    chain.add_step(batch_to_continuous_step(conversion_factor));
    chain.add_sink(SinkNode::new(
        "depot",
        "metal_flow",
        orders
            .iter()
            .map(|(mass, deadline)| ProductionOrder::new(metal(), fixed(*mass), *deadline))
            .collect(),
        None,
    ));
    chain
}

/// Two steps in series:
/// `mine --ore_feed--> crusher --gravel_flow--> furnace --metal_flow--> depot`.
/// The crusher takes batches, the furnace draws a continuous feed.
pub fn two_step_chain(orders: &[(f64, TimePoint)]) -> ProcessChain {
    let mut streams = StreamHandler::new();
    streams.add_stream(Stream::Batch(BatchStream {
        name: "ore_feed".into(),
        upstream_node: "mine".into(),
        downstream_node: "crusher".into(),
        commodity: ore(),
        maximum_batch_mass: fixed(200.0),
        batch_transfer_duration: 10,
    }));
    streams.add_stream(Stream::Continuous(ContinuousStream {
        name: "gravel_flow".into(),
        upstream_node: "crusher".into(),
        downstream_node: "furnace".into(),
        commodity: gravel(),
        minimum_operation_rate: None,
        maximum_operation_rate: None,
    }));
    streams.add_stream(Stream::Continuous(ContinuousStream {
        name: "metal_flow".into(),
        upstream_node: "furnace".into(),
        downstream_node: "depot".into(),
        commodity: metal(),
        minimum_operation_rate: None,
        maximum_operation_rate: Some(fixed(3.0)),
    }));

    let crusher_handler = ProcessStateHandler::standard_net(
        ProcessStateKind::BatchInput,
        ProcessStateKind::ContinuousOutput {
            maximum_stream_mass: None,
        },
    )
    .unwrap();
    let crusher = ProcessStep::new(
        "crusher",
        crusher_handler,
        MassBalance::new(
            fixed(1.0),
            "ore_feed",
            "gravel_flow",
            Storage::new("crusher", gravel()),
        ),
        TimeData::new(0, 1_000),
    );

    let furnace_handler = ProcessStateHandler::standard_net(
        ProcessStateKind::ContinuousInput,
        ProcessStateKind::ContinuousOutput {
            maximum_stream_mass: None,
        },
    )
    .unwrap();
    let furnace = ProcessStep::new(
        "furnace",
        furnace_handler,
        MassBalance::new(
            fixed(1.0),
            "gravel_flow",
            "metal_flow",
            Storage::new("furnace", metal()),
        ),
        TimeData::new(0, 1_000),
    );

    let mut chain = ProcessChain::new(streams);
    chain.add_source(SourceNode::new("mine"));
    chain.add_step(crusher);
    chain.add_step(furnace);
    chain.add_sink(SinkNode::new(
        "depot",
        "metal_flow",
        orders
            .iter()
            .map(|(mass, deadline)| ProductionOrder::new(metal(), fixed(*mass), *deadline))
            .collect(),
        None,
    ));
    chain
}

/// Pull the furnace step back out of a chain for state inspection.
pub fn furnace_of(chain: &ProcessChain) -> &ProcessStep {
    match chain.node("furnace") {
        Some(crate::chain::ChainNode::Step(step)) => step.as_ref(),
        other => panic!("expected the furnace step, got {other:?}"),
    }
}
