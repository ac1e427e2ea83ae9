//! A minimal process chain: one source, any number of process steps, one
//! sink, wired by the streams between them.
//!
//! Topology construction beyond this straight chain lives outside the core;
//! the chain exists to drive the negotiation protocol: the sink opens a
//! request for its current order, messages bounce between adjacent nodes
//! until the sink's orders are all met exactly, and the finished
//! [`ProductionPlan`] is the result. Everything is synchronous -- one chain
//! is resolved to full completion at a time.

use crate::communicator::{
    DownstreamValidationOrder, NodeMessage, ProcessStep, TerminateProduction,
    UpstreamAdaptionOrder, UpstreamNewProductionOrder,
};
use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::id::{BranchId, NodeKey};
use crate::order::{OrderTracker, ProductionOrder};
use crate::plan::ProductionPlan;
use crate::stream::{Stream, StreamHandler, StreamState};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Source node
// ---------------------------------------------------------------------------

/// The chain's most-upstream node. Supplies any requested stream state
/// immediately and unconditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNode {
    pub name: String,
}

impl SourceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn dispatch(&mut self, message: NodeMessage) -> Result<NodeMessage, SchedulingError> {
        match message {
            NodeMessage::UpstreamNewProductionOrder(order) => {
                tracing::trace!(
                    source = %self.name,
                    stream = %order.stream_state.stream_name(),
                    mass = %order.stream_state.total_mass(),
                    "source supplies requested stream"
                );
                Ok(NodeMessage::DownstreamValidationOrder(
                    DownstreamValidationOrder {
                        stream_state: order.stream_state,
                        branch: order.branch,
                    },
                ))
            }
            other => Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: format!("source cannot handle {other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink node
// ---------------------------------------------------------------------------

/// The chain's most-downstream node: turns production orders into demand
/// requests and accounts delivered mass against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkNode {
    pub name: String,
    /// The stream feeding this sink.
    pub demand_stream: String,
    pub tracker: OrderTracker,
    /// Operation rate used for continuous demand requests. Falls back to the
    /// stream's maximum operation rate.
    pub demand_rate: Option<Mass>,
    next_branch: u64,
    pending: Option<(BranchId, StreamState)>,
}

impl SinkNode {
    pub fn new(
        name: impl Into<String>,
        demand_stream: impl Into<String>,
        orders: Vec<ProductionOrder>,
        demand_rate: Option<Mass>,
    ) -> Self {
        Self {
            name: name.into(),
            demand_stream: demand_stream.into(),
            tracker: OrderTracker::new(orders),
            demand_rate,
            next_branch: 0,
            pending: None,
        }
    }

    /// Open the next demand request, or terminate when every order is met.
    pub fn start_next_request(
        &mut self,
        streams: &StreamHandler,
    ) -> Result<NodeMessage, SchedulingError> {
        let Some(order) = self.tracker.current_order() else {
            tracing::debug!(sink = %self.name, "all orders fulfilled, terminating");
            return Ok(NodeMessage::TerminateProduction(TerminateProduction {
                orders_completed: self.tracker.orders().len(),
            }));
        };

        let remaining = order.remaining_mass();
        let state = match streams.get_stream(&self.demand_stream)? {
            Stream::Continuous(cfg) => {
                let rate = self
                    .demand_rate
                    .or(cfg.maximum_operation_rate)
                    .ok_or_else(|| {
                        SchedulingError::UnsupportedBranchShape(format!(
                            "sink '{}' has no demand rate for continuous stream '{}'",
                            self.name, cfg.name
                        ))
                    })?;
                cfg.create_state(order.production_deadline, remaining, rate)?
            }
            Stream::Batch(cfg) => {
                cfg.create_state(order.production_deadline, remaining.min(cfg.maximum_batch_mass))
            }
        };

        let branch = BranchId(self.next_branch);
        self.next_branch += 1;
        self.pending = Some((branch, state.clone()));
        tracing::debug!(
            sink = %self.name,
            mass = %state.total_mass(),
            deadline = state.end_time(),
            "demand request opened"
        );
        Ok(NodeMessage::UpstreamNewProductionOrder(
            UpstreamNewProductionOrder {
                stream_state: state,
                branch,
            },
        ))
    }

    pub fn dispatch(
        &mut self,
        message: NodeMessage,
        streams: &StreamHandler,
    ) -> Result<NodeMessage, SchedulingError> {
        match message {
            NodeMessage::DownstreamValidationOrder(order) => {
                let Some((branch, _)) = self.pending.as_ref() else {
                    return Err(SchedulingError::MisroutedMessage {
                        node: self.name.clone(),
                        reason: "validation with no demand request open".into(),
                    });
                };
                if order.branch != *branch {
                    return Err(SchedulingError::MisroutedMessage {
                        node: self.name.clone(),
                        reason: "validation echoes an unknown branch".into(),
                    });
                }
                self.pending = None;
                self.tracker
                    .record_produced(order.stream_state.total_mass())?;
                // Partially met orders immediately open the next request.
                self.start_next_request(streams)
            }
            NodeMessage::DownstreamAdaptionOrder(order) => {
                let Some((branch, _)) = self.pending.as_ref() else {
                    return Err(SchedulingError::MisroutedMessage {
                        node: self.name.clone(),
                        reason: "counter-offer with no demand request open".into(),
                    });
                };
                let branch = *branch;
                if order.branch != branch {
                    return Err(SchedulingError::MisroutedMessage {
                        node: self.name.clone(),
                        reason: "counter-offer echoes an unknown branch".into(),
                    });
                }
                // The sink takes whatever window the chain can manage.
                self.pending = Some((branch, order.stream_state.clone()));
                Ok(NodeMessage::UpstreamAdaptionOrder(UpstreamAdaptionOrder {
                    stream_state: order.stream_state,
                    branch,
                }))
            }
            other => Err(SchedulingError::MisroutedMessage {
                node: self.name.clone(),
                reason: format!("sink cannot handle {other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain nodes
// ---------------------------------------------------------------------------

/// Any node of a process chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainNode {
    Source(SourceNode),
    Step(Box<ProcessStep>),
    Sink(SinkNode),
}

impl ChainNode {
    pub fn name(&self) -> &str {
        match self {
            ChainNode::Source(n) => &n.name,
            ChainNode::Step(n) => &n.name,
            ChainNode::Sink(n) => &n.name,
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessChain
// ---------------------------------------------------------------------------

/// The wired chain plus the plan being accumulated.
#[derive(Debug)]
pub struct ProcessChain {
    pub streams: StreamHandler,
    nodes: SlotMap<NodeKey, ChainNode>,
    by_name: BTreeMap<String, NodeKey>,
    pub plan: ProductionPlan,
}

impl ProcessChain {
    pub fn new(streams: StreamHandler) -> Self {
        Self {
            streams,
            nodes: SlotMap::with_key(),
            by_name: BTreeMap::new(),
            plan: ProductionPlan::new(),
        }
    }

    pub fn add_source(&mut self, source: SourceNode) -> NodeKey {
        self.insert(ChainNode::Source(source))
    }

    pub fn add_step(&mut self, step: ProcessStep) -> NodeKey {
        self.insert(ChainNode::Step(Box::new(step)))
    }

    pub fn add_sink(&mut self, sink: SinkNode) -> NodeKey {
        self.insert(ChainNode::Sink(sink))
    }

    fn insert(&mut self, node: ChainNode) -> NodeKey {
        let name = node.name().to_owned();
        let key = self.nodes.insert(node);
        self.by_name.insert(name, key);
        key
    }

    pub fn node(&self, name: &str) -> Option<&ChainNode> {
        self.by_name.get(name).map(|k| &self.nodes[*k])
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut ChainNode> {
        self.by_name.get(name).map(|k| &mut self.nodes[*k])
    }

    fn sink_key(&self) -> Result<NodeKey, SchedulingError> {
        self.nodes
            .iter()
            .find(|(_, n)| matches!(n, ChainNode::Sink(_)))
            .map(|(k, _)| k)
            .ok_or_else(|| SchedulingError::UnknownNode("sink".into()))
    }

    /// The node a message is addressed to, derived from the direction of the
    /// message and the endpoints of the stream it concerns.
    fn route_target(&self, message: &NodeMessage) -> Result<String, SchedulingError> {
        let (stream_name, upstream) = match message {
            NodeMessage::UpstreamNewProductionOrder(o) => (o.stream_state.stream_name(), true),
            NodeMessage::UpstreamAdaptionOrder(o) => (o.stream_state.stream_name(), true),
            NodeMessage::DownstreamValidationOrder(o) => (o.stream_state.stream_name(), false),
            NodeMessage::DownstreamAdaptionOrder(o) => (o.stream_state.stream_name(), false),
            NodeMessage::TerminateProduction(_) => {
                return Err(SchedulingError::MisroutedMessage {
                    node: "chain".into(),
                    reason: "termination is not routable".into(),
                });
            }
        };
        let stream = self.streams.get_stream(stream_name)?;
        Ok(if upstream {
            stream.upstream_node().to_owned()
        } else {
            stream.downstream_node().to_owned()
        })
    }

    /// Resolve every order of the sink, one production branch at a time,
    /// and return the finished plan.
    pub fn resolve_all_orders(&mut self) -> Result<&ProductionPlan, SchedulingError> {
        let sink_key = self.sink_key()?;
        let mut message = match self.nodes.get_mut(sink_key) {
            Some(ChainNode::Sink(sink)) => sink.start_next_request(&self.streams)?,
            _ => unreachable!("sink_key always resolves to a sink"),
        };

        loop {
            if let NodeMessage::TerminateProduction(done) = &message {
                tracing::debug!(orders = done.orders_completed, "chain resolution finished");
                return Ok(&self.plan);
            }
            let target = self.route_target(&message)?;
            let key = *self
                .by_name
                .get(&target)
                .ok_or_else(|| SchedulingError::UnknownNode(target.clone()))?;
            message = match self.nodes.get_mut(key) {
                Some(ChainNode::Source(source)) => source.dispatch(message)?,
                Some(ChainNode::Step(step)) => {
                    step.dispatch(message, &self.streams, &mut self.plan)?
                }
                Some(ChainNode::Sink(sink)) => sink.dispatch(message, &self.streams)?,
                None => return Err(SchedulingError::UnknownNode(target)),
            };
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
