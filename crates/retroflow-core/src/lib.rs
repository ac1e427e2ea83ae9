//! Retroflow Core -- a backward-chained production scheduler.
//!
//! This crate models discrete production processes as chains of process
//! steps connected by material streams and computes a feasible,
//! mass-consistent schedule *backward* from delivery deadlines.
//!
//! # Backward Resolution
//!
//! Each process step runs a small Petri net (idle, input-requesting,
//! output-providing, and intermediate states). Resolving an order walks the
//! net backward in simulated time: from "the output must be ready by the
//! deadline" toward "the step is idle", discovering along the way the input
//! deliveries that make the output possible. Adjacent steps negotiate those
//! deliveries through a four-message protocol:
//!
//! 1. **UpstreamNewProductionOrder** -- "please provide this input stream."
//! 2. **DownstreamValidationOrder** -- "confirmed as delivered."
//! 3. **DownstreamAdaptionOrder** -- "I can only deliver this counter-offer."
//! 4. **UpstreamAdaptionOrder** -- "acknowledged, adapting my request."
//!
//! Speculative work is protected by a checkpoint/restore discipline: every
//! adaptation attempt snapshots the step's clock, cursor, branch, and
//! temporary plan before mutating, and may roll all of it back.
//!
//! # Determinism
//!
//! All mass arithmetic is Q32.32 fixed-point ([`fixed::Mass`]) and mass
//! balance checks use exact equality -- resolving the same scenario twice
//! yields byte-identical plans (see [`plan::ProductionPlan::plan_hash`]).
//!
//! # Key Types
//!
//! - [`chain::ProcessChain`] -- wired source/steps/sink plus the resolution
//!   driver loop.
//! - [`communicator::ProcessStep`] -- one production node and its protocol
//!   face.
//! - [`handler::ProcessStateHandler`] -- the per-step Petri net and the
//!   backward stepping primitive.
//! - [`navigator::BranchNavigator`] -- checkpoint/restore and output-stream
//!   feasibility adaptation.
//! - [`balance::MassBalance`] -- exact input/output reconciliation and
//!   request sizing.
//! - [`storage::Storage`] -- the per-step inventory buffer and its
//!   discretized level intervals.
//! - [`plan::ProductionPlan`] -- the finished schedule, hashable for desync
//!   detection and snapshottable via [`snapshot`].

pub mod balance;
pub mod branch;
pub mod chain;
pub mod communicator;
#[cfg(feature = "data-loader")]
pub mod data_loader;
pub mod error;
pub mod fixed;
pub mod handler;
pub mod id;
pub mod navigator;
pub mod order;
pub mod plan;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod stream;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
