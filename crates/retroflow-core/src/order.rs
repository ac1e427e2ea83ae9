//! Production orders and the sink-side mass accounting.

use crate::error::SchedulingError;
use crate::fixed::Mass;
use crate::stream::Commodity;
use crate::time::TimePoint;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ProductionOrder
// ---------------------------------------------------------------------------

/// One delivery obligation: produce `production_target` mass of a commodity
/// by `production_deadline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionOrder {
    pub commodity: Commodity,
    pub production_target: Mass,
    pub production_deadline: TimePoint,
    pub produced_mass: Mass,
}

impl ProductionOrder {
    pub fn new(commodity: Commodity, production_target: Mass, production_deadline: TimePoint) -> Self {
        Self {
            commodity,
            production_target,
            production_deadline,
            produced_mass: Mass::ZERO,
        }
    }

    pub fn remaining_mass(&self) -> Mass {
        self.production_target - self.produced_mass
    }

    /// Exactly met, zero tolerance.
    pub fn is_fulfilled(&self) -> bool {
        self.produced_mass == self.production_target
    }
}

// ---------------------------------------------------------------------------
// OrderTracker
// ---------------------------------------------------------------------------

/// Accumulates produced mass against a list of orders, advancing to the next
/// order only when the current one is met exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTracker {
    orders: Vec<ProductionOrder>,
    current: usize,
}

impl OrderTracker {
    pub fn new(orders: Vec<ProductionOrder>) -> Self {
        Self { orders, current: 0 }
    }

    pub fn current_order(&self) -> Option<&ProductionOrder> {
        self.orders.get(self.current)
    }

    pub fn all_done(&self) -> bool {
        self.current >= self.orders.len()
    }

    pub fn orders(&self) -> &[ProductionOrder] {
        &self.orders
    }

    /// Credit delivered mass against the current order. Exceeding the target
    /// is a fatal imbalance; meeting it exactly advances to the next order.
    pub fn record_produced(&mut self, mass: Mass) -> Result<(), SchedulingError> {
        let order = self
            .orders
            .get_mut(self.current)
            .ok_or_else(|| SchedulingError::MisroutedMessage {
                node: "sink".into(),
                reason: "delivery recorded with no open order".into(),
            })?;

        let next = order.produced_mass + mass;
        if next > order.production_target {
            return Err(SchedulingError::MassImbalance {
                expected: order.production_target,
                actual: next,
            });
        }
        order.produced_mass = next;
        if order.is_fulfilled() {
            self.current += 1;
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
