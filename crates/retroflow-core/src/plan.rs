//! Production-plan accumulators and the deterministic plan hash.
//!
//! The engine appends finalized entries, keyed by process-step or stream
//! name, and never reads them back except for the in-flight temporary branch
//! plan. Downstream consumers (reporting, persistence, load profiles) read
//! the finished [`ProductionPlan`].

use crate::fixed::Mass;
use crate::storage::StorageEntry;
use crate::stream::StreamState;
use crate::time::TimePoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A closed process-state interval: one state of one step was active over
/// `[start_time, end_time]`. Energy-bearing states report the energy drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStateEntry {
    pub process_step_name: String,
    pub state_name: String,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub energy: Option<Mass>,
}

// ---------------------------------------------------------------------------
// Branch plan
// ---------------------------------------------------------------------------

/// The temporary plan of one in-flight production branch. Discarded on
/// rollback, promoted into the [`ProductionPlan`] on branch completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchPlan {
    pub state_entries: Vec<ProcessStateEntry>,
    pub stream_entries: Vec<StreamState>,
    pub storage_entries: Vec<StorageEntry>,
}

impl BranchPlan {
    pub fn clear(&mut self) {
        self.state_entries.clear();
        self.stream_entries.clear();
        self.storage_entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.state_entries.is_empty()
            && self.stream_entries.is_empty()
            && self.storage_entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Production plan
// ---------------------------------------------------------------------------

/// The finished schedule: finalized entries keyed by step and stream name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionPlan {
    pub process_step_entries: BTreeMap<String, Vec<ProcessStateEntry>>,
    pub stream_entries: BTreeMap<String, Vec<StreamState>>,
    pub storage_entries: BTreeMap<String, Vec<StorageEntry>>,
}

impl ProductionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promote a completed branch plan. Entries keep their in-branch order.
    pub fn append_branch(&mut self, branch: BranchPlan) {
        for entry in branch.state_entries {
            self.process_step_entries
                .entry(entry.process_step_name.clone())
                .or_default()
                .push(entry);
        }
        for state in branch.stream_entries {
            self.stream_entries
                .entry(state.stream_name().to_owned())
                .or_default()
                .push(state);
        }
        for entry in branch.storage_entries {
            self.storage_entries
                .entry(entry.process_step_name.clone())
                .or_default()
                .push(entry);
        }
    }

    /// Deterministic FNV-1a hash over all finalized entries, for desync
    /// detection between runs of the same scenario.
    pub fn plan_hash(&self) -> u64 {
        let mut hash = PlanHash::new();
        for (step, entries) in &self.process_step_entries {
            hash.write(step.as_bytes());
            for e in entries {
                hash.write(e.state_name.as_bytes());
                hash.write_i64(e.start_time);
                hash.write_i64(e.end_time);
                if let Some(energy) = e.energy {
                    hash.write_mass(energy);
                }
            }
        }
        for (stream, states) in &self.stream_entries {
            hash.write(stream.as_bytes());
            for s in states {
                hash.write_i64(s.start_time());
                hash.write_i64(s.end_time());
                hash.write_mass(s.total_mass());
            }
        }
        for (step, entries) in &self.storage_entries {
            hash.write(step.as_bytes());
            for e in entries {
                hash.write_i64(e.start_time);
                hash.write_i64(e.end_time);
                hash.write_mass(e.level_at_start);
                hash.write_mass(e.level_at_end);
            }
        }
        hash.finish()
    }
}

// ---------------------------------------------------------------------------
// Plan hash
// ---------------------------------------------------------------------------

/// FNV-1a (64-bit). Fast, deterministic, not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanHash(pub u64);

impl PlanHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_mass(&mut self, v: Mass) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for PlanHash {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
