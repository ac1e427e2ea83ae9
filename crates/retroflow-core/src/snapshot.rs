//! Versioned plan snapshots.
//!
//! A snapshot is an 8-byte header (magic number + format version, both
//! little-endian u32) followed by the bitcode-encoded [`ProductionPlan`].
//! Downstream consumers persist and reload finished schedules through this
//! surface; the resolution engine itself never reads snapshots back.

use crate::plan::ProductionPlan;

/// Identifies a retroflow plan snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x5246_4C57; // "RFLW"

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("data too short for snapshot header")]
    TooShort,
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    BadMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Serialize / deserialize
// ---------------------------------------------------------------------------

/// Encode a finished plan with the snapshot header.
pub fn serialize_plan(plan: &ProductionPlan) -> Result<Vec<u8>, SerializeError> {
    let payload = bitcode::serialize(plan).map_err(|e| SerializeError::Encode(e.to_string()))?;
    let mut data = Vec::with_capacity(8 + payload.len());
    data.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    data.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    data.extend_from_slice(&payload);
    Ok(data)
}

/// Decode a plan snapshot, verifying header and version.
pub fn deserialize_plan(data: &[u8]) -> Result<ProductionPlan, DeserializeError> {
    if data.len() < 8 {
        return Err(DeserializeError::TooShort);
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != SNAPSHOT_MAGIC {
        return Err(DeserializeError::BadMagic(magic));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(DeserializeError::UnsupportedVersion(version));
    }
    bitcode::deserialize(&data[8..]).map_err(|e| DeserializeError::Decode(e.to_string()))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_mass;
    use crate::plan::{BranchPlan, ProcessStateEntry};

    fn sample_plan() -> ProductionPlan {
        let mut plan = ProductionPlan::new();
        plan.append_branch(BranchPlan {
            state_entries: vec![ProcessStateEntry {
                process_step_name: "furnace".into(),
                state_name: "provide_output".into(),
                start_time: 800,
                end_time: 900,
                energy: Some(f64_to_mass(42.0)),
            }],
            ..Default::default()
        });
        plan
    }

    #[test]
    fn round_trip_preserves_plan() {
        let plan = sample_plan();
        let bytes = serialize_plan(&plan).unwrap();
        let restored = deserialize_plan(&bytes).unwrap();
        assert_eq!(restored, plan);
        assert_eq!(restored.plan_hash(), plan.plan_hash());
    }

    #[test]
    fn rejects_short_data() {
        assert!(matches!(
            deserialize_plan(&[1, 2, 3]),
            Err(DeserializeError::TooShort)
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = serialize_plan(&sample_plan()).unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            deserialize_plan(&bytes),
            Err(DeserializeError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = serialize_plan(&sample_plan()).unwrap();
        bytes[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            deserialize_plan(&bytes),
            Err(DeserializeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_corrupt_payload() {
        let bytes = serialize_plan(&sample_plan()).unwrap();
        let truncated = &bytes[..bytes.len().saturating_sub(1)];
        assert!(matches!(
            deserialize_plan(truncated),
            Err(DeserializeError::Decode(_))
        ));
    }
}
