use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a node (source, process step, or sink) in a process chain.
    pub struct NodeKey;
}

/// Identifies one production branch: the complete speculative resolution of
/// one requested output-stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(pub u64);

/// Identifies one temporal branch: a single input-stream request inside a
/// production branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalBranchId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_ids_compare_by_value() {
        assert_eq!(BranchId(3), BranchId(3));
        assert_ne!(BranchId(3), BranchId(4));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(TemporalBranchId(0), "first request");
        assert_eq!(map[&TemporalBranchId(0)], "first request");
    }
}
