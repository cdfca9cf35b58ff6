//! Per-node, per-thread identity and the partitioning predicate that decides
//! which worker executes a binding-driven delivery (component C7's supporting
//! types; the orchestrator itself lives in `group`/`dispatch`).
//!
//! Grounded on `examples/original_source/msg/SparseMsg.cpp`'s
//! `p->execThread(e2_->id(), colIndex[j])` call: exactly one `(node, thread)`
//! pair in a group must answer "yes, mine" for a given target row, otherwise
//! a handler fires twice or never.

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use crate::registry::ElementId;

/// Identity of the calling thread within its node and group, plus enough of
/// the cluster shape to make `exec_thread` a pure function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcInfo {
    /// Index of this node within the group (0-based, not a global node id).
    pub node_index: u32,
    /// Number of nodes participating in this group.
    pub num_nodes_in_group: u32,
    /// Index of this thread within its node's slice of the group.
    pub thread_index_in_group: u32,
    /// Threads contributed by each node to this group (uniform across nodes).
    pub threads_per_node: u32,
    pub group_id: u32,
}

impl ProcInfo {
    pub fn new(
        node_index: u32,
        num_nodes_in_group: u32,
        thread_index_in_group: u32,
        threads_per_node: u32,
        group_id: u32,
    ) -> Self {
        Self {
            node_index,
            num_nodes_in_group,
            thread_index_in_group,
            threads_per_node,
            group_id,
        }
    }

    /// Total worker slots across the group (all nodes, all threads per node).
    pub fn total_slots(&self) -> u32 {
        self.num_nodes_in_group * self.threads_per_node
    }

    /// This thread's flat slot number within the group.
    pub fn my_slot(&self) -> u32 {
        self.node_index * self.threads_per_node + self.thread_index_in_group
    }

    /// True if this `(node, thread)` is the one responsible for executing a
    /// delivery to `(element, row)`. Deterministic and stateless: every
    /// worker in the group computes the same `slot` and exactly one matches.
    pub fn exec_thread(&self, element: ElementId, row: u32) -> bool {
        let total = self.total_slots();
        if total == 0 {
            return false;
        }
        let slot = partition_slot(element, row, total);
        slot == self.my_slot()
    }
}

/// Hash `(element, row)` down to a slot in `[0, total)`. Pulled out as a free
/// function so tests can check the partition directly without constructing
/// a full `ProcInfo` per candidate slot.
pub fn partition_slot(element: ElementId, row: u32, total: u32) -> u32 {
    debug_assert!(total > 0);
    let mut hasher = FxHasher::default();
    element.0.hash(&mut hasher);
    row.hash(&mut hasher);
    (hasher.finish() % total as u64) as u32
}
