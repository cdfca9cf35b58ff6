//! Per-thread output buffers plus the parallel block-descriptor list that
//! tags each appended record as lane 0 (cluster-wide) or lane 1 (node-local)
//! (component C2).
//!
//! No locks, no atomics: a [`ThreadOutbox`] is written by exactly one
//! producer thread and read only after a barrier separates it from the
//! merge stage (SPEC_FULL.md §5, §9 "Thread-local accumulation").

use crate::record::{self, DataId, Direction, RecordHeader, DATA_ID_LEN};
use crate::registry::{Binding, ElementId};

/// Which merged buffer a block of bytes belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// May need to reach a target on any node; goes through exchange.
    ClusterWide,
    /// Target is present on every node (or the registry's reserved "set"
    /// binding); never leaves the node.
    NodeLocal,
}

impl Lane {
    pub fn as_index(self) -> usize {
        match self {
            Lane::ClusterWide => 0,
            Lane::NodeLocal => 1,
        }
    }
}

/// A contiguous run of bytes in a thread's output buffer, all belonging to
/// the same lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub lane: Lane,
    pub start_offset: usize,
    pub size_bytes: usize,
}

/// One worker thread's append-only output buffer and its block descriptors.
#[derive(Debug, Default)]
pub struct ThreadOutbox {
    out: Vec<u8>,
    blocks: Vec<BlockDescriptor>,
}

impl ThreadOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty() && self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.out.clear();
        self.blocks.clear();
    }

    /// Appends a record with an implicit target (the usual case: the target
    /// is resolved from the binding alone at dispatch time).
    ///
    /// `destination_is_global` is the caller's one-time lookup of
    /// `DataHandler::isGlobal()` on the record's destination element (`e2`
    /// forward, `e1` reverse) — resolved once per call site rather than
    /// re-queried per record, per SPEC_FULL.md's "Lane decision" note.
    pub fn append(
        &mut self,
        binding: &dyn Binding,
        direction: Direction,
        message_id: u32,
        function_id: u32,
        src_index: DataId,
        destination_is_global: bool,
        payload: &[u8],
    ) {
        let offset = self.out.len();
        let header = RecordHeader {
            use_explicit_target: false,
            direction,
            message_id,
            function_id,
            src_index,
            size: payload.len() as u32,
        };
        record::emit(&mut self.out, &header, payload);
        let total_size = self.out.len() - offset;
        self.assign_lane(binding, destination_is_global, offset, total_size);
    }

    /// Appends a record whose payload is extended with the binary encoding
    /// of `target_row`, and whose header marks `use_explicit_target`. See
    /// [`ThreadOutbox::append`] for `destination_is_global`.
    pub fn append_with_target(
        &mut self,
        binding: &dyn Binding,
        direction: Direction,
        message_id: u32,
        function_id: u32,
        src_index: DataId,
        destination_is_global: bool,
        payload: &[u8],
        target_row: DataId,
    ) {
        let offset = self.out.len();
        let mut full_payload = Vec::with_capacity(payload.len() + DATA_ID_LEN);
        full_payload.extend_from_slice(payload);
        let mut target_bytes = [0u8; DATA_ID_LEN];
        target_row.encode(&mut target_bytes);
        full_payload.extend_from_slice(&target_bytes);

        let header = RecordHeader {
            use_explicit_target: true,
            direction,
            message_id,
            function_id,
            src_index,
            size: full_payload.len() as u32,
        };
        record::emit(&mut self.out, &header, &full_payload);
        let total_size = self.out.len() - offset;
        self.assign_lane(binding, destination_is_global, offset, total_size);
    }

    fn assign_lane(
        &mut self,
        binding: &dyn Binding,
        destination_is_global: bool,
        offset: usize,
        record_total_size: usize,
    ) {
        let lane = lane_for(binding, destination_is_global);
        if let Some(last) = self.blocks.last_mut() {
            if last.lane == lane {
                last.size_bytes += record_total_size;
                return;
            }
        }
        self.blocks.push(BlockDescriptor {
            lane,
            start_offset: offset,
            size_bytes: record_total_size,
        });
    }
}

/// Which lane a record belongs to: the registry's reserved "set" binding
/// always stays node-local (`Qinfo.cpp`'s `mesgbinding->isSetMsg()` check
/// guarding `addToQ`'s lane choice), and so does any record whose
/// destination element is declared global — a globally replicated element
/// already holds a copy of its data on every node, so there is nothing for
/// the collective exchange to carry. Everything else goes cluster-wide.
fn lane_for(binding: &dyn Binding, destination_is_global: bool) -> Lane {
    if binding.is_set_msg() || destination_is_global {
        Lane::NodeLocal
    } else {
        Lane::ClusterWide
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Direction;
    use crate::registry::DispatchCtx;

    struct FakeBinding {
        e1: ElementId,
        e2: ElementId,
        set_msg: bool,
    }

    impl Binding for FakeBinding {
        fn e1(&self) -> ElementId {
            self.e1
        }
        fn e2(&self) -> ElementId {
            self.e2
        }
        fn is_set_msg(&self) -> bool {
            self.set_msg
        }
        fn exec(&self, _header: &RecordHeader, _payload: &[u8], _ctx: &DispatchCtx<'_>) {}
    }

    fn binding() -> FakeBinding {
        FakeBinding {
            e1: ElementId(1),
            e2: ElementId(2),
            set_msg: false,
        }
    }

    #[test]
    fn coalesces_adjacent_same_lane_appends() {
        let b = binding();
        let mut outbox = ThreadOutbox::new();
        outbox.append(&b, Direction::Forward, 1, 0, DataId::default(), false, b"A");
        outbox.append(&b, Direction::Forward, 1, 0, DataId::default(), false, b"B");
        assert_eq!(outbox.blocks().len(), 1);
        assert_eq!(outbox.blocks()[0].lane, Lane::ClusterWide);
    }

    #[test]
    fn lane_switch_creates_new_descriptor() {
        let cluster = binding();
        let local = FakeBinding {
            e1: ElementId(1),
            e2: ElementId(2),
            set_msg: true,
        };
        let mut outbox = ThreadOutbox::new();
        outbox.append(&cluster, Direction::Forward, 1, 0, DataId::default(), false, b"A");
        outbox.append(&local, Direction::Forward, 2, 0, DataId::default(), false, b"B");
        outbox.append(&cluster, Direction::Forward, 1, 0, DataId::default(), false, b"C");

        let blocks = outbox.blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].lane, Lane::ClusterWide);
        assert_eq!(blocks[1].lane, Lane::NodeLocal);
        assert_eq!(blocks[2].lane, Lane::ClusterWide);
    }

    #[test]
    fn destination_is_global_routes_to_node_local_lane_regardless_of_set_msg() {
        let b = binding(); // set_msg: false
        let mut outbox = ThreadOutbox::new();
        outbox.append(&b, Direction::Forward, 1, 0, DataId::default(), true, b"A");
        assert_eq!(outbox.blocks().len(), 1);
        assert_eq!(outbox.blocks()[0].lane, Lane::NodeLocal);
    }

    #[test]
    fn append_with_target_sets_flag_and_grows_size() {
        let b = binding();
        let mut outbox = ThreadOutbox::new();
        outbox.append_with_target(
            &b,
            Direction::Forward,
            1,
            0,
            DataId::default(),
            false,
            b"payload",
            DataId::new(4, 5),
        );
        let header = RecordHeader::decode(outbox.bytes()).unwrap();
        assert!(header.use_explicit_target);
        assert_eq!(header.size as usize, "payload".len() + DATA_ID_LEN);
    }
}
