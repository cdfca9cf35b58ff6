//! The top-level `Dispatcher` (component C6): owns every group's buffers and
//! every thread's outbox, drives a tick from barrier-merge through exchange
//! through handler dispatch. No process-wide globals — everything lives on
//! this one value, unlike the original's static `Qinfo` state
//! (`examples/original_source/basecode/Qinfo.cpp`'s file-scope `qBlock_`,
//! `buf_`, `localBuf_`).

use crate::error::DispatchError;
use crate::exchange::Exchange;
use crate::group::SimGroup;
use crate::outbox::ThreadOutbox;
use crate::record::{self, Direction, RecordHeader};
use crate::registry::{Binding, DispatchCtx, Registry};
use crate::tick::ProcInfo;

/// Owns the dispatch core's entire mutable state for one process (one MPI
/// rank): every worker thread's outbox, every group's inbound/MPI buffers,
/// and the exchange used to reach other nodes.
pub struct Dispatcher<E: Exchange> {
    groups: Vec<SimGroup>,
    outboxes: Vec<ThreadOutbox>,
    exchange: E,
    block_size: usize,
}

impl<E: Exchange> Dispatcher<E> {
    pub fn new(exchange: E, block_size: usize, total_threads: usize) -> Self {
        Self {
            groups: Vec::new(),
            outboxes: (0..total_threads).map(|_| ThreadOutbox::new()).collect(),
            exchange,
            block_size,
        }
    }

    /// Registers a new group spanning `[start_thread, start_thread + num_threads)`.
    pub fn add_group(&mut self, num_threads: usize, num_nodes: usize) -> u32 {
        let id = self.groups.len() as u32;
        let start_thread = self
            .groups
            .last()
            .map(|g| g.start_thread + g.num_threads)
            .unwrap_or(0);
        self.groups.push(SimGroup::new(
            id,
            start_thread,
            num_threads,
            num_nodes,
            self.block_size,
        ));
        log::info!(
            "registered group {id}: threads [{start_thread}, {}), {num_nodes} node(s)",
            start_thread + num_threads
        );
        id
    }

    pub fn group(&self, id: u32) -> Option<&SimGroup> {
        self.groups.get(id as usize)
    }

    pub fn group_mut(&mut self, id: u32) -> Option<&mut SimGroup> {
        self.groups.get_mut(id as usize)
    }

    pub fn outbox_mut(&mut self, global_thread: usize) -> Option<&mut ThreadOutbox> {
        self.outboxes.get_mut(global_thread)
    }

    /// Read-only view over every worker thread's outbox, for introspection.
    pub fn outboxes(&self) -> &[ThreadOutbox] {
        &self.outboxes
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// `mergeQ`: folds every thread's outbox into its group's inbound
    /// buffers, clearing each merged outbox and block list as it goes. Must
    /// run after a barrier separates it from the producer threads still
    /// appending (SPEC_FULL.md §5).
    pub fn merge_all(&mut self) -> Result<(), DispatchError> {
        let Self { groups, outboxes, .. } = self;
        for group in groups {
            group.merge_into(outboxes)?;
        }
        Ok(())
    }

    /// `mergeQ( groupId )`: merges a single group's outboxes, clearing them
    /// as part of the same pass, leaving every other group untouched.
    pub fn merge_group(&mut self, id: u32) -> Result<(), DispatchError> {
        let idx = id as usize;
        if idx >= self.groups.len() {
            return Err(no_group(id));
        }
        self.groups[idx].merge_into(&mut self.outboxes)
    }

    /// `sendAllToAll`: stages this node's lane-0 buffer for group `id` and
    /// runs the collective all-gather, landing every node's contribution in
    /// the group's MPI buffer.
    pub fn exchange_group(&mut self, id: u32) -> Result<(), DispatchError> {
        let group = self.groups.get_mut(id as usize).ok_or_else(|| no_group(id))?;

        let node_index = self.exchange.node_index();
        group.stage_local_for_exchange(node_index);

        let block_size = group.block_size();
        let send_block = {
            let start = node_index * block_size;
            let end = start + block_size;
            group.mpi_inbound()[start..end].to_vec()
        };
        log::debug!(
            "group {id}: all-gather entry, sending {} bytes across {} node(s)",
            send_block.len(),
            self.exchange.num_nodes()
        );
        let result = self
            .exchange
            .all_gather(&send_block, group.mpi_inbound_mut(), block_size);
        match &result {
            Ok(()) => log::debug!("group {id}: all-gather exit"),
            Err(e) => log::error!("group {id}: all-gather failed: {e}"),
        }
        result
    }

    /// Dispatches every record in group `id`'s three buffers (post-exchange
    /// MPI buffer across all nodes, plus this node's own node-local buffer)
    /// to its target's handler.
    pub fn dispatch_group(
        &mut self,
        id: u32,
        registry: &dyn Registry,
        proc: &ProcInfo,
    ) -> Result<(), DispatchError> {
        let group = self.groups.get_mut(id as usize).ok_or_else(|| no_group(id))?;

        let ctx = DispatchCtx::new(registry, proc);
        let block_size = group.block_size();

        for node in 0..group.num_nodes {
            let start = node * block_size;
            let end = start + block_size;
            read_buffer(&mut group.mpi_inbound_mut()[start..end], &ctx)?;
        }
        read_buffer(group.local_buf_mut(), &ctx)
    }

    /// `sendRootToAll`: broadcasts the controller node's (rank 0) inbound
    /// buffer to every node of group `id`, and gathers every node's inbound
    /// buffer back into the controller's MPI buffer. A no-op precondition
    /// (num_nodes > 1) is the caller's responsibility, matching the
    /// original's early return (SPEC_FULL.md §4.5).
    pub fn broadcast_group(&mut self, id: u32) -> Result<(), DispatchError> {
        let group = self.groups.get_mut(id as usize).ok_or_else(|| no_group(id))?;
        let block_size = group.block_size();

        let mut local_block = vec![0u8; block_size];
        local_block[..group.inbound().len()].copy_from_slice(group.inbound());

        let mut bcast_out = vec![0u8; block_size];
        let mut gather_out = vec![0u8; block_size * group.num_nodes];
        log::debug!("group {id}: root-to-all entry, {} node(s)", group.num_nodes);
        if let Err(e) =
            self.exchange
                .root_to_all(0, &local_block, &mut bcast_out, &mut gather_out, block_size)
        {
            log::error!("group {id}: root-to-all failed: {e}");
            return Err(e);
        }
        log::debug!("group {id}: root-to-all exit");

        let mpi_buf = group.mpi_inbound_mut();
        mpi_buf.copy_from_slice(&gather_out);
        mpi_buf[..block_size].copy_from_slice(&bcast_out);
        Ok(())
    }

    /// `clearQ` (C7, single-node-optimised path): merge, then deliver both
    /// lanes directly from this process's own buffers — no collective call,
    /// since with one node nothing can be addressed to a row elsewhere.
    /// Each buffer's length prefix is zeroed as it's read (SPEC_FULL.md §5
    /// point 5), so no separate reset is needed afterward.
    pub fn clear_queue(
        &mut self,
        id: u32,
        registry: &dyn Registry,
        proc: &ProcInfo,
    ) -> Result<(), DispatchError> {
        self.merge_group(id)?;
        let ctx = DispatchCtx::new(registry, proc);
        let group = self.group_mut(id).ok_or_else(|| no_group(id))?;
        read_buffer(group.local_buf_mut(), &ctx)?;
        read_buffer(group.inbound_mut(), &ctx)
    }

    /// `mpiClearQ` (C7, multi-node path): merge, then — only when the group
    /// spans more than one node — broadcast/gather via `root_to_all` and
    /// additionally walk the MPI buffer for records that arrived from other
    /// nodes. Degenerates to `clear_queue`'s reads when `num_nodes == 1`.
    pub fn mpi_clear_queue(
        &mut self,
        id: u32,
        registry: &dyn Registry,
        proc: &ProcInfo,
    ) -> Result<(), DispatchError> {
        self.merge_group(id)?;
        let num_nodes = self.group(id).ok_or_else(|| no_group(id))?.num_nodes;
        if num_nodes > 1 {
            self.broadcast_group(id)?;
        }

        let ctx = DispatchCtx::new(registry, proc);
        let group = self.group_mut(id).ok_or_else(|| no_group(id))?;
        read_buffer(group.local_buf_mut(), &ctx)?;
        read_buffer(group.inbound_mut(), &ctx)?;
        if num_nodes > 1 {
            read_mpi(group, &ctx)?;
        }
        Ok(())
    }

    /// `sendAllToAll` (C7): the simulation-time bulk exchange variant,
    /// symmetric across nodes — the same all-gather collective used to
    /// clear a group's queue each tick, exposed standalone for bulk data
    /// transfer outside the merge/dispatch cycle (SPEC_FULL.md §4.7).
    pub fn send_all_to_all(&mut self, id: u32) -> Result<(), DispatchError> {
        self.exchange_group(id)
    }
}

fn no_group(id: u32) -> DispatchError {
    DispatchError::PreconditionViolation(format!("no group {id}"))
}

/// `readQ`/`readLocalQ`: walks every record in `buffer` and dispatches each
/// one, then zeros `buffer`'s length prefix (SPEC_FULL.md §5 point 5).
pub fn read_buffer(buffer: &mut [u8], ctx: &DispatchCtx<'_>) -> Result<(), DispatchError> {
    record::walk(buffer, |header, payload| dispatch_one(&header, payload, ctx))?;
    record::clear_len_prefix(buffer);
    Ok(())
}

/// `readMpiQ`: dispatches every record in every node slot of the group's MPI
/// buffer except the local node's own slot (that node's contribution is
/// already visible locally and was never meant to round-trip through MPI),
/// zeroing each slot's length prefix as it's read.
pub fn read_mpi(group: &mut SimGroup, ctx: &DispatchCtx<'_>) -> Result<(), DispatchError> {
    let local_node = ctx.proc.node_index as usize;
    let block_size = group.block_size();
    for node in 0..group.num_nodes {
        if node == local_node {
            continue;
        }
        let start = node * block_size;
        let end = start + block_size;
        read_buffer(&mut group.mpi_inbound_mut()[start..end], ctx)?;
    }
    Ok(())
}

/// `readBuf`: resolves a single record's binding and either fans it out
/// (binding-driven dispatch) or, when the record carries an explicit target
/// suffix, delivers straight to that row.
pub fn dispatch_one(
    header: &RecordHeader,
    payload: &[u8],
    ctx: &DispatchCtx<'_>,
) -> Result<(), DispatchError> {
    let binding = ctx.registry.get_msg(header.message_id).ok_or_else(|| {
        log::error!("dispatch: no binding registered for message id {}", header.message_id);
        DispatchError::UnknownBinding(header.message_id)
    })?;

    if header.use_explicit_target {
        dispatch_explicit_target(binding, header, payload, ctx)
    } else {
        binding.exec(header, payload, ctx);
        Ok(())
    }
}

fn dispatch_explicit_target(
    binding: &dyn Binding,
    header: &RecordHeader,
    payload: &[u8],
    ctx: &DispatchCtx<'_>,
) -> Result<(), DispatchError> {
    use crate::record::DATA_ID_LEN;

    if payload.len() < DATA_ID_LEN {
        return Err(DispatchError::CorruptBuffer(
            "explicit-target record missing trailing DataId",
        ));
    }
    let split = payload.len() - DATA_ID_LEN;
    let (body, target_bytes) = payload.split_at(split);
    let target_row = crate::record::DataId::decode(target_bytes);

    let target_element = DispatchCtx::target_of(binding, header.direction);
    let table = ctx
        .registry
        .get_element(target_element)
        .ok_or_else(|| DispatchError::PreconditionViolation(format!(
            "no element table for {target_element:?}"
        )))?;

    if !table.is_global() && !table.is_data_here(target_row.row, ctx.proc) {
        return Ok(());
    }

    let handler = table
        .get_op_func(header.function_id)
        .ok_or_else(|| DispatchError::UnknownBinding(header.function_id))?;

    let eref = crate::registry::Eref {
        element: target_element,
        data_id: target_row,
    };
    handler.op(eref, header, body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::NullExchange;
    use crate::outbox::ThreadOutbox;
    use crate::record::DataId;
    use crate::registry::{Binding, ElementId, ElementTable, Handler, Registry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);
    impl Handler for CountingHandler {
        fn op(&self, _target: crate::registry::Eref, _header: &RecordHeader, _payload: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FanOutBinding {
        count: Arc<AtomicUsize>,
    }
    impl Binding for FanOutBinding {
        fn e1(&self) -> ElementId {
            ElementId(0)
        }
        fn e2(&self) -> ElementId {
            ElementId(1)
        }
        fn exec(&self, _header: &RecordHeader, _payload: &[u8], _ctx: &DispatchCtx<'_>) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct OneTable {
        handler: CountingHandler,
        global: bool,
    }
    impl ElementTable for OneTable {
        fn get_op_func(&self, _function_id: u32) -> Option<&dyn Handler> {
            Some(&self.handler)
        }
        fn is_global(&self) -> bool {
            self.global
        }
        fn is_data_here(&self, _row: u32, _ctx: &ProcInfo) -> bool {
            true
        }
    }

    struct FakeRegistry {
        binding: FanOutBinding,
        table: OneTable,
    }
    impl Registry for FakeRegistry {
        fn get_msg(&self, message_id: u32) -> Option<&dyn Binding> {
            if message_id == 1 {
                Some(&self.binding)
            } else {
                None
            }
        }
        fn get_element(&self, id: ElementId) -> Option<&dyn ElementTable> {
            if id == ElementId(1) {
                Some(&self.table)
            } else {
                None
            }
        }
    }

    fn proc() -> ProcInfo {
        ProcInfo::new(0, 1, 0, 1, 0)
    }

    #[test]
    fn dispatch_one_calls_binding_exec_for_non_explicit_target() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = FakeRegistry {
            binding: FanOutBinding {
                count: count.clone(),
            },
            table: OneTable {
                handler: CountingHandler(Arc::new(AtomicUsize::new(0))),
                global: true,
            },
        };
        let p = proc();
        let ctx = DispatchCtx::new(&registry, &p);

        let header = RecordHeader {
            use_explicit_target: false,
            direction: Direction::Forward,
            message_id: 1,
            function_id: 0,
            src_index: DataId::default(),
            size: 0,
        };
        dispatch_one(&header, &[], &ctx).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_one_rejects_unknown_message_id() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = FakeRegistry {
            binding: FanOutBinding {
                count: count.clone(),
            },
            table: OneTable {
                handler: CountingHandler(Arc::new(AtomicUsize::new(0))),
                global: true,
            },
        };
        let p = proc();
        let ctx = DispatchCtx::new(&registry, &p);
        let header = RecordHeader {
            use_explicit_target: false,
            direction: Direction::Forward,
            message_id: 99,
            function_id: 0,
            src_index: DataId::default(),
            size: 0,
        };
        let err = dispatch_one(&header, &[], &ctx).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownBinding(99)));
    }

    #[test]
    fn dispatch_explicit_target_invokes_handler_with_trailing_row_stripped() {
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let count = Arc::new(AtomicUsize::new(0));
        let registry = FakeRegistry {
            binding: FanOutBinding {
                count: count.clone(),
            },
            table: OneTable {
                handler: CountingHandler(handler_calls.clone()),
                global: true,
            },
        };
        let p = proc();
        let ctx = DispatchCtx::new(&registry, &p);

        let mut outbox = ThreadOutbox::new();
        outbox.append_with_target(
            &registry.binding,
            Direction::Forward,
            1,
            0,
            DataId::default(),
            false,
            b"payload",
            DataId::new(3, 0),
        );
        let header = RecordHeader::decode(outbox.bytes()).unwrap();
        let body = &outbox.bytes()[crate::record::HEADER_LEN..];
        dispatch_one(&header, body, &ctx).unwrap();
        assert_eq!(handler_calls.load(Ordering::SeqCst), 1);
        // fan-out exec path must not also have run
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
