//! Groups of worker threads sharing an inbound buffer, and the barrier-time
//! merge that folds each thread's outbox into it (components C3/C4).
//!
//! Grounded on `examples/original_source/basecode/Qinfo.cpp`'s `addSimGroup`
//! and `mergeQ`. `mergeQ` there indexes the per-thread block-descriptor list
//! (`qBlock_`) with the bare thread-local index `i`; for any group after the
//! first that aliases group 0's descriptors. We index by `start_thread + i`
//! instead (see `merge_into`), which is the fix this crate makes over the
//! original (SPEC_FULL.md §9).

use crate::error::DispatchError;
use crate::outbox::{Lane, ThreadOutbox};
use crate::record;

/// A contiguous range of worker threads, across all nodes, that share one
/// inbound buffer and one MPI exchange buffer.
#[derive(Debug)]
pub struct SimGroup {
    pub id: u32,
    /// Global index of this group's first thread.
    pub start_thread: usize,
    /// Number of threads in this group (on this node).
    pub num_threads: usize,
    pub num_nodes: usize,
    block_size: usize,

    /// Lane-0 buffer, merged from local threads, ready for exchange.
    inbound: Vec<u8>,
    /// Lane-1 buffer: node-local traffic, never leaves this node.
    local_buf: Vec<u8>,
    /// Post-exchange buffer: `num_nodes` blocks of `block_size` bytes each.
    mpi_inbound: Vec<u8>,
}

impl SimGroup {
    pub fn new(id: u32, start_thread: usize, num_threads: usize, num_nodes: usize, block_size: usize) -> Self {
        let mut inbound = Vec::with_capacity(block_size);
        record::reset_buffer(&mut inbound);
        let mut local_buf = Vec::with_capacity(block_size);
        record::reset_buffer(&mut local_buf);

        Self {
            id,
            start_thread,
            num_threads,
            num_nodes,
            block_size,
            inbound,
            local_buf,
            mpi_inbound: vec![0u8; block_size * num_nodes],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    pub fn local_buf(&self) -> &[u8] {
        &self.local_buf
    }

    pub fn inbound_mut(&mut self) -> &mut [u8] {
        &mut self.inbound
    }

    pub fn local_buf_mut(&mut self) -> &mut [u8] {
        &mut self.local_buf
    }

    pub fn mpi_inbound(&self) -> &[u8] {
        &self.mpi_inbound
    }

    /// Clears both inbound buffers back to empty, ready for the next tick's
    /// merge (`clearQ`/`mpiClearQ`).
    pub fn clear_inbound(&mut self) {
        record::reset_buffer(&mut self.inbound);
        record::reset_buffer(&mut self.local_buf);
    }

    /// Folds every thread in `[start_thread, start_thread + num_threads)`'s
    /// outbox into this group's two inbound buffers, lane by lane, in thread
    /// order, then clears each merged thread's outbox and block-descriptor
    /// list in place (spec.md §4.4 step 3). `outboxes` is indexed globally
    /// across all groups; only this group's own thread range is touched, so
    /// merging one group never clears another's still-unmerged state.
    pub fn merge_into(&mut self, outboxes: &mut [ThreadOutbox]) -> Result<(), DispatchError> {
        self.clear_inbound();

        for local_i in 0..self.num_threads {
            let global_i = self.start_thread + local_i;
            let outbox = outboxes.get_mut(global_i).ok_or_else(|| {
                DispatchError::PreconditionViolation(format!(
                    "group {} expected thread {} but only {} outboxes exist",
                    self.id,
                    global_i,
                    outboxes.len()
                ))
            })?;

            for block in outbox.blocks() {
                let bytes =
                    &outbox.bytes()[block.start_offset..block.start_offset + block.size_bytes];
                let dest = match block.lane {
                    Lane::ClusterWide => &mut self.inbound,
                    Lane::NodeLocal => &mut self.local_buf,
                };
                dest.extend_from_slice(bytes);
            }
            outbox.clear();
        }

        record::finalize_len(&mut self.inbound);
        record::finalize_len(&mut self.local_buf);

        log::trace!(
            "group {}: merged {} threads into {} cluster-wide bytes, {} node-local bytes",
            self.id,
            self.num_threads,
            self.inbound.len(),
            self.local_buf.len()
        );

        if self.inbound.len() > self.block_size {
            log::error!(
                "group {}: merged cluster-wide buffer of {} bytes exceeds block size {}",
                self.id,
                self.inbound.len(),
                self.block_size
            );
            return Err(DispatchError::OverflowViolation {
                actual: self.inbound.len(),
                limit: self.block_size,
            });
        }
        if self.local_buf.len() > self.block_size {
            log::error!(
                "group {}: merged node-local buffer of {} bytes exceeds block size {}",
                self.id,
                self.local_buf.len(),
                self.block_size
            );
            return Err(DispatchError::OverflowViolation {
                actual: self.local_buf.len(),
                limit: self.block_size,
            });
        }

        Ok(())
    }

    /// Copies this node's merged lane-0 buffer into its slot of the MPI
    /// buffer (the slot the exchange's all-gather will fill in for every
    /// other node). Called before `Exchange::all_gather`.
    pub fn stage_local_for_exchange(&mut self, node_index: usize) {
        let start = node_index * self.block_size;
        let end = start + self.block_size;
        self.mpi_inbound[start..end].fill(0);
        self.mpi_inbound[start..start + self.inbound.len()]
            .copy_from_slice(&self.inbound);
    }

    pub fn mpi_inbound_mut(&mut self) -> &mut [u8] {
        &mut self.mpi_inbound
    }
}
