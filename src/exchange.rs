//! Collective exchange abstraction (component C5): MPI_Barrier + Allgather
//! for cluster-wide merges, MPI_Barrier + Bcast + Gather for root-to-all
//! reports.
//!
//! Grounded on `examples/original_source/basecode/Qinfo.cpp`'s
//! `sendAllToAll` and `sendRootToAll`, which issue the literal MPI calls
//! directly. We push those calls behind a trait so the core is testable
//! single-node without an MPI installation (`NullExchange`), while the real
//! multi-node path (`MpiExchange`, feature `mpi`) uses the same collectives.

use crate::error::DispatchError;

/// A cluster-wide collective exchange. One call per barrier-merged tick.
pub trait Exchange: Send + Sync {
    /// `MPI_Barrier` then `MPI_Allgather`: every node's `send_block` (length
    /// `block_size`) lands in `recv_buf` at offset `node_index * block_size`,
    /// for every node, replacing whatever was already in `recv_buf`.
    fn all_gather(
        &self,
        send_block: &[u8],
        recv_buf: &mut [u8],
        block_size: usize,
    ) -> Result<(), DispatchError>;

    /// `MPI_Barrier`, then `MPI_Bcast(root's `local_block`, count=block_size)`,
    /// then `MPI_Gather(send=local_block, recv=..., count=block_size, root)`:
    /// every node's `bcast_out` (length `block_size`) ends up holding the
    /// root's `local_block`; `gather_out` (length `block_size * num_nodes`)
    /// is filled, on `root` only, with every node's `local_block` at its
    /// rank's offset (as `all_gather` would fill it). Non-root callers may
    /// leave `gather_out` untouched; its contents are unspecified there,
    /// mirroring the original's unread post-gather buffer on non-root ranks.
    fn root_to_all(
        &self,
        root: usize,
        local_block: &[u8],
        bcast_out: &mut [u8],
        gather_out: &mut [u8],
        block_size: usize,
    ) -> Result<(), DispatchError>;

    fn num_nodes(&self) -> usize;
    fn node_index(&self) -> usize;
}

/// Single-node stand-in: no other nodes exist, so all-gather is a copy into
/// this node's own slot and root-to-all is a local call with no broadcast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExchange;

impl Exchange for NullExchange {
    fn all_gather(
        &self,
        send_block: &[u8],
        recv_buf: &mut [u8],
        block_size: usize,
    ) -> Result<(), DispatchError> {
        if send_block.len() > block_size {
            return Err(DispatchError::OverflowViolation {
                actual: send_block.len(),
                limit: block_size,
            });
        }
        if recv_buf.len() < block_size {
            return Err(DispatchError::PreconditionViolation(
                "recv buffer smaller than one block".into(),
            ));
        }
        recv_buf[..block_size].fill(0);
        recv_buf[..send_block.len()].copy_from_slice(send_block);
        Ok(())
    }

    fn root_to_all(
        &self,
        root: usize,
        local_block: &[u8],
        bcast_out: &mut [u8],
        gather_out: &mut [u8],
        block_size: usize,
    ) -> Result<(), DispatchError> {
        if root != 0 {
            return Err(DispatchError::PreconditionViolation(
                "single-node exchange only has root 0".into(),
            ));
        }
        if local_block.len() != block_size || bcast_out.len() != block_size {
            return Err(DispatchError::PreconditionViolation(
                "root_to_all block length mismatch".into(),
            ));
        }
        bcast_out.copy_from_slice(local_block);
        gather_out[..block_size].copy_from_slice(local_block);
        Ok(())
    }

    fn num_nodes(&self) -> usize {
        1
    }

    fn node_index(&self) -> usize {
        0
    }
}

#[cfg(feature = "mpi")]
pub use mpi_backend::MpiExchange;

#[cfg(feature = "mpi")]
mod mpi_backend {
    use super::*;
    use mpi::collective::CommunicatorCollectives;
    use mpi::topology::Communicator;
    use mpi::traits::*;

    /// Real multi-node exchange over an `mpi::topology::SimpleCommunicator`
    /// (rsmpi's `World` or a sub-communicator for one group).
    pub struct MpiExchange<C: Communicator> {
        comm: C,
    }

    impl<C: Communicator> MpiExchange<C> {
        pub fn new(comm: C) -> Self {
            Self { comm }
        }
    }

    impl<C: Communicator + Send + Sync> Exchange for MpiExchange<C> {
        fn all_gather(
            &self,
            send_block: &[u8],
            recv_buf: &mut [u8],
            block_size: usize,
        ) -> Result<(), DispatchError> {
            if send_block.len() != block_size {
                return Err(DispatchError::OverflowViolation {
                    actual: send_block.len(),
                    limit: block_size,
                });
            }
            self.comm.barrier();
            self.comm.all_gather_into(&send_block[..], recv_buf);
            Ok(())
        }

        fn root_to_all(
            &self,
            root: usize,
            local_block: &[u8],
            bcast_out: &mut [u8],
            gather_out: &mut [u8],
            block_size: usize,
        ) -> Result<(), DispatchError> {
            if local_block.len() != block_size || bcast_out.len() != block_size {
                return Err(DispatchError::PreconditionViolation(
                    "root_to_all block length mismatch".into(),
                ));
            }
            self.comm.barrier();
            let root_process = self.comm.process_at_rank(root as i32);

            // Root broadcasts its own block; everyone (including root) ends
            // up with it in `buf`, which we then hand back via `bcast_out`.
            let mut buf = local_block.to_vec();
            root_process.broadcast_into(&mut buf);
            bcast_out.copy_from_slice(&buf);

            if self.comm.rank() as usize == root {
                root_process.gather_into_root(local_block, gather_out);
            } else {
                root_process.gather_into(local_block);
            }
            Ok(())
        }

        fn num_nodes(&self) -> usize {
            self.comm.size() as usize
        }

        fn node_index(&self) -> usize {
            self.comm.rank() as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_exchange_all_gather_places_block_at_its_own_offset() {
        let ex = NullExchange;
        let mut recv = vec![0xFFu8; 16];
        ex.all_gather(b"hi", &mut recv, 16).unwrap();
        assert_eq!(&recv[0..2], b"hi");
        assert!(recv[2..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn null_exchange_rejects_oversized_block() {
        let ex = NullExchange;
        let mut recv = vec![0u8; 4];
        let err = ex.all_gather(b"12345", &mut recv, 4).unwrap_err();
        assert!(matches!(err, DispatchError::OverflowViolation { .. }));
    }

    #[test]
    fn null_exchange_root_to_all_echoes_local_block_into_both_outputs() {
        let ex = NullExchange;
        let local = b"answer\0\0".to_vec();
        let mut bcast = vec![0u8; local.len()];
        let mut gather = vec![0u8; local.len()];
        ex.root_to_all(0, &local, &mut bcast, &mut gather, local.len())
            .unwrap();
        assert_eq!(bcast, local);
        assert_eq!(gather, local);
    }

    #[test]
    fn null_exchange_root_to_all_rejects_non_zero_root() {
        let ex = NullExchange;
        let mut bcast = vec![0u8; 4];
        let mut gather = vec![0u8; 4];
        let err = ex.root_to_all(1, b"abcd", &mut bcast, &mut gather, 4).unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionViolation(_)));
    }
}
