//! Queue introspection (component C8), grounded on
//! `examples/original_source/basecode/Qinfo.cpp`'s `reportQ`/`innerReportQ`:
//! a plain-text summary of how full each group's buffers are, useful for
//! diagnosing a stalled or overflowing tick without attaching a debugger.

use std::fmt::Write as _;

use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::exchange::Exchange;
use crate::record;
use crate::registry::{DispatchCtx, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub group_id: u32,
    pub cluster_used: u32,
    pub cluster_capacity: usize,
    pub local_used: u32,
    pub local_capacity: usize,
    pub mpi_used: u32,
    pub mpi_capacity: usize,
    /// Byte count still sitting in each of this group's threads' outboxes,
    /// in global-thread order (`start_thread..start_thread + num_threads`).
    pub outbox_bytes: Vec<usize>,
}

/// Collects a [`GroupReport`] per group: the byte sizes of every group's
/// inbound (cluster-wide), MPI, local, and per-thread output buffers
/// (spec.md's `reportQ`). Each buffer's used-length prefix is read directly
/// rather than re-derived by walking records, matching the original's
/// `innerReportQ`, which reports on the declared length alone.
pub fn report<E: Exchange>(dispatcher: &Dispatcher<E>) -> Vec<GroupReport> {
    let mut out = Vec::new();
    let mut id = 0u32;
    while let Some(group) = dispatcher.group(id) {
        let cluster_used = record::used_len(group.inbound()).unwrap_or(0);
        let local_used = record::used_len(group.local_buf()).unwrap_or(0);
        let block_size = group.block_size();

        let mut mpi_used = 0u32;
        let mpi_inbound = group.mpi_inbound();
        for node in 0..group.num_nodes {
            let start = node * block_size;
            let end = start + block_size;
            mpi_used += record::used_len(&mpi_inbound[start..end]).unwrap_or(0);
        }

        let outbox_bytes = dispatcher.outboxes()
            [group.start_thread..group.start_thread + group.num_threads]
            .iter()
            .map(|ob| ob.bytes().len())
            .collect();

        out.push(GroupReport {
            group_id: id,
            cluster_used,
            cluster_capacity: block_size,
            local_used,
            local_capacity: block_size,
            mpi_used,
            mpi_capacity: block_size * group.num_nodes,
            outbox_bytes,
        });
        id += 1;
    }
    out
}

/// Renders `report`'s output as the one-line-per-group text the demo binary
/// prints, e.g. `group 0: cluster 128/2000000 B, local 0/2000000 B, mpi
/// 0/4000000 B, outboxes [0, 0]`.
pub fn format_report(reports: &[GroupReport]) -> String {
    let mut buf = String::new();
    for r in reports {
        let _ = writeln!(
            buf,
            "group {}: cluster {}/{} B, local {}/{} B, mpi {}/{} B, outboxes {:?}",
            r.group_id,
            r.cluster_used,
            r.cluster_capacity,
            r.local_used,
            r.local_capacity,
            r.mpi_used,
            r.mpi_capacity,
            r.outbox_bytes,
        );
    }
    buf
}

/// One decoded record, as `innerReportQ` prints it in the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub message_id: u32,
    pub function_id: u32,
    pub src_row: u32,
    pub src_field: u32,
    pub size: u32,
    pub source_element: String,
    pub target_element: String,
}

/// Walks `buffer` with the C1 cursor and resolves each record's binding
/// through `registry` to report its addressing, without invoking any
/// handler (`innerReportQ`'s read-only diagnostic pass).
pub fn decode_records(
    buffer: &[u8],
    registry: &dyn Registry,
) -> Result<Vec<RecordSummary>, DispatchError> {
    let mut out = Vec::new();
    record::walk(buffer, |header, _payload| {
        let (source_element, target_element) = match registry.get_msg(header.message_id) {
            Some(binding) => {
                let target_id = DispatchCtx::target_of(binding, header.direction);
                let source_id = match header.direction {
                    crate::record::Direction::Forward => binding.e1(),
                    crate::record::Direction::Reverse => binding.e2(),
                };
                let name_of = |id: crate::registry::ElementId| {
                    registry
                        .get_element(id)
                        .map(|t| t.name().to_string())
                        .unwrap_or_else(|| format!("{id:?}"))
                };
                (name_of(source_id), name_of(target_id))
            }
            None => ("<unknown>".to_string(), "<unknown>".to_string()),
        };
        out.push(RecordSummary {
            message_id: header.message_id,
            function_id: header.function_id,
            src_row: header.src_index.row,
            src_field: header.src_index.field,
            size: header.size,
            source_element,
            target_element,
        });
        Ok(())
    })?;
    Ok(out)
}

/// Renders `decode_records`'s output one line per record, matching
/// `innerReportQ`'s `cout <<` sequence.
pub fn format_records(records: &[RecordSummary]) -> String {
    let mut buf = String::new();
    for r in records {
        let _ = writeln!(
            buf,
            "Q::MsgId = {}, FuncId = {}, srcIndex = ({}, {}), size = {}, src = {}, dest = {}",
            r.message_id, r.function_id, r.src_row, r.src_field, r.size, r.source_element, r.target_element
        );
    }
    buf
}

/// Full queue dump: `format_report`'s one-line-per-group summary, followed
/// by `format_records` for every non-empty cluster-wide/local buffer —
/// the combined `reportQ` + `innerReportQ` output the original prints
/// together.
pub fn report_detailed<E: Exchange>(
    dispatcher: &Dispatcher<E>,
    registry: &dyn Registry,
) -> Result<String, DispatchError> {
    let reports = report(dispatcher);
    let mut buf = format_report(&reports);

    for r in &reports {
        let group = dispatcher
            .group(r.group_id)
            .expect("group just reported on must still exist");
        for (label, buffer) in [("cluster", group.inbound()), ("local", group.local_buf())] {
            if record::used_len(buffer)? as usize <= record::PREFIX_LEN {
                continue;
            }
            let records = decode_records(buffer, registry)?;
            if records.is_empty() {
                continue;
            }
            let _ = writeln!(buf, "group {} {label} records:", r.group_id);
            buf.push_str(&format_records(&records));
        }
    }

    Ok(buf)
}
