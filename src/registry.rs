//! Contracts this crate consumes from the (out-of-scope) object registry:
//! `Msg::getMsg`, `Element::cinfo().getOpFunc`, and `DataHandler`'s
//! globalness/locality queries (SPEC_FULL.md §6). The registry itself is not
//! part of this core; these traits exist so the dispatch core can be built
//! and tested without one.

use crate::record::{DataId, Direction, RecordHeader};
use crate::tick::ProcInfo;
use std::fmt;

/// Opaque handle to an element, as handed out by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

/// An element instance: an element id plus the row/field within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eref {
    pub element: ElementId,
    pub data_id: DataId,
}

/// A handler function reachable via `(element, function_id)`.
pub trait Handler: Send + Sync {
    fn op(&self, target: Eref, header: &RecordHeader, payload: &[u8]);
}

/// `Element::cinfo()`: the per-element table mapping function ids to handlers,
/// plus the locality predicates `DataHandler::isGlobal`/`isDataHere`.
pub trait ElementTable: Send + Sync {
    fn get_op_func(&self, function_id: u32) -> Option<&dyn Handler>;

    /// True if every node holds a full replica of this element's data.
    fn is_global(&self) -> bool;

    /// True if row `row` of this element lives on the node described by `ctx`.
    fn is_data_here(&self, row: u32, ctx: &ProcInfo) -> bool;

    /// Human-readable label, used only by `introspect::decode_records`
    /// (`Element::name()` in the original's `innerReportQ`).
    fn name(&self) -> &str {
        "<element>"
    }
}

/// A registered directed edge between two elements (`Msg::getMsg(message_id)`).
pub trait Binding: Send + Sync {
    fn e1(&self) -> ElementId;
    fn e2(&self) -> ElementId;

    /// True only for the registry's reserved "set" binding, which always
    /// routes to the node-local lane regardless of globalness.
    fn is_set_msg(&self) -> bool {
        false
    }

    /// Fan a non-explicit-target record out to zero or more target rows,
    /// consulting `ctx.exec_thread` to decide which worker executes which
    /// delivery.
    fn exec(&self, header: &RecordHeader, payload: &[u8], ctx: &DispatchCtx<'_>);
}

/// The registry: resolves message ids to bindings and element ids to tables.
pub trait Registry: Send + Sync {
    fn get_msg(&self, message_id: u32) -> Option<&dyn Binding>;
    fn get_element(&self, id: ElementId) -> Option<&dyn ElementTable>;
}

/// Bundles a [`Registry`] with the current tick's [`ProcInfo`] for the
/// duration of a dispatch pass; threaded into `Binding::exec`.
pub struct DispatchCtx<'a> {
    pub registry: &'a dyn Registry,
    pub proc: &'a ProcInfo,
}

impl<'a> DispatchCtx<'a> {
    pub fn new(registry: &'a dyn Registry, proc: &'a ProcInfo) -> Self {
        Self { registry, proc }
    }

    /// Other end of `binding` in the record's direction: forward -> e2, reverse -> e1.
    pub fn target_of(binding: &dyn Binding, direction: Direction) -> ElementId {
        match direction {
            Direction::Forward => binding.e2(),
            Direction::Reverse => binding.e1(),
        }
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}
