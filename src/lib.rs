//! Message dispatch core: per-thread outbound buffers, barrier-merged group
//! inbound buffers, MPI-style collective exchange across nodes, and handler
//! dispatch to target element rows.
//!
//! Module layout mirrors the components this crate is built from:
//!
//! - [`record`] — wire format and the buffer-walking cursor (C1)
//! - [`outbox`] — per-thread output buffers and lane assignment (C2)
//! - [`group`] — groups of threads sharing an inbound buffer, and the merge (C3/C4)
//! - [`exchange`] — the collective abstraction and its null/MPI backends (C5)
//! - [`dispatch`] — the top-level [`Dispatcher`] and per-record dispatch (C6)
//! - [`tick`] — per-thread identity and the fan-out partitioning predicate (C7)
//! - [`introspect`] — queue reports (C8)
//! - [`error`] — the error taxonomy (C9)
//! - [`registry`] — contracts this crate consumes but does not implement

pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod group;
pub mod introspect;
pub mod outbox;
pub mod record;
pub mod registry;
pub mod tick;

pub use dispatch::Dispatcher;
pub use error::DispatchError;
