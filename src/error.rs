//! Error taxonomy for the dispatch core (see SPEC_FULL.md §7).
//!
//! The original kernel treats every one of these as a programming bug and
//! aborts the process. We keep that spirit but return `Result` instead of
//! calling `abort()` directly, so the core stays unit-testable; callers that
//! want the original all-or-nothing behavior (e.g. the demo binary) are free
//! to `.unwrap()` or exit on `Err`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Group id or thread slot out of range, or a buffer shorter than its own length prefix.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// `walk` read past the declared used length, or a record's `size` would overrun the buffer.
    #[error("corrupt buffer: {0}")]
    CorruptBuffer(&'static str),

    /// The merged inbound buffer does not fit in `BLOCK_SIZE` bytes.
    #[error("merged buffer of {actual} bytes exceeds block size of {limit} bytes")]
    OverflowViolation { actual: usize, limit: usize },

    /// The underlying collective (all-gather / broadcast / gather / barrier) failed.
    #[error("collective communication failed: {0}")]
    CollectiveFailure(String),

    /// `message_id` has no corresponding binding in the registry.
    #[error("unknown message binding: {0}")]
    UnknownBinding(u32),
}
