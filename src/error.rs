use parse_display::Display;

/// Error returned by store operations and user-supplied derivations.
///
/// Errors raised inside `read`/`write` closures propagate unchanged to the
/// caller of the store operation that invoked them. The store never retries
/// and never rolls back state committed before the failure.
#[derive(Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// A derivation read an atom that is already being computed on the
    /// current call stack.
    #[display("detect cyclic dependency")]
    Cycle,
    /// `get` was called on a command that exposes no read derivation.
    #[display("command has no read derivation")]
    Unreadable,
    /// A state atom created with [`state_uninit`](crate::state_uninit) was
    /// read before any write.
    #[display("state read before initialization")]
    Uninitialized,
    /// The asynchronous invocation this context belongs to was superseded by
    /// a newer one; its result will be discarded.
    #[display("invocation superseded by a newer one")]
    Aborted,
}

impl std::error::Error for StoreError {}
