//! # Kernel Errors
//!
//! Every fallible kernel operation returns [`KernelResult`]. Errors are
//! reported to the caller of the failing operation; the kernel never retries
//! internally and never halts on them.

use thiserror::Error;

/// Errors returned by kernel operations and delivered to woken waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    /// A blocking wait exceeded its bound, or a `NoWait` request could not
    /// be satisfied immediately.
    #[error("wait timed out")]
    Timeout,

    /// A mutex was released by a thread that does not own it.
    #[error("mutex is owned by another thread")]
    NotOwner,

    /// The awaited resource was deleted while the thread was blocked on it.
    #[error("resource deleted while waiting")]
    ResourceDeleted,

    /// The operation is not valid in the object's current state, e.g.
    /// starting a thread twice, releasing an unlocked mutex, or blocking
    /// while holding the critical section.
    #[error("operation invalid in current state")]
    InvalidState,

    /// No TCB slot, table entry or stack block is available.
    #[error("kernel resources exhausted")]
    Exhausted,

    /// The handle refers to an object that was deleted or reaped.
    #[error("stale or unknown handle")]
    InvalidHandle,

    /// An argument is out of range (priority, stack size).
    #[error("argument out of range")]
    InvalidArgument,

    /// A counter reached its limit (semaphore count, mutex recursion).
    #[error("counter limit reached")]
    Full,
}

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;
