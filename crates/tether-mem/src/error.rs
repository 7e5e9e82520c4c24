//! Error taxonomy for the ownership primitives.

use thiserror::Error;

/// Errors surfaced by the fallible construction and self-reference paths.
///
/// Everything here is local and deterministic: there is no transient
/// failure class and nothing is ever retried. Expired weak promotion is
/// deliberately *not* an error; it returns `None` by contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    /// Heap allocation for a resource or its control block failed.
    ///
    /// Only the `try_` construction paths report this; the default
    /// constructors treat allocation failure as fatal.
    #[error("allocation of {size} bytes failed")]
    AllocationFailed {
        /// Size of the allocation that was refused.
        size: usize,
    },

    /// A self-reference was requested from an object that was never
    /// constructed through a managed path, or whose teardown has
    /// already begun. This is a caller contract violation; it never
    /// silently produces a dangling handle.
    #[error("self-reference requested on an unmanaged object")]
    UnmanagedSelfReference,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_failure_reports_size() {
        let err = MemError::AllocationFailed { size: 64 };
        assert_eq!(err.to_string(), "allocation of 64 bytes failed");
    }
}
