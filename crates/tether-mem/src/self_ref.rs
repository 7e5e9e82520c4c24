//! Self-referential handle issuance.
//!
//! A resource that hands out co-owning handles to itself from its own
//! methods must know its control block. Wrapping `self` in a fresh
//! `Shared` instead would create a second control block over the same
//! memory and a double release. The [`SelfRef`] slot carries the
//! back-reference; the managed constructor
//! [`Shared::new_bound`][crate::Shared::new_bound] populates it before
//! the resource is ever reachable.

use std::fmt;
use std::sync::OnceLock;

use crate::error::MemError;
use crate::shared::Shared;
use crate::weak::Weak;

/// Marks a resource type as able to issue handles to itself.
///
/// Implementors embed a [`SelfRef`] and point the accessor at it:
///
/// ```
/// use tether_mem::{SelfRef, SelfReferential, Shared};
///
/// #[derive(Default)]
/// struct Job {
///     self_ref: SelfRef<Job>,
/// }
///
/// impl SelfReferential for Job {
///     fn self_ref(&self) -> &SelfRef<Job> {
///         &self.self_ref
///     }
/// }
///
/// let job = Shared::new_bound(Job::default());
/// let again = job.self_ref().shared().unwrap();
/// assert_eq!(Shared::strong_count(&job), 2);
/// ```
pub trait SelfReferential {
    /// The embedded back-reference slot.
    fn self_ref(&self) -> &SelfRef<Self>;
}

/// Embeddable slot holding a resource's back-reference to its own
/// control block.
///
/// The slot starts unbound; only a managed construction path
/// ([`Shared::new_bound`][crate::Shared::new_bound]) binds it. Asking an
/// unbound slot for a handle is a caller error and reports
/// [`MemError::UnmanagedSelfReference`] — constructing such a resource
/// on the stack or via a plain [`Unique`][crate::Unique] is exactly the
/// "unmanaged self-reference" misuse.
///
/// The slot holds a weak handle, so it never contributes to the strong
/// count: a resource pointing at itself is not a leak.
pub struct SelfRef<T: ?Sized> {
    slot: OnceLock<Weak<T>>,
}

impl<T: ?Sized> SelfRef<T> {
    /// A fresh, unbound slot.
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Whether a managed construction path has bound this slot.
    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Issue a co-owning handle to the resource holding this slot.
    ///
    /// Fails with [`MemError::UnmanagedSelfReference`] if the slot was
    /// never bound, or if the resource's teardown has already begun (a
    /// release action asking for a handle to the resource being
    /// released cannot be honored).
    pub fn shared(&self) -> Result<Shared<T>, MemError> {
        let live = self.slot.get().and_then(|weak| weak.upgrade());
        if live.is_none() {
            log::debug!("self-reference requested on an unmanaged or expiring object");
        }
        live.ok_or(MemError::UnmanagedSelfReference)
    }

    /// Issue a non-owning observer of the resource holding this slot.
    pub fn weak(&self) -> Result<Weak<T>, MemError> {
        self.slot
            .get()
            .cloned()
            .ok_or(MemError::UnmanagedSelfReference)
    }

    pub(crate) fn bind(&self, weak: Weak<T>) {
        // First bind wins; rebinding a slot is a no-op by construction
        // since only managed constructors call this, once.
        let _ = self.slot.set(weak);
    }
}

impl<T: ?Sized> Default for SelfRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for SelfRef<T> {
    /// Cloning a resource does not clone its identity: the copy starts
    /// unbound and must go through a managed constructor itself.
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("bound", &self.is_bound())
            .finish()
    }
}
