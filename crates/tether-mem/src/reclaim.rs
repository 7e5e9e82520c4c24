//! Release policies: how a handle tears down its resource.

use std::ptr::{self, NonNull};

/// A release action, invoked exactly once when the owning handle (or the
/// last co-owning handle) lets go of its resource.
///
/// Implementations tear the resource down *in place* — run its
/// destructor, close its descriptor, hand it back to a pool — and must
/// not free the allocation holding it; the handle does that afterwards.
/// Implementations must not unwind.
pub trait Reclaim<T: ?Sized> {
    /// Tear down the resource behind `resource`.
    ///
    /// # Safety
    ///
    /// `resource` points to a live, initialized resource that no other
    /// code will touch again. The implementation must leave the pointee
    /// logically dead: its destructor must not run a second time.
    unsafe fn reclaim(&mut self, resource: NonNull<T>);
}

/// Default policy: run the resource's own destructor.
///
/// Dynamically-typed resources (`dyn Trait`) are torn down through their
/// vtable, so the concrete type's full teardown sequence runs even when
/// the handle only knows the base capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropInPlace;

impl<T: ?Sized> Reclaim<T> for DropInPlace {
    #[inline]
    unsafe fn reclaim(&mut self, resource: NonNull<T>) {
        ptr::drop_in_place(resource.as_ptr());
    }
}

/// Adapter turning a closure into a release policy, for non-memory
/// resources such as file handles or foreign objects.
///
/// The closure takes over the *full* teardown: if the resource's own
/// destructor still needs to run, the closure must run it (typically
/// via [`std::ptr::drop_in_place`]) in addition to its own cleanup.
///
/// # Example
///
/// ```
/// use std::ptr::{self, NonNull};
/// use tether_mem::{ReclaimFn, Unique};
///
/// let logged = Unique::with_reclaim(
///     String::from("transient"),
///     ReclaimFn(|resource: NonNull<String>| unsafe {
///         // side effects first, then the destructor
///         ptr::drop_in_place(resource.as_ptr());
///     }),
/// );
/// assert_eq!(&**logged, "transient");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ReclaimFn<F>(pub F);

impl<T: ?Sized, F: FnMut(NonNull<T>)> Reclaim<T> for ReclaimFn<F> {
    #[inline]
    unsafe fn reclaim(&mut self, resource: NonNull<T>) {
        (self.0)(resource);
    }
}
