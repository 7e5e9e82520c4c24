//! Exclusive ownership.

use std::alloc::{alloc, dealloc, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::error::MemError;
use crate::reclaim::{DropInPlace, Reclaim};

/// Sole owner of one heap-resident resource.
///
/// A `Unique` is never empty: transferring ownership is an ordinary Rust
/// move, so use-after-transfer is a compile error rather than a runtime
/// one, and every live handle can be dereferenced unconditionally. The
/// release policy `R` runs exactly once, synchronously, when the handle
/// is dropped or [`reset`][Unique::reset].
///
/// # Example
///
/// ```
/// use tether_mem::Unique;
///
/// let original = Unique::new(vec![1, 2, 3]);
/// let transferred = original; // move; `original` is gone
/// assert_eq!(transferred.len(), 3);
/// ```
pub struct Unique<T: ?Sized, R: Reclaim<T> = DropInPlace> {
    ptr: NonNull<T>,
    policy: ManuallyDrop<R>,
    _marker: PhantomData<T>,
}

impl<T> Unique<T> {
    /// Allocate a resource and take sole ownership of it.
    ///
    /// Allocation failure is fatal (the global allocator's error hook
    /// runs); use [`try_new`][Unique::try_new] for a recoverable variant.
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Fallible variant of [`new`][Unique::new].
    ///
    /// If the allocation is refused, `value` is dropped and
    /// [`MemError::AllocationFailed`] is returned.
    pub fn try_new(value: T) -> Result<Self, MemError> {
        let layout = Layout::new::<T>();
        if layout.size() == 0 {
            return Ok(Self::new(value));
        }
        unsafe {
            let Some(ptr) = NonNull::new(alloc(layout).cast::<T>()) else {
                return Err(MemError::AllocationFailed { size: layout.size() });
            };
            ptr.as_ptr().write(value);
            Ok(Self::from_parts(ptr, DropInPlace))
        }
    }
}

impl<T, R: Reclaim<T>> Unique<T, R> {
    /// Allocate a resource with a custom release policy.
    pub fn with_reclaim(value: T, policy: R) -> Self {
        let ptr = Box::into_raw(Box::new(value));
        unsafe { Self::from_parts(NonNull::new_unchecked(ptr), policy) }
    }

    /// Destroy the currently-owned resource through the release policy,
    /// synchronously, then take ownership of the replacement. The heap
    /// slot is reused.
    pub fn reset(&mut self, value: T) {
        unsafe {
            self.policy.reclaim(self.ptr);
            self.ptr.as_ptr().write(value);
        }
    }

    /// Relinquish ownership without destroying, returning the resource.
    ///
    /// The release policy does **not** run; the policy itself is dropped.
    pub fn into_inner(self) -> T {
        let mut this = ManuallyDrop::new(self);
        unsafe {
            let value = this.ptr.as_ptr().read();
            ManuallyDrop::drop(&mut this.policy);
            let layout = Layout::new::<T>();
            if layout.size() != 0 {
                dealloc(this.ptr.as_ptr().cast(), layout);
            }
            value
        }
    }
}

impl<T: ?Sized> Unique<T> {
    /// Adopt an already-boxed resource.
    ///
    /// This is the polymorphic-construction path: a
    /// `Unique<dyn Trait>` built from a boxed concrete type releases the
    /// concrete type's full teardown sequence through its vtable.
    ///
    /// # Example
    ///
    /// ```
    /// use tether_mem::Unique;
    ///
    /// trait Shape { fn sides(&self) -> u32; }
    /// struct Square;
    /// impl Shape for Square { fn sides(&self) -> u32 { 4 } }
    ///
    /// let shape: Unique<dyn Shape> = Unique::from_box(Box::new(Square));
    /// assert_eq!(shape.sides(), 4);
    /// ```
    pub fn from_box(boxed: Box<T>) -> Self {
        unsafe { Self::from_parts(NonNull::new_unchecked(Box::into_raw(boxed)), DropInPlace) }
    }

    /// Convert back into a plain box, keeping the default release
    /// behavior but giving up the handle type.
    pub fn into_box(self) -> Box<T> {
        let this = ManuallyDrop::new(self);
        // DropInPlace carries no state, so skipping its drop is fine.
        unsafe { Box::from_raw(this.ptr.as_ptr()) }
    }
}

impl<T: ?Sized, R: Reclaim<T>> Unique<T, R> {
    unsafe fn from_parts(ptr: NonNull<T>, policy: R) -> Self {
        Self {
            ptr,
            policy: ManuallyDrop::new(policy),
            _marker: PhantomData,
        }
    }

    /// Assume ownership of a raw resource pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live resource in an allocation made by the
    /// global allocator with the layout of its pointee, and nothing else
    /// may own or free it afterwards.
    pub unsafe fn from_raw(ptr: NonNull<T>, policy: R) -> Self {
        Self::from_parts(ptr, policy)
    }

    /// Relinquish ownership of the raw resource pointer and the policy.
    /// The caller becomes responsible for the teardown and the
    /// allocation.
    pub fn into_raw(self) -> (NonNull<T>, R) {
        let mut this = ManuallyDrop::new(self);
        let policy = unsafe { ManuallyDrop::take(&mut this.policy) };
        (this.ptr, policy)
    }

    /// Get a shared reference to the resource.
    #[inline]
    pub fn get(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }

    /// Get a mutable reference to the resource. No bookkeeping is
    /// needed: exclusive ownership is guaranteed by the type.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }

    /// Raw pointer to the resource, without giving up ownership.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }
}

impl<T: ?Sized, R: Reclaim<T>> Drop for Unique<T, R> {
    fn drop(&mut self) {
        unsafe {
            // Layout is computed before teardown while the pointee
            // metadata is still meaningful.
            let layout = Layout::for_value(self.ptr.as_ref());
            log::trace!("releasing exclusively owned resource {:p}", self.ptr);
            self.policy.reclaim(self.ptr);
            ManuallyDrop::drop(&mut self.policy);
            if layout.size() != 0 {
                dealloc(self.ptr.as_ptr().cast(), layout);
            }
        }
    }
}

impl<T: ?Sized, R: Reclaim<T>> Deref for Unique<T, R> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T: ?Sized, R: Reclaim<T>> DerefMut for Unique<T, R> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T: ?Sized + fmt::Debug, R: Reclaim<T>> fmt::Debug for Unique<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unique").field("value", &self.get()).finish()
    }
}

impl<T: ?Sized + PartialEq, R: Reclaim<T>> PartialEq for Unique<T, R> {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl<T: ?Sized + Eq, R: Reclaim<T>> Eq for Unique<T, R> {}

unsafe impl<T: ?Sized + Send, R: Reclaim<T> + Send> Send for Unique<T, R> {}
unsafe impl<T: ?Sized + Sync, R: Reclaim<T> + Sync> Sync for Unique<T, R> {}
