//! Shared ownership over an explicit control block.

use std::alloc::handle_alloc_error;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::control::{BoxOwner, Header, InlineOwner, PolicyOwner};
use crate::error::MemError;
use crate::reclaim::Reclaim;
use crate::self_ref::SelfReferential;
use crate::weak::Weak;

/// One of potentially many co-owners of a resource.
///
/// Every copy increments the control block's strong count; every drop
/// decrements it. The drop that takes the count to zero runs the release
/// action synchronously on its own thread, exactly once. The count
/// mutations are atomic, so handles may be copied, dropped, and promoted
/// from independent threads without external locking — the *payload* is
/// a different story: the primitive never synchronizes access to it.
///
/// A `Shared` is a (data pointer, control-block pointer) pair. The two
/// usually point into the same allocation, but aliasing handles
/// ([`Shared::alias`]) and adopted resources ([`Shared::from_box`])
/// separate them.
///
/// # Example
///
/// ```
/// use tether_mem::Shared;
///
/// let first = Shared::new(String::from("co-owned"));
/// let second = first.clone();
/// assert_eq!(Shared::strong_count(&first), 2);
/// drop(first);
/// assert_eq!(&*second, "co-owned");
/// ```
///
/// # Cycles
///
/// Two resources that hold `Shared` handles to each other keep each
/// other's strong count at one forever; neither release action ever
/// runs. Back-references in cyclic shapes must be [`Weak`] — the
/// observing edge never contributes to the strong count, so scope exit
/// tears the structure down in dependency order.
pub struct Shared<T: ?Sized> {
    ptr: NonNull<T>,
    header: NonNull<Header>,
    _marker: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Allocate a resource with shared ownership.
    ///
    /// Counts and resource storage live in a single allocation.
    /// Allocation failure is fatal; use [`try_new`][Shared::try_new]
    /// for a recoverable variant.
    pub fn new(value: T) -> Self {
        let (header, ptr) = InlineOwner::allocate(value)
            .unwrap_or_else(|| handle_alloc_error(InlineOwner::<T>::layout()));
        unsafe { Self::from_parts(ptr, header) }
    }

    /// Fallible variant of [`new`][Shared::new]. If the allocation is
    /// refused, `value` is dropped and an error is returned.
    pub fn try_new(value: T) -> Result<Self, MemError> {
        match InlineOwner::allocate(value) {
            Some((header, ptr)) => Ok(unsafe { Self::from_parts(ptr, header) }),
            None => Err(MemError::AllocationFailed {
                size: InlineOwner::<T>::layout().size(),
            }),
        }
    }

    /// Allocate a resource with a custom release action, run when the
    /// strong count hits zero.
    ///
    /// The policy may run on whichever thread drops last, so it must be
    /// `Send + Sync + 'static`.
    pub fn with_reclaim<R>(value: T, policy: R) -> Self
    where
        R: Reclaim<T> + Send + Sync + 'static,
    {
        let (header, ptr) = PolicyOwner::allocate(value, policy)
            .unwrap_or_else(|| handle_alloc_error(PolicyOwner::<T, R>::layout()));
        unsafe { Self::from_parts(ptr, header) }
    }

    /// Managed construction for resources that need a handle to
    /// themselves: the closure receives a weak handle to the resource
    /// being built. Promotion inside the closure reports expired, since
    /// the strong count only leaves zero once construction finishes.
    ///
    /// # Example
    ///
    /// ```
    /// use tether_mem::{Shared, Weak};
    ///
    /// struct Node {
    ///     me: Weak<Node>,
    /// }
    ///
    /// let node = Shared::new_cyclic(|me| Node { me: me.clone() });
    /// assert!(Shared::ptr_eq(&node.me.upgrade().unwrap(), &node));
    /// ```
    pub fn new_cyclic(data_fn: impl FnOnce(&Weak<T>) -> T) -> Self {
        let (header, ptr) = InlineOwner::<T>::allocate_empty()
            .unwrap_or_else(|| handle_alloc_error(InlineOwner::<T>::layout()));
        unsafe {
            // If `data_fn` unwinds, dropping this weak handle frees the
            // block; the release action never runs because the strong
            // count never left zero and the slot was never written.
            let weak = Weak::from_parts(ptr, header);
            let value = data_fn(&weak);
            ptr.as_ptr().write(value);
            header.as_ref().strong.store(1, Ordering::Release);
            // The weak count stays at one: it becomes the implicit
            // count held by the strong side.
            mem::forget(weak);
            Self::from_parts(ptr, header)
        }
    }

    /// Managed construction that pre-registers the control block in the
    /// resource's embedded [`SelfRef`][crate::SelfRef] slot, so the
    /// resource can hand out co-owning handles to itself later.
    pub fn new_bound(value: T) -> Self
    where
        T: SelfReferential,
    {
        let this = Self::new(value);
        this.self_ref().bind(Self::downgrade(&this));
        this
    }
}

impl<T: ?Sized> Shared<T> {
    /// Adopt an already-boxed resource: the two-allocation form, for
    /// resources obtained elsewhere. The box is freed when the strong
    /// count hits zero; the control block survives until the weak count
    /// follows.
    ///
    /// Like [`Unique::from_box`][crate::Unique::from_box], this is the
    /// polymorphic path: a `Shared<dyn Trait>` releases the concrete
    /// type through its vtable.
    pub fn from_box(boxed: Box<T>) -> Self {
        let (header, ptr) = BoxOwner::adopt(boxed);
        unsafe { Self::from_parts(ptr, header) }
    }

    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, header: NonNull<Header>) -> Self {
        Self {
            ptr,
            header,
            _marker: PhantomData,
        }
    }

    /// Create a non-owning observer of this resource.
    pub fn downgrade(this: &Self) -> Weak<T> {
        unsafe {
            // Guarded: a concurrent get_mut may hold the weak count
            // locked while it checks for uniqueness.
            this.header.as_ref().incr_weak_guarded();
            Weak::from_parts(this.ptr, this.header)
        }
    }

    /// Current strong count. Advisory only: under concurrent mutation
    /// this is a snapshot, not a synchronization point.
    pub fn strong_count(this: &Self) -> usize {
        unsafe { this.header.as_ref() }.strong.load(Ordering::Relaxed)
    }

    /// Current number of live weak handles. Advisory, like
    /// [`strong_count`][Shared::strong_count].
    pub fn weak_count(this: &Self) -> usize {
        // The strong side holds one implicit weak count; don't report it.
        unsafe { this.header.as_ref() }.weak_count() - 1
    }

    /// Construct a handle that co-owns the same control block but
    /// dereferences to a location projected out of the resource — a
    /// field, an element, a slice. The aliasing handle contributes to
    /// the strong count like any other, so it alone keeps the whole
    /// resource alive.
    ///
    /// `T: 'static` keeps this sound: a projection out of a
    /// borrow-carrying resource could otherwise smuggle a short-lived
    /// reference into a handle with no lifetime to pin it.
    ///
    /// # Example
    ///
    /// ```
    /// use tether_mem::Shared;
    ///
    /// struct Widget { id: u32, name: String }
    ///
    /// let widget = Shared::new(Widget { id: 7, name: "alias".into() });
    /// let id = Shared::alias(&widget, |w| &w.id);
    /// drop(widget);
    /// assert_eq!(*id, 7); // the Widget is still alive
    /// ```
    pub fn alias<U: ?Sized, F>(this: &Self, project: F) -> Shared<U>
    where
        T: 'static,
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let projected = NonNull::from(project(&**this));
        unsafe {
            this.header.as_ref().incr_strong();
            Shared::from_parts(projected, this.header)
        }
    }

    /// In-place mutable access, granted only when this handle is
    /// provably the sole one: strong count one and no weak observers.
    ///
    /// The weak count is held locked while the strong count is checked,
    /// so a concurrent `downgrade` through another handle cannot slip
    /// between the two observations and invalidate the result.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if unsafe { this.header.as_ref() }.is_unique() {
            Some(unsafe { this.ptr.as_mut() })
        } else {
            None
        }
    }

    /// Whether two handles dereference to the same location. Aliased
    /// handles to different fields of one resource compare unequal here
    /// even though they share a control block.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        std::ptr::eq(a.ptr.as_ptr(), b.ptr.as_ptr())
    }

    /// Whether two handles co-own the same control block (and therefore
    /// the same resource lifetime), regardless of where they point.
    pub fn same_control_block<U: ?Sized>(a: &Self, b: &Shared<U>) -> bool {
        a.header == b.header
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    /// Add a co-owner, incrementing the strong count.
    #[inline]
    fn clone(&self) -> Self {
        unsafe {
            self.header.as_ref().incr_strong();
            Self::from_parts(self.ptr, self.header)
        }
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        unsafe { Header::release_strong(self.header) }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("value", &&**self)
            .field("strong_count", &Self::strong_count(self))
            .finish()
    }
}

impl<T: ?Sized + PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: ?Sized + Eq> Eq for Shared<T> {}

unsafe impl<T: ?Sized + Send + Sync> Send for Shared<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Shared<T> {}
