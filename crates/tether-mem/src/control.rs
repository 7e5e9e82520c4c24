//! Control block internals shared by `Shared` and `Weak`.
//!
//! One control block exists per shared-managed resource. It carries the
//! strong and weak counts plus two type-erased actions bound at
//! construction time: `destroy` releases the resource when the strong
//! count hits zero, `dealloc` frees the block itself when the weak count
//! does. Binding the actions to the concrete resource type up front is
//! what makes release through a base-capability handle run the concrete
//! type's full teardown.

use std::alloc::{alloc, dealloc, Layout};
use std::hint;
use std::mem::ManuallyDrop;
use std::process::abort;
use std::ptr::{self, addr_of_mut, NonNull};
use std::sync::atomic::{fence, AtomicUsize, Ordering};

use crate::reclaim::Reclaim;

/// Counts beyond this are treated as runaway leaks; the process aborts
/// before the counter can overflow and cause a premature release.
pub(crate) const MAX_COUNT: usize = isize::MAX as usize;

/// Sentinel parked in the weak count while a uniqueness check runs.
/// Distinguishable from every real count, which is capped at
/// [`MAX_COUNT`].
const WEAK_LOCKED: usize = usize::MAX;

/// Shared bookkeeping record for one resource.
///
/// The strong side collectively holds one implicit weak count, so the
/// block stays allocated until both the last strong and the last weak
/// handle are gone. Layout note: every owner struct below puts the
/// header first (`repr(C)`), so a header pointer can be cast back to
/// the concrete owner inside the erased actions.
#[repr(C)]
pub(crate) struct Header {
    pub(crate) strong: AtomicUsize,
    pub(crate) weak: AtomicUsize,
    destroy: unsafe fn(*mut Header),
    dealloc: unsafe fn(*mut Header),
}

impl Header {
    fn with_counts(
        strong: usize,
        destroy: unsafe fn(*mut Header),
        dealloc: unsafe fn(*mut Header),
    ) -> Self {
        Self {
            strong: AtomicUsize::new(strong),
            // The implicit weak count held by the strong handles.
            weak: AtomicUsize::new(1),
            destroy,
            dealloc,
        }
    }

    /// Add a co-owner. Relaxed suffices: the caller already holds a
    /// strong count, so the resource cannot be released concurrently.
    pub(crate) fn incr_strong(&self) {
        if self.strong.fetch_add(1, Ordering::Relaxed) > MAX_COUNT {
            abort();
        }
    }

    /// Add a weak observer by cloning an existing weak handle. The
    /// caller's handle keeps the count at two or more, so the locked
    /// sentinel (which requires a count of exactly one) is unreachable
    /// here and a plain increment suffices.
    pub(crate) fn incr_weak(&self) {
        if self.weak.fetch_add(1, Ordering::Relaxed) > MAX_COUNT {
            abort();
        }
    }

    /// Add a weak observer from a strong handle. Unlike
    /// [`incr_weak`][Header::incr_weak], the count may be parked at the
    /// locked sentinel by a concurrent uniqueness check; spin until it
    /// is released, then increment atomically.
    pub(crate) fn incr_weak_guarded(&self) {
        let mut current = self.weak.load(Ordering::Relaxed);
        loop {
            if current == WEAK_LOCKED {
                hint::spin_loop();
                current = self.weak.load(Ordering::Relaxed);
                continue;
            }
            if current > MAX_COUNT {
                abort();
            }
            match self.weak.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Whether the caller's strong handle is provably the only handle of
    /// either kind.
    ///
    /// The weak count is parked at the locked sentinel for the duration
    /// of the strong-count check, so a concurrent `downgrade` on another
    /// handle cannot slip in between the two observations: either it
    /// lands before the lock (the lock then fails) or it spins until the
    /// check has finished. Locking succeeds only from a weak count of
    /// one — the implicit count held by the strong side — which already
    /// proves no weak handle exists.
    pub(crate) fn is_unique(&self) -> bool {
        if self
            .weak
            .compare_exchange(1, WEAK_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let unique = self.strong.load(Ordering::Acquire) == 1;
            self.weak.store(1, Ordering::Release);
            unique
        } else {
            false
        }
    }

    /// Snapshot of the weak count that reads the locked sentinel as the
    /// value it stands in for.
    pub(crate) fn weak_count(&self) -> usize {
        let count = self.weak.load(Ordering::Relaxed);
        if count == WEAK_LOCKED {
            // Locked implies exactly the implicit count was present.
            1
        } else {
            count
        }
    }

    /// Check-and-increment for weak promotion. Returns `false` if the
    /// strong count was zero. The compare-exchange makes the observation
    /// and the increment one atomic step, so a racing final drop on
    /// another thread can never be handed out as a live owner.
    pub(crate) fn try_promote(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            if current > MAX_COUNT {
                abort();
            }
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drop one strong count. Whichever thread observes the transition
    /// to zero runs the release action synchronously, then gives up the
    /// implicit weak count.
    ///
    /// Release/Acquire pairing follows the standard-library discipline:
    /// the Release decrement publishes all prior writes through the
    /// handle; the Acquire fence makes them visible to the thread that
    /// runs the teardown.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header and the caller must own one
    /// strong count, which it relinquishes.
    pub(crate) unsafe fn release_strong(this: NonNull<Header>) {
        if this.as_ref().strong.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        log::trace!("strong count hit zero; releasing resource of block {:p}", this);
        (this.as_ref().destroy)(this.as_ptr());
        Self::release_weak(this);
    }

    /// Drop one weak count, freeing the control block on the transition
    /// to zero.
    ///
    /// # Safety
    ///
    /// `this` must point to a live header and the caller must own one
    /// weak count, which it relinquishes.
    pub(crate) unsafe fn release_weak(this: NonNull<Header>) {
        if this.as_ref().weak.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        log::trace!("weak count hit zero; freeing control block {:p}", this);
        let free = this.as_ref().dealloc;
        free(this.as_ptr());
    }
}

/// Frees an owner allocation of concrete type `O` given its header.
unsafe fn dealloc_block<O>(header: *mut Header) {
    dealloc(header.cast(), Layout::new::<O>());
}

// ---------------------------------------------------------------------------
// One-allocation owner: counts and resource storage in a single block.
// ---------------------------------------------------------------------------

#[repr(C)]
pub(crate) struct InlineOwner<T> {
    header: Header,
    value: ManuallyDrop<T>,
}

impl<T> InlineOwner<T> {
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    /// Allocates a block holding both counts and the resource. Returns
    /// `None` if the allocation fails, dropping `value` in the process.
    pub(crate) fn allocate(value: T) -> Option<(NonNull<Header>, NonNull<T>)> {
        unsafe {
            let raw = NonNull::new(alloc(Self::layout()).cast::<Self>())?;
            raw.as_ptr().write(Self {
                header: Header::with_counts(1, destroy_inline::<T>, dealloc_block::<Self>),
                value: ManuallyDrop::new(value),
            });
            Some(Self::split(raw))
        }
    }

    /// Allocates a block whose resource slot is left uninitialized and
    /// whose strong count starts at zero. The caller must write the
    /// value before letting the strong count leave zero; until then the
    /// release action is unreachable.
    pub(crate) fn allocate_empty() -> Option<(NonNull<Header>, NonNull<T>)> {
        unsafe {
            let raw = NonNull::new(alloc(Self::layout()).cast::<Self>())?;
            addr_of_mut!((*raw.as_ptr()).header).write(Header::with_counts(
                0,
                destroy_inline::<T>,
                dealloc_block::<Self>,
            ));
            Some(Self::split(raw))
        }
    }

    unsafe fn split(raw: NonNull<Self>) -> (NonNull<Header>, NonNull<T>) {
        let header = NonNull::new_unchecked(addr_of_mut!((*raw.as_ptr()).header));
        let value = NonNull::new_unchecked(addr_of_mut!((*raw.as_ptr()).value).cast::<T>());
        (header, value)
    }
}

unsafe fn destroy_inline<T>(header: *mut Header) {
    let owner = header.cast::<InlineOwner<T>>();
    ptr::drop_in_place(addr_of_mut!((*owner).value).cast::<T>());
}

// ---------------------------------------------------------------------------
// One-allocation owner with a custom release policy.
// ---------------------------------------------------------------------------

#[repr(C)]
pub(crate) struct PolicyOwner<T, R: Reclaim<T>> {
    header: Header,
    policy: ManuallyDrop<R>,
    value: ManuallyDrop<T>,
}

impl<T, R: Reclaim<T>> PolicyOwner<T, R> {
    pub(crate) fn layout() -> Layout {
        Layout::new::<Self>()
    }

    pub(crate) fn allocate(value: T, policy: R) -> Option<(NonNull<Header>, NonNull<T>)> {
        unsafe {
            let raw = NonNull::new(alloc(Self::layout()).cast::<Self>())?;
            raw.as_ptr().write(Self {
                header: Header::with_counts(1, destroy_policy::<T, R>, dealloc_block::<Self>),
                policy: ManuallyDrop::new(policy),
                value: ManuallyDrop::new(value),
            });
            let header = NonNull::new_unchecked(addr_of_mut!((*raw.as_ptr()).header));
            let value = NonNull::new_unchecked(addr_of_mut!((*raw.as_ptr()).value).cast::<T>());
            Some((header, value))
        }
    }
}

unsafe fn destroy_policy<T, R: Reclaim<T>>(header: *mut Header) {
    let owner = header.cast::<PolicyOwner<T, R>>();
    let value = NonNull::new_unchecked(addr_of_mut!((*owner).value).cast::<T>());
    let policy = addr_of_mut!((*owner).policy).cast::<R>();
    (*policy).reclaim(value);
    ptr::drop_in_place(policy);
}

// ---------------------------------------------------------------------------
// Two-allocation owner: adopts a resource allocated elsewhere. The box is
// freed when the strong count hits zero; the control block lives on until
// the weak count follows.
// ---------------------------------------------------------------------------

#[repr(C)]
pub(crate) struct BoxOwner<T: ?Sized> {
    header: Header,
    resource: NonNull<T>,
}

impl<T: ?Sized> BoxOwner<T> {
    /// Takes over a boxed resource. Aborts on control-block allocation
    /// failure (the resource allocation already succeeded, so there is
    /// no useful partial result to hand back).
    pub(crate) fn adopt(boxed: Box<T>) -> (NonNull<Header>, NonNull<T>) {
        let layout = Layout::new::<Self>();
        unsafe {
            let resource = NonNull::new_unchecked(Box::into_raw(boxed));
            let raw = alloc(layout).cast::<Self>();
            if raw.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            raw.write(Self {
                header: Header::with_counts(1, destroy_boxed::<T>, dealloc_block::<Self>),
                resource,
            });
            let header = NonNull::new_unchecked(addr_of_mut!((*raw).header));
            (header, resource)
        }
    }
}

unsafe fn destroy_boxed<T: ?Sized>(header: *mut Header) {
    let owner = header.cast::<BoxOwner<T>>();
    drop(Box::from_raw((*owner).resource.as_ptr()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_fails_at_zero() {
        let header = Header::with_counts(0, destroy_inline::<i32>, dealloc_block::<InlineOwner<i32>>);
        assert!(!header.try_promote());
        assert_eq!(header.strong.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_promote_increments_from_nonzero() {
        let header = Header::with_counts(2, destroy_inline::<i32>, dealloc_block::<InlineOwner<i32>>);
        assert!(header.try_promote());
        assert_eq!(header.strong.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_is_unique_restores_weak_count() {
        let header = Header::with_counts(1, destroy_inline::<i32>, dealloc_block::<InlineOwner<i32>>);
        assert!(header.is_unique());
        // The lock was released: the implicit count is back in place.
        assert_eq!(header.weak.load(Ordering::Relaxed), 1);
        assert_eq!(header.weak_count(), 1);
    }

    #[test]
    fn test_is_unique_refuses_with_observers_or_co_owners() {
        let observed =
            Header::with_counts(1, destroy_inline::<i32>, dealloc_block::<InlineOwner<i32>>);
        observed.incr_weak_guarded();
        assert!(!observed.is_unique());

        let co_owned =
            Header::with_counts(2, destroy_inline::<i32>, dealloc_block::<InlineOwner<i32>>);
        assert!(!co_owned.is_unique());
    }
}
