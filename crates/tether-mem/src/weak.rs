//! Non-owning observation and cycle prevention.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::control::Header;
use crate::shared::Shared;

/// A non-owning observer of a shared resource.
///
/// Weak handles increment only the control block's weak count, so they
/// never keep the resource alive — they keep the *control block* alive,
/// which is what lets an observer report "expired" instead of dangling
/// after the last owner is gone. The only route to the resource is
/// [`upgrade`][Weak::upgrade].
///
/// Any back-reference in a cyclic relationship must be a `Weak`, not a
/// [`Shared`]; see the cycle discussion on [`Shared`].
///
/// # Example
///
/// ```
/// use tether_mem::Shared;
///
/// let owner = Shared::new(5);
/// let observer = Shared::downgrade(&owner);
///
/// assert_eq!(*observer.upgrade().unwrap(), 5);
/// drop(owner);
/// assert!(observer.expired());
/// assert!(observer.upgrade().is_none());
/// ```
pub struct Weak<T: ?Sized> {
    ptr: NonNull<T>,
    header: NonNull<Header>,
}

impl<T: ?Sized> Weak<T> {
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, header: NonNull<Header>) -> Self {
        Self { ptr, header }
    }

    /// Attempt to promote this observer to a co-owner.
    ///
    /// Succeeds only while the strong count is above zero; the check and
    /// the increment are one atomic step, so a promotion racing against
    /// the final drop on another thread either gets a fully live owner
    /// or `None` — never a handle to a released resource.
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let header = unsafe { self.header.as_ref() };
        if header.try_promote() {
            Some(unsafe { Shared::from_parts(self.ptr, self.header) })
        } else {
            None
        }
    }

    /// Whether the observed resource has been released. Advisory
    /// snapshot: under concurrent drops prefer acting on the result of
    /// [`upgrade`][Weak::upgrade] instead.
    pub fn expired(&self) -> bool {
        self.strong_count() == 0
    }

    /// Current strong count of the observed resource. Advisory.
    pub fn strong_count(&self) -> usize {
        unsafe { self.header.as_ref() }.strong.load(Ordering::Relaxed)
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    /// Add another observer, incrementing the weak count only.
    fn clone(&self) -> Self {
        unsafe {
            self.header.as_ref().incr_weak();
            Self::from_parts(self.ptr, self.header)
        }
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        // Frees the control block if this was the last count of either
        // kind; the resource itself was released earlier, when the
        // strong count hit zero.
        unsafe { Header::release_weak(self.header) }
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}

unsafe impl<T: ?Sized + Send + Sync> Send for Weak<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Weak<T> {}
