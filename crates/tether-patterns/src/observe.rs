//! Observer fan-out over weak handles.

use log::trace;
use tether_mem::{Shared, Weak};

/// A set of observers held by weak handles.
///
/// Attaching never extends an observer's lifetime; an observer that is
/// dropped elsewhere simply stops receiving notifications. Expired
/// entries are pruned during [`notify`][ObserverSet::notify], in the
/// same pass that visits the live ones.
///
/// # Example
///
/// ```
/// use tether_mem::Shared;
/// use tether_patterns::ObserverSet;
///
/// let mut observers: ObserverSet<String> = ObserverSet::new();
/// let alpha = Shared::new("alpha".to_string());
/// let beta = Shared::new("beta".to_string());
/// observers.attach(&alpha);
/// observers.attach(&beta);
///
/// drop(beta);
/// let mut seen = Vec::new();
/// let live = observers.notify(|name| seen.push(name.clone()));
/// assert_eq!(live, 1);
/// assert_eq!(seen, vec!["alpha".to_string()]);
/// ```
pub struct ObserverSet<T: ?Sized> {
    observers: Vec<Weak<T>>,
}

impl<T: ?Sized> ObserverSet<T> {
    /// Create an empty observer set.
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Register an observer without taking ownership of it.
    pub fn attach(&mut self, observer: &Shared<T>) {
        self.observers.push(Shared::downgrade(observer));
    }

    /// Visit every still-live observer and prune the expired ones.
    /// Returns the number of live observers visited.
    ///
    /// Each observer is promoted for the duration of its visit, so a
    /// concurrent final drop elsewhere cannot release it mid-callback.
    pub fn notify(&mut self, mut each: impl FnMut(&T)) -> usize {
        self.observers.retain(|weak| match weak.upgrade() {
            Some(live) => {
                each(&live);
                true
            }
            None => {
                trace!("pruning expired observer");
                false
            }
        });
        self.observers.len()
    }

    /// Number of registered observers, live or expired.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
