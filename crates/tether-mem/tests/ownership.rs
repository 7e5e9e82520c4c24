//! Integration tests for the ownership primitives.
//!
//! Organized by handle kind, then by the cross-cutting scenarios:
//! - Exclusive ownership lifecycle
//! - Shared ownership counting and release
//! - Weak observation and promotion
//! - The cycle hazard and its weak-back-edge fix
//! - Aliasing handles
//! - Self-reference issuance
//! - Custom release policies (including a real file handle)
//! - Concurrent copy/drop and promote/drop races

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tether_mem::{MemError, ReclaimFn, SelfRef, SelfReferential, Shared, Unique, Weak};

/// Fixture resource that records how many times it has been released.
struct Tracked(Rc<Cell<u32>>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

fn tally() -> Rc<Cell<u32>> {
    Rc::new(Cell::new(0))
}

// =============================================================================
// EXCLUSIVE OWNERSHIP
// =============================================================================

mod unique_tests {
    use super::*;

    #[test]
    fn release_runs_exactly_once_at_scope_exit() {
        let drops = tally();
        {
            let handle = Unique::new(Tracked(drops.clone()));
            assert_eq!(drops.get(), 0);
            drop(handle);
            assert_eq!(drops.get(), 1);
        }
        // Scope exit after an explicit drop must not release again.
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn transfer_moves_without_releasing() {
        fn pass_through(handle: Unique<Tracked>) -> Unique<Tracked> {
            handle
        }

        let drops = tally();
        let original = Unique::new(Tracked(drops.clone()));
        let transferred = pass_through(original);
        assert_eq!(drops.get(), 0);
        drop(transferred);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn reset_releases_old_resource_synchronously() {
        let drops = tally();
        let mut handle = Unique::new(Tracked(drops.clone()));
        handle.reset(Tracked(drops.clone()));
        // The old resource went down inside reset, before it returned.
        assert_eq!(drops.get(), 1);
        drop(handle);
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn into_inner_returns_resource_without_releasing() {
        let drops = tally();
        let handle = Unique::new(Tracked(drops.clone()));
        let resource = handle.into_inner();
        assert_eq!(drops.get(), 0);
        drop(resource);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn try_new_succeeds_for_ordinary_sizes() {
        let handle = Unique::try_new([0_u8; 64]).unwrap();
        assert_eq!(handle.len(), 64);
    }

    #[test]
    fn polymorphic_release_runs_concrete_teardown() {
        trait Shape {
            fn name(&self) -> &'static str;
        }

        struct Circle(Rc<Cell<u32>>);
        impl Shape for Circle {
            fn name(&self) -> &'static str {
                "circle"
            }
        }
        impl Drop for Circle {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = tally();
        let shape: Unique<dyn Shape> = Unique::from_box(Box::new(Circle(drops.clone())));
        assert_eq!(shape.name(), "circle");
        drop(shape);
        assert_eq!(drops.get(), 1);
    }
}

// =============================================================================
// SHARED OWNERSHIP
// =============================================================================

mod shared_tests {
    use super::*;

    #[test]
    fn n_copies_release_on_final_drop() {
        let drops = tally();
        let original = Shared::new(Tracked(drops.clone()));
        let copies: Vec<_> = (0..5).map(|_| original.clone()).collect();

        drop(original);
        for copy in copies {
            assert_eq!(drops.get(), 0);
            drop(copy);
        }
        // The sixth (final) drop released the resource.
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn use_count_tracks_live_copies() {
        let original = Shared::new(0);
        let copies: Vec<_> = (0..3).map(|_| original.clone()).collect();
        assert_eq!(Shared::strong_count(&original), 4);
        drop(copies);
        assert_eq!(Shared::strong_count(&original), 1);
    }

    #[test]
    fn from_box_wraps_resource_obtained_elsewhere() {
        let drops = tally();
        let boxed = Box::new(Tracked(drops.clone()));
        let shared = Shared::from_box(boxed);
        let weak = Shared::downgrade(&shared);
        drop(shared);
        assert_eq!(drops.get(), 1);
        // The control block outlives the resource for the observer.
        assert!(weak.expired());
    }

    #[test]
    fn polymorphic_shared_release() {
        trait Shape {
            fn name(&self) -> &'static str;
        }

        struct Square(Rc<Cell<u32>>);
        impl Shape for Square {
            fn name(&self) -> &'static str {
                "square"
            }
        }
        impl Drop for Square {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = tally();
        let shape: Shared<dyn Shape> = Shared::from_box(Box::new(Square(drops.clone())));
        let copy = shape.clone();
        assert_eq!(copy.name(), "square");
        drop(shape);
        drop(copy);
        assert_eq!(drops.get(), 1);
    }
}

// =============================================================================
// WEAK OBSERVATION
// =============================================================================

mod weak_tests {
    use super::*;

    #[test]
    fn weak_reports_expired_after_all_owners_drop() {
        let drops = tally();
        let first = Shared::new(Tracked(drops.clone()));
        let second = first.clone();
        let observer = Shared::downgrade(&first);

        assert!(!observer.expired());
        drop(first);
        assert!(!observer.expired());
        drop(second);
        assert!(observer.expired());
        assert!(observer.upgrade().is_none());
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn promotion_co_owns_while_live() {
        let original = Shared::new("payload");
        let observer = Shared::downgrade(&original);
        let promoted = observer.upgrade().unwrap();
        assert_eq!(Shared::strong_count(&original), 2);
        assert_eq!(*promoted, "payload");
        drop(original);
        // The promoted handle alone keeps the resource alive.
        assert!(!observer.expired());
        drop(promoted);
        assert!(observer.expired());
    }

    #[test]
    fn many_observers_one_owner() {
        let owner = Shared::new(());
        let observers: Vec<_> = (0..10).map(|_| Shared::downgrade(&owner)).collect();
        assert_eq!(Shared::weak_count(&owner), 10);
        drop(owner);
        assert!(observers.iter().all(Weak::expired));
    }
}

// =============================================================================
// CYCLE HAZARD AND FIX
// =============================================================================

mod cycle_tests {
    use super::*;

    struct Node {
        drops: Rc<Cell<u32>>,
        next: RefCell<Option<Shared<Node>>>,
    }

    impl Node {
        fn new(drops: Rc<Cell<u32>>) -> Self {
            Self {
                drops,
                next: RefCell::new(None),
            }
        }
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn strong_cycle_never_releases() {
        let drops = tally();
        let recover;
        {
            let a = Shared::new(Node::new(drops.clone()));
            let b = Shared::new(Node::new(drops.clone()));
            *a.next.borrow_mut() = Some(b.clone());
            *b.next.borrow_mut() = Some(a.clone());
            recover = Shared::downgrade(&a);
        }
        // Both external handles are gone, yet each node keeps the
        // other's strong count at one: the documented permanent leak.
        assert_eq!(drops.get(), 0);
        assert!(!recover.expired());

        // Break the cycle by hand so the test itself does not leak.
        let a = recover.upgrade().unwrap();
        *a.next.borrow_mut() = None;
        drop(a);
        assert_eq!(drops.get(), 2);
    }

    struct Owner {
        log: Rc<RefCell<Vec<&'static str>>>,
        dependent: RefCell<Option<Shared<Dependent>>>,
    }

    struct Dependent {
        log: Rc<RefCell<Vec<&'static str>>>,
        owner: RefCell<Option<Weak<Owner>>>,
    }

    impl Drop for Owner {
        fn drop(&mut self) {
            self.log.borrow_mut().push("owner released");
        }
    }

    impl Drop for Dependent {
        fn drop(&mut self) {
            self.log.borrow_mut().push("dependent released");
        }
    }

    #[test]
    fn weak_back_edge_breaks_the_cycle() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let owner = Shared::new(Owner {
                log: log.clone(),
                dependent: RefCell::new(None),
            });
            let dependent = Shared::new(Dependent {
                log: log.clone(),
                owner: RefCell::new(None),
            });
            *owner.dependent.borrow_mut() = Some(dependent.clone());
            // The back-reference is an observing edge: it contributes
            // nothing to the owner's strong count.
            *dependent.owner.borrow_mut() = Some(Shared::downgrade(&owner));

            let back = dependent.owner.borrow();
            assert!(back.as_ref().unwrap().upgrade().is_some());
        }
        // Scope exit released both, the un-referenced owner first.
        assert_eq!(*log.borrow(), vec!["owner released", "dependent released"]);
    }
}

// =============================================================================
// ALIASING
// =============================================================================

mod alias_tests {
    use super::*;

    struct Widget {
        drops: Rc<Cell<u32>>,
        id: u32,
    }

    impl Drop for Widget {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn aliasing_handle_keeps_whole_resource_alive() {
        let drops = tally();
        let widget = Shared::new(Widget {
            drops: drops.clone(),
            id: 300,
        });
        let id: Shared<u32> = Shared::alias(&widget, |w| &w.id);
        let copy = widget.clone();

        drop(widget);
        drop(copy);
        // Every handle to the widget itself is gone, but the aliasing
        // handle still co-owns the control block.
        assert_eq!(drops.get(), 0);
        assert_eq!(*id, 300);

        drop(id);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn alias_counts_like_any_other_handle() {
        let data = Shared::new([1_u8, 2, 3]);
        let first = Shared::alias(&data, |a| &a[0]);
        assert_eq!(Shared::strong_count(&data), 2);
        assert_eq!(*first, 1);
        assert!(Shared::same_control_block(&data, &first));
        assert!(!Shared::ptr_eq(
            &first,
            &Shared::alias(&data, |a| &a[1])
        ));
    }
}

// =============================================================================
// SELF-REFERENCE
// =============================================================================

mod self_ref_tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Session {
        self_ref: SelfRef<Session>,
        hits: Cell<u32>,
    }

    impl Session {
        /// Hands out a co-owning handle from inside a method.
        fn handle(&self) -> Result<Shared<Session>, MemError> {
            self.self_ref.shared()
        }
    }

    impl SelfReferential for Session {
        fn self_ref(&self) -> &SelfRef<Session> {
            &self.self_ref
        }
    }

    #[test]
    fn managed_object_issues_handles_to_itself() {
        let session = Shared::new_bound(Session::default());
        session.hits.set(1);

        let other = session.handle().unwrap();
        other.hits.set(other.hits.get() + 1);
        assert_eq!(Shared::strong_count(&session), 2);
        assert_eq!(session.hits.get(), 2);
    }

    #[test]
    fn unmanaged_object_reports_contract_violation() {
        let on_stack = Session::default();
        assert_eq!(
            on_stack.handle().unwrap_err(),
            MemError::UnmanagedSelfReference
        );

        let exclusively_owned = Unique::new(Session::default());
        assert!(exclusively_owned.handle().is_err());
    }

    #[test]
    fn new_cyclic_weak_is_expired_during_construction() {
        struct Linked {
            me: Weak<Linked>,
        }

        let linked = Shared::new_cyclic(|me| {
            // The resource is not yet alive; promotion must refuse.
            assert!(me.upgrade().is_none());
            Linked { me: me.clone() }
        });
        // After construction the stored weak promotes normally.
        let promoted = linked.me.upgrade().unwrap();
        assert!(Shared::same_control_block(&linked, &promoted));
    }
}

// =============================================================================
// CUSTOM RELEASE POLICIES
// =============================================================================

mod reclaim_tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::ptr::{self, NonNull};

    #[test]
    fn file_handle_release_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let closed = Rc::new(Cell::new(false));

        let flag = closed.clone();
        let mut handle = Unique::with_reclaim(
            File::create(&path).unwrap(),
            ReclaimFn(move |resource: NonNull<File>| {
                unsafe {
                    (*resource.as_ptr()).sync_all().ok();
                    ptr::drop_in_place(resource.as_ptr());
                }
                flag.set(true);
            }),
        );

        writeln!(handle.get_mut(), "owned via release policy").unwrap();
        assert!(!closed.get());
        drop(handle);
        assert!(closed.get());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "owned via release policy\n");
    }

    #[test]
    fn shared_resource_with_custom_release() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let releases = Arc::new(AtomicU32::new(0));
        let seen = releases.clone();
        let shared = Shared::with_reclaim(
            7_u32,
            ReclaimFn(move |resource: NonNull<u32>| {
                seen.fetch_add(1, Ordering::SeqCst);
                unsafe { ptr::drop_in_place(resource.as_ptr()) };
            }),
        );
        let copy = shared.clone();
        drop(shared);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// CONCURRENCY
// =============================================================================

mod concurrency_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    struct Counted(Arc<AtomicU32>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn concurrent_copy_drop_stress() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2_000;

        let drops = Arc::new(AtomicU32::new(0));
        let original = Shared::new(Counted(drops.clone()));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let handle = original.clone();
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let copy = handle.clone();
                        drop(copy);
                    }
                    drop(handle);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // Only the original survives, and nothing was released early.
        assert_eq!(Shared::strong_count(&original), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(original);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn promotion_races_final_drop_without_dangling() {
        const UPGRADERS: usize = 4;

        let drops = Arc::new(AtomicU32::new(0));
        let original = Shared::new(Counted(drops.clone()));
        let barrier = Arc::new(Barrier::new(UPGRADERS + 1));

        let upgraders: Vec<_> = (0..UPGRADERS)
            .map(|_| {
                let weak = Shared::downgrade(&original);
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let mut promoted = 0_u64;
                    while let Some(live) = weak.upgrade() {
                        // A successful promotion is a fully live owner;
                        // the payload must still be un-released.
                        assert_eq!(live.0.load(Ordering::SeqCst), 0);
                        promoted += 1;
                        drop(live);
                    }
                    promoted
                })
            })
            .collect();

        barrier.wait();
        drop(original);

        for upgrader in upgraders {
            upgrader.join().unwrap();
        }
        // Exactly one release, on whichever thread saw the last count.
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_mut_refuses_while_another_handle_lives() {
        use std::sync::atomic::AtomicBool;

        const ROUNDS: usize = 50_000;

        let shared = Shared::new(0_u32);
        let mut mine = shared.clone();
        let stop = Arc::new(AtomicBool::new(false));

        // Cycles the other handle through every shape it can take
        // (strong, strong + weak, weak promoted back to strong) without
        // ever letting go of it entirely.
        let done = stop.clone();
        let cycler = thread::spawn(move || {
            let mut strong = shared;
            while !done.load(Ordering::Relaxed) {
                let weak = Shared::downgrade(&strong);
                drop(strong);
                strong = match weak.upgrade() {
                    Some(live) => live,
                    // Unreachable: the checker's handle keeps the
                    // resource alive for the whole run.
                    None => return,
                };
                drop(weak);
            }
        });

        for _ in 0..ROUNDS {
            assert!(
                Shared::get_mut(&mut mine).is_none(),
                "sole-ownership check passed while another thread held a live handle"
            );
        }
        stop.store(true, Ordering::Relaxed);
        cycler.join().unwrap();
    }
}
