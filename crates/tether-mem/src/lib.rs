//! # Tether-Mem
//!
//! Ownership primitives with deterministic, prompt release: exclusive
//! handles, shared handles over an explicit control block, and weak
//! observers — no tracing collector, no global pass.
//!
//! ## Features
//!
//! - **Exclusive ownership**: [`Unique`] is move-only and never empty;
//!   release runs exactly once, synchronously, at scope exit or
//!   [`reset`][Unique::reset]
//! - **Shared ownership**: [`Shared`] co-owners mutate an atomic strong
//!   count; the last drop runs the release action on its own thread
//! - **Weak observation**: [`Weak`] observes without owning and promotes
//!   back with an atomic check-and-increment, so it can report
//!   "expired" but never dangle
//! - **Release policies**: [`Reclaim`] customizes teardown per handle
//!   type, for file handles and other non-memory resources
//! - **Polymorphic release**: `Unique<dyn Trait>` / `Shared<dyn Trait>`
//!   run the concrete type's teardown through its vtable
//! - **Self-reference and aliasing**: [`SelfRef`] lets a managed
//!   resource issue handles to itself; [`Shared::alias`] co-owns a
//!   resource while dereferencing to a projection of it
//!
//! ## Quick start
//!
//! ```rust
//! use tether_mem::{Shared, Unique};
//!
//! let exclusive = Unique::new(String::from("solely owned"));
//! assert_eq!(exclusive.len(), 12);
//!
//! let shared = Shared::new(42);
//! let copy = shared.clone();
//! assert_eq!(Shared::strong_count(&copy), 2);
//!
//! let weak = Shared::downgrade(&shared);
//! drop((shared, copy));
//! assert!(weak.expired());
//! ```
//!
//! ## Owning vs observing edges
//!
//! [`Shared`] edges own; [`Weak`] edges observe. Two resources holding
//! `Shared` handles to each other never release — that is the one leak
//! this model permits, and the fix is structural: make every
//! back-reference in a cyclic shape a `Weak`. The counting discipline
//! is race-free; access to the payload behind the handles is not, and
//! remains the caller's responsibility.

mod control;
mod error;
mod reclaim;
mod self_ref;
mod shared;
mod unique;
mod weak;

pub use error::MemError;
pub use reclaim::{DropInPlace, Reclaim, ReclaimFn};
pub use self_ref::{SelfRef, SelfReferential};
pub use shared::Shared;
pub use unique::Unique;
pub use weak::Weak;
