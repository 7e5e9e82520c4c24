//! # Tether-Patterns
//!
//! Usage patterns layered on the `tether-mem` primitives. Both lean on
//! the same idea: store a [`Weak`][tether_mem::Weak] edge wherever a
//! collection should *find* resources without *keeping them alive*.
//!
//! - [`ResourceCache`]: key-to-weak-handle map that deduplicates live
//!   resources and transparently recreates expired ones
//! - [`ObserverSet`]: fan-out notification over weak handles, pruning
//!   observers that have gone away instead of extending their lifetime

mod cache;
mod observe;

pub use cache::ResourceCache;
pub use observe::ObserverSet;
