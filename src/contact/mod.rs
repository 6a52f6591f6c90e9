// src/contact/mod.rs
//!
//! Contact representation and per-body indexing.
//!
//! - [`ContactRecord`]: one contact seen from the body that owns it.
//! - [`PerObjectContactList`]: that body's contacts in detection order, plus
//!   the aggregate impact velocity.
//! - [`ContactBuffer`]: the arena both live in, rebuilt from scratch every step.
//!
//! Each collision candidate produces a primary record (owned by body A, solved)
//! and a mirror record (owned by body B, kept equal and opposite after solving).

mod buffer;
mod list;
mod record;

pub use buffer::{BuildStats, ContactBuffer, ContactHandle};
pub use list::{ContactList, PerObjectContactList};
pub use record::{ContactDesc, ContactRecord};
