//! Domain layer
//!
//! Contains the lock registry and the events it emits.

pub mod events;
pub mod locking;
