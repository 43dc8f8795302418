//! Hierarchical WebDAV locking
//!
//! Locks are kept in two forests of path nodes: real (write) locks granted
//! through LOCK requests, and temporary locks used to serialize internal
//! operations. A node exists for every locked path and for every ancestor
//! joining it to the root.
//!
//! # Architecture
//!
//! - **Types**: `LockRequest`, `LockInfo`, `Depth`, `LockKind`
//! - **Lock Manager**: `LockManager`, the shared registry holding both forests
//! - **Guards**: `TemporaryLockGuard` for RAII-style temporary locks
//! - **Events**: `LockEvent` published through an optional `EventPublisher`
//!
//! # Conflict rules
//!
//! Only shared-on-shared grants coexist. A request on `/a/b` is refused if an
//! ancestor holds an incompatible grant whose depth reaches `/a/b`, or if any
//! node within the requested depth below `/a/b` (itself included) does.
//!
//! # Example
//!
//! ```ignore
//! use davlock_core::domain::locking::{Depth, LockKind, LockManager, LockRequest};
//!
//! let manager = LockManager::with_defaults()?;
//!
//! let info = manager
//!     .lock(LockKind::Real, LockRequest::exclusive("/docs/report.txt", "alice"))
//!     .await?;
//!
//! // Writes below /docs/report.txt must now present info.token
//! manager.authorize("/docs/report.txt", &[info.token.clone()]).await?;
//!
//! manager.unlock(&info.token, "alice").await?;
//! ```

pub mod event;
pub mod guard;
pub mod manager;
pub mod types;

mod forest;
mod node;

// Re-export main types
pub use event::{LockEvent, LockEventType};
pub use guard::TemporaryLockGuard;
pub use manager::{LockManager, Sweeper};
pub use types::{Depth, LockConfig, LockError, LockInfo, LockKind, LockRequest, LockResult};
