//! Davlock Core Library
//!
//! This crate provides the lock manager behind a WebDAV server, including:
//! - Hierarchical lock forests for real and temporary locks
//! - Depth-aware conflict checks and lease expiry
//! - Lock token generation
//! - WebDAV path and header helpers
//! - Lock events and configuration

pub mod config;
pub mod dav;
pub mod domain;
pub mod error;
pub mod token;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::locking::{
        Depth, LockConfig, LockError, LockInfo, LockKind, LockManager, LockRequest, LockResult,
        TemporaryLockGuard,
    };
    pub use crate::error::{Error, Result};
    pub use crate::token::TokenGenerator;
}
