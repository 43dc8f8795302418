//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::LocksConfig;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Longest lease ever handed out (100 years), whatever the configuration says
pub const MAX_LEASE_SECS: u64 = 100 * 365 * 24 * 3600;

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// An ancestor, the resource itself or an in-scope descendant holds a conflicting lock
    #[error("Lock conflict: resource '{path}' is locked by a parent or child resource")]
    Conflict { path: String },

    /// The owner already holds a grant on this resource
    #[error("Lock conflict: owner '{owner}' already holds a lock on '{path}'")]
    DuplicateOwner { path: String, owner: String },

    /// No lock exists for the given token or path
    #[error("Lock not found: {0}")]
    NotFound(String),

    /// The lock exists but the caller is not one of its owners
    #[error("Lock '{token}' is not held by '{owner}'")]
    NotOwner { token: String, owner: String },

    /// The resource path cannot be placed in a lock forest
    #[error("Invalid lock path: '{0}'")]
    InvalidPath(String),

    /// Invalid lock state (a broken tree invariant)
    #[error("Invalid lock state: {0}")]
    InvalidState(String),

    /// The system clock went backwards while minting tokens
    #[error("Clock moved backwards: last token at {last}ms, now {now}ms")]
    ClockMovedBackwards { last: i64, now: i64 },
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "E300",
            Self::DuplicateOwner { .. } => "E301",
            Self::NotFound(_) => "E302",
            Self::NotOwner { .. } => "E303",
            Self::InvalidPath(_) => "E304",
            Self::InvalidState(_) => "E305",
            Self::ClockMovedBackwards { .. } => "E306",
        }
    }

    /// Whether the error is an ordinary "resource is locked" outcome
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::DuplicateOwner { .. })
    }
}

/// Which lock forest a node lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// Durable write locks granted through LOCK requests
    Real,
    /// Short-lived advisory locks serializing internal operations
    Temporary,
}

impl LockKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "write",
            Self::Temporary => "read",
        }
    }

    /// Pick the forest from the `temporary` flag used by the protocol adapter
    pub fn from_temporary(temporary: bool) -> Self {
        if temporary { Self::Temporary } else { Self::Real }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// WebDAV depth of a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    /// The resource only
    Zero,
    /// The resource and its immediate children
    One,
    /// The whole subtree
    Infinity,
}

impl Depth {
    /// Depth left for the children of a node checked at this depth.
    ///
    /// `None` means the depth is exhausted and children are out of scope.
    pub fn descend(self) -> Option<Depth> {
        match self {
            Self::Zero => None,
            Self::One => Some(Self::Zero),
            Self::Infinity => Some(Self::Infinity),
        }
    }

    /// Whether a lock of this depth reaches a resource `distance` segments below it
    pub fn covers(self, distance: usize) -> bool {
        match self {
            Self::Zero => distance == 0,
            Self::One => distance <= 1,
            Self::Infinity => true,
        }
    }

    /// Convert to the `Depth` header value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
            Self::Infinity => "infinity",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of a single lock attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Canonical resource path
    pub path: String,

    /// Opaque owner identifier
    pub owner: String,

    /// Exclusive (true) or shared (false) grant
    pub exclusive: bool,

    /// Scope of the grant
    pub depth: Depth,

    /// Lease length in seconds (None = configured default)
    pub timeout_secs: Option<u64>,
}

impl LockRequest {
    /// Create a request with the given mode, infinite depth and the default timeout
    pub fn new(path: impl Into<String>, owner: impl Into<String>, exclusive: bool) -> Self {
        Self {
            path: path.into(),
            owner: owner.into(),
            exclusive,
            depth: Depth::Infinity,
            timeout_secs: None,
        }
    }

    /// Create an exclusive lock request
    pub fn exclusive(path: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new(path, owner, true)
    }

    /// Create a shared lock request
    pub fn shared(path: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::new(path, owner, false)
    }

    /// Set the depth
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Set the timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Snapshot of one owned node, safe to hand out of the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Lock token
    pub token: String,

    /// Locked resource path
    pub path: String,

    /// Forest the lock lives in
    pub kind: LockKind,

    /// Current owners (empty for a bare tree joint)
    pub owners: BTreeSet<String>,

    /// Whether the grant is exclusive
    pub exclusive: bool,

    /// Depth of the grant
    pub depth: Depth,

    /// When the grant expires
    pub expires_at: Option<DateTime<Utc>>,

    /// Latest expiry granted anywhere in this node's subtree
    pub subtree_expires_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    /// Whether any owner holds this node
    pub fn is_owned(&self) -> bool {
        !self.owners.is_empty()
    }

    /// Check if the grant is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }

    /// Seconds left before expiry (0 once expired)
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at
            .map(|exp| (exp - Utc::now()).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owners: Vec<&str> = self.owners.iter().map(String::as_str).collect();
        write!(
            f,
            "{} {} {} depth={} owners=[{}] token={}",
            self.kind,
            self.path,
            if self.exclusive { "exclusive" } else { "shared" },
            self.depth,
            owners.join(","),
            self.token
        )
    }
}

/// Configuration for the lock manager
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lease used when a request carries no timeout
    pub default_timeout: Duration,

    /// Upper bound for any requested lease
    pub max_timeout: Duration,

    /// Lease for temporary locks taken through guards
    pub temporary_timeout: Duration,

    /// Number of unlocks between full cleanup passes
    pub cleanup_threshold: u64,

    /// Interval of the background timeout sweep
    pub sweep_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
            max_timeout: Duration::from_secs(7 * 24 * 3600),
            temporary_timeout: Duration::from_secs(10),
            cleanup_threshold: 100_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl LockConfig {
    /// Set the default lease
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the lease upper bound
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    /// Set the cleanup threshold
    pub fn with_cleanup_threshold(mut self, threshold: u64) -> Self {
        self.cleanup_threshold = threshold;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Resolve a requested lease against the default and the upper bound
    pub fn lease_secs(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout.as_secs())
            .min(self.max_timeout.as_secs())
            .min(MAX_LEASE_SECS)
    }
}

/// Instant a lease of `secs` seconds taken at `now` runs out
pub fn lease_deadline(now: DateTime<Utc>, secs: u64) -> LockResult<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lease| now.checked_add_signed(lease))
        .ok_or_else(|| LockError::InvalidState(format!("lease of {}s is out of range", secs)))
}

impl From<&LocksConfig> for LockConfig {
    fn from(config: &LocksConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            max_timeout: Duration::from_secs(config.max_timeout_secs),
            temporary_timeout: Duration::from_secs(config.temporary_timeout_secs),
            cleanup_threshold: config.cleanup_threshold,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }
}
