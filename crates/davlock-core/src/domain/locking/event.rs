//! Locking domain events
//!
//! One event per observable change of a lock forest. Events carry the lock
//! coordinates (forest, path, token, owners) as typed fields so sinks can
//! index them without parsing a payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Depth, LockInfo, LockKind};

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A grant was added to a node
    LockAcquired,
    /// An owner was removed from a node
    LockReleased,
    /// A lock request was refused
    LockConflict,
    /// A grant timed out and was forfeited by a sweep
    LockExpired,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockAcquired => "lock_acquired",
            Self::LockReleased => "lock_released",
            Self::LockConflict => "lock_conflict",
            Self::LockExpired => "lock_expired",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A locking domain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEvent {
    pub id: Uuid,
    pub event_type: LockEventType,
    /// Forest the event happened in
    pub kind: LockKind,
    /// Resource path of the node concerned
    pub path: String,
    /// Lock token, absent for refused requests
    pub token: Option<String>,
    /// Owners affected: the requester, the releaser, or every forfeited holder
    pub owners: Vec<String>,
    /// Requested or granted mode, when known
    pub exclusive: Option<bool>,
    pub depth: Option<Depth>,
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    fn new(event_type: LockEventType, kind: LockKind, path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            kind,
            path: path.to_string(),
            token: None,
            owners: Vec::new(),
            exclusive: None,
            depth: None,
            created_at: Utc::now(),
        }
    }

    /// `owner` was added to the grant described by `info`
    pub fn lock_acquired(info: &LockInfo, owner: &str) -> Self {
        Self {
            token: Some(info.token.clone()),
            owners: vec![owner.to_string()],
            exclusive: Some(info.exclusive),
            depth: Some(info.depth),
            ..Self::new(LockEventType::LockAcquired, info.kind, &info.path)
        }
    }

    /// `owner` let go of the lock behind `token`
    pub fn lock_released(kind: LockKind, token: &str, path: &str, owner: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            owners: vec![owner.to_string()],
            ..Self::new(LockEventType::LockReleased, kind, path)
        }
    }

    /// A request by `owner` was refused
    pub fn lock_conflict(kind: LockKind, path: &str, owner: &str, exclusive: bool) -> Self {
        Self {
            owners: vec![owner.to_string()],
            exclusive: Some(exclusive),
            ..Self::new(LockEventType::LockConflict, kind, path)
        }
    }

    /// A sweep forfeited the grant described by `info`
    pub fn lock_expired(info: &LockInfo) -> Self {
        Self {
            token: Some(info.token.clone()),
            owners: info.owners.iter().cloned().collect(),
            exclusive: Some(info.exclusive),
            depth: Some(info.depth),
            ..Self::new(LockEventType::LockExpired, info.kind, &info.path)
        }
    }

    /// Whether `owner` is among the owners this event concerns
    pub fn involves(&self, owner: &str) -> bool {
        self.owners.iter().any(|o| o == owner)
    }
}
