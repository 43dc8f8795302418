//! Guards for temporary locks
//!
//! Temporary locks serialize internal operations (a COPY walking a subtree,
//! an upload finishing) and must not outlive them. The guard queues its
//! release when dropped; the manager drains the queue before its next
//! mutation or when `process_releases` is called.

use std::fmt;
use tokio::sync::mpsc;

use super::types::LockInfo;

/// A queued release: lock token and the owner giving it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingRelease {
    pub token: String,
    pub owner: String,
}

/// Channel for notifying the lock manager when a guard is dropped
pub(crate) type ReleaseNotifier = mpsc::UnboundedSender<PendingRelease>;

/// Holds one owner's grant on the temporary forest.
///
/// The grant is released when the guard is dropped.
#[derive(Debug)]
pub struct TemporaryLockGuard {
    info: LockInfo,
    owner: String,
    release_tx: Option<ReleaseNotifier>,
    released: bool,
}

impl TemporaryLockGuard {
    pub(crate) fn new(info: LockInfo, owner: String, release_tx: ReleaseNotifier) -> Self {
        Self {
            info,
            owner,
            release_tx: Some(release_tx),
            released: false,
        }
    }

    /// Lock token of the guarded node
    pub fn token(&self) -> &str {
        &self.info.token
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Snapshot taken when the grant was made
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release explicitly instead of waiting for drop
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(tx) = self.release_tx.take() {
            // receiver gone means the manager is gone with its forests
            let _ = tx.send(PendingRelease {
                token: self.info.token.clone(),
                owner: self.owner.clone(),
            });
        }
    }
}

impl Drop for TemporaryLockGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Display for TemporaryLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemporaryLock[{} by {}]", self.info.path, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::types::{Depth, LockKind};
    use std::collections::BTreeSet;

    fn info() -> LockInfo {
        LockInfo {
            token: "77".to_string(),
            path: "/docs".to_string(),
            kind: LockKind::Temporary,
            owners: BTreeSet::from(["copy-job".to_string()]),
            exclusive: false,
            depth: Depth::Infinity,
            expires_at: None,
            subtree_expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_drop_queues_release() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let guard = TemporaryLockGuard::new(info(), "copy-job".to_string(), tx);
            assert_eq!(guard.token(), "77");
            assert_eq!(guard.to_string(), "TemporaryLock[/docs by copy-job]");
        }

        let release = rx.try_recv().unwrap();
        assert_eq!(release.token, "77");
        assert_eq!(release.owner, "copy-job");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_explicit_release_sends_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = TemporaryLockGuard::new(info(), "copy-job".to_string(), tx);
        guard.release();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_release_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let guard = TemporaryLockGuard::new(info(), "copy-job".to_string(), tx);
        drop(guard);
    }
}
