//! Lock node
//!
//! One node per resource path that holds a grant or sits on the path between
//! a granted resource and the forest root. Nodes never own each other: the
//! parent and children are stored as path keys into the forest's arena.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::types::{Depth, LockInfo, LockKind};

/// A single node of a lock forest
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockNode {
    pub path: String,
    pub token: String,
    pub kind: LockKind,
    pub owners: BTreeSet<String>,
    pub exclusive: bool,
    pub depth: Depth,
    pub expires_at: Option<DateTime<Utc>>,
    /// Latest expiry granted on this node or any node below it
    pub subtree_expires_at: Option<DateTime<Utc>>,
    pub parent: Option<String>,
    pub children: BTreeSet<String>,
}

impl LockNode {
    /// Create an unowned joint
    pub fn new(path: String, token: String, kind: LockKind, parent: Option<String>) -> Self {
        Self {
            path,
            token,
            kind,
            owners: BTreeSet::new(),
            exclusive: false,
            depth: Depth::Zero,
            expires_at: None,
            subtree_expires_at: None,
            parent,
            children: BTreeSet::new(),
        }
    }

    pub fn is_owned(&self) -> bool {
        !self.owners.is_empty()
    }

    /// Whether a new grant in the given mode can coexist with this node's grant.
    ///
    /// Only shared-on-shared is compatible.
    pub fn admits(&self, exclusive: bool) -> bool {
        !self.is_owned() || !(self.exclusive || exclusive)
    }

    /// Unowned and childless: nothing left to represent
    pub fn is_garbage(&self) -> bool {
        self.owners.is_empty() && self.children.is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_owned() && self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }

    /// Add `owner` to the grant.
    ///
    /// A first owner sets mode, depth and expiry; a shared co-owner widens the
    /// depth and extends the expiry so no existing holder loses coverage.
    /// Returns false if `owner` already holds this node.
    pub fn grant(
        &mut self,
        owner: &str,
        exclusive: bool,
        depth: Depth,
        expires_at: DateTime<Utc>,
    ) -> bool {
        if self.owners.contains(owner) {
            return false;
        }

        if self.is_owned() {
            self.depth = self.depth.max(depth);
            self.expires_at = self.expires_at.max(Some(expires_at));
        } else {
            self.exclusive = exclusive;
            self.depth = depth;
            self.expires_at = Some(expires_at);
        }
        self.owners.insert(owner.to_string());
        self.bump_subtree_expiry(expires_at);
        true
    }

    /// Remove `owner`; returns false if it did not hold the node
    pub fn release(&mut self, owner: &str) -> bool {
        if !self.owners.remove(owner) {
            return false;
        }
        if self.owners.is_empty() {
            self.reset_grant();
        }
        true
    }

    /// Drop every owner at once; returns how many were removed
    pub fn forfeit(&mut self) -> usize {
        let count = self.owners.len();
        self.owners.clear();
        self.reset_grant();
        count
    }

    pub fn bump_subtree_expiry(&mut self, at: DateTime<Utc>) {
        self.subtree_expires_at = self.subtree_expires_at.max(Some(at));
    }

    pub fn info(&self) -> LockInfo {
        LockInfo {
            token: self.token.clone(),
            path: self.path.clone(),
            kind: self.kind,
            owners: self.owners.clone(),
            exclusive: self.exclusive,
            depth: self.depth,
            expires_at: self.expires_at,
            subtree_expires_at: self.subtree_expires_at,
        }
    }

    fn reset_grant(&mut self) {
        self.exclusive = false;
        self.depth = Depth::Zero;
        self.expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn joint(path: &str) -> LockNode {
        LockNode::new(path.to_string(), "1".to_string(), LockKind::Real, None)
    }

    #[test]
    fn test_unowned_node_admits_everything() {
        let node = joint("/a");
        assert!(node.admits(true));
        assert!(node.admits(false));
        assert!(node.is_garbage());
    }

    #[test]
    fn test_shared_admits_only_shared() {
        let mut node = joint("/a");
        assert!(node.grant("alice", false, Depth::Zero, Utc::now()));

        assert!(node.admits(false));
        assert!(!node.admits(true));
        assert!(!node.is_garbage());
    }

    #[test]
    fn test_exclusive_admits_nothing() {
        let mut node = joint("/a");
        node.grant("alice", true, Depth::Infinity, Utc::now());

        assert!(!node.admits(false));
        assert!(!node.admits(true));
    }

    #[test]
    fn test_duplicate_owner_rejected() {
        let mut node = joint("/a");
        assert!(node.grant("alice", false, Depth::Zero, Utc::now()));
        assert!(!node.grant("alice", false, Depth::Zero, Utc::now()));
        assert_eq!(node.owners.len(), 1);
    }

    #[test]
    fn test_shared_coowner_widens_depth_and_expiry() {
        let now = Utc::now();
        let mut node = joint("/a");
        node.grant("alice", false, Depth::Infinity, now + Duration::seconds(600));
        node.grant("bob", false, Depth::Zero, now + Duration::seconds(60));

        assert_eq!(node.depth, Depth::Infinity);
        assert_eq!(node.expires_at, Some(now + Duration::seconds(600)));
        assert_eq!(node.owners.len(), 2);
    }

    #[test]
    fn test_release_last_owner_resets_grant() {
        let mut node = joint("/a");
        node.grant("alice", true, Depth::One, Utc::now());

        assert!(!node.release("bob"));
        assert!(node.release("alice"));
        assert!(!node.is_owned());
        assert!(!node.exclusive);
        assert_eq!(node.expires_at, None);
        assert!(node.subtree_expires_at.is_some());
    }

    #[test]
    fn test_forfeit_and_expiry() {
        let now = Utc::now();
        let mut node = joint("/a");
        node.grant("alice", false, Depth::Zero, now);
        node.grant("bob", false, Depth::Zero, now);

        assert!(!node.is_expired_at(now));
        assert!(node.is_expired_at(now + Duration::seconds(1)));
        assert_eq!(node.forfeit(), 2);
        assert!(!node.is_expired_at(now + Duration::seconds(1)));
    }
}
