//! Lock forest
//!
//! An arena of [`LockNode`]s keyed by path, with a second index from lock
//! token to path. Real and temporary locks are two instances of this type.
//!
//! Nodes are materialized on demand along the path of a lock request and
//! pruned again once they are unowned and childless. All methods take
//! `&mut self`; callers serialize access (see `LockManager`).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{error, info, trace};

use super::node::LockNode;
use super::types::{Depth, LockError, LockInfo, LockKind, LockRequest, LockResult};
use crate::dav::path::{ROOT, is_canonical, parent_path};
use crate::token::TokenGenerator;

#[derive(Debug)]
pub(crate) struct LockForest {
    kind: LockKind,
    nodes: HashMap<String, LockNode>,
    tokens: HashMap<String, String>,
}

impl LockForest {
    pub fn new(kind: LockKind, root_token: String) -> Self {
        let root = LockNode::new(ROOT.to_string(), root_token.clone(), kind, None);
        Self {
            kind,
            nodes: HashMap::from([(ROOT.to_string(), root)]),
            tokens: HashMap::from([(root_token, ROOT.to_string())]),
        }
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, path: &str) -> Option<&LockNode> {
        self.nodes.get(path)
    }

    pub fn get_by_token(&self, token: &str) -> Option<&LockNode> {
        self.tokens.get(token).and_then(|path| self.nodes.get(path))
    }

    /// Ensure a node exists for `path` and for every ancestor up to the root.
    pub fn materialize(&mut self, path: &str, tokens: &TokenGenerator) -> LockResult<()> {
        if !is_canonical(path) {
            return Err(LockError::InvalidPath(path.to_string()));
        }
        if self.nodes.contains_key(path) {
            return Ok(());
        }

        let mut missing = vec![path];
        let mut current = path;
        while let Some(parent) = parent_path(current) {
            if self.nodes.contains_key(parent) {
                break;
            }
            missing.push(parent);
            current = parent;
        }

        let minted = missing
            .iter()
            .map(|_| tokens.next_token())
            .collect::<LockResult<Vec<_>>>()?;

        let kind = self.kind;
        for (node_path, token) in missing.into_iter().rev().zip(minted) {
            let parent = parent_path(node_path)
                .ok_or_else(|| invariant(kind, "materialize", node_path, "non-root path without parent"))?;
            self.nodes
                .get_mut(parent)
                .ok_or_else(|| invariant(kind, "materialize", node_path, "parent node missing"))?
                .children
                .insert(node_path.to_string());

            trace!(kind = %self.kind, path = %node_path, token = %token, "Materialized lock node");
            self.tokens.insert(token.clone(), node_path.to_string());
            self.nodes.insert(
                node_path.to_string(),
                LockNode::new(node_path.to_string(), token, self.kind, Some(parent.to_string())),
            );
        }
        Ok(())
    }

    /// Whether a grant of the given mode and depth on `path` is compatible
    /// with every ancestor and every in-scope descendant.
    pub fn can_lock(&self, path: &str, exclusive: bool, depth: Depth) -> LockResult<bool> {
        Ok(self.check_parents(path, exclusive)? && self.check_children(path, exclusive, depth)?)
    }

    /// Walk towards the root; an owned ancestor whose depth reaches `path`
    /// blocks the request unless both grants are shared.
    fn check_parents(&self, path: &str, exclusive: bool) -> LockResult<bool> {
        let mut distance = 1;
        let mut current = self.node("check_parents", path)?.parent.as_deref();

        while let Some(ancestor_path) = current {
            let ancestor = self.node("check_parents", ancestor_path)?;
            if ancestor.is_owned() && ancestor.depth.covers(distance) && !ancestor.admits(exclusive) {
                return Ok(false);
            }
            distance += 1;
            current = ancestor.parent.as_deref();
        }
        Ok(true)
    }

    /// Walk the subtree bounded by the requested depth; every node reached,
    /// the target included, must admit the request.
    fn check_children(&self, path: &str, exclusive: bool, depth: Depth) -> LockResult<bool> {
        let node = self.node("check_children", path)?;
        if !node.admits(exclusive) {
            return Ok(false);
        }
        let Some(remaining) = depth.descend() else {
            return Ok(true);
        };
        for child in &node.children {
            if !self.check_children(child, exclusive, remaining)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Check and grant in one step. Nothing is left behind on failure.
    ///
    /// A first grant on a node that already existed as a joint gets a new
    /// token, so a token never outlives the grant it was issued for. Shared
    /// co-owners join the current token.
    pub fn lock(
        &mut self,
        request: &LockRequest,
        expires_at: DateTime<Utc>,
        tokens: &TokenGenerator,
    ) -> LockResult<LockInfo> {
        let existed = self.nodes.contains_key(&request.path);
        self.materialize(&request.path, tokens)?;

        if !self.can_lock(&request.path, request.exclusive, request.depth)? {
            self.prune_from(&request.path)?;
            return Err(LockError::Conflict {
                path: request.path.clone(),
            });
        }

        let reissue = existed && !self.node("lock", &request.path)?.is_owned();
        let fresh_token = if reissue { Some(tokens.next_token()?) } else { None };

        let node = self.node_mut("lock", &request.path)?;
        if !node.grant(&request.owner, request.exclusive, request.depth, expires_at) {
            return Err(LockError::DuplicateOwner {
                path: request.path.clone(),
                owner: request.owner.clone(),
            });
        }
        let retired = fresh_token.map(|token| std::mem::replace(&mut node.token, token));
        let info = node.info();

        if let Some(retired) = retired {
            self.tokens.remove(&retired);
            self.tokens.insert(info.token.clone(), info.path.clone());
            trace!(kind = %self.kind, path = %info.path, retired = %retired, token = %info.token, "Reissued lock token");
        }
        self.bump_ancestors(&request.path, expires_at);

        trace!(
            kind = %self.kind,
            path = %info.path,
            token = %info.token,
            owner = %request.owner,
            exclusive = request.exclusive,
            depth = %request.depth,
            "Lock granted"
        );
        Ok(info)
    }

    /// Remove `owner` from the node holding `token`, pruning it if it empties.
    ///
    /// Returns the released node's path. Fails with `NotFound` for an
    /// unknown token and `NotOwner` when `owner` does not hold it.
    pub fn unlock(&mut self, token: &str, owner: &str) -> LockResult<String> {
        let path = self
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| LockError::NotFound(token.to_string()))?;

        let node = self.node_mut("unlock", &path)?;
        if !node.release(owner) {
            return Err(LockError::NotOwner {
                token: token.to_string(),
                owner: owner.to_string(),
            });
        }
        if node.is_garbage() {
            self.prune_from(&path)?;
        }
        trace!(kind = %self.kind, path = %path, token = %token, owner = %owner, "Lock released");
        Ok(path)
    }

    /// Remove `owner` from every node at and below `path`.
    ///
    /// Returns the number of grants released.
    pub fn release_subtree(&mut self, path: &str, owner: &str) -> LockResult<usize> {
        if !self.nodes.contains_key(path) {
            return Ok(0);
        }

        let mut subtree = Vec::new();
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            stack.extend(self.node("release_subtree", &current)?.children.iter().cloned());
            subtree.push(current);
        }

        let mut released = 0;
        for node_path in &subtree {
            if self.node_mut("release_subtree", node_path)?.release(owner) {
                released += 1;
            }
        }
        self.prune_deepest_first(subtree)?;
        Ok(released)
    }

    /// Give the grant behind `token` a fresh expiry
    pub fn refresh(&mut self, token: &str, expires_at: DateTime<Utc>) -> LockResult<LockInfo> {
        let path = self
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| LockError::NotFound(token.to_string()))?;

        let node = self.node_mut("refresh", &path)?;
        if !node.is_owned() {
            return Err(LockError::NotFound(token.to_string()));
        }
        node.expires_at = Some(expires_at);
        node.bump_subtree_expiry(expires_at);
        let info = node.info();
        self.bump_ancestors(&path, expires_at);
        Ok(info)
    }

    /// Forfeit every grant that expired before `now` and prune what empties.
    ///
    /// Returns the grants as they were just before forfeiture.
    pub fn expire(&mut self, now: DateTime<Utc>) -> LockResult<Vec<LockInfo>> {
        let expired: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.is_expired_at(now))
            .map(|node| node.path.clone())
            .collect();

        let mut forfeited = Vec::with_capacity(expired.len());
        for path in &expired {
            let node = self.node_mut("expire", path)?;
            forfeited.push(node.info());
            node.forfeit();
        }
        self.prune_deepest_first(expired)?;

        if !forfeited.is_empty() {
            info!(kind = %self.kind, count = forfeited.len(), "Forfeited expired locks");
        }
        Ok(forfeited)
    }

    /// Post-order sweep deleting every unowned node whose subtree is empty.
    ///
    /// Returns the number of nodes removed.
    pub fn clean(&mut self) -> LockResult<usize> {
        let mut removed = 0;
        self.clean_subtree(ROOT, &mut removed)?;
        Ok(removed)
    }

    fn clean_subtree(&mut self, path: &str, removed: &mut usize) -> LockResult<bool> {
        let children: Vec<String> = self.node("clean", path)?.children.iter().cloned().collect();

        let mut can_delete = true;
        for child in children {
            if !self.clean_subtree(&child, removed)? {
                can_delete = false;
            }
        }

        if !can_delete || self.node("clean", path)?.is_owned() {
            return Ok(false);
        }
        if path != ROOT {
            self.detach(path)?;
            *removed += 1;
        }
        Ok(true)
    }

    /// Grants that reach `path`: its own node and ancestors whose depth covers it.
    ///
    /// `path` itself does not have to be materialized.
    pub fn covering(&self, path: &str) -> Vec<LockInfo> {
        let mut found = Vec::new();
        let mut distance = 0;
        let mut current = Some(path);

        while let Some(candidate) = current {
            if let Some(node) = self.nodes.get(candidate)
                && node.is_owned()
                && node.depth.covers(distance)
            {
                found.push(node.info());
            }
            distance += 1;
            current = parent_path(candidate);
        }
        found
    }

    /// Snapshot of every owned node, ordered by path
    pub fn owned(&self) -> Vec<LockInfo> {
        let mut locks: Vec<LockInfo> = self
            .nodes
            .values()
            .filter(|node| node.is_owned())
            .map(LockNode::info)
            .collect();
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        locks
    }

    /// Prune upward from `path` while nodes are garbage. The root stays.
    fn prune_from(&mut self, path: &str) -> LockResult<usize> {
        let mut removed = 0;
        let mut current = path.to_string();

        while current != ROOT {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            if !node.is_garbage() {
                break;
            }
            let node = self.detach(&current)?;
            removed += 1;
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        if removed > 0 {
            trace!(kind = %self.kind, path = %path, removed, "Pruned lock nodes");
        }
        Ok(removed)
    }

    fn prune_deepest_first(&mut self, mut paths: Vec<String>) -> LockResult<usize> {
        paths.sort_by_key(|path| std::cmp::Reverse(path.matches('/').count()));
        let mut removed = 0;
        for path in paths {
            removed += self.prune_from(&path)?;
        }
        Ok(removed)
    }

    /// Remove a node from both indexes and from its parent's children
    fn detach(&mut self, path: &str) -> LockResult<LockNode> {
        let node = self
            .nodes
            .remove(path)
            .ok_or_else(|| invariant(self.kind, "detach", path, "node missing from path index"))?;

        match self.tokens.remove(&node.token) {
            Some(indexed) if indexed == path => {}
            _ => return Err(invariant(self.kind, "detach", path, "token index out of sync")),
        }

        if let Some(parent) = &node.parent {
            let detached = self
                .nodes
                .get_mut(parent)
                .map(|parent_node| parent_node.children.remove(path))
                .unwrap_or(false);
            if !detached {
                return Err(invariant(self.kind, "detach", path, "stale parent link"));
            }
        }
        Ok(node)
    }

    fn bump_ancestors(&mut self, path: &str, at: DateTime<Utc>) {
        let mut current = parent_path(path);
        while let Some(ancestor) = current {
            if let Some(node) = self.nodes.get_mut(ancestor) {
                node.bump_subtree_expiry(at);
            }
            current = parent_path(ancestor);
        }
    }

    fn node(&self, operation: &str, path: &str) -> LockResult<&LockNode> {
        self.nodes
            .get(path)
            .ok_or_else(|| invariant(self.kind, operation, path, "node missing from path index"))
    }

    fn node_mut(&mut self, operation: &str, path: &str) -> LockResult<&mut LockNode> {
        let kind = self.kind;
        self.nodes
            .get_mut(path)
            .ok_or_else(|| invariant(kind, operation, path, "node missing from path index"))
    }

    /// Check the structural invariants of the arena
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        assert_eq!(self.nodes.len(), self.tokens.len());
        for (token, path) in &self.tokens {
            assert_eq!(&self.nodes[path].token, token);
        }
        for (path, node) in &self.nodes {
            assert_eq!(&node.path, path);
            match &node.parent {
                None => assert_eq!(path, ROOT),
                Some(parent) => {
                    assert_eq!(parent_path(path), Some(parent.as_str()));
                    assert!(self.nodes[parent].children.contains(path));
                }
            }
            for child in &node.children {
                assert_eq!(self.nodes[child].parent.as_deref(), Some(path.as_str()));
            }
        }
    }
}

fn invariant(kind: LockKind, operation: &str, path: &str, detail: &str) -> LockError {
    error!(
        kind = %kind,
        operation = %operation,
        path = %path,
        detail = %detail,
        "Lock tree invariant violated"
    );
    LockError::InvalidState(format!("{} on '{}' ({}): {}", operation, path, kind, detail))
}
