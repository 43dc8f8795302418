//! Lock manager for WebDAV resources
//!
//! The lock manager is the process-wide registry request handlers call into.
//! It owns two lock forests, one for real (write) locks and one for
//! temporary locks, and handles:
//! - Atomic check-and-grant of hierarchical locks
//! - Release with pruning of emptied path joints
//! - Periodic cleanup after a configurable number of unlocks
//! - Timeout sweeps, on demand or from a background task
//!
//! Both forests sit behind one `RwLock`. Every mutation takes the write half,
//! so a conflict check and the grant that follows it can never interleave
//! with another mutation. Lookups take the read half.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use super::event::LockEvent;
use super::forest::LockForest;
use super::guard::{PendingRelease, ReleaseNotifier, TemporaryLockGuard};
use super::types::{
    Depth, LockConfig, LockError, LockInfo, LockKind, LockRequest, LockResult, MAX_LEASE_SECS,
    lease_deadline,
};
use crate::config::Config;
use crate::domain::events::EventPublisher;
use crate::token::TokenGenerator;

/// Both forests plus the unlock counter driving periodic cleanup
#[derive(Debug)]
struct LockTables {
    real: LockForest,
    temporary: LockForest,
    unlocks_since_cleanup: u64,
}

impl LockTables {
    fn forest(&self, kind: LockKind) -> &LockForest {
        match kind {
            LockKind::Real => &self.real,
            LockKind::Temporary => &self.temporary,
        }
    }

    fn forest_mut(&mut self, kind: LockKind) -> &mut LockForest {
        match kind {
            LockKind::Real => &mut self.real,
            LockKind::Temporary => &mut self.temporary,
        }
    }

    /// Count one unlock; past the threshold, clean and sweep both forests.
    ///
    /// Returns the grants forfeited by the sweep.
    fn note_unlock(&mut self, threshold: u64, now: DateTime<Utc>) -> LockResult<Vec<LockInfo>> {
        self.unlocks_since_cleanup += 1;
        if self.unlocks_since_cleanup <= threshold {
            return Ok(Vec::new());
        }
        self.unlocks_since_cleanup = 0;

        let mut expired = self.real.expire(now)?;
        expired.extend(self.temporary.expire(now)?);
        let removed = self.real.clean()? + self.temporary.clean()?;

        info!(
            removed_nodes = removed,
            expired = expired.len(),
            "Periodic lock tree cleanup"
        );
        Ok(expired)
    }
}

/// Hierarchical lock registry shared by all request handlers
pub struct LockManager {
    /// Configuration
    config: LockConfig,

    /// Mints lock tokens for new nodes
    tokens: TokenGenerator,

    /// Both forests
    state: RwLock<LockTables>,

    /// Sender handed to temporary lock guards
    release_tx: ReleaseNotifier,

    /// Releases queued by dropped guards
    release_rx: Mutex<mpsc::UnboundedReceiver<PendingRelease>>,

    /// Optional sink for lock events
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl LockManager {
    /// Create a lock manager with the given configuration and token source
    pub fn new(config: LockConfig, tokens: TokenGenerator) -> LockResult<Self> {
        let real = LockForest::new(LockKind::Real, tokens.next_token()?);
        let temporary = LockForest::new(LockKind::Temporary, tokens.next_token()?);
        let (release_tx, release_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            tokens,
            state: RwLock::new(LockTables {
                real,
                temporary,
                unlocks_since_cleanup: 0,
            }),
            release_tx,
            release_rx: Mutex::new(release_rx),
            publisher: None,
        })
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> LockResult<Self> {
        Self::new(LockConfig::default(), TokenGenerator::default())
    }

    /// Create a lock manager from the loaded configuration file
    pub fn from_config(config: &Config) -> LockResult<Self> {
        let tokens = TokenGenerator::new(config.tokens.worker_id, config.tokens.datacenter_id)?;
        Self::new(LockConfig::from(&config.locks), tokens)
    }

    /// Publish lock events to `publisher`
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Try to lock `request.path` in the forest of the given kind.
    ///
    /// Never waits: a conflicting grant anywhere in scope returns
    /// [`LockError::Conflict`] immediately and leaves the forest unchanged.
    pub async fn lock(&self, kind: LockKind, request: LockRequest) -> LockResult<LockInfo> {
        self.process_releases().await;

        let lease = self.lease_secs(kind, request.timeout_secs);
        let expires_at = lease_deadline(Utc::now(), lease)?;

        let outcome = {
            let mut state = self.state.write().await;
            state.forest_mut(kind).lock(&request, expires_at, &self.tokens)
        };

        match &outcome {
            Ok(info) => {
                info!(
                    kind = %kind,
                    path = %info.path,
                    token = %info.token,
                    owner = %request.owner,
                    exclusive = request.exclusive,
                    depth = %request.depth,
                    lease_secs = lease,
                    "Lock acquired"
                );
                self.publish(vec![LockEvent::lock_acquired(info, &request.owner)])
                    .await;
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    kind = %kind,
                    path = %request.path,
                    owner = %request.owner,
                    exclusive = request.exclusive,
                    error = %e,
                    "Lock refused"
                );
                self.publish(vec![LockEvent::lock_conflict(
                    kind,
                    &request.path,
                    &request.owner,
                    request.exclusive,
                )])
                .await;
            }
            Err(_) => {}
        }
        outcome
    }

    /// Lock `path` exclusively for `owner`
    pub async fn exclusive_lock(
        &self,
        kind: LockKind,
        path: &str,
        owner: &str,
        depth: Depth,
        timeout_secs: Option<u64>,
    ) -> LockResult<LockInfo> {
        let mut request = LockRequest::exclusive(path, owner).with_depth(depth);
        request.timeout_secs = timeout_secs;
        self.lock(kind, request).await
    }

    /// Lock `path` in shared mode for `owner`
    pub async fn shared_lock(
        &self,
        kind: LockKind,
        path: &str,
        owner: &str,
        depth: Depth,
        timeout_secs: Option<u64>,
    ) -> LockResult<LockInfo> {
        let mut request = LockRequest::shared(path, owner).with_depth(depth);
        request.timeout_secs = timeout_secs;
        self.lock(kind, request).await
    }

    /// Release `owner`'s hold on the lock behind `token`.
    ///
    /// Tokens are unique across both forests, so both are searched. Returns
    /// `Ok(false)` when nothing was released: the token is unknown or
    /// `owner` does not hold it.
    pub async fn unlock(&self, token: &str, owner: &str) -> LockResult<bool> {
        self.process_releases().await;

        let (released_path, expired) = {
            let mut state = self.state.write().await;

            let mut released_path = None;
            for kind in [LockKind::Real, LockKind::Temporary] {
                match state.forest_mut(kind).unlock(token, owner) {
                    Ok(path) => {
                        released_path = Some((kind, path));
                        break;
                    }
                    Err(LockError::NotFound(_)) => continue,
                    Err(e @ LockError::NotOwner { .. }) => {
                        debug!(kind = %kind, error = %e, "Unlock by non-owner ignored");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            let expired = state.note_unlock(self.config.cleanup_threshold, Utc::now())?;
            (released_path, expired)
        };

        let mut events: Vec<LockEvent> = expired.iter().map(LockEvent::lock_expired).collect();
        let released = match released_path {
            Some((kind, path)) => {
                info!(kind = %kind, token = %token, path = %path, owner = %owner, "Lock released");
                events.push(LockEvent::lock_released(kind, token, &path, owner));
                true
            }
            None => {
                warn!(token = %token, owner = %owner, "Unlock of a lock that is not held");
                false
            }
        };
        self.publish(events).await;
        Ok(released)
    }

    /// Release every temporary grant `owner` holds at or below `path`.
    ///
    /// Returns the number of grants released.
    pub async fn unlock_temporary(&self, path: &str, owner: &str) -> LockResult<usize> {
        self.process_releases().await;

        let released = {
            let mut state = self.state.write().await;
            state.temporary.release_subtree(path, owner)?
        };
        if released > 0 {
            debug!(path = %path, owner = %owner, released, "Temporary locks released");
        }
        Ok(released)
    }

    /// Give an existing grant a fresh lease
    pub async fn refresh(
        &self,
        token: &str,
        kind: LockKind,
        timeout_secs: Option<u64>,
    ) -> LockResult<LockInfo> {
        let lease = self.lease_secs(kind, timeout_secs);
        let expires_at = lease_deadline(Utc::now(), lease)?;

        let info = {
            let mut state = self.state.write().await;
            state.forest_mut(kind).refresh(token, expires_at)?
        };
        debug!(kind = %kind, path = %info.path, token = %token, lease_secs = lease, "Lock refreshed");
        Ok(info)
    }

    /// Forfeit every expired grant in one forest
    pub async fn check_timeouts(&self, kind: LockKind) -> LockResult<Vec<LockInfo>> {
        self.check_timeouts_at(kind, Utc::now()).await
    }

    /// Forfeit every grant in one forest that expired before `now`
    pub async fn check_timeouts_at(
        &self,
        kind: LockKind,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<LockInfo>> {
        let expired = {
            let mut state = self.state.write().await;
            state.forest_mut(kind).expire(now)?
        };

        for info in &expired {
            info!(kind = %kind, path = %info.path, token = %info.token, "Lock expired");
        }
        self.publish(expired.iter().map(LockEvent::lock_expired).collect())
            .await;
        Ok(expired)
    }

    /// Delete every unowned, childless-after-cleanup node of one forest.
    ///
    /// Returns the number of nodes removed.
    pub async fn clean_locked_objects(&self, kind: LockKind) -> LockResult<usize> {
        let removed = {
            let mut state = self.state.write().await;
            state.forest_mut(kind).clean()?
        };
        debug!(kind = %kind, removed, "Cleaned lock tree");
        Ok(removed)
    }

    /// Node of the real forest holding `token`
    pub async fn locked_object_by_id(&self, token: &str) -> Option<LockInfo> {
        self.node_by_token(LockKind::Real, token).await
    }

    /// Node of the real forest at `path`
    pub async fn locked_object_by_path(&self, path: &str) -> Option<LockInfo> {
        self.node_by_path(LockKind::Real, path).await
    }

    /// Node of the temporary forest holding `token`
    pub async fn temp_locked_object_by_id(&self, token: &str) -> Option<LockInfo> {
        self.node_by_token(LockKind::Temporary, token).await
    }

    /// Node of the temporary forest at `path`
    pub async fn temp_locked_object_by_path(&self, path: &str) -> Option<LockInfo> {
        self.node_by_path(LockKind::Temporary, path).await
    }

    /// Check that a write to `path` is covered by the submitted tokens.
    ///
    /// Every real grant reaching `path` must have its token in `tokens`.
    pub async fn authorize(&self, path: &str, tokens: &[String]) -> LockResult<()> {
        let state = self.state.read().await;
        let blocking = state
            .real
            .covering(path)
            .into_iter()
            .find(|info| !tokens.contains(&info.token));

        match blocking {
            None => Ok(()),
            Some(info) => {
                debug!(path = %path, locked_at = %info.path, "Write refused, lock token not submitted");
                Err(LockError::Conflict {
                    path: path.to_string(),
                })
            }
        }
    }

    /// Grants of one forest that reach `path`
    pub async fn discover(&self, path: &str, kind: LockKind) -> Vec<LockInfo> {
        self.state.read().await.forest(kind).covering(path)
    }

    /// Every owned node of one forest
    pub async fn list_locks(&self, kind: LockKind) -> Vec<LockInfo> {
        self.state.read().await.forest(kind).owned()
    }

    /// Number of nodes in one forest, joints and root included
    pub async fn node_count(&self, kind: LockKind) -> usize {
        self.state.read().await.forest(kind).len()
    }

    /// Take a temporary lock released automatically when the guard drops
    pub async fn acquire_temporary(
        &self,
        path: &str,
        owner: &str,
        exclusive: bool,
        depth: Depth,
    ) -> LockResult<TemporaryLockGuard> {
        let request = LockRequest::new(path, owner, exclusive).with_depth(depth);
        let info = self.lock(LockKind::Temporary, request).await?;
        Ok(TemporaryLockGuard::new(
            info,
            owner.to_string(),
            self.release_tx.clone(),
        ))
    }

    /// Apply releases queued by dropped guards.
    ///
    /// Called before every mutation; call it directly from idle loops.
    /// Returns the number of grants released.
    pub async fn process_releases(&self) -> usize {
        let pending: Vec<PendingRelease> = {
            let mut rx = self.release_rx.lock().await;
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        if pending.is_empty() {
            return 0;
        }

        let mut released = 0;
        let mut state = self.state.write().await;
        for release in &pending {
            match state.temporary.unlock(&release.token, &release.owner) {
                Ok(_) => released += 1,
                // Expired or unlocked by token before the guard dropped
                Err(LockError::NotFound(_) | LockError::NotOwner { .. }) => {}
                Err(e) => warn!(token = %release.token, error = %e, "Failed to release guard"),
            }
        }
        debug!(queued = pending.len(), released, "Processed guard releases");
        released
    }

    /// Run timeout sweeps on both forests every `sweep_interval`
    pub fn spawn_sweeper(self: &Arc<Self>) -> Sweeper {
        let manager = Arc::clone(self);
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                manager.process_releases().await;
                for kind in [LockKind::Real, LockKind::Temporary] {
                    if let Err(e) = manager.check_timeouts(kind).await {
                        warn!(kind = %kind, error = %e, "Timeout sweep failed");
                    }
                }
            }
        });

        info!(interval_ms = period.as_millis() as u64, "Lock timeout sweeper started");
        Sweeper { handle }
    }

    // ========== Internal Methods ==========

    fn lease_secs(&self, kind: LockKind, requested: Option<u64>) -> u64 {
        match (kind, requested) {
            (LockKind::Temporary, None) => self.config.temporary_timeout.as_secs().min(MAX_LEASE_SECS),
            _ => self.config.lease_secs(requested),
        }
    }

    async fn node_by_token(&self, kind: LockKind, token: &str) -> Option<LockInfo> {
        let state = self.state.read().await;
        state.forest(kind).get_by_token(token).map(|node| node.info())
    }

    async fn node_by_path(&self, kind: LockKind, path: &str) -> Option<LockInfo> {
        let state = self.state.read().await;
        state.forest(kind).get(path).map(|node| node.info())
    }

    async fn publish(&self, events: Vec<LockEvent>) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        for event in &events {
            if let Err(e) = publisher.publish(event).await {
                warn!(event = %event.event_type, error = %e, "Failed to publish lock event");
            }
        }
    }
}

/// Handle to the background timeout sweep; dropping it stops the task
#[derive(Debug)]
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Stop the sweep task
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
