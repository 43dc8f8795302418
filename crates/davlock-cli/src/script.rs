//! Line-oriented lock scripts
//!
//! Each non-empty line is one command run against a shared lock manager.
//! `$last` stands for the most recently granted token and `$N` for the
//! token of the N-th successful `lock` of the session.

use anyhow::{Context, anyhow, bail};
use davlock_core::dav::{normalize, strip_context_path};
use davlock_core::domain::locking::{Depth, LockInfo, LockKind, LockManager, LockRequest};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One parsed script command
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Lock {
        path: String,
        owner: String,
        exclusive: bool,
        depth: Depth,
        timeout_secs: Option<u64>,
        kind: LockKind,
    },
    Unlock {
        token: String,
        owner: String,
    },
    Refresh {
        token: String,
        timeout_secs: Option<u64>,
        kind: LockKind,
    },
    Show {
        path: String,
        kind: LockKind,
    },
    Discover {
        path: String,
        kind: LockKind,
    },
    List {
        kind: LockKind,
    },
    Sweep {
        kind: LockKind,
    },
    Clean,
    Authorize {
        path: String,
        tokens: Vec<String>,
    },
    Sleep(Duration),
}

/// Result of one command, printable as text or JSON
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Locked { lock: LockInfo },
    Conflict { path: String, reason: String },
    Unlocked { token: String },
    NotLocked { token: String },
    Refreshed { lock: LockInfo },
    Node { path: String, lock: Option<LockInfo> },
    Locks { locks: Vec<LockInfo> },
    Expired { locks: Vec<LockInfo> },
    Removed { nodes: usize },
    Allowed { path: String },
    Denied { path: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked { lock } => write!(f, "locked {}", lock),
            Self::Conflict { path, reason } => write!(f, "conflict {}: {}", path, reason),
            Self::Unlocked { token } => write!(f, "unlocked {}", token),
            Self::NotLocked { token } => write!(f, "not locked {}", token),
            Self::Refreshed { lock } => {
                write!(f, "refreshed {} remaining={}s", lock, lock.remaining_secs())
            }
            Self::Node { path, lock } => match lock {
                Some(lock) => write!(f, "{}", lock),
                None => write!(f, "no lock at {}", path),
            },
            Self::Locks { locks } => {
                if locks.is_empty() {
                    return write!(f, "no locks");
                }
                let lines: Vec<String> = locks.iter().map(ToString::to_string).collect();
                write!(f, "{}", lines.join("\n"))
            }
            Self::Expired { locks } => {
                write!(f, "expired {}", locks.len())?;
                for lock in locks {
                    write!(f, "\n  {}", lock)?;
                }
                Ok(())
            }
            Self::Removed { nodes } => write!(f, "removed {} nodes", nodes),
            Self::Allowed { path } => write!(f, "allowed {}", path),
            Self::Denied { path } => write!(f, "denied {}", path),
        }
    }
}

/// Parse one script line; blank lines and `#` comments yield `None`
pub fn parse_line(line: &str) -> anyhow::Result<Option<ScriptCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words: Vec<&str> = line.split_whitespace().collect();
    let name = words.remove(0);
    let kind = take_kind_flag(&mut words);

    let command = match name {
        "lock" => {
            let [path, owner, mode, depth, rest @ ..] = words.as_slice() else {
                bail!("usage: lock <path> <owner> <exclusive|shared> <0|1|infinity> [timeout] [temp]");
            };
            let exclusive = match *mode {
                "exclusive" => true,
                "shared" => false,
                other => bail!("unknown lock mode '{}', expected exclusive or shared", other),
            };
            ScriptCommand::Lock {
                path: path.to_string(),
                owner: owner.to_string(),
                exclusive,
                depth: parse_depth_word(depth)?,
                timeout_secs: optional_secs(rest)?,
                kind,
            }
        }
        "unlock" => {
            let [token, owner] = words.as_slice() else {
                bail!("usage: unlock <token> <owner>");
            };
            ScriptCommand::Unlock {
                token: token.to_string(),
                owner: owner.to_string(),
            }
        }
        "refresh" => {
            let [token, rest @ ..] = words.as_slice() else {
                bail!("usage: refresh <token> [timeout] [temp]");
            };
            ScriptCommand::Refresh {
                token: token.to_string(),
                timeout_secs: optional_secs(rest)?,
                kind,
            }
        }
        "show" => ScriptCommand::Show {
            path: single_path(&words, "show <path> [temp]")?,
            kind,
        },
        "discover" => ScriptCommand::Discover {
            path: single_path(&words, "discover <path> [temp]")?,
            kind,
        },
        "list" => {
            no_arguments(&words, "list [temp]")?;
            ScriptCommand::List { kind }
        }
        "sweep" => {
            no_arguments(&words, "sweep [temp]")?;
            ScriptCommand::Sweep { kind }
        }
        "clean" => {
            no_arguments(&words, "clean")?;
            ScriptCommand::Clean
        }
        "authorize" => {
            let [path, tokens @ ..] = words.as_slice() else {
                bail!("usage: authorize <path> [token...]");
            };
            ScriptCommand::Authorize {
                path: path.to_string(),
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
            }
        }
        "sleep" => {
            let [secs] = words.as_slice() else {
                bail!("usage: sleep <secs>");
            };
            let secs: f64 = secs
                .parse()
                .with_context(|| format!("invalid duration '{}'", secs))?;
            if !secs.is_finite() || secs < 0.0 {
                bail!("invalid duration '{}'", secs);
            }
            ScriptCommand::Sleep(Duration::from_secs_f64(secs))
        }
        other => bail!("unknown command '{}'", other),
    };
    Ok(Some(command))
}

fn take_kind_flag(words: &mut Vec<&str>) -> LockKind {
    let temporary = words.last() == Some(&"temp");
    if temporary {
        words.pop();
    }
    LockKind::from_temporary(temporary)
}

fn parse_depth_word(word: &str) -> anyhow::Result<Depth> {
    match word {
        "0" => Ok(Depth::Zero),
        "1" => Ok(Depth::One),
        "infinity" => Ok(Depth::Infinity),
        other => Err(anyhow!("unknown depth '{}', expected 0, 1 or infinity", other)),
    }
}

fn optional_secs(rest: &[&str]) -> anyhow::Result<Option<u64>> {
    match rest {
        [] => Ok(None),
        [secs] => secs
            .parse()
            .map(Some)
            .with_context(|| format!("invalid timeout '{}'", secs)),
        _ => Err(anyhow!("too many arguments")),
    }
}

fn single_path(words: &[&str], usage: &str) -> anyhow::Result<String> {
    match words {
        [path] => Ok(path.to_string()),
        _ => Err(anyhow!("usage: {}", usage)),
    }
}

fn no_arguments(words: &[&str], usage: &str) -> anyhow::Result<()> {
    if words.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("usage: {}", usage))
    }
}

/// Interpreter state for one script or shell session
pub struct Session {
    manager: Arc<LockManager>,
    context_path: String,
    granted: Vec<String>,
}

impl Session {
    pub fn new(manager: Arc<LockManager>, context_path: impl Into<String>) -> Self {
        Self {
            manager,
            context_path: context_path.into(),
            granted: Vec::new(),
        }
    }

    /// Parse and run one line
    pub async fn execute(&mut self, line: &str) -> anyhow::Result<Option<Outcome>> {
        match parse_line(line)? {
            Some(command) => self.run(command).await,
            None => Ok(None),
        }
    }

    /// Run one parsed command
    pub async fn run(&mut self, command: ScriptCommand) -> anyhow::Result<Option<Outcome>> {
        let manager = Arc::clone(&self.manager);

        let outcome = match command {
            ScriptCommand::Lock {
                path,
                owner,
                exclusive,
                depth,
                timeout_secs,
                kind,
            } => {
                let path = self.resource_path(&path)?;
                let mut request = LockRequest::new(path.clone(), owner, exclusive).with_depth(depth);
                request.timeout_secs = timeout_secs;

                match manager.lock(kind, request).await {
                    Ok(lock) => {
                        self.granted.push(lock.token.clone());
                        Outcome::Locked { lock }
                    }
                    Err(e) if e.is_conflict() => Outcome::Conflict {
                        path,
                        reason: e.to_string(),
                    },
                    Err(e) => return Err(e.into()),
                }
            }
            ScriptCommand::Unlock { token, owner } => {
                let token = self.resolve_token(&token)?;
                if manager.unlock(&token, &owner).await? {
                    Outcome::Unlocked { token }
                } else {
                    Outcome::NotLocked { token }
                }
            }
            ScriptCommand::Refresh {
                token,
                timeout_secs,
                kind,
            } => {
                let token = self.resolve_token(&token)?;
                Outcome::Refreshed {
                    lock: manager.refresh(&token, kind, timeout_secs).await?,
                }
            }
            ScriptCommand::Show { path, kind } => {
                let path = self.resource_path(&path)?;
                let lock = match kind {
                    LockKind::Real => manager.locked_object_by_path(&path).await,
                    LockKind::Temporary => manager.temp_locked_object_by_path(&path).await,
                };
                Outcome::Node { path, lock }
            }
            ScriptCommand::Discover { path, kind } => {
                let path = self.resource_path(&path)?;
                Outcome::Locks {
                    locks: manager.discover(&path, kind).await,
                }
            }
            ScriptCommand::List { kind } => Outcome::Locks {
                locks: manager.list_locks(kind).await,
            },
            ScriptCommand::Sweep { kind } => Outcome::Expired {
                locks: manager.check_timeouts(kind).await?,
            },
            ScriptCommand::Clean => {
                let nodes = manager.clean_locked_objects(LockKind::Real).await?
                    + manager.clean_locked_objects(LockKind::Temporary).await?;
                Outcome::Removed { nodes }
            }
            ScriptCommand::Authorize { path, tokens } => {
                let path = self.resource_path(&path)?;
                let tokens = tokens
                    .iter()
                    .map(|token| self.resolve_token(token))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                match manager.authorize(&path, &tokens).await {
                    Ok(()) => Outcome::Allowed { path },
                    Err(e) if e.is_conflict() => Outcome::Denied { path },
                    Err(e) => return Err(e.into()),
                }
            }
            ScriptCommand::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                return Ok(None);
            }
        };
        Ok(Some(outcome))
    }

    fn resource_path(&self, raw: &str) -> anyhow::Result<String> {
        let normalized = normalize(raw).ok_or_else(|| davlock_core::Error::InvalidPath(raw.to_string()))?;
        Ok(strip_context_path(&normalized, &self.context_path).to_string())
    }

    fn resolve_token(&self, word: &str) -> anyhow::Result<String> {
        let Some(reference) = word.strip_prefix('$') else {
            return Ok(word.to_string());
        };
        let token = if reference == "last" {
            self.granted.last()
        } else {
            let index: usize = reference
                .parse()
                .with_context(|| format!("unknown token reference '{}'", word))?;
            index.checked_sub(1).and_then(|i| self.granted.get(i))
        };
        token
            .cloned()
            .ok_or_else(|| anyhow!("no granted lock for '{}'", word))
    }
}
