//! Whitelist and scope exemptions.
//!
//! Two checks short-circuit the pipeline to tier `none`:
//!
//! - [`ExemptionGate::is_exempt`] on the channel/thread the event arrived
//!   in, evaluated before any extraction work.
//! - [`ExemptionGate::is_whitelisted`] on the computed hashes, evaluated after
//!   extraction and before the matcher.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GateConfig;
use crate::error::{Result, WardenError};
use crate::fingerprint::{ContentHash, Fingerprint, FingerprintSet};
use crate::store::snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Channel,
    Thread,
}

/// Where an event was posted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub kind: ScopeKind,
    pub id: String,
}

impl ScopeRef {
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Channel,
            id: id.into(),
        }
    }

    pub fn thread(id: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Thread,
            id: id.into(),
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScopeKind::Channel => write!(f, "channel:{}", self.id),
            ScopeKind::Thread => write!(f, "thread:{}", self.id),
        }
    }
}

/// Content-level whitelist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WhitelistSet {
    pub content_hashes: BTreeSet<ContentHash>,
    pub perceptual_hashes: BTreeSet<Fingerprint>,
}

impl WhitelistSet {
    pub fn is_empty(&self) -> bool {
        self.content_hashes.is_empty() && self.perceptual_hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.content_hashes.len() + self.perceptual_hashes.len()
    }

    /// True when the content hash or any perceptual hash of `set` is listed.
    pub fn contains(&self, set: &FingerprintSet, content_hash: &ContentHash) -> bool {
        self.content_hashes.contains(content_hash)
            || set
                .perceptual_hashes()
                .iter()
                .any(|h| self.perceptual_hashes.contains(h))
    }

    /// Union `other` in. Returns the number of entries that were new.
    pub fn union(&mut self, other: &WhitelistSet) -> usize {
        let before = self.len();
        self.content_hashes.extend(other.content_hashes.iter().copied());
        self.perceptual_hashes
            .extend(other.perceptual_hashes.iter().cloned());
        self.len() - before
    }
}

/// Scope exemptions plus the shared whitelist.
#[derive(Debug)]
pub struct ExemptionGate {
    scopes: DashSet<ScopeRef>,
    exempt_all_threads: bool,
    whitelist: RwLock<WhitelistSet>,
    whitelist_path: Option<PathBuf>,
}

impl Default for ExemptionGate {
    fn default() -> Self {
        Self::new(&GateConfig::default())
    }
}

impl ExemptionGate {
    pub fn new(config: &GateConfig) -> Self {
        let scopes = DashSet::new();
        for id in &config.exempt_channels {
            scopes.insert(ScopeRef::channel(id.clone()));
        }
        for id in &config.exempt_threads {
            scopes.insert(ScopeRef::thread(id.clone()));
        }
        Self {
            scopes,
            exempt_all_threads: config.exempt_all_threads,
            whitelist: RwLock::new(WhitelistSet::default()),
            whitelist_path: None,
        }
    }

    /// Gate whose whitelist is backed by `path`, loaded now.
    pub fn open(config: &GateConfig, path: impl Into<PathBuf>) -> Result<Self> {
        let mut gate = Self::new(config);
        gate.whitelist_path = Some(path.into());
        gate.load_whitelist()?;
        Ok(gate)
    }

    fn whitelist_read(&self) -> RwLockReadGuard<'_, WhitelistSet> {
        self.whitelist.read().unwrap_or_else(|e| e.into_inner())
    }

    fn whitelist_write(&self) -> RwLockWriteGuard<'_, WhitelistSet> {
        self.whitelist.write().unwrap_or_else(|e| e.into_inner())
    }

    fn backing_path(&self) -> Result<&Path> {
        self.whitelist_path
            .as_deref()
            .ok_or_else(|| WardenError::InvalidConfig("whitelist has no backing file".into()))
    }

    pub fn is_exempt(&self, scope: &ScopeRef) -> bool {
        (self.exempt_all_threads && scope.kind == ScopeKind::Thread) || self.scopes.contains(scope)
    }

    pub fn is_whitelisted(&self, set: &FingerprintSet, content_hash: &ContentHash) -> bool {
        self.whitelist_read().contains(set, content_hash)
    }

    /// Content-hash-only check for attachments that could not be decoded.
    pub fn is_content_whitelisted(&self, content_hash: &ContentHash) -> bool {
        self.whitelist_read().content_hashes.contains(content_hash)
    }

    pub fn exempt(&self, scope: ScopeRef) -> bool {
        let added = self.scopes.insert(scope.clone());
        if added {
            info!(scope = %scope, "Scope exempted");
        }
        added
    }

    pub fn unexempt(&self, scope: &ScopeRef) -> bool {
        let removed = self.scopes.remove(scope).is_some();
        if removed {
            info!(scope = %scope, "Scope exemption removed");
        }
        removed
    }

    pub fn exempt_scopes(&self) -> Vec<ScopeRef> {
        self.scopes.iter().map(|s| s.key().clone()).collect()
    }

    /// Whitelist the content hash and every perceptual hash of `set`.
    pub fn whitelist_fingerprints(&self, set: &FingerprintSet) -> usize {
        let mut entry = WhitelistSet::default();
        entry.content_hashes.insert(set.content_hash());
        entry
            .perceptual_hashes
            .extend(set.perceptual_hashes().iter().cloned());
        self.union_whitelist(&entry)
    }

    /// Union `entries` into the whitelist under a single write lock.
    pub fn union_whitelist(&self, entries: &WhitelistSet) -> usize {
        let added = self.whitelist_write().union(entries);
        if added > 0 {
            info!(added, "Whitelist extended");
        }
        added
    }

    /// Union `entries` and persist the result before it becomes visible.
    ///
    /// The merged set is written to the backing file first; on a write
    /// failure the in-memory whitelist is left exactly as it was, so a retry
    /// sees the same entries as new and saves them again.
    pub fn commit_whitelist(&self, entries: &WhitelistSet) -> Result<usize> {
        let path = self.backing_path()?;
        let mut live = self.whitelist_write();
        let mut next = live.clone();
        let added = next.union(entries);
        if added == 0 {
            return Ok(0);
        }

        snapshot::write(path, &next)?;
        *live = next;
        info!(path = %path.display(), added, "Whitelist extended and saved");
        Ok(added)
    }

    pub fn whitelist(&self) -> WhitelistSet {
        self.whitelist_read().clone()
    }

    pub fn load_whitelist(&self) -> Result<usize> {
        let path = self.backing_path()?;
        let loaded: WhitelistSet = snapshot::read(path)?.unwrap_or_default();
        let count = loaded.len();
        *self.whitelist_write() = loaded;
        debug!(path = %path.display(), entries = count, "Loaded whitelist");
        Ok(count)
    }

    pub fn save_whitelist(&self) -> Result<()> {
        let path = self.backing_path()?;
        let whitelist = self.whitelist();
        snapshot::write(path, &whitelist)?;
        info!(path = %path.display(), entries = whitelist.len(), "Saved whitelist");
        Ok(())
    }
}
