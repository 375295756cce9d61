//! In-memory index of live batches with time- and size-based eviction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::batch::BatchHandle;

pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_MAX_BATCHES: usize = 256;

pub struct BatchRegistry {
    batches: RwLock<HashMap<Uuid, BatchHandle>>,
    ttl: Duration,
    max_batches: usize,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_BATCHES)
    }
}

impl BatchRegistry {
    pub fn new(ttl: Duration, max_batches: usize) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            ttl,
            max_batches: max_batches.max(1),
        }
    }

    pub fn insert(&self, batch: BatchHandle) -> Uuid {
        let id = batch.lock().id();
        self.write().insert(id, batch);
        self.evict_overflow();
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<BatchHandle> {
        self.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop finished batches older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expired: Vec<Uuid> = self
            .read()
            .iter()
            .filter_map(|(id, handle)| {
                let b = handle.lock();
                let finished = b.finished_at()?;
                (now - finished >= ttl).then_some(*id)
            })
            .collect();
        self.remove_all(&expired)
    }

    /// While over capacity, drop the oldest finished batches. Running batches are never evicted.
    fn evict_overflow(&self) -> usize {
        let excess = self.len().saturating_sub(self.max_batches);
        if excess == 0 {
            return 0;
        }
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .read()
            .iter()
            .filter_map(|(id, handle)| {
                let b = handle.lock();
                if !b.status().is_terminal() {
                    return None;
                }
                Some((b.finished_at().unwrap_or_else(|| b.created_at()), *id))
            })
            .collect();
        finished.sort();
        let victims: Vec<Uuid> = finished.into_iter().take(excess).map(|(_, id)| id).collect();
        self.remove_all(&victims)
    }

    fn remove_all(&self, ids: &[Uuid]) -> usize {
        let removed: Vec<BatchHandle> = {
            let mut map = self.write();
            ids.iter().filter_map(|id| map.remove(id)).collect()
        };
        for handle in &removed {
            let (id, dir) = {
                let b = handle.lock();
                (b.id(), b.workspace_dir().map(PathBuf::from))
            };
            if let Some(dir) = dir.filter(|d| d.is_dir()) {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    log::warn!("Failed to remove {} for batch {}: {}", dir.display(), id, e);
                }
            }
            log::info!("Evicted batch {}", id);
        }
        removed.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, BatchHandle>> {
        self.batches.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, BatchHandle>> {
        self.batches.write().unwrap_or_else(|e| e.into_inner())
    }
}
