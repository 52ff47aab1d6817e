pub mod adapters;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::flashcard::Deck;
use crate::core::folder::Folder;
use crate::core::planner::PlannerBlock;
use crate::core::session::ChatSession;
use crate::platform::{PlatformClient, SignInOptions};
use adapters::{FlashcardSync, FlashcardSyncPayload, FolderSync, PlannerSync, SessionSync};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Up,
    Down,
    Idle,
}

impl Default for SyncDirection {
    fn default() -> Self {
        Self::Idle
    }
}

/// Current sync state, polled by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_changes: usize,
    pub error: Option<String>,
    pub is_syncing: bool,
    pub direction: SyncDirection,
}

/// The four synced collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDomain {
    Sessions,
    Folders,
    Flashcards,
    Planner,
}

/// Full remote state pulled by [`DataSyncManager::sync_from_cloud`]. The
/// manager never applies it to local stores; the caller does.
#[derive(Debug, Clone, Default)]
pub struct CloudSnapshot {
    pub sessions: Vec<ChatSession>,
    pub folders: Vec<Folder>,
    pub flashcards: FlashcardSyncPayload,
    pub planner_blocks: Vec<PlannerBlock>,
}

/// A record that can take part in last-write-wins reconciliation.
pub trait Synced {
    fn sync_id(&self) -> Uuid;
    fn last_modified(&self) -> DateTime<Utc>;
}

impl Synced for ChatSession {
    fn sync_id(&self) -> Uuid {
        self.id
    }
    fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Synced for Folder {
    fn sync_id(&self) -> Uuid {
        self.id
    }
    fn last_modified(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Synced for Deck {
    fn sync_id(&self) -> Uuid {
        self.id
    }
    fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Synced for PlannerBlock {
    fn sync_id(&self) -> Uuid {
        self.id
    }
    fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Merge a pulled remote collection into the local one, last write wins per
/// record. Records only one side knows about are kept; when both sides have
/// a record, the more recently modified version survives. Local order is
/// preserved, remote-only records append in remote order.
pub fn merge_last_write_wins<T: Synced + Clone>(local: &[T], remote: &[T]) -> Vec<T> {
    let remote_by_id: HashMap<Uuid, &T> = remote.iter().map(|r| (r.sync_id(), r)).collect();

    let mut merged: Vec<T> = local
        .iter()
        .map(|l| match remote_by_id.get(&l.sync_id()) {
            Some(r) if r.last_modified() > l.last_modified() => (*r).clone(),
            _ => l.clone(),
        })
        .collect();

    let local_ids: std::collections::HashSet<Uuid> = local.iter().map(|l| l.sync_id()).collect();
    for r in remote {
        if !local_ids.contains(&r.sync_id()) {
            merged.push(r.clone());
        }
    }
    merged
}

#[derive(Default)]
struct ManagerState {
    initialized: bool,
    last_sync: Option<DateTime<Utc>>,
    error: Option<String>,
    is_syncing: bool,
    direction: SyncDirection,
    dirty: HashMap<SyncDomain, usize>,
}

/// Orchestrates the per-domain sync adapters over the platform cloud store.
///
/// Local stores are the source of truth: pushes replace remote collections
/// with local state, pulls hand back a [`CloudSnapshot`] for the caller to
/// apply (see [`merge_last_write_wins`]).
pub struct DataSyncManager {
    platform: PlatformClient,
    pub sessions: SessionSync,
    pub folders: FolderSync,
    pub flashcards: FlashcardSync,
    pub planner: PlannerSync,
    state: Mutex<ManagerState>,
}

impl DataSyncManager {
    pub fn new(platform: PlatformClient) -> Self {
        Self {
            sessions: SessionSync::new(platform.clone()),
            folders: FolderSync::new(platform.clone()),
            flashcards: FlashcardSync::new(platform.clone()),
            planner: PlannerSync::new(platform.clone()),
            platform,
            state: Mutex::new(ManagerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Establish the platform session. Idempotent; returns false (not an
    /// error) when the platform is unavailable or sign-in is rejected.
    pub async fn initialize(&self) -> bool {
        if self.lock().initialized {
            return true;
        }
        if !self.platform.is_available() {
            log::info!("sync disabled: platform unavailable");
            return false;
        }
        match self.platform.sign_in(&SignInOptions::default()).await {
            Ok(Some(_)) => {
                let mut state = self.lock();
                state.initialized = true;
                state.error = None;
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("sync initialization failed: {}", e);
                self.lock().error = Some(e);
                false
            }
        }
    }

    /// Tear down sync state. Safe to call when never initialized.
    pub fn reset(&self) {
        *self.lock() = ManagerState::default();
        log::debug!("sync manager reset");
    }

    /// Synchronous status snapshot for UI polling.
    pub fn get_sync_status(&self) -> SyncStatus {
        let state = self.lock();
        SyncStatus {
            is_online: self.platform.is_available() && self.platform.is_signed_in(),
            last_sync: state.last_sync,
            pending_changes: state.dirty.values().sum(),
            error: state.error.clone(),
            is_syncing: state.is_syncing,
            direction: state.direction,
        }
    }

    /// Record a local mutation awaiting push.
    pub fn mark_dirty(&self, domain: SyncDomain) {
        *self.lock().dirty.entry(domain).or_insert(0) += 1;
    }

    /// Pull the full remote snapshot. The caller applies it; local stores
    /// are not touched here.
    pub async fn sync_from_cloud(&self) -> Result<CloudSnapshot, String> {
        {
            let mut state = self.lock();
            state.is_syncing = true;
            state.direction = SyncDirection::Down;
        }

        let result = self.pull_snapshot().await;

        let mut state = self.lock();
        state.is_syncing = false;
        state.direction = SyncDirection::Idle;
        match &result {
            Ok(snapshot) => {
                state.last_sync = Some(Utc::now());
                state.error = None;
                log::info!(
                    "pulled {} sessions, {} folders, {} hot decks ({} cold), {} planner blocks",
                    snapshot.sessions.len(),
                    snapshot.folders.len(),
                    snapshot.flashcards.decks.len(),
                    snapshot.flashcards.cold_deck_ids.len(),
                    snapshot.planner_blocks.len(),
                );
            }
            Err(e) => {
                state.error = Some(e.clone());
            }
        }
        result
    }

    async fn pull_snapshot(&self) -> Result<CloudSnapshot, String> {
        Ok(CloudSnapshot {
            sessions: self.sessions.load_all().await?,
            folders: self.folders.load_all().await?,
            flashcards: self.flashcards.load_payload().await?,
            planner_blocks: self.planner.load_all().await?,
        })
    }

    /// Push current local sessions; clears the domain's pending count on
    /// success, records the error on failure. The error also propagates so
    /// the caller can surface it and offer a retry.
    pub async fn save_sessions(&self, sessions: &[ChatSession]) -> Result<(), String> {
        self.push(SyncDomain::Sessions, self.sessions.save_all(sessions)).await
    }

    pub async fn save_folders(&self, folders: &[Folder]) -> Result<(), String> {
        self.push(SyncDomain::Folders, self.folders.save_all(folders)).await
    }

    pub async fn save_flashcards(&self, decks: &[Deck]) -> Result<(), String> {
        self.push(SyncDomain::Flashcards, self.flashcards.save_all(decks)).await
    }

    pub async fn save_planner(&self, blocks: &[PlannerBlock]) -> Result<(), String> {
        self.push(SyncDomain::Planner, self.planner.save_all(blocks)).await
    }

    async fn push(
        &self,
        domain: SyncDomain,
        op: impl std::future::Future<Output = Result<(), String>>,
    ) -> Result<(), String> {
        {
            let mut state = self.lock();
            state.is_syncing = true;
            state.direction = SyncDirection::Up;
        }

        let result = op.await;

        let mut state = self.lock();
        state.is_syncing = false;
        state.direction = SyncDirection::Idle;
        match &result {
            Ok(()) => {
                state.dirty.remove(&domain);
                state.last_sync = Some(Utc::now());
                state.error = None;
            }
            Err(e) => {
                log::warn!("push of {:?} failed: {}", domain, e);
                state.error = Some(e.clone());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session_at(title: &str, updated_at: DateTime<Utc>) -> ChatSession {
        let mut s = ChatSession::new(title);
        s.updated_at = updated_at;
        s
    }

    #[test]
    fn merge_keeps_newer_side_per_record() {
        let now = Utc::now();
        let shared_local = session_at("local title", now);
        let mut shared_remote = shared_local.clone();
        shared_remote.title = "remote title".to_string();
        shared_remote.updated_at = now + Duration::seconds(10);

        let stale_remote = session_at("stale", now - Duration::seconds(30));
        let mut fresh_local = stale_remote.clone();
        fresh_local.title = "fresh".to_string();
        fresh_local.updated_at = now;

        let local_only = session_at("local only", now);
        let remote_only = session_at("remote only", now);

        let local = vec![shared_local.clone(), fresh_local.clone(), local_only.clone()];
        let remote = vec![shared_remote.clone(), stale_remote, remote_only.clone()];

        let merged = merge_last_write_wins(&local, &remote);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].title, "remote title");
        assert_eq!(merged[1].title, "fresh");
        assert_eq!(merged[2].title, "local only");
        assert_eq!(merged[3].title, "remote only");
    }

    #[test]
    fn merge_ties_keep_local() {
        let now = Utc::now();
        let local = session_at("same moment local", now);
        let mut remote = local.clone();
        remote.title = "same moment remote".to_string();

        let merged = merge_last_write_wins(&[local], &[remote]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "same moment local");
    }

    #[tokio::test]
    async fn initialize_without_platform_is_false_and_repeatable() {
        let manager = DataSyncManager::new(PlatformClient::unavailable());
        assert!(!manager.initialize().await);
        assert!(!manager.initialize().await);

        let status = manager.get_sync_status();
        assert!(!status.is_online);
        assert!(!status.is_syncing);
        assert_eq!(status.direction, SyncDirection::Idle);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn reset_is_safe_when_never_initialized() {
        let manager = DataSyncManager::new(PlatformClient::unavailable());
        manager.reset();
        assert_eq!(manager.get_sync_status().pending_changes, 0);
    }

    #[tokio::test]
    async fn pending_changes_accumulate_until_a_successful_push() {
        let manager = DataSyncManager::new(PlatformClient::unavailable());
        manager.mark_dirty(SyncDomain::Sessions);
        manager.mark_dirty(SyncDomain::Sessions);
        manager.mark_dirty(SyncDomain::Planner);
        assert_eq!(manager.get_sync_status().pending_changes, 3);

        // Push fails (no platform): the error propagates, counts stay.
        let err = manager.save_sessions(&[]).await.unwrap_err();
        let status = manager.get_sync_status();
        assert_eq!(status.pending_changes, 3);
        assert_eq!(status.error.as_deref(), Some(err.as_str()));
        assert!(!status.is_syncing);
    }

    #[tokio::test]
    async fn pull_without_platform_yields_empty_snapshot() {
        let manager = DataSyncManager::new(PlatformClient::unavailable());
        let snapshot = manager.sync_from_cloud().await.unwrap();
        assert!(snapshot.sessions.is_empty());
        assert!(snapshot.folders.is_empty());
        assert!(snapshot.planner_blocks.is_empty());

        let status = manager.get_sync_status();
        assert!(status.last_sync.is_some());
        assert_eq!(status.direction, SyncDirection::Idle);
    }
}
