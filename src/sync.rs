//! Sync orchestration around an [`Api`] implementation.
//!
//! [`SyncService`] runs one sync at a time, keeps the `is_sync_running` and
//! `needs_update_after_sync` preferences current, and logs each run.
//!
//! The stored `is_sync_running` value is a status hint for other readers.
//! A process that dies mid-sync leaves it set, so a new service clears it
//! and [`SyncService::is_running`] answers from the service's own lock.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::api::{Api, ApiError};
use crate::preferences::{Preference, PreferenceStore};
use crate::storage::SyncSummary;

/// What a sync should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// Folders, feeds and items
    FullSync,
    /// Only what changed since the cached ETag
    SyncChangesOnly,
    /// Older items beyond what is stored
    LoadMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub sync_type: SyncType,
    /// Drop the cached ETag first, forcing a non-incremental fetch
    pub initial: bool,
}

impl SyncRequest {
    pub fn new(sync_type: SyncType) -> Self {
        Self {
            sync_type,
            initial: false,
        }
    }

    pub fn initial() -> Self {
        Self {
            sync_type: SyncType::FullSync,
            initial: true,
        }
    }
}

pub struct SyncService {
    api: Box<dyn Api>,
    prefs: Arc<PreferenceStore>,
    lock: Mutex<()>,
}

impl SyncService {
    /// Wrap `api`. An `is_sync_running` flag left behind by an earlier
    /// process is cleared.
    pub async fn new(api: Box<dyn Api>, prefs: Arc<PreferenceStore>) -> Self {
        let service = Self {
            api,
            prefs,
            lock: Mutex::new(()),
        };
        if service.prefs.bool(Preference::SyncRunning) {
            tracing::warn!("Clearing stale sync-running flag");
            service.set_flag(Preference::SyncRunning, false).await;
        }
        service
    }

    /// The client used for non-sync operations (feeds, metadata).
    pub fn api(&self) -> &dyn Api {
        self.api.as_ref()
    }

    /// Whether this service is running a sync right now.
    pub fn is_running(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Run one sync. Overlapping calls wait for the running one to finish.
    ///
    /// The API error is returned unchanged; flag bookkeeping failures are
    /// logged and never mask the sync result.
    pub async fn run(&self, request: SyncRequest) -> Result<SyncSummary, ApiError> {
        let _guard = self.lock.lock().await;

        self.set_flag(Preference::SyncRunning, true).await;
        let started = Instant::now();
        tracing::info!(
            sync_type = ?request.sync_type,
            initial = request.initial,
            api = %self.api.level(),
            "Sync started"
        );

        let result = self.api.sync(request).await;

        self.set_flag(Preference::SyncRunning, false).await;

        match &result {
            Ok(summary) => {
                self.set_flag(Preference::NeedsUpdateAfterSync, true).await;
                tracing::info!(
                    folders = summary.folders,
                    feeds = summary.feeds,
                    items = summary.items,
                    skipped = summary.skipped_items,
                    pruned = summary.pruned_items,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sync finished"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sync failed"
                );
            }
        }

        result
    }

    async fn set_flag(&self, pref: Preference, value: bool) {
        if let Err(e) = self.prefs.set_bool(pref, value).await {
            tracing::warn!(key = pref.key(), error = %e, "Failed to update sync flag");
        }
    }
}
