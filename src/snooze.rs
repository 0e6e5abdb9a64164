use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    domain::{PullRequest, SnoozeDuration, SnoozeEntry},
    storage::{BlobStore, StorageError},
};

pub const SNOOZE_KEY: &str = "snoozed_prs";

/// Persistent list of snoozed pull requests, keyed by PR id.
///
/// Every mutation rewrites the whole list. Unreadable storage starts empty.
pub struct SnoozeStore<B: BlobStore> {
    backend: B,
    entries: Vec<SnoozeEntry>,
}

impl<B: BlobStore> SnoozeStore<B> {
    pub fn load(backend: B) -> Self {
        let entries = match backend.load_blob(SNOOZE_KEY) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!("Discarding unreadable snooze list: {err}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("Failed to load snooze list: {err}");
                Vec::new()
            }
        };
        Self { backend, entries }
    }

    pub fn snooze(&mut self, pr: &PullRequest, duration: SnoozeDuration) {
        self.snooze_at(pr, duration, Utc::now());
    }

    pub fn snooze_at(&mut self, pr: &PullRequest, duration: SnoozeDuration, now: DateTime<Utc>) {
        self.entries.retain(|entry| entry.pr_id != pr.id);
        self.entries.push(SnoozeEntry {
            pr_id: pr.id.clone(),
            pr_title: pr.title.clone(),
            pr_repository: pr.repository.clone(),
            pr_number: pr.number,
            pr_url: pr.url.clone(),
            snoozed_at: now,
            duration,
        });
        self.save();
    }

    pub fn unsnooze(&mut self, pr_id: &str) {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.pr_id != pr_id);
        if self.entries.len() != before {
            self.save();
        }
    }

    pub fn clean_expired(&mut self) -> usize {
        self.clean_expired_at(Utc::now())
    }

    /// Drops entries expired at `now`; returns how many were removed.
    pub fn clean_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "expired snoozes cleaned");
            self.save();
        }
        removed
    }

    pub fn entries(&self) -> &[SnoozeEntry] {
        &self.entries
    }

    pub fn sorted_entries(&self) -> Vec<SnoozeEntry> {
        let mut sorted = self.entries.clone();
        sorted.sort_by_cached_key(|entry| entry.pr_title.to_lowercase());
        sorted
    }

    pub fn snoozed_ids(&self) -> HashSet<String> {
        self.entries.iter().map(|entry| entry.pr_id.clone()).collect()
    }

    pub fn is_snoozed(&self, pr_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.pr_id == pr_id)
    }

    fn save(&self) {
        let result = serde_json::to_vec(&self.entries)
            .map_err(StorageError::from)
            .and_then(|bytes| self.backend.persist_blob(SNOOZE_KEY, &bytes));
        if let Err(err) = result {
            warn!("Failed to persist snooze list: {err}");
        }
    }
}
