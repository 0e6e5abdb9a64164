use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    domain::{Bucket, PrFetchResults, PullRequest},
    github::PullRequestSource,
    notify::{Notification, Notifier},
    storage::SecretStore,
};

/// Owns the fetched buckets and decides which changes deserve a notification.
///
/// All state sits behind one mutex that is released while the fetch runs, so
/// a refresh requested while another is in flight returns
/// [`RefreshOutcome::Skipped`] instead of racing it.
pub struct PollController<S, N, K> {
    source: S,
    notifier: N,
    secrets: K,
    state: Mutex<ControllerState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Skipped,
    Updated,
    Failed,
}

#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub results: PrFetchResults,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub is_loading: bool,
}

struct ControllerState {
    results: PrFetchResults,
    last_updated: Option<DateTime<Utc>>,
    error: Option<String>,
    is_loading: bool,
    is_first_load: bool,
    notifications_enabled: bool,
    seen: SeenIds,
}

// Ids present in each notifying bucket on the previous successful poll.
#[derive(Default)]
struct SeenIds {
    needs_review: HashSet<String>,
    approved: HashSet<String>,
    changes_requested: HashSet<String>,
}

impl<S, N, K> PollController<S, N, K>
where
    S: PullRequestSource,
    N: Notifier,
    K: SecretStore,
{
    pub fn new(source: S, notifier: N, secrets: K, notifications_enabled: bool) -> Self {
        Self {
            source,
            notifier,
            secrets,
            state: Mutex::new(ControllerState {
                results: PrFetchResults::default(),
                last_updated: None,
                error: None,
                is_loading: false,
                is_first_load: true,
                notifications_enabled,
                seen: SeenIds::default(),
            }),
        }
    }

    pub fn refresh(&self) -> RefreshOutcome {
        {
            let mut state = self.lock();
            if state.is_loading {
                debug!("refresh skipped; a fetch is already running");
                return RefreshOutcome::Skipped;
            }
            state.is_loading = true;
            state.error = None;
        }
        let mut loading = LoadingFlag {
            state: &self.state,
            armed: true,
        };

        let token = self.secrets.get_secret();
        let outcome = self.source.fetch_all_prs(token.as_deref());

        let mut state = self.lock();
        state.is_loading = false;
        loading.armed = false;
        match outcome {
            Ok(results) => {
                info!(
                    needs_review = results.needs_review.len(),
                    authored = results.waiting_for_reviewers.len()
                        + results.approved.len()
                        + results.changes_requested.len()
                        + results.drafts.len(),
                    reviewed = results.my_changes_requested.len(),
                    "pull requests refreshed"
                );
                let pending = state.apply(results, Utc::now());
                drop(state);
                for notification in &pending {
                    self.notifier.show(notification);
                }
                RefreshOutcome::Updated
            }
            Err(err) => {
                warn!("Refresh failed: {err}");
                state.error = Some(err.to_string());
                RefreshOutcome::Failed
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            results: state.results.clone(),
            last_updated: state.last_updated,
            error: state.error.clone(),
            is_loading: state.is_loading,
        }
    }

    /// Current buckets with the given (snoozed) ids left out.
    pub fn visible_results(&self, hidden: &HashSet<String>) -> PrFetchResults {
        self.lock().results.without_ids(hidden)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.lock().notifications_enabled = enabled;
    }

    /// Forgets every previously seen id, so the next poll notifies about
    /// everything currently in a notifying bucket.
    pub fn reset_notification_tracking(&self) {
        self.lock().seen = SeenIds::default();
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// Clears `is_loading` if the fetch unwinds before the result is applied.
struct LoadingFlag<'a> {
    state: &'a Mutex<ControllerState>,
    armed: bool,
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_state(self.state).is_loading = false;
        }
    }
}

impl ControllerState {
    fn apply(&mut self, results: PrFetchResults, now: DateTime<Utc>) -> Vec<Notification> {
        let mut pending = Vec::new();

        if !self.is_first_load && self.notifications_enabled {
            let new_requests = newly_seen(&results.needs_review, &self.seen.needs_review);
            match new_requests.as_slice() {
                [] => {}
                [pr] => pending.push(Notification::review_requested(pr)),
                many => pending.push(Notification::review_requested_summary(many.len())),
            }
            for pr in newly_seen(&results.approved, &self.seen.approved) {
                pending.push(Notification::approved(pr));
            }
            for pr in newly_seen(&results.changes_requested, &self.seen.changes_requested) {
                pending.push(Notification::changes_requested(pr));
            }
        }

        // Replace rather than union so a PR that leaves a bucket notifies
        // again when it comes back.
        self.seen = SeenIds {
            needs_review: results.ids(Bucket::NeedsReview),
            approved: results.ids(Bucket::Approved),
            changes_requested: results.ids(Bucket::ChangesRequested),
        };
        self.results = results;
        self.last_updated = Some(now);
        self.is_first_load = false;
        pending
    }
}

fn newly_seen<'a>(current: &'a [PullRequest], seen: &HashSet<String>) -> Vec<&'a PullRequest> {
    current.iter().filter(|pr| !seen.contains(&pr.id)).collect()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        panic::{self, AssertUnwindSafe},
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
            mpsc::{self, Receiver, Sender},
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::{
        domain::{ReviewDecision, fixtures::pr_with},
        github::FetchError,
        notify::recording::RecordingNotifier,
        storage::memory::MemoryStore,
    };

    type Response = Result<PrFetchResults, FetchError>;

    #[derive(Default)]
    struct FakeSource {
        responses: Mutex<VecDeque<Response>>,
        calls: AtomicUsize,
        panic_next: AtomicBool,
        tokens: Mutex<Vec<Option<String>>>,
        // (entered, release) handshake that holds a fetch open.
        gate: Option<(Mutex<Sender<()>>, Mutex<Receiver<()>>)>,
    }

    impl FakeSource {
        fn with(responses: Vec<Response>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }
    }

    impl PullRequestSource for FakeSource {
        fn fetch_all_prs(&self, token: Option<&str>) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(token.map(str::to_owned));
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("source blew up");
            }
            if let Some((entered, release)) = &self.gate {
                entered.lock().unwrap().send(()).unwrap();
                release.lock().unwrap().recv().unwrap();
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PrFetchResults::default()))
        }
    }

    fn needs_review(ids: &[&str]) -> PrFetchResults {
        PrFetchResults {
            needs_review: ids.iter().map(|id| pr_with(id, None, false)).collect(),
            ..Default::default()
        }
    }

    fn controller(
        responses: Vec<Response>,
    ) -> PollController<FakeSource, RecordingNotifier, MemoryStore> {
        PollController::new(
            FakeSource::with(responses),
            RecordingNotifier::default(),
            MemoryStore::with_secret("ghp_test"),
            true,
        )
    }

    #[test]
    fn first_load_is_silent_and_later_polls_notify_new_prs() {
        let ctl = controller(vec![Ok(needs_review(&["a"])), Ok(needs_review(&["a", "b"]))]);

        assert_eq!(ctl.refresh(), RefreshOutcome::Updated);
        assert!(ctl.notifier.take().is_empty());

        assert_eq!(ctl.refresh(), RefreshOutcome::Updated);
        let shown = ctl.notifier.take();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Review requested");
        assert_eq!(shown[0].body, "PR b");
    }

    #[test]
    fn several_new_review_requests_collapse_into_a_summary() {
        let ctl = controller(vec![Ok(needs_review(&[])), Ok(needs_review(&["a", "b", "c"]))]);
        ctl.refresh();
        ctl.refresh();
        let shown = ctl.notifier.take();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].body, "3 pull requests need your review");
    }

    #[test]
    fn each_new_approval_and_change_request_notifies() {
        let second = PrFetchResults {
            approved: vec![
                pr_with("ap1", Some(ReviewDecision::Approved), false),
                pr_with("ap2", Some(ReviewDecision::Approved), false),
            ],
            changes_requested: vec![pr_with("cr", Some(ReviewDecision::ChangesRequested), false)],
            ..Default::default()
        };
        let ctl = controller(vec![Ok(PrFetchResults::default()), Ok(second)]);
        ctl.refresh();
        ctl.refresh();
        assert_eq!(
            ctl.notifier.titles(),
            vec!["Pull request approved", "Pull request approved", "Changes requested"]
        );
    }

    #[test]
    fn prs_that_leave_and_return_notify_again() {
        let ctl = controller(vec![
            Ok(needs_review(&["a"])),
            Ok(needs_review(&[])),
            Ok(needs_review(&["a"])),
        ]);
        ctl.refresh();
        ctl.refresh();
        assert!(ctl.notifier.take().is_empty());
        ctl.refresh();
        assert_eq!(ctl.notifier.take().len(), 1);
    }

    #[test]
    fn failure_keeps_previous_results_and_tracking() {
        let ctl = controller(vec![
            Ok(needs_review(&["a"])),
            Err(FetchError::InvalidResponse(502)),
            Ok(needs_review(&["a"])),
        ]);
        ctl.refresh();
        let before = ctl.snapshot();

        assert_eq!(ctl.refresh(), RefreshOutcome::Failed);
        let after = ctl.snapshot();
        assert_eq!(after.results, before.results);
        assert_eq!(after.last_updated, before.last_updated);
        assert!(!after.is_loading);
        assert_eq!(after.error.as_deref(), Some("GitHub returned HTTP status 502"));

        // Tracking sets were untouched, so "a" is not new.
        assert_eq!(ctl.refresh(), RefreshOutcome::Updated);
        assert!(ctl.notifier.take().is_empty());
        assert!(ctl.snapshot().error.is_none());
    }

    #[test]
    fn disabled_notifications_still_track_ids() {
        let ctl = controller(vec![
            Ok(needs_review(&[])),
            Ok(needs_review(&["a"])),
            Ok(needs_review(&["a"])),
        ]);
        ctl.set_notifications_enabled(false);
        ctl.refresh();
        ctl.refresh();
        ctl.set_notifications_enabled(true);
        ctl.refresh();
        assert!(ctl.notifier.take().is_empty());
    }

    #[test]
    fn reset_tracking_renotifies_current_prs() {
        let ctl = controller(vec![
            Ok(needs_review(&["a"])),
            Ok(needs_review(&["a", "b"])),
            Ok(needs_review(&["a", "b"])),
        ]);
        ctl.refresh();
        ctl.reset_notification_tracking();

        ctl.refresh();
        let shown = ctl.notifier.take();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].body, "2 pull requests need your review");

        ctl.refresh();
        assert!(ctl.notifier.take().is_empty());
    }

    #[test]
    fn panicking_fetch_clears_loading_flag() {
        let source = FakeSource::with(vec![Ok(needs_review(&["a"]))]);
        source.panic_next.store(true, Ordering::SeqCst);
        let ctl = PollController::new(
            source,
            RecordingNotifier::default(),
            MemoryStore::with_secret("t"),
            true,
        );

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| ctl.refresh()));
        assert!(unwound.is_err());
        assert!(!ctl.is_loading());

        assert_eq!(ctl.refresh(), RefreshOutcome::Updated);
        assert_eq!(ctl.snapshot().results.needs_review.len(), 1);
    }

    #[test]
    fn token_from_secret_store_is_passed_to_source() {
        let ctl = PollController::new(
            FakeSource::with(vec![Err(FetchError::NoToken)]),
            RecordingNotifier::default(),
            MemoryStore::default(),
            true,
        );
        assert_eq!(ctl.refresh(), RefreshOutcome::Failed);
        assert_eq!(*ctl.source.tokens.lock().unwrap(), vec![None]);
        assert!(ctl.snapshot().error.unwrap().contains("No GitHub token"));

        ctl.secrets.set_secret("ghp_x").unwrap();
        ctl.refresh();
        assert_eq!(ctl.source.tokens.lock().unwrap()[1].as_deref(), Some("ghp_x"));
    }

    #[test]
    fn refresh_while_loading_is_a_noop() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let source = FakeSource {
            responses: Mutex::new(vec![Ok(needs_review(&["a"]))].into()),
            gate: Some((Mutex::new(entered_tx), Mutex::new(release_rx))),
            ..Default::default()
        };
        let ctl = Arc::new(PollController::new(
            source,
            RecordingNotifier::default(),
            MemoryStore::with_secret("t"),
            true,
        ));

        let worker = {
            let ctl = Arc::clone(&ctl);
            thread::spawn(move || ctl.refresh())
        };
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("fetch started");

        assert!(ctl.is_loading());
        assert_eq!(ctl.refresh(), RefreshOutcome::Skipped);
        assert_eq!(ctl.source.calls.load(Ordering::SeqCst), 1);
        let during = ctl.snapshot();
        assert!(during.last_updated.is_none());
        assert_eq!(during.results.total_count(), 0);

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), RefreshOutcome::Updated);
        assert!(!ctl.is_loading());
        assert_eq!(ctl.snapshot().results.needs_review.len(), 1);
    }

    #[test]
    fn visible_results_hide_snoozed_ids() {
        let ctl = controller(vec![Ok(needs_review(&["a", "b"]))]);
        ctl.refresh();
        let hidden: HashSet<String> = ["a".to_owned()].into_iter().collect();
        let visible = ctl.visible_results(&hidden);
        assert_eq!(visible.needs_review.len(), 1);
        assert_eq!(visible.needs_review[0].id, "b");
    }
}
