use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// Domain data structures shared across modules.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequest {
    pub id: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub repository: String,
    pub author: String,
    pub author_avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_draft: bool,
    pub review_decision: Option<ReviewDecision>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub total_comments: u64,
    pub reviewers: Vec<Reviewer>,
}

impl PullRequest {
    /// `owner/name #123`, used as a notification subtitle and in listings.
    pub fn reference(&self) -> String {
        format!("{} #{}", self.repository, self.number)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reviewer {
    pub login: String,
    pub avatar_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    ReviewRequired,
}

impl ReviewDecision {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewDecision::Approved => "Approved",
            ReviewDecision::ChangesRequested => "Changes requested",
            ReviewDecision::ReviewRequired => "Review required",
        }
    }
}

/// Names of the six buckets, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    NeedsReview,
    WaitingForReviewers,
    Approved,
    ChangesRequested,
    MyChangesRequested,
    Drafts,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::NeedsReview,
        Bucket::WaitingForReviewers,
        Bucket::Approved,
        Bucket::ChangesRequested,
        Bucket::MyChangesRequested,
        Bucket::Drafts,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Bucket::NeedsReview => "Needs your review",
            Bucket::WaitingForReviewers => "Waiting for reviewers",
            Bucket::Approved => "Approved",
            Bucket::ChangesRequested => "Changes requested",
            Bucket::MyChangesRequested => "Reviewed by you",
            Bucket::Drafts => "Drafts",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrFetchResults {
    pub needs_review: Vec<PullRequest>,
    pub waiting_for_reviewers: Vec<PullRequest>,
    pub approved: Vec<PullRequest>,
    pub changes_requested: Vec<PullRequest>,
    pub my_changes_requested: Vec<PullRequest>,
    pub drafts: Vec<PullRequest>,
}

impl PrFetchResults {
    pub fn bucket(&self, bucket: Bucket) -> &[PullRequest] {
        match bucket {
            Bucket::NeedsReview => &self.needs_review,
            Bucket::WaitingForReviewers => &self.waiting_for_reviewers,
            Bucket::Approved => &self.approved,
            Bucket::ChangesRequested => &self.changes_requested,
            Bucket::MyChangesRequested => &self.my_changes_requested,
            Bucket::Drafts => &self.drafts,
        }
    }

    pub fn ids(&self, bucket: Bucket) -> HashSet<String> {
        self.bucket(bucket).iter().map(|pr| pr.id.clone()).collect()
    }

    pub fn total_count(&self) -> usize {
        Bucket::ALL.iter().map(|b| self.bucket(*b).len()).sum()
    }

    /// Looks a PR up by node id or by its html url across every bucket.
    pub fn find(&self, key: &str) -> Option<&PullRequest> {
        Bucket::ALL
            .iter()
            .flat_map(|b| self.bucket(*b))
            .find(|pr| pr.id == key || pr.url == key)
    }

    /// Copy of the results with the given ids removed from every bucket.
    pub fn without_ids(&self, hidden: &HashSet<String>) -> PrFetchResults {
        let keep = |prs: &[PullRequest]| -> Vec<PullRequest> {
            prs.iter()
                .filter(|pr| !hidden.contains(&pr.id))
                .cloned()
                .collect()
        };
        PrFetchResults {
            needs_review: keep(&self.needs_review),
            waiting_for_reviewers: keep(&self.waiting_for_reviewers),
            approved: keep(&self.approved),
            changes_requested: keep(&self.changes_requested),
            my_changes_requested: keep(&self.my_changes_requested),
            drafts: keep(&self.drafts),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnoozeDuration {
    OneDay,
    OneWeek,
    OneMonth,
}

impl SnoozeDuration {
    pub fn seconds(&self) -> i64 {
        match self {
            SnoozeDuration::OneDay => 86_400,
            SnoozeDuration::OneWeek => 604_800,
            SnoozeDuration::OneMonth => 2_592_000,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SnoozeDuration::OneDay => "1 day",
            SnoozeDuration::OneWeek => "1 week",
            SnoozeDuration::OneMonth => "1 month",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeEntry {
    #[serde(rename = "prID")]
    pub pr_id: String,
    pub pr_title: String,
    pub pr_repository: String,
    pub pr_number: u64,
    #[serde(rename = "prURL")]
    pub pr_url: String,
    pub snoozed_at: DateTime<Utc>,
    pub duration: SnoozeDuration,
}

impl SnoozeEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.snoozed_at + Duration::seconds(self.duration.seconds())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::fixtures::pr;
    use super::*;

    fn entry(duration: SnoozeDuration, snoozed_at: DateTime<Utc>) -> SnoozeEntry {
        SnoozeEntry {
            pr_id: "PR_1".into(),
            pr_title: "Fix".into(),
            pr_repository: "acme/widgets".into(),
            pr_number: 7,
            pr_url: "https://github.com/acme/widgets/pull/7".into(),
            snoozed_at,
            duration,
        }
    }

    #[test]
    fn snooze_entry_expires_exactly_at_boundary() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = entry(SnoozeDuration::OneDay, at);
        assert_eq!(entry.expires_at(), at + Duration::seconds(86_400));
        assert!(!entry.is_expired(at + Duration::seconds(86_399)));
        assert!(entry.is_expired(at + Duration::seconds(86_400)));
    }

    #[test]
    fn snooze_entry_serializes_with_stable_keys() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let json = serde_json::to_value(entry(SnoozeDuration::OneWeek, at)).unwrap();
        assert_eq!(json["prID"], "PR_1");
        assert_eq!(json["prURL"], "https://github.com/acme/widgets/pull/7");
        assert_eq!(json["duration"], "oneWeek");
    }

    #[test]
    fn without_ids_filters_every_bucket() {
        let results = PrFetchResults {
            needs_review: vec![pr("a"), pr("b")],
            drafts: vec![pr("a")],
            my_changes_requested: vec![pr("c")],
            ..Default::default()
        };
        let hidden: HashSet<String> = ["a".to_owned()].into_iter().collect();
        let visible = results.without_ids(&hidden);
        assert_eq!(visible.needs_review, vec![pr("b")]);
        assert!(visible.drafts.is_empty());
        assert_eq!(visible.my_changes_requested.len(), 1);
        assert_eq!(visible.total_count(), 2);
    }

    #[test]
    fn find_matches_id_or_url() {
        let results = PrFetchResults {
            approved: vec![pr("x")],
            ..Default::default()
        };
        assert!(results.find("x").is_some());
        assert!(results
            .find("https://github.com/acme/widgets/pull/x")
            .is_some());
        assert!(results.find("y").is_none());
    }
}
