use std::collections::HashSet;

use crate::domain::{PrFetchResults, PullRequest, ReviewDecision};

/// Merges the three search results into the six buckets.
///
/// A review request that already carries an approval or a change request is
/// not an action item, so it is left out of `needs_review`. Changes-requested
/// review requests are folded into `my_changes_requested` together with the
/// reviewed-by list, unless the PR is pending review again.
pub fn classify(
    review_requested: Vec<PullRequest>,
    authored: Vec<PullRequest>,
    reviewed: Vec<PullRequest>,
) -> PrFetchResults {
    let mut results = PrFetchResults::default();
    let mut requested_changes = Vec::new();

    for pr in review_requested {
        match pr.review_decision {
            Some(ReviewDecision::Approved) => {}
            Some(ReviewDecision::ChangesRequested) => requested_changes.push(pr),
            _ => results.needs_review.push(pr),
        }
    }

    for pr in authored {
        if pr.is_draft {
            results.drafts.push(pr);
            continue;
        }
        match pr.review_decision {
            Some(ReviewDecision::Approved) => results.approved.push(pr),
            Some(ReviewDecision::ChangesRequested) => results.changes_requested.push(pr),
            _ => results.waiting_for_reviewers.push(pr),
        }
    }

    let pending: HashSet<&str> = results.needs_review.iter().map(|pr| pr.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut mine = Vec::new();
    for pr in reviewed.into_iter().chain(requested_changes) {
        if pending.contains(pr.id.as_str()) || !seen.insert(pr.id.clone()) {
            continue;
        }
        mine.push(pr);
    }
    results.my_changes_requested = mine;

    results
}
