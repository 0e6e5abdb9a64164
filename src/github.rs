use std::thread;

use chrono::{DateTime, Utc};
use reqwest::{
    StatusCode,
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
    classify::classify,
    domain::{PrFetchResults, PullRequest, ReviewDecision, Reviewer},
};

pub const GH_API: &str = "https://api.github.com";
pub const RELEASE_REPOSITORY: &str = "chojs23/pr-reminder";
const USER_AGENT_HEADER: &str = "pr-reminder/0.1";

pub const REVIEW_REQUESTED_QUERY: &str = "is:pr is:open -is:draft review-requested:@me";
pub const AUTHORED_QUERY: &str = "is:pr is:open author:@me";
pub const REVIEWED_QUERY: &str = "is:pr is:open -is:draft reviewed-by:@me -author:@me -review:approved";

const SEARCH_QUERY: &str = r#"
query($q: String!) {
  search(query: $q, type: ISSUE, first: 50) {
    nodes {
      ... on PullRequest {
        id
        number
        title
        url
        isDraft
        createdAt
        updatedAt
        author { login avatarUrl }
        repository { nameWithOwner }
        reviewDecision
        additions
        deletions
        changedFiles
        totalCommentsCount
        reviewRequests(first: 5) {
          nodes { requestedReviewer { ... on User { login avatarUrl } } }
        }
        latestReviews(first: 5) {
          nodes { author { login avatarUrl } }
        }
      }
    }
  }
}
"#;

/// Anything that can produce the classified buckets for a token.
pub trait PullRequestSource: Send + Sync {
    fn fetch_all_prs(&self, token: Option<&str>) -> Result<PrFetchResults, FetchError>;
}

pub struct GitHubClient {
    http: Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(USER_AGENT_HEADER)
            .build()
            .map_err(FetchError::Http)?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_owned(),
        })
    }

    /// Runs one search query and returns the parsed pull requests.
    pub fn search(&self, token: &str, query: &str) -> Result<Vec<PullRequest>, FetchError> {
        let response = self
            .http
            .post(format!("{}/graphql", self.api_url))
            .header(USER_AGENT, USER_AGENT_HEADER)
            .bearer_auth(token)
            .json(&json!({ "query": SEARCH_QUERY, "variables": { "q": query } }))
            .send()?;
        let status = response.status();
        let body = response.text()?;
        let prs = decode_search(status, &body)?;
        debug!(query, count = prs.len(), "search completed");
        Ok(prs)
    }

    /// Latest published release tag of `repository`, without a leading `v`.
    /// `None` when the repository has no releases yet.
    pub fn fetch_latest_release(&self, repository: &str) -> Result<Option<String>, FetchError> {
        let response = self
            .http
            .get(format!("{}/repos/{repository}/releases/latest", self.api_url))
            .header(USER_AGENT, USER_AGENT_HEADER)
            .header(ACCEPT, "application/vnd.github+json")
            .send()?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::InvalidResponse(status.as_u16()));
        }

        let body = response.text()?;
        let release: ReleaseResponse =
            serde_json::from_str(&body).map_err(|err| FetchError::Decoding(err.to_string()))?;
        Ok(Some(strip_version_prefix(&release.tag_name).to_owned()))
    }
}

impl PullRequestSource for GitHubClient {
    fn fetch_all_prs(&self, token: Option<&str>) -> Result<PrFetchResults, FetchError> {
        let token = match token {
            Some(token) if !token.trim().is_empty() => token.trim(),
            _ => return Err(FetchError::NoToken),
        };

        let (review_requested, authored, reviewed) = thread::scope(|scope| {
            let review_requested = scope.spawn(|| self.search(token, REVIEW_REQUESTED_QUERY));
            let authored = scope.spawn(|| self.search(token, AUTHORED_QUERY));
            let reviewed = scope.spawn(|| self.search(token, REVIEWED_QUERY));
            (
                review_requested
                    .join()
                    .unwrap_or(Err(FetchError::BackgroundWorkerGone)),
                authored.join().unwrap_or(Err(FetchError::BackgroundWorkerGone)),
                reviewed.join().unwrap_or(Err(FetchError::BackgroundWorkerGone)),
            )
        });

        Ok(classify(review_requested?, authored?, reviewed?))
    }
}

pub fn decode_search(status: StatusCode, body: &str) -> Result<Vec<PullRequest>, FetchError> {
    if status != StatusCode::OK {
        return Err(FetchError::InvalidResponse(status.as_u16()));
    }

    let envelope: GraphQlResponse =
        serde_json::from_str(body).map_err(|err| FetchError::Decoding(err.to_string()))?;
    if let Some(error) = envelope.errors.into_iter().flatten().next() {
        return Err(FetchError::Api(error.message));
    }
    let data = envelope
        .data
        .ok_or_else(|| FetchError::Decoding("response has no data".to_owned()))?;

    Ok(data
        .search
        .nodes
        .into_iter()
        .flatten()
        .filter_map(|node| {
            let id = node.id.clone();
            let parsed = node.into_pull_request();
            if parsed.is_none() {
                debug!(?id, "dropping search node with missing fields");
            }
            parsed
        })
        .collect())
}

pub fn strip_version_prefix(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// True when `latest` has a higher dot-separated version than `current`.
/// Non-numeric segments count as zero.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let parse = |raw: &str| -> Vec<u64> {
        strip_version_prefix(raw)
            .split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (latest, current) = (parse(latest), parse(current));
    let len = latest.len().max(current.len());
    for idx in 0..len {
        let a = latest.get(idx).copied().unwrap_or(0);
        let b = current.get(idx).copied().unwrap_or(0);
        if a != b {
            return a > b;
        }
    }
    false
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("No GitHub token configured. Run `pr-reminder token set <token>`.")]
    NoToken,
    #[error("GitHub returned HTTP status {0}")]
    InvalidResponse(u16),
    #[error("{0}")]
    Api(String),
    #[error("Failed to decode GitHub response: {0}")]
    Decoding(String),
    #[error("GitHub API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Background worker disconnected before returning a result")]
    BackgroundWorkerGone,
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<SearchData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(default)]
    nodes: Vec<Option<PullRequestNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    id: Option<String>,
    number: Option<u64>,
    title: Option<String>,
    url: Option<String>,
    is_draft: Option<bool>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    author: Option<ActorNode>,
    repository: Option<RepositoryNode>,
    review_decision: Option<ReviewDecision>,
    additions: Option<u64>,
    deletions: Option<u64>,
    changed_files: Option<u64>,
    total_comments_count: Option<u64>,
    review_requests: Option<Connection<ReviewRequestNode>>,
    latest_reviews: Option<Connection<ReviewNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorNode {
    login: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name_with_owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequestNode {
    requested_reviewer: Option<ActorNode>,
}

#[derive(Debug, Deserialize)]
struct ReviewNode {
    author: Option<ActorNode>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: String,
}

impl PullRequestNode {
    fn into_pull_request(self) -> Option<PullRequest> {
        let author = self.author?;
        let created_at = self.created_at?;
        let reviewers = merge_reviewers(
            self.review_requests
                .into_iter()
                .flat_map(|c| c.nodes)
                .flatten()
                .filter_map(|request| request.requested_reviewer),
            self.latest_reviews
                .into_iter()
                .flat_map(|c| c.nodes)
                .flatten()
                .filter_map(|review| review.author),
        );

        Some(PullRequest {
            id: self.id?,
            number: self.number?,
            title: self.title?,
            url: self.url?,
            repository: self.repository?.name_with_owner?,
            author: author.login?,
            author_avatar_url: author.avatar_url,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
            is_draft: self.is_draft.unwrap_or(false),
            review_decision: self.review_decision,
            additions: self.additions.unwrap_or(0),
            deletions: self.deletions.unwrap_or(0),
            changed_files: self.changed_files.unwrap_or(0),
            total_comments: self.total_comments_count.unwrap_or(0),
            reviewers,
        })
    }
}

/// Requested reviewers first, then latest reviewers; first login wins.
fn merge_reviewers(
    requested: impl Iterator<Item = ActorNode>,
    reviewed: impl Iterator<Item = ActorNode>,
) -> Vec<Reviewer> {
    let mut reviewers: Vec<Reviewer> = Vec::new();
    for actor in requested.chain(reviewed) {
        // Team review requests carry no login.
        let Some(login) = actor.login else {
            continue;
        };
        if reviewers.iter().any(|existing| existing.login == login) {
            continue;
        }
        reviewers.push(Reviewer {
            login,
            avatar_url: actor.avatar_url,
        });
    }
    reviewers
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
