//! Tracks the pull requests that need your attention on GitHub.
//!
//! Three search queries are classified into six buckets ([`classify`]),
//! successive polls are diffed into notifications ([`app`]), and pull
//! requests can be snoozed for a while ([`snooze`]).

pub mod app;
pub mod classify;
pub mod domain;
pub mod github;
pub mod notify;
pub mod scheduler;
pub mod settings;
pub mod snooze;
pub mod storage;
