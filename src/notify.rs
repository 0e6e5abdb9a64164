use std::io::{self, Write};

use tracing::info;

use crate::domain::PullRequest;

pub const REVIEW_REQUESTS_URL: &str = "https://github.com/pulls/review-requested";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub subtitle: Option<String>,
    pub icon: Option<&'static str>,
    pub click_url: Option<String>,
}

impl Notification {
    pub fn review_requested(pr: &PullRequest) -> Self {
        Self::for_pr("Review requested", "review-requested", pr)
    }

    pub fn review_requested_summary(count: usize) -> Self {
        Self {
            title: "Review requested".to_owned(),
            body: format!("{count} pull requests need your review"),
            subtitle: None,
            icon: Some("review-requested"),
            click_url: Some(REVIEW_REQUESTS_URL.to_owned()),
        }
    }

    pub fn approved(pr: &PullRequest) -> Self {
        Self::for_pr("Pull request approved", "approved", pr)
    }

    pub fn changes_requested(pr: &PullRequest) -> Self {
        Self::for_pr("Changes requested", "changes-requested", pr)
    }

    fn for_pr(title: &str, icon: &'static str, pr: &PullRequest) -> Self {
        Self {
            title: title.to_owned(),
            body: pr.title.clone(),
            subtitle: Some(pr.reference()),
            icon: Some(icon),
            click_url: Some(pr.url.clone()),
        }
    }
}

/// Delivers notifications to the user.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: &Notification);
}

/// Opens links in the user's browser.
pub trait UrlOpener {
    fn open_url(&self, url: &str) -> io::Result<()>;
}

/// Registers or removes the app as a login item.
pub trait LaunchAtLogin {
    fn register_launch_at_login(&self, enabled: bool) -> io::Result<()>;
}

/// Writes notifications to the terminal and the log.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn show(&self, notification: &Notification) {
        info!(
            title = %notification.title,
            icon = notification.icon.unwrap_or("default"),
            url = notification.click_url.as_deref().unwrap_or(""),
            "notification"
        );
        let mut out = io::stdout().lock();
        let _ = match &notification.subtitle {
            Some(subtitle) => writeln!(
                out,
                "\u{7}[{}] {} ({subtitle})",
                notification.title, notification.body
            ),
            None => writeln!(out, "\u{7}[{}] {}", notification.title, notification.body),
        };
        if let Some(url) = &notification.click_url {
            let _ = writeln!(out, "    {url}");
        }
    }
}

pub struct BrowserOpener;

impl UrlOpener for BrowserOpener {
    fn open_url(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

/// Login-item registrar for platforms without a login-item API.
pub struct NoLoginItems;

impl LaunchAtLogin for NoLoginItems {
    fn register_launch_at_login(&self, enabled: bool) -> io::Result<()> {
        if !enabled {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "launch at login is not supported here; start `pr-reminder watch` from your session startup instead",
        ))
    }
}
