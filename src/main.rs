use std::{
    collections::HashSet,
    io::{self, BufRead},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context as _, bail};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pr_reminder::{
    app::{PollController, RefreshOutcome, Snapshot},
    domain::{Bucket, PrFetchResults, PullRequest, SnoozeDuration},
    github::{GH_API, GitHubClient, RELEASE_REPOSITORY, is_newer_version},
    notify::{BrowserOpener, NoLoginItems, TerminalNotifier, UrlOpener},
    scheduler::RefreshScheduler,
    settings::{PollInterval, Settings},
    snooze::SnoozeStore,
    storage::{FileStore, SecretStore},
};

#[derive(Parser)]
#[command(name = "pr-reminder")]
#[command(version, about = "Keeps track of the pull requests waiting on you", long_about = None)]
struct Cli {
    /// Directory for the token, settings and snoozes (default: ~/.pr-reminder)
    #[arg(long, env = "PR_REMINDER_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// GitHub API base URL (GitHub Enterprise: https://host/api)
    #[arg(long, env = "PR_REMINDER_API_URL", default_value = GH_API, global = true)]
    api_url: String,

    /// Token that takes precedence over the stored one
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch once and print every bucket
    List {
        /// Include snoozed pull requests
        #[arg(long)]
        all: bool,
    },
    /// Poll in the foreground and print notifications
    Watch,
    /// Hide a pull request for a while
    Snooze {
        /// Pull request node id or URL
        pr: String,
        #[arg(value_enum, default_value_t = SnoozeArg::Day)]
        duration: SnoozeArg,
    },
    /// Show a snoozed pull request again
    Unsnooze {
        /// Pull request node id
        id: String,
    },
    /// List snoozed pull requests
    Snoozed,
    /// Manage the GitHub token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Show or change settings
    Config {
        /// Poll interval in seconds: 60, 300, 900 or 1800
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long, value_enum)]
        notifications: Option<Toggle>,
        /// Start pr-reminder when you log in
        #[arg(long, value_enum)]
        launch_at_login: Option<Toggle>,
    },
    /// Open a pull request in the browser
    Open {
        /// Pull request node id or URL
        pr: String,
    },
    /// Check whether a newer release is available
    CheckUpdate,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a personal access token
    Set { value: String },
    /// Remove the stored token
    Clear,
    /// Show whether a token is configured
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum SnoozeArg {
    Day,
    Week,
    Month,
}

impl From<SnoozeArg> for SnoozeDuration {
    fn from(arg: SnoozeArg) -> Self {
        match arg {
            SnoozeArg::Day => SnoozeDuration::OneDay,
            SnoozeArg::Week => SnoozeDuration::OneWeek,
            SnoozeArg::Month => SnoozeDuration::OneMonth,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

type Controller = PollController<GitHubClient, TerminalNotifier, Arc<FileStore>>;

struct Context {
    store: Arc<FileStore>,
    api_url: String,
}

impl Context {
    fn client(&self) -> anyhow::Result<GitHubClient> {
        GitHubClient::new(self.api_url.clone()).context("failed to build HTTP client")
    }

    fn controller(&self, notifications_enabled: bool) -> anyhow::Result<Controller> {
        Ok(PollController::new(
            self.client()?,
            TerminalNotifier,
            Arc::clone(&self.store),
            notifications_enabled,
        ))
    }

    fn snoozes(&self) -> SnoozeStore<Arc<FileStore>> {
        SnoozeStore::load(Arc::clone(&self.store))
    }

    /// Runs one refresh and returns the results, failing on fetch errors.
    fn fetch_once(&self) -> anyhow::Result<PrFetchResults> {
        let controller = self.controller(false)?;
        controller.refresh();
        let snapshot = controller.snapshot();
        if let Some(error) = snapshot.error {
            bail!(error);
        }
        Ok(snapshot.results)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = FileStore::initialize(cli.data_dir)
        .context("local storage is unavailable")?
        .with_token_override(cli.token);
    let ctx = Context {
        store: Arc::new(store),
        api_url: cli.api_url,
    };

    match cli.command {
        Commands::List { all } => run_list(&ctx, all),
        Commands::Watch => run_watch(&ctx),
        Commands::Snooze { pr, duration } => run_snooze(&ctx, &pr, duration.into()),
        Commands::Unsnooze { id } => {
            let mut snoozes = ctx.snoozes();
            if !snoozes.is_snoozed(&id) {
                println!("{id} is not snoozed.");
            }
            snoozes.unsnooze(&id);
            Ok(())
        }
        Commands::Snoozed => run_snoozed(&ctx),
        Commands::Token { action } => run_token(&ctx, action),
        Commands::Config {
            interval,
            notifications,
            launch_at_login,
        } => run_config(&ctx, interval, notifications, launch_at_login),
        Commands::Open { pr } => run_open(&ctx, &pr),
        Commands::CheckUpdate => run_check_update(&ctx),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "pr_reminder=debug"
    } else {
        "pr_reminder=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run_list(ctx: &Context, all: bool) -> anyhow::Result<()> {
    let controller = ctx.controller(false)?;
    if controller.refresh() == RefreshOutcome::Failed {
        bail!(controller.snapshot().error.unwrap_or_default());
    }
    let mut snoozes = ctx.snoozes();
    snoozes.clean_expired();
    let hidden = if all {
        HashSet::new()
    } else {
        snoozes.snoozed_ids()
    };
    let visible = controller.visible_results(&hidden);
    print_results(&visible);

    let total = controller.snapshot().results.total_count();
    let hidden_count = total - visible.total_count();
    if hidden_count > 0 {
        println!("{total} pull requests, {hidden_count} snoozed and hidden");
    } else {
        println!("{total} pull requests");
    }
    Ok(())
}

fn run_watch(ctx: &Context) -> anyhow::Result<()> {
    let mut settings = Settings::load(&*ctx.store);
    let controller = Arc::new(ctx.controller(settings.notifications_enabled)?);

    let scheduler = {
        let controller = Arc::clone(&controller);
        let store = Arc::clone(&ctx.store);
        RefreshScheduler::start(settings.poll_interval.as_duration(), move |trigger| {
            info!(?trigger, "refreshing pull requests");
            if controller.refresh() == RefreshOutcome::Skipped {
                return;
            }
            // Reloaded each time so snoozes made from another shell apply.
            let mut snoozes = SnoozeStore::load(Arc::clone(&store));
            snoozes.clean_expired();
            print_status(&controller.snapshot(), &snoozes.snoozed_ids());
        })
    };
    scheduler.trigger();

    if !io::stdin().is_terminal() {
        info!("stdin is not interactive; polling until the process is stopped");
        println!("Watching every {}.", settings.poll_interval);
        scheduler.wait();
        return Ok(());
    }

    println!(
        "Watching every {}. Commands: r = refresh, i <secs> = interval, n = toggle notifications, reset, q = quit",
        settings.poll_interval
    );
    for line in io::stdin().lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("q"), _) => break,
            (Some("r"), _) => scheduler.trigger(),
            (Some("i"), Some(secs)) => {
                match secs.parse::<u64>().map_err(|_| secs.to_owned()).and_then(PollInterval::try_from) {
                    Ok(interval) => {
                        settings.poll_interval = interval;
                        settings.save(&*ctx.store)?;
                        scheduler.set_interval(interval.as_duration());
                        println!("Polling every {interval}.");
                    }
                    Err(err) => println!("{err}"),
                }
            }
            (Some("n"), _) => {
                settings.notifications_enabled = !settings.notifications_enabled;
                settings.save(&*ctx.store)?;
                controller.set_notifications_enabled(settings.notifications_enabled);
                println!(
                    "Notifications {}.",
                    if settings.notifications_enabled { "on" } else { "off" }
                );
            }
            (Some("reset"), _) => {
                controller.reset_notification_tracking();
                println!("Notification tracking reset.");
            }
            (None, _) => {}
            _ => println!("Unknown command: {line}"),
        }
    }

    scheduler.shutdown();
    Ok(())
}

fn run_snooze(ctx: &Context, key: &str, duration: SnoozeDuration) -> anyhow::Result<()> {
    let results = ctx.fetch_once()?;
    let Some(pr) = results.find(key) else {
        bail!("no open pull request matches {key}");
    };
    let mut snoozes = ctx.snoozes();
    snoozes.snooze(pr, duration);
    println!("Snoozed {} for {}.", pr.reference(), duration.label());
    Ok(())
}

fn run_snoozed(ctx: &Context) -> anyhow::Result<()> {
    let mut snoozes = ctx.snoozes();
    snoozes.clean_expired();
    let entries = snoozes.sorted_entries();
    if entries.is_empty() {
        println!("Nothing is snoozed.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{} #{} {}\n    id: {}  until {}\n    {}",
            entry.pr_repository,
            entry.pr_number,
            entry.pr_title,
            entry.pr_id,
            entry
                .expires_at()
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M"),
            entry.pr_url
        );
    }
    Ok(())
}

fn run_token(ctx: &Context, action: TokenAction) -> anyhow::Result<()> {
    match action {
        TokenAction::Set { value } => {
            if value.trim().is_empty() {
                bail!("the token must not be empty");
            }
            ctx.store.set_secret(&value)?;
            println!("Token saved to {}.", ctx.store.dir().display());
        }
        TokenAction::Clear => {
            ctx.store.delete_secret()?;
            println!("Stored token removed.");
        }
        TokenAction::Status => match ctx.store.get_secret() {
            Some(token) => println!("Token configured ({}).", mask(&token)),
            None => println!("No token configured."),
        },
    }
    Ok(())
}

fn run_config(
    ctx: &Context,
    interval: Option<u64>,
    notifications: Option<Toggle>,
    launch_at_login: Option<Toggle>,
) -> anyhow::Result<()> {
    let mut settings = Settings::load(&*ctx.store);
    let changed = interval.is_some() || notifications.is_some() || launch_at_login.is_some();
    if let Some(secs) = interval {
        settings.poll_interval = PollInterval::try_from(secs).map_err(anyhow::Error::msg)?;
    }
    if let Some(toggle) = notifications {
        settings.notifications_enabled = matches!(toggle, Toggle::On);
    }
    if let Some(toggle) = launch_at_login {
        settings
            .set_launch_at_login(matches!(toggle, Toggle::On), &NoLoginItems)
            .context("failed to change launch at login")?;
    }
    if changed {
        settings.save(&*ctx.store)?;
    }
    println!("poll interval: {}", settings.poll_interval);
    println!(
        "notifications: {}",
        if settings.notifications_enabled { "on" } else { "off" }
    );
    println!(
        "launch at login: {}",
        if settings.launch_at_login { "on" } else { "off" }
    );
    Ok(())
}

fn run_open(ctx: &Context, key: &str) -> anyhow::Result<()> {
    let url = if key.starts_with("https://") || key.starts_with("http://") {
        key.to_owned()
    } else {
        let results = ctx.fetch_once()?;
        match results.find(key) {
            Some(pr) => pr.url.clone(),
            None => bail!("no open pull request matches {key}"),
        }
    };
    BrowserOpener
        .open_url(&url)
        .with_context(|| format!("failed to open {url}"))
}

fn run_check_update(ctx: &Context) -> anyhow::Result<()> {
    let current = env!("CARGO_PKG_VERSION");
    match ctx.client()?.fetch_latest_release(RELEASE_REPOSITORY)? {
        None => println!("No releases published yet (running {current})."),
        Some(latest) if is_newer_version(&latest, current) => {
            println!("Version {latest} is available (running {current}).");
        }
        Some(_) => println!("pr-reminder {current} is up to date."),
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Output helpers
// -----------------------------------------------------------------------------

fn print_status(snapshot: &Snapshot, hidden: &HashSet<String>) {
    if let Some(error) = &snapshot.error {
        println!("Refresh failed: {error}");
        return;
    }
    let visible = snapshot.results.without_ids(hidden);
    let counts: Vec<String> = Bucket::ALL
        .iter()
        .map(|b| format!("{}: {}", b.label(), visible.bucket(*b).len()))
        .collect();
    let at = snapshot
        .last_updated
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "-".to_owned());
    println!("[{at}] {}", counts.join(" | "));
}

fn print_results(results: &PrFetchResults) {
    for bucket in Bucket::ALL {
        let prs = results.bucket(bucket);
        println!("{} ({})", bucket.label(), prs.len());
        if prs.is_empty() {
            println!("  -");
        }
        for pr in prs {
            print_pr(pr);
        }
        println!();
    }
}

fn print_pr(pr: &PullRequest) {
    let decision = pr
        .review_decision
        .map(|d| format!(" [{}]", d.label()))
        .unwrap_or_default();
    println!("  {} {}{}", pr.reference(), pr.title, decision);
    let reviewers: Vec<&str> = pr.reviewers.iter().map(|r| r.login.as_str()).collect();
    println!(
        "    by {}, updated {}, +{} -{} in {} files, {} comments{}",
        pr.author,
        pr.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        pr.additions,
        pr.deletions,
        pr.changed_files,
        pr.total_comments,
        if reviewers.is_empty() {
            String::new()
        } else {
            format!(", reviewers: {}", reviewers.join(", "))
        }
    );
    println!("    {}", pr.url);
}

fn mask(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}
