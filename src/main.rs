//! feed-ntfy: push new forum posts to ntfy servers.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐  check()  ┌──────────┐  fetch()   ┌───────────┐
//! │ poll.rs  │ ────────► │ check.rs │ ─────────► │ source/   │
//! │ (loop)   │ ◄──────── │          │            └───────────┘
//! └──────────┘  new id   │          │  send() ×N ┌───────────┐
//!                        │          │ ─────────► │ notify.rs │
//!                        │          │            └───────────┘
//!                        │          │  persist   ┌───────────┐
//!                        │          │ ─────────► │ config/   │
//!                        └──────────┘            └───────────┘
//! ```
//!
//! * **`config`**: settings plus the durable last-seen id, stored as YAML.
//! * **`source`**: the `DataSource` trait and the recent-posts XML source.
//! * **`notify`**: the `Notifier` trait and the ntfy HTTP implementation.
//! * **`check`**: one fetch/compare/notify/persist pass.
//! * **`poll`**: runs `check` forever on the refresh interval.
//! * **`main`**: wires everything together (logging, config, HTTP client).

mod check;
mod config;
mod notify;
mod poll;
mod source;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use check::UpdateChecker;
use config::{ConfigStore, CONFIG_FILE};
use notify::NtfyNotifier;
use source::RecentPostsSource;

/// Upper bound for every outbound request (feed fetch and each delivery).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // -- load settings once; later edits are not picked up until restart -----
    let store = ConfigStore::new(CONFIG_FILE);
    let settings = store
        .load()
        .with_context(|| format!("Error reading configuration from {}", store.path().display()))?;

    if settings.destinations.is_empty() {
        tracing::warn!("No servers configured, new items will only be recorded");
    }
    if settings.refresh_interval.is_zero() {
        tracing::warn!("refresh_interval is zero, polling without pause");
    }

    // -- HTTP collaborators share one client ---------------------------------
    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Error building HTTP client")?;
    let source = RecentPostsSource::new(settings.feed_url.as_str(), client.clone());
    let notifier = NtfyNotifier::new(client);

    let checker = UpdateChecker::new(&source, &notifier, &store, &settings.destinations);

    tracing::info!(
        last_seen_id = %settings.last_seen_id,
        interval = ?settings.refresh_interval,
        "Starting poll loop"
    );

    // `run` only comes back with a persistence error.
    let never = poll::run(&checker, settings.last_seen_id.clone(), settings.refresh_interval)
        .context("Error persisting last seen id")?;
    match never {}
}
