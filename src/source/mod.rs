//! Feed source abstraction.
//!
//! This module defines the [`DataSource`] trait, the shared [`FeedItem`]
//! type and [`FetchError`].  The concrete HTTP source lives in
//! [`recent_posts`].

mod feed_item;
mod recent_posts;

pub use feed_item::FeedItem;
pub use recent_posts::RecentPostsSource;

use thiserror::Error;

/// Errors that can occur while fetching and decoding a feed.
///
/// All of them are recoverable: the poll loop logs them and tries again on
/// the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, timeout, body read).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a non-2xx status code.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The body is not a well-formed XML document.
    #[error("could not decode feed: {0}")]
    Decode(String),
}

/// Trait that every feed source implements.
///
/// The update checker calls [`fetch()`](DataSource::fetch) once per poll and
/// treats the first returned item as the newest.
pub trait DataSource {
    /// Human-readable label used in log lines.
    fn name(&self) -> &str;

    /// Fetch the current items, newest first as published by the source.
    fn fetch(&self) -> Result<Vec<FeedItem>, FetchError>;
}
