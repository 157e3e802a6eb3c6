//! One poll-diff-notify-persist pass.
//!
//! [`UpdateChecker::check`] fetches the feed, compares its first item with
//! the last-seen id and, on a change, notifies every destination and then
//! persists the new id.  Deliveries are attempted one at a time in whatever
//! order the destination list has; a failed delivery is logged and never
//! stops the others or the persistence step.

use thiserror::Error;

use crate::config::{LastSeenStore, PersistError};
use crate::notify::{Destination, Notifier};
use crate::source::{DataSource, FetchError};

/// Why a check did not produce a new id.  Only `Persist` is unrecoverable.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("feed contains no items")]
    EmptyFeed,

    #[error("failed to persist last seen id: {0}")]
    Persist(#[from] PersistError),
}

/// Borrowed collaborators for a check.  Owned by `main`, reused every tick.
pub struct UpdateChecker<'a> {
    source: &'a dyn DataSource,
    notifier: &'a dyn Notifier,
    store: &'a dyn LastSeenStore,
    destinations: &'a [Destination],
}

impl<'a> UpdateChecker<'a> {
    pub fn new(
        source: &'a dyn DataSource,
        notifier: &'a dyn Notifier,
        store: &'a dyn LastSeenStore,
        destinations: &'a [Destination],
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            destinations,
        }
    }

    /// Run one check and return the id to remember for the next one.
    ///
    /// Only an exact id match at position 0 counts as "no update".  The
    /// feed's order is trusted; no timestamps are compared.
    pub fn check(&self, last_seen_id: &str) -> Result<String, CheckError> {
        let items = self.source.fetch()?;
        let Some(newest) = items.first() else {
            return Err(CheckError::EmptyFeed);
        };

        if newest.id == last_seen_id {
            tracing::info!(last_seen_id = %last_seen_id, newest_id = %newest.id, "No updates");
            return Ok(last_seen_id.to_string());
        }

        tracing::info!(
            source = %self.source.name(),
            previous_id = %last_seen_id,
            new_id = %newest.id,
            destinations = self.destinations.len(),
            "New item detected"
        );

        let message = newest.notification_message();
        let mut delivered = 0;
        for destination in self.destinations {
            match self.notifier.send(&message, destination) {
                Ok(()) => {
                    delivered += 1;
                    tracing::debug!(endpoint = %destination.endpoint, "Notification sent");
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %destination.endpoint,
                        error = %e,
                        "Error sending notification"
                    );
                }
            }
        }

        self.store.persist_last_seen_id(&newest.id)?;
        tracing::info!(
            id = %newest.id,
            delivered,
            attempted = self.destinations.len(),
            "Recorded new last seen id"
        );
        Ok(newest.id.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::notify::{NotifyError, NtfyNotifier};
    use crate::source::{FeedItem, RecentPostsSource};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::{HashSet, VecDeque};
    use std::io;
    use std::path::PathBuf;

    // ---------------------------------------------------------------------
    // Fakes
    // ---------------------------------------------------------------------

    /// Serves queued fetch results, one per call; an empty queue yields no items.
    #[derive(Default)]
    pub struct FakeSource {
        pub responses: RefCell<VecDeque<Result<Vec<FeedItem>, FetchError>>>,
        pub calls: RefCell<usize>,
    }

    impl FakeSource {
        pub fn with(responses: Vec<Result<Vec<FeedItem>, FetchError>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl DataSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch(&self) -> Result<Vec<FeedItem>, FetchError> {
            *self.calls.borrow_mut() += 1;
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Records every delivery; endpoints in `failing` answer 500.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: RefCell<Vec<(String, String)>>,
        pub failing: HashSet<String>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, message: &str, destination: &Destination) -> Result<(), NotifyError> {
            self.sent
                .borrow_mut()
                .push((destination.endpoint.clone(), message.to_string()));
            if self.failing.contains(&destination.endpoint) {
                return Err(NotifyError::Status(500));
            }
            Ok(())
        }
    }

    /// Records persisted ids, or fails every write when `fail` is set.
    #[derive(Default)]
    pub struct MemoryStore {
        pub persisted: RefCell<Vec<String>>,
        pub fail: bool,
    }

    impl LastSeenStore for MemoryStore {
        fn persist_last_seen_id(&self, id: &str) -> Result<(), PersistError> {
            if self.fail {
                return Err(PersistError::Write {
                    path: PathBuf::from("config.yml"),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.persisted.borrow_mut().push(id.to_string());
            Ok(())
        }
    }

    pub fn item(id: &str) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            subject: format!("Subject {id}"),
            body: format!("Body {id}"),
            link: format!("https://forum.example.com/t/{id}"),
        }
    }

    fn destinations(n: usize) -> Vec<Destination> {
        (0..n)
            .map(|i| Destination::new(format!("https://ntfy.example.com/{i}"), ""))
            .collect()
    }

    fn sorted_endpoints(notifier: &RecordingNotifier) -> Vec<String> {
        let mut endpoints: Vec<_> = notifier.sent.borrow().iter().map(|(e, _)| e.clone()).collect();
        endpoints.sort();
        endpoints
    }

    // ---------------------------------------------------------------------
    // Behaviour
    // ---------------------------------------------------------------------

    #[test]
    fn same_newest_id_is_a_no_op() {
        let source = FakeSource::with(vec![Ok(vec![item("42"), item("41")])]);
        let notifier = RecordingNotifier::default();
        let store = MemoryStore::default();
        let dests = destinations(3);
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        assert_eq!(checker.check("42").unwrap(), "42");
        assert!(notifier.sent.borrow().is_empty());
        assert!(store.persisted.borrow().is_empty());
    }

    #[test]
    fn new_item_notifies_each_destination_once_and_persists_once() {
        for n in [0, 1, 5] {
            let source = FakeSource::with(vec![Ok(vec![item("43"), item("42")])]);
            let notifier = RecordingNotifier::default();
            let store = MemoryStore::default();
            let dests = destinations(n);
            let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

            assert_eq!(checker.check("42").unwrap(), "43");

            let mut expected: Vec<_> = dests.iter().map(|d| d.endpoint.clone()).collect();
            expected.sort();
            assert_eq!(sorted_endpoints(&notifier), expected, "n = {n}");
            assert!(notifier
                .sent
                .borrow()
                .iter()
                .all(|(_, m)| m == &item("43").notification_message()));
            assert_eq!(*store.persisted.borrow(), vec!["43".to_string()], "n = {n}");
        }
    }

    #[test]
    fn failed_destination_does_not_block_others_or_persistence() {
        let source = FakeSource::with(vec![Ok(vec![item("43")])]);
        let dests = vec![
            Destination::new("https://a.example.com/t", ""),
            Destination::new("https://b.example.com/t", ""),
        ];
        let notifier = RecordingNotifier {
            failing: HashSet::from(["https://a.example.com/t".to_string()]),
            ..Default::default()
        };
        let store = MemoryStore::default();
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        assert_eq!(checker.check("42").unwrap(), "43");
        assert_eq!(
            sorted_endpoints(&notifier),
            vec!["https://a.example.com/t", "https://b.example.com/t"]
        );
        assert_eq!(*store.persisted.borrow(), vec!["43".to_string()]);
    }

    #[test]
    fn every_destination_failing_still_persists() {
        let source = FakeSource::with(vec![Ok(vec![item("43")])]);
        let dests = destinations(2);
        let notifier = RecordingNotifier {
            failing: dests.iter().map(|d| d.endpoint.clone()).collect(),
            ..Default::default()
        };
        let store = MemoryStore::default();
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        assert_eq!(checker.check("42").unwrap(), "43");
        assert_eq!(*store.persisted.borrow(), vec!["43".to_string()]);
    }

    #[test]
    fn empty_feed_leaves_state_untouched() {
        let source = FakeSource::with(vec![Ok(Vec::new())]);
        let notifier = RecordingNotifier::default();
        let store = MemoryStore::default();
        let dests = destinations(2);
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        assert!(matches!(checker.check("42"), Err(CheckError::EmptyFeed)));
        assert!(notifier.sent.borrow().is_empty());
        assert!(store.persisted.borrow().is_empty());
    }

    #[test]
    fn fetch_failure_leaves_state_untouched() {
        let source = FakeSource::with(vec![Err(FetchError::HttpStatus(502))]);
        let notifier = RecordingNotifier::default();
        let store = MemoryStore::default();
        let dests = destinations(2);
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        let err = checker.check("42").unwrap_err();
        assert!(matches!(err, CheckError::Fetch(FetchError::HttpStatus(502))));
        assert!(notifier.sent.borrow().is_empty());
        assert!(store.persisted.borrow().is_empty());
    }

    #[test]
    fn last_seen_id_deeper_in_feed_is_still_an_update() {
        let source = FakeSource::with(vec![Ok(vec![item("44"), item("42"), item("43")])]);
        let notifier = RecordingNotifier::default();
        let store = MemoryStore::default();
        let dests = destinations(1);
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        assert_eq!(checker.check("42").unwrap(), "44");
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn persistence_failure_is_fatal() {
        let source = FakeSource::with(vec![Ok(vec![item("43")])]);
        let notifier = RecordingNotifier::default();
        let store = MemoryStore {
            fail: true,
            ..Default::default()
        };
        let dests = destinations(1);
        let checker = UpdateChecker::new(&source, &notifier, &store, &dests);

        let err = checker.check("42").unwrap_err();
        assert!(matches!(err, CheckError::Persist(PersistError::Write { .. })));
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    // ---------------------------------------------------------------------
    // End to end over HTTP and a real config file
    // ---------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread")]
    async fn new_post_reaches_both_servers_and_is_recorded() {
        use wiremock::matchers::{body_string, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let feed = r#"<recent-posts>
  <recent-post><id>43</id><subject>S</subject><body>B</body><link>L</link></recent-post>
  <recent-post><id>42</id><subject>old</subject><body>old</body><link>old</link></recent-post>
</recent-posts>"#;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recent.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/d1"))
            .and(header("Content-Type", "text/plain"))
            .and(body_string("New update: S\nL\nB"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/d2"))
            .and(header("Authorization", "Bearer t"))
            .and(body_string("New update: S\nL\nB"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let yaml = format!(
            "servers:\n  d1:\n    ntfy_server: \"{uri}/d1\"\n  d2:\n    token: \"t\"\n    ntfy_server: \"{uri}/d2\"\nlast_seen_id: \"42\"\nfeed_url: \"{uri}/recent.xml\"\nrefresh_interval: \"15m\"\n",
            uri = server.uri()
        );
        let dir = std::env::temp_dir().join(format!("feed_ntfy_check_e2e_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.yml");
        std::fs::write(&config_path, yaml).unwrap();

        let path_for_check = config_path.clone();
        let new_id = tokio::task::spawn_blocking(move || {
            let store = ConfigStore::new(path_for_check);
            let settings = store.load().unwrap();
            let client = reqwest::blocking::Client::new();
            let source = RecentPostsSource::new(settings.feed_url.clone(), client.clone());
            let notifier = NtfyNotifier::new(client);
            let checker = UpdateChecker::new(&source, &notifier, &store, &settings.destinations);
            checker.check(&settings.last_seen_id).unwrap()
        })
        .await
        .unwrap();

        assert_eq!(new_id, "43");

        let requests = server.received_requests().await.unwrap();
        let d1 = requests.iter().find(|r| r.url.path() == "/d1").unwrap();
        assert!(d1.headers.get("authorization").is_none());

        let reloaded = ConfigStore::new(&config_path).load().unwrap();
        assert_eq!(reloaded.last_seen_id, "43");
        assert_eq!(reloaded.destinations.len(), 2);
    }
}
