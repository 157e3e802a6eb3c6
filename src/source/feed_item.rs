//! The item type produced by every feed source.
//!
//! `FeedItem` mirrors one `<recent-post>` element.  Its `id` is the only
//! thing the update checker compares; the other fields just feed the
//! notification text.

/// A single feed entry.
///
/// Child elements missing from the document are left as empty strings.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FeedItem {
    /// Unique identifier used for change detection.
    pub id: String,

    /// Headline of the post.
    pub subject: String,

    /// Post body or excerpt.
    pub body: String,

    /// URL of the post.
    pub link: String,
}

impl FeedItem {
    /// The plain-text notification body announcing this item.
    pub fn notification_message(&self) -> String {
        format!("New update: {}\n{}\n{}", self.subject, self.link, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Shorthand constructor for tests.
    pub fn make_item(id: &str, subject: &str, link: &str, body: &str) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            link: link.to_string(),
        }
    }

    #[test]
    fn message_orders_subject_link_body() {
        let item = make_item("43", "S", "L", "B");
        assert_eq!(item.notification_message(), "New update: S\nL\nB");
    }

    #[test]
    fn message_keeps_separators_for_empty_fields() {
        let item = make_item("1", "Only subject", "", "");
        assert_eq!(item.notification_message(), "New update: Only subject\n\n");
    }
}
