//! Source for forum-style "recent posts" XML feeds.
//!
//! The document root holds repeated `<recent-post>` elements, each with
//! `<id>`, `<subject>`, `<body>` and `<link>` children.  Any other elements
//! are ignored.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;

use super::{DataSource, FeedItem, FetchError};

/// Element depths, counting the document root as 1.
const POST_DEPTH: usize = 2;
const FIELD_DEPTH: usize = 3;

/// The `<recent-post>` children that map onto [`FeedItem`] fields.
#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Subject,
    Body,
    Link,
}

impl Field {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"id" => Some(Self::Id),
            b"subject" => Some(Self::Subject),
            b"body" => Some(Self::Body),
            b"link" => Some(Self::Link),
            _ => None,
        }
    }

    fn slot(self, item: &mut FeedItem) -> &mut String {
        match self {
            Self::Id => &mut item.id,
            Self::Subject => &mut item.subject,
            Self::Body => &mut item.body,
            Self::Link => &mut item.link,
        }
    }
}

fn decode_error(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> FetchError {
    FetchError::Decode(format!("{err} (at byte {})", reader.buffer_position()))
}

/// A recent-posts feed polled over HTTP.
pub struct RecentPostsSource {
    url: String,
    client: Client,
}

impl RecentPostsSource {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    /// Decode an already-fetched document into items, in document order.
    ///
    /// Field text is taken verbatim: surrounding whitespace is kept, entities
    /// and CDATA are resolved, and markup nested inside a field (`<b>`, `<a>`)
    /// is skipped together with its text.  A repeated field keeps its last
    /// value.  Decoding stops once the root element closes.
    ///
    /// Pure so tests can exercise decoding without the network.
    pub fn parse_document(xml: &str) -> Result<Vec<FeedItem>, FetchError> {
        let mut reader = Reader::from_str(xml);

        let mut items = Vec::new();
        let mut buf = Vec::new();
        let mut depth: usize = 0;
        let mut seen_root = false;
        let mut current: Option<FeedItem> = None;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    seen_root = true;
                    let name = e.local_name();
                    match depth {
                        POST_DEPTH if name.as_ref() == b"recent-post" => {
                            current = Some(FeedItem::default());
                        }
                        FIELD_DEPTH if current.is_some() => {
                            field = Field::from_tag(name.as_ref());
                            text.clear();
                        }
                        _ => {}
                    }
                }
                Ok(Event::Empty(e)) => {
                    seen_root = true;
                    let name = e.local_name();
                    // An empty element sits one level below the current depth.
                    match depth + 1 {
                        1 => break,
                        POST_DEPTH if name.as_ref() == b"recent-post" => {
                            items.push(FeedItem::default());
                        }
                        FIELD_DEPTH => {
                            if let (Some(item), Some(f)) =
                                (current.as_mut(), Field::from_tag(name.as_ref()))
                            {
                                f.slot(item).clear();
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(t)) if depth == FIELD_DEPTH && field.is_some() => {
                    let unescaped = t.unescape().map_err(|e| decode_error(&reader, e))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::CData(c)) if depth == FIELD_DEPTH && field.is_some() => {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
                Ok(Event::End(_)) => {
                    match depth {
                        FIELD_DEPTH => {
                            if let (Some(item), Some(f)) = (current.as_mut(), field.take()) {
                                *f.slot(item) = std::mem::take(&mut text);
                            }
                        }
                        POST_DEPTH => {
                            if let Some(item) = current.take() {
                                items.push(item);
                            }
                        }
                        _ => {}
                    }
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                Ok(Event::Eof) => {
                    if !seen_root {
                        return Err(decode_error(&reader, "no root element"));
                    }
                    return Err(decode_error(&reader, "unexpected end of document"));
                }
                Err(e) => return Err(decode_error(&reader, e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(items)
    }
}

impl DataSource for RecentPostsSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn fetch(&self) -> Result<Vec<FeedItem>, FetchError> {
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let body = response.text()?;
        Self::parse_document(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
