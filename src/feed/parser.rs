//! Tolerant streaming parser for RSS 2.0 and Atom 1.0 documents.
//!
//! The document is tokenized lazily by `quick-xml` into [`ParseEvent`]s and
//! folded by a small state machine ([`DocumentParser`]) into a [`Channel`].
//! No schema validation happens: unknown elements are skipped, and for
//! fields with several possible source tags the first non-empty value wins.
//!
//! # Security
//!
//! `quick-xml` (0.37) never expands `<!ENTITY>` declarations, so XXE payloads
//! cannot pull in external content. Unknown entities in text fall back to the
//! raw, unescaped text.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::date::parse_date;
use crate::error::FeedError;

// ============================================================================
// Parse Output
// ============================================================================

/// Normalized parse result for one feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    /// `<image><url>` for RSS, `<icon>` or `<logo>` for Atom
    pub icon_url: Option<String>,
    /// Items in document order
    pub items: Vec<Item>,
}

/// A single entry parsed from a feed document, before persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    /// Falls back to `link` when the document has no guid/id
    pub guid: Option<String>,
}

// ============================================================================
// Parse Events
// ============================================================================

/// Tokenizer output consumed by [`DocumentParser`].
///
/// Element names are namespace-stripped and ASCII-lowercased, so `dc:creator`
/// arrives as `creator` and `pubDate` as `pubdate`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Start {
        name: String,
        href: Option<String>,
        rel: Option<String>,
    },
    Text(String),
    End {
        name: String,
    },
}

/// Lazy event sequence over a byte slice.
///
/// Self-closing elements are reported as a `Start` immediately followed by
/// an `End`. After the first error the sequence is exhausted.
pub struct XmlEvents<'a> {
    reader: Reader<&'a [u8]>,
    buf: Vec<u8>,
    pending_end: Option<String>,
    open: Vec<String>,
    done: bool,
}

impl<'a> XmlEvents<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            pending_end: None,
            open: Vec::new(),
            done: false,
        }
    }

    /// Reads one raw event and converts it to owned data.
    fn read_step(&mut self) -> Step {
        self.buf.clear();
        let position = self.reader.buffer_position();

        match self.reader.read_event_into(&mut self.buf) {
            Err(e) => Step::Fail(FeedError::ParsingError(format!(
                "{} (at byte {})",
                e, position
            ))),
            Ok(Event::Decl(decl)) => match decl.encoding() {
                Some(Ok(encoding)) if !is_utf8_compatible(&encoding) => {
                    Step::Fail(FeedError::UnsupportedEncoding)
                }
                _ => Step::Skip,
            },
            Ok(Event::Start(e)) => Step::Open(start_event(&e, &self.reader)),
            Ok(Event::Empty(e)) => Step::SelfClosing(start_event(&e, &self.reader)),
            Ok(Event::End(e)) => Step::Close(element_name(e.local_name().as_ref())),
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(text) => Step::Text(text.into_owned()),
                // Undeclared entities such as &nbsp; keep their raw form
                Err(_) => match self.reader.decoder().decode(&e) {
                    Ok(raw) => Step::Text(raw.into_owned()),
                    Err(_) => Step::Fail(FeedError::UnsupportedEncoding),
                },
            },
            Ok(Event::CData(e)) => match self.reader.decoder().decode(&e) {
                Ok(text) => Step::Text(text.into_owned()),
                Err(_) => Step::Fail(FeedError::UnsupportedEncoding),
            },
            Ok(Event::Eof) => Step::Eof,
            // Comments, processing instructions and DOCTYPE carry no feed data
            Ok(_) => Step::Skip,
        }
    }
}

/// Owned form of one tokenizer step.
enum Step {
    Skip,
    Open(ParseEvent),
    SelfClosing(ParseEvent),
    Close(String),
    Text(String),
    Eof,
    Fail(FeedError),
}

impl Iterator for XmlEvents<'_> {
    type Item = Result<ParseEvent, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(name) = self.pending_end.take() {
            return Some(Ok(ParseEvent::End { name }));
        }

        while !self.done {
            match self.read_step() {
                Step::Skip => {}
                Step::Open(start) => {
                    if let ParseEvent::Start { name, .. } = &start {
                        self.open.push(name.clone());
                    }
                    return Some(Ok(start));
                }
                Step::SelfClosing(start) => {
                    if let ParseEvent::Start { name, .. } = &start {
                        self.pending_end = Some(name.clone());
                    }
                    return Some(Ok(start));
                }
                Step::Close(name) => {
                    self.open.pop();
                    return Some(Ok(ParseEvent::End { name }));
                }
                Step::Text(text) => return Some(Ok(ParseEvent::Text(text))),
                Step::Eof => {
                    self.done = true;
                    if let Some(unclosed) = self.open.last() {
                        let message = format!("document ended before </{}>", unclosed);
                        return Some(Err(FeedError::ParsingError(message)));
                    }
                }
                Step::Fail(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

fn is_utf8_compatible(encoding: &[u8]) -> bool {
    let encoding = String::from_utf8_lossy(encoding).to_ascii_lowercase();
    matches!(encoding.as_str(), "utf-8" | "utf8" | "us-ascii" | "ascii")
}

fn element_name(local: &[u8]) -> String {
    String::from_utf8_lossy(local).to_ascii_lowercase()
}

fn start_event(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> ParseEvent {
    let name = element_name(e.local_name().as_ref());
    let mut href = None;
    let mut rel = None;

    if name == "link" {
        // Malformed attributes are skipped rather than failing the document
        for attr in e.attributes().flatten() {
            let value = match attr.decode_and_unescape_value(reader.decoder()) {
                Ok(value) => value.trim().to_string(),
                Err(_) => continue,
            };
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value),
                b"rel" => rel = Some(value),
                _ => {}
            }
        }
    }

    ParseEvent::Start { name, href, rel }
}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    /// `rss/channel/item`, links as element text
    Rss,
    /// `feed/entry`, links as `href` attributes
    Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Root,
    InEntry,
    InAuthor,
}

/// Per-item scratch fields, reset on every item/entry start.
#[derive(Debug, Default)]
struct ItemScratch {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    author: Option<String>,
    guid: Option<String>,
}

impl ItemScratch {
    fn into_item(self) -> Option<Item> {
        let title = self.title?;
        let guid = self.guid.or_else(|| self.link.clone());
        Some(Item {
            title,
            link: self.link,
            description: self.description,
            published_at: self.published.or(self.updated),
            author: self.author,
            guid,
        })
    }
}

/// Elements whose text the parser captures. Text inside any other element
/// (e.g. XHTML markup within `<content>`) keeps accumulating into the
/// enclosing field.
const CAPTURED: &[&str] = &[
    "item",
    "entry",
    "author",
    "title",
    "link",
    "description",
    "summary",
    "content",
    "subtitle",
    "pubdate",
    "published",
    "updated",
    "date",
    "creator",
    "name",
    "guid",
    "id",
    "url",
    "icon",
    "logo",
];

/// Folds [`ParseEvent`]s into a [`Channel`].
///
/// Every parse owns a fresh instance, so concurrent parses never share
/// scratch state.
#[derive(Debug)]
pub struct DocumentParser {
    dialect: Option<Dialect>,
    state: State,
    depth: usize,
    text: String,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    icon_url: Option<String>,
    scratch: ItemScratch,
    items: Vec<Item>,
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser {
    pub fn new() -> Self {
        Self {
            dialect: None,
            state: State::Root,
            depth: 0,
            text: String::new(),
            title: None,
            link: None,
            description: None,
            icon_url: None,
            scratch: ItemScratch::default(),
            items: Vec::new(),
        }
    }

    /// Applies one event to the state machine.
    pub fn handle(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::Start { name, href, rel } => self.start(name, href, rel),
            ParseEvent::Text(text) => self.text.push_str(&text),
            ParseEvent::End { name } => self.end(&name),
        }
    }

    /// Completes the parse.
    ///
    /// # Errors
    ///
    /// [`FeedError::InvalidFeedFormat`] when no channel title was found.
    pub fn finish(self) -> Result<Channel, FeedError> {
        let title = match self.title {
            Some(title) => title,
            None => return Err(FeedError::InvalidFeedFormat),
        };
        Ok(Channel {
            title,
            link: self.link,
            description: self.description,
            icon_url: self.icon_url,
            items: self.items,
        })
    }

    fn is_atom(&self) -> bool {
        self.dialect == Some(Dialect::Atom)
    }

    /// Depth of the channel's own children once their end tag is consumed:
    /// `feed/title` for Atom, `rss/channel/title` for RSS
    fn channel_depth(&self) -> usize {
        if self.is_atom() {
            1
        } else {
            2
        }
    }

    fn start(&mut self, name: String, href: Option<String>, rel: Option<String>) {
        if self.depth == 0 && self.dialect.is_none() {
            self.dialect = Some(if name == "feed" {
                Dialect::Atom
            } else {
                Dialect::Rss
            });
        }
        self.depth += 1;

        if CAPTURED.contains(&name.as_str()) {
            self.text.clear();
        }

        // Atom links carry their target in attributes; the first alternate wins
        let atom_link = if name == "link" && self.is_atom() && is_alternate(rel.as_deref()) {
            href.filter(|h| !h.is_empty())
        } else {
            None
        };

        match self.state {
            State::Root => {
                if name == "item" || name == "entry" {
                    self.scratch = ItemScratch::default();
                    self.state = State::InEntry;
                } else if let Some(href) = atom_link {
                    set_first(&mut self.link, href);
                }
            }
            State::InEntry => {
                if name == "author" {
                    self.state = State::InAuthor;
                } else if let Some(href) = atom_link {
                    set_first(&mut self.scratch.link, href);
                }
            }
            State::InAuthor => {}
        }
    }

    fn end(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);

        if !CAPTURED.contains(&name) {
            return;
        }
        let value = self.text.trim().to_string();
        self.text.clear();

        match self.state {
            State::InAuthor => match name {
                "name" => set_first(&mut self.scratch.author, value),
                "author" => {
                    // RSS <author> is plain text; Atom's is a composite
                    set_first(&mut self.scratch.author, value);
                    self.state = State::InEntry;
                }
                _ => {}
            },
            State::InEntry => match name {
                "item" | "entry" => {
                    let scratch = std::mem::take(&mut self.scratch);
                    match scratch.into_item() {
                        Some(item) => self.items.push(item),
                        None => tracing::debug!("Skipping item without a title"),
                    }
                    self.state = State::Root;
                }
                "title" => set_first(&mut self.scratch.title, value),
                "link" if !self.is_atom() => set_first(&mut self.scratch.link, value),
                "description" | "summary" | "content" => {
                    set_first(&mut self.scratch.description, value)
                }
                "pubdate" | "published" | "date" => {
                    if self.scratch.published.is_none() {
                        self.scratch.published = parse_date(&value);
                    }
                }
                "updated" => {
                    if self.scratch.updated.is_none() {
                        self.scratch.updated = parse_date(&value);
                    }
                }
                "creator" => set_first(&mut self.scratch.author, value),
                "guid" | "id" => set_first(&mut self.scratch.guid, value),
                _ => {}
            },
            State::Root => {
                // Nested elements such as <image><title> must not claim
                // channel fields
                let at_channel = self.depth == self.channel_depth();
                match name {
                    "title" if at_channel => set_first(&mut self.title, value),
                    "link" if at_channel && !self.is_atom() => set_first(&mut self.link, value),
                    "description" | "subtitle" if at_channel => {
                        set_first(&mut self.description, value)
                    }
                    "url" | "icon" | "logo" => set_first(&mut self.icon_url, value),
                    _ => {}
                }
            }
        }
    }
}

/// First-write-wins: keep an existing value, ignore empty candidates.
fn set_first(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value);
    }
}

fn is_alternate(rel: Option<&str>) -> bool {
    matches!(rel, None | Some("") | Some("alternate"))
}

/// Parses a raw RSS or Atom document into a [`Channel`].
///
/// # Errors
///
/// - [`FeedError::ParsingError`] if the XML tokenizer reports a syntax fault
/// - [`FeedError::UnsupportedEncoding`] for non-UTF-8 documents
/// - [`FeedError::InvalidFeedFormat`] if the document has no channel title
pub fn parse_channel(bytes: &[u8]) -> Result<Channel, FeedError> {
    let mut parser = DocumentParser::new();
    for event in XmlEvents::new(strip_bom(bytes)) {
        parser.handle(event?);
    }
    parser.finish()
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// Convenience for callers holding text rather than bytes.
pub fn parse_channel_str(document: &str) -> Result<Channel, FeedError> {
    parse_channel(document.as_bytes())
}
