//! Feed documents: the Atom+OPDS wrapper, inline messages, and the
//! acquisition machinery built on top of them.

mod acquisition;
mod entry;
mod generator;

pub use acquisition::{AcquisitionFeed, Precomposed};
pub use entry::{
    acquisition_link, format_types, indirect_acquisition, license_tags, minimal_entry,
    EntryOptions, EntryOutcome, EntrySubject,
};
pub use generator::{FeedError, FeedGenerator, FeedOutput};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::xml::{XmlElement, XmlError};

/// Relation for facet links.
pub const FACET_REL: &str = "http://opds-spec.org/facet";
/// Relation for per-entry group ("collection") links in grouped feeds.
pub const GROUP_REL: &str = "collection";
/// Relation for full-size cover images.
pub const IMAGE_REL: &str = "http://opds-spec.org/image";
/// Relation for cover thumbnails.
pub const THUMBNAIL_REL: &str = "http://opds-spec.org/image/thumbnail";
/// Relation for open-access acquisition links.
pub const OPEN_ACCESS_REL: &str = "http://opds-spec.org/acquisition/open-access";
/// Relation for borrow acquisition links.
pub const BORROW_REL: &str = "http://opds-spec.org/acquisition/borrow";

/// Media type of a single OPDS entry document.
pub const ENTRY_TYPE: &str = "application/atom+xml;type=entry;profile=opds-catalog";
/// Media type of an OPDS acquisition feed.
pub const ACQUISITION_FEED_TYPE: &str =
    "application/atom+xml;profile=opds-catalog;kind=acquisition";

/// Placeholder title for editions with no usable title.
pub const NO_TITLE: &str = "[Unknown Title]";

/// Atom timestamp format.
pub fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An Atom `<link>` with the given relation and target. Callers chain
/// [`XmlElement::attr`] for `type`/`title` when they apply.
pub fn atom_link(rel: &str, href: &str) -> XmlElement {
    XmlElement::new("link").attr("rel", rel).attr("href", href)
}

/// An inline substitute for an entry that could not be rendered: which
/// work, how badly, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpdsMessage {
    pub urn: String,
    pub status: u16,
    pub message: String,
}

impl OpdsMessage {
    pub fn new(urn: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            status,
            message: message.into(),
        }
    }

    pub fn to_element(&self) -> XmlElement {
        XmlElement::new("app:message")
            .child(XmlElement::with_text("id", self.urn.as_str()))
            .child(XmlElement::with_text(
                "app:status_code",
                self.status.to_string(),
            ))
            .child(XmlElement::with_text("message", self.message.as_str()))
    }
}

/// An Atom feed document under construction.
pub struct OpdsFeed {
    root: XmlElement,
}

impl OpdsFeed {
    pub fn new(title: &str, url: &str) -> Self {
        let root = XmlElement::new("feed")
            .child(XmlElement::with_text("id", url))
            .child(XmlElement::with_text("title", title))
            .child(XmlElement::with_text("updated", rfc3339(Utc::now())))
            .child(
                atom_link("self", url).attr("type", ACQUISITION_FEED_TYPE),
            );
        Self { root }
    }

    pub fn add_link(&mut self, link: XmlElement) {
        self.root.push(link);
    }

    pub fn append(&mut self, child: XmlElement) {
        self.root.push(child);
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    /// Number of `<entry>` and `<app:message>` children so far.
    pub fn entry_count(&self) -> usize {
        self.root
            .child_elements()
            .filter(|e| e.name() == "entry" || e.name() == "app:message")
            .count()
    }

    /// Complete document text, namespaces declared on the root.
    pub fn serialize(&self) -> Result<String, XmlError> {
        self.root.to_document()
    }
}
