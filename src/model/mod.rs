//! Read-only views of catalog state.
//!
//! These types mirror what the catalog persistence layer hands the feed
//! engine: already-materialized rows, not live records. The engine never
//! mutates them, with one deliberate exception — the per-work
//! [`EntryCache`], which holds rendered `<entry>` fragments keyed by
//! annotator verbosity.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

/// A stable identifier for one edition of a work, expressed as a URN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub urn: String,
}

impl Identifier {
    pub fn new(urn: impl Into<String>) -> Self {
        Self { urn: urn.into() }
    }
}

/// What kind of content a distribution channel delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    Book,
    Audiobook,
}

impl Medium {
    /// The `schema:additionalType` URI for this medium.
    pub fn additional_type(&self) -> &'static str {
        match self {
            Medium::Book => "http://schema.org/EBook",
            Medium::Audiobook => "http://bibframe.org/vocab/AudioBook",
        }
    }
}

/// One contributor to an edition, with as much authority detail as the
/// catalog has collected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contributor {
    pub sort_name: Option<String>,
    pub display_name: Option<String>,
    pub family_name: Option<String>,
    pub wikipedia_name: Option<String>,
    /// VIAF authority record id.
    pub viaf: Option<String>,
    /// Library of Congress authority record id.
    pub lc: Option<String>,
}

impl Contributor {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: Some(display_name.into()),
            ..Self::default()
        }
    }

    /// The best available name for display, if any.
    pub fn name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or(self.sort_name.as_deref())
    }
}

/// A publication date that may or may not carry a time component.
///
/// Calendar dates compare at day granularity; full timestamps compare at
/// full precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartialDate {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

impl PartialDate {
    /// Whether this date has arrived as of `now`.
    pub fn has_arrived(&self, now: DateTime<Utc>) -> bool {
        match self {
            PartialDate::Day(d) => *d <= now.date_naive(),
            PartialDate::Instant(t) => *t <= now,
        }
    }

    /// ISO-8601 date portion, which is what date-valued feed tags carry.
    pub fn isoformat_date(&self) -> String {
        match self {
            PartialDate::Day(d) => d.format("%Y-%m-%d").to_string(),
            PartialDate::Instant(t) => t.date_naive().format("%Y-%m-%d").to_string(),
        }
    }
}

/// The bibliographic presentation of a work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Edition {
    pub primary_identifier: Option<Identifier>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub contributors: Vec<Contributor>,
    pub series: Option<String>,
    pub series_position: Option<u32>,
    /// ISO 639 language code.
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub imprint: Option<String>,
    pub medium: Option<Medium>,
    pub permanent_work_id: Option<String>,
    pub cover_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// When this edition (e.g. the ebook) came out.
    pub issued: Option<PartialDate>,
    /// When the work was originally published, possibly in print.
    pub published: Option<PartialDate>,
}

impl Edition {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// How one delivery mechanism hands over the content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryMechanism {
    /// Media type of the content itself.
    pub content_type: Option<String>,
    /// Media type of the DRM wrapper, if the content is encrypted.
    pub drm_scheme: Option<String>,
    /// Streaming reads go through an intermediate document first.
    pub streaming: bool,
}

/// One distribution channel's licensing state for a work.
#[derive(Debug, Clone, PartialEq)]
pub struct LicensePool {
    pub identifier: Identifier,
    /// Name of the distributor this pool came from.
    pub data_source: String,
    pub open_access: bool,
    /// A superseded pool has been replaced by a better pool for the same
    /// work and is never chosen for presentation.
    pub superseded: bool,
    /// The best mirrored, fulfillable open-access download, when one exists.
    pub open_access_url: Option<String>,
    pub licenses_owned: u32,
    pub licenses_available: u32,
    pub licenses_reserved: u32,
    pub patrons_in_hold_queue: u32,
    /// When this work first became available through this channel.
    pub availability_time: Option<DateTime<Utc>>,
    pub presentation_edition: Option<Edition>,
    pub delivery_mechanisms: Vec<DeliveryMechanism>,
}

impl LicensePool {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            data_source: String::new(),
            open_access: false,
            superseded: false,
            open_access_url: None,
            licenses_owned: 0,
            licenses_available: 0,
            licenses_reserved: 0,
            patrons_in_hold_queue: 0,
            availability_time: None,
            presentation_edition: None,
            delivery_mechanisms: Vec::new(),
        }
    }
}

/// A patron's active loan, as far as license tags care.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loan {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// A patron's place in a hold queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hold {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// 0 means the reserved copy is waiting for this patron.
    pub position: Option<u32>,
}

/// Intended audience of a work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Adult,
    AdultsOnly,
    YoungAdult,
    Children,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Adult => "Adult",
            Audience::AdultsOnly => "Adults Only",
            Audience::YoungAdult => "Young Adult",
            Audience::Children => "Children",
        }
    }

    /// A target age range is only meaningful for younger audiences.
    pub fn uses_target_age(&self) -> bool {
        matches!(self, Audience::YoungAdult | Audience::Children)
    }
}

/// Reader-appeal scores, when the classification pipeline produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Appeals {
    pub character: Option<f32>,
    pub language: Option<f32>,
    pub setting: Option<f32>,
    pub story: Option<f32>,
}

impl Appeals {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        [
            ("Character", self.character),
            ("Language", self.language),
            ("Setting", self.setting),
            ("Story", self.story),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// One raw classification assertion, used by the verbose annotator to emit
/// every subject the catalog knows, not just the curated genre list.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Scheme URI the term belongs to.
    pub scheme: String,
    pub term: String,
    pub label: Option<String>,
    pub weight: f32,
}

/// Which per-work cached fragment an annotator reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryVariant {
    Simple,
    Verbose,
}

impl EntryVariant {
    fn index(self) -> usize {
        match self {
            EntryVariant::Simple => 0,
            EntryVariant::Verbose => 1,
        }
    }
}

/// Per-work cache of rendered `<entry>` fragments, one slot per variant.
///
/// Slots are written back after a fresh render and invalidated when catalog
/// state changes underneath them. Concurrent requests may race on a slot;
/// the last writer wins and regeneration is idempotent, so no coordination
/// beyond the mutex is needed.
#[derive(Debug, Default)]
pub struct EntryCache {
    slots: Mutex<[Option<String>; 2]>,
}

impl EntryCache {
    pub fn get(&self, variant: EntryVariant) -> Option<String> {
        self.lock()[variant.index()].clone()
    }

    pub fn set(&self, variant: EntryVariant, xml: String) {
        self.lock()[variant.index()] = Some(xml);
    }

    pub fn invalidate(&self, variant: EntryVariant) {
        self.lock()[variant.index()] = None;
    }

    pub fn invalidate_all(&self) {
        *self.lock() = [None, None];
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, [Option<String>; 2]> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clone for EntryCache {
    fn clone(&self) -> Self {
        Self {
            slots: Mutex::new(self.lock().clone()),
        }
    }
}

/// The abstract identity of a book or audiobook, backed by zero or more
/// license pools.
#[derive(Debug, Clone, Default)]
pub struct Work {
    pub presentation_edition: Option<Edition>,
    pub license_pools: Vec<LicensePool>,
    /// `Some(true)` fiction, `Some(false)` nonfiction, `None` unclassified.
    pub fiction: Option<bool>,
    pub genres: Vec<String>,
    pub appeals: Appeals,
    pub audience: Option<Audience>,
    /// Inclusive age range, relevant only for younger audiences.
    pub target_age: Option<(u8, u8)>,
    pub quality: Option<f64>,
    pub rating: Option<f64>,
    pub popularity: Option<f64>,
    /// Curated HTML summary.
    pub summary: Option<String>,
    /// Raw classifications for verbose rendering.
    pub classifications: Vec<Classification>,
    /// When presentation-relevant catalog state last changed.
    pub last_update_time: Option<DateTime<Utc>>,
    pub entry_cache: EntryCache,
}

impl Work {
    /// Human-readable age range, e.g. `"8-12"`, or a single age when the
    /// bounds coincide.
    pub fn target_age_string(&self) -> Option<String> {
        self.target_age.map(|(lower, upper)| {
            if lower == upper {
                lower.to_string()
            } else {
                format!("{lower}-{upper}")
            }
        })
    }
}
