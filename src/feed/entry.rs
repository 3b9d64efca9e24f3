//! Building one `<entry>` from one work.
//!
//! Entry construction is fail-soft: a work that cannot be rendered becomes
//! either an inline [`OpdsMessage`] (recoverable, e.g. no active license) or
//! is omitted entirely (unexpected failure, or no identifier to even hang a
//! message on). One bad work never takes down a whole feed.

use chrono::Utc;

use crate::annotator::{AnnotationError, Annotator, EntryContext};
use crate::feed::{atom_link, rfc3339, OpdsMessage, ENTRY_TYPE, IMAGE_REL, NO_TITLE, THUMBNAIL_REL};
use crate::model::{
    DeliveryMechanism, Edition, Hold, Identifier, LicensePool, Loan, Work,
};
use crate::xml::XmlElement;

/// The explicit result of trying to render one work.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// A well-formed `<entry>`.
    Entry(XmlElement),
    /// An inline message standing in for the entry.
    Message(OpdsMessage),
    /// Nothing; the work was dropped from the feed.
    Omitted,
}

impl EntryOutcome {
    pub fn is_entry(&self) -> bool {
        matches!(self, EntryOutcome::Entry(_))
    }

    pub fn is_message(&self) -> bool {
        matches!(self, EntryOutcome::Message(_))
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self, EntryOutcome::Omitted)
    }
}

/// Knobs for one entry render.
#[derive(Debug, Clone, Copy)]
pub struct EntryOptions {
    /// Render even when no license pool is active (single-entry documents
    /// for works that aren't currently lendable).
    pub even_if_no_pool: bool,
    /// Skip reading the cached fragment; still write the fresh one back.
    pub force_refresh: bool,
    /// Read and write the per-work fragment cache at all.
    pub use_cache: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            even_if_no_pool: false,
            force_refresh: false,
            use_cache: true,
        }
    }
}

/// What a standalone entry document is built from.
pub enum EntrySubject<'a> {
    Work(&'a Work),
    /// A bare edition with no work or licensing behind it.
    Edition(&'a Edition),
}

/// Render one work per the fail-soft rules.
pub(crate) fn create_entry(
    annotator: &dyn Annotator,
    work: &Work,
    options: &EntryOptions,
) -> EntryOutcome {
    let pool = annotator.active_pool_for(work);
    let (identifier, edition) = match pool {
        Some(pool) => (
            Some(&pool.identifier),
            pool.presentation_edition
                .as_ref()
                .or(work.presentation_edition.as_ref()),
        ),
        None => {
            let edition = work.presentation_edition.as_ref();
            (
                edition.and_then(|e| e.primary_identifier.as_ref()),
                edition,
            )
        }
    };

    // A work without even an identifier can't carry an error message.
    let Some(identifier) = identifier else {
        tracing::warn!("work has no identifier; omitting from feed");
        return EntryOutcome::Omitted;
    };

    if pool.is_none() && !options.even_if_no_pool {
        tracing::warn!(urn = %identifier.urn, "no active license pool for work");
        return EntryOutcome::Message(OpdsMessage::new(
            identifier.urn.as_str(),
            403,
            "I've heard about this work but have no active licenses for it.",
        ));
    }

    if edition.is_none() {
        tracing::warn!(urn = %identifier.urn, "no presentation edition for work");
        return EntryOutcome::Message(OpdsMessage::new(
            identifier.urn.as_str(),
            403,
            "I've heard about this work but have no metadata for it.",
        ));
    }

    let identifier = identifier.clone();
    match build_entry_element(
        annotator,
        Some(work),
        pool,
        edition,
        &identifier,
        options.force_refresh,
        options.use_cache,
    ) {
        Ok(entry) => EntryOutcome::Entry(entry),
        Err(AnnotationError::Unfulfillable) => {
            tracing::info!(
                urn = %identifier.urn,
                "work is not fulfillable, refusing to create an entry",
            );
            EntryOutcome::Message(OpdsMessage::new(
                identifier.urn.as_str(),
                403,
                "I know about this work but can offer no way of fulfilling it.",
            ))
        }
        Err(error) => {
            tracing::error!(urn = %identifier.urn, %error, "failed to build entry");
            EntryOutcome::Omitted
        }
    }
}

/// Construct (or reuse) the entry element and run the annotator's
/// per-entry hook on it.
///
/// The hook always runs fresh, even on a cached fragment, because its
/// output depends on the active pool chosen for this request.
pub(crate) fn build_entry_element(
    annotator: &dyn Annotator,
    work: Option<&Work>,
    pool: Option<&LicensePool>,
    edition: Option<&Edition>,
    identifier: &Identifier,
    force_refresh: bool,
    use_cache: bool,
) -> Result<XmlElement, AnnotationError> {
    let variant = annotator.variant();

    let mut cached = None;
    if use_cache && !force_refresh {
        if let Some(work) = work {
            if let Some(fragment) = work.entry_cache.get(variant) {
                match XmlElement::parse(&fragment) {
                    Ok(el) => cached = Some(el),
                    Err(error) => {
                        tracing::warn!(
                            urn = %identifier.urn,
                            %error,
                            "discarding unparseable cached entry fragment",
                        );
                    }
                }
            }
        }
    }

    let mut entry = match cached {
        Some(el) => el,
        None => {
            let Some(edition) = edition else {
                return Err(AnnotationError::Other(
                    "no presentation edition to render".into(),
                ));
            };
            let el = make_entry_xml(annotator, work, pool, edition, identifier);
            if use_cache {
                if let Some(work) = work {
                    match el.to_fragment() {
                        Ok(fragment) => work.entry_cache.set(variant, fragment),
                        Err(error) => {
                            tracing::warn!(urn = %identifier.urn, %error, "could not cache entry fragment");
                        }
                    }
                }
            }
            el
        }
    };

    let ctx = EntryContext {
        work,
        pool,
        edition,
        identifier,
    };
    annotator.annotate_work_entry(&ctx, &mut entry)?;
    Ok(entry)
}

/// The cacheable body of an entry: everything that depends only on the
/// work, not on the requesting application state.
fn make_entry_xml(
    annotator: &dyn Annotator,
    work: Option<&Work>,
    pool: Option<&LicensePool>,
    edition: &Edition,
    identifier: &Identifier,
) -> XmlElement {
    let now = Utc::now();
    let mut entry = XmlElement::new("entry");

    if let Some(medium) = edition.medium {
        entry.set_attr("schema:additionalType", medium.additional_type());
    }

    entry.push(XmlElement::with_text(
        "id",
        annotator.permalink_for(identifier),
    ));
    entry.push(XmlElement::with_text(
        "title",
        edition
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(NO_TITLE),
    ));
    if let Some(subtitle) = edition.subtitle.as_deref() {
        entry.push(XmlElement::with_text("schema:alternativeHeadline", subtitle));
    }

    entry.extend(annotator.authors(edition));

    if let Some(series) = &edition.series {
        entry.push(series_tag(series, edition.series_position));
    }

    let content = annotator.content(work);
    if !content.is_empty() {
        entry.push(XmlElement::with_text("summary", content).attr("type", "html"));
    }

    let updated = work
        .and_then(|w| w.last_update_time)
        .unwrap_or(now);
    entry.push(XmlElement::with_text("updated", rfc3339(updated)));

    if let Some(pwid) = edition.permanent_work_id.as_deref() {
        entry.push(XmlElement::with_text("app:pwid", pwid));
    }

    let (thumbnails, full) = annotator.cover_links(work);
    for (rel, urls) in [(IMAGE_REL, &full), (THUMBNAIL_REL, &thumbnails)] {
        for url in urls {
            entry.push(atom_link(rel, url).attr("type", image_media_type(url)));
        }
    }

    if let Some(work) = work {
        for category in annotator.categories(work) {
            let mut tag = XmlElement::new("category")
                .attr("scheme", category.scheme.as_str())
                .attr("term", category.term.as_str())
                .attr("label", category.label.as_str());
            if let Some(weight) = category.weight {
                tag.set_attr("schema:ratingValue", weight.to_string());
            }
            entry.push(tag);
        }
    }

    if let Some(language) = edition.language.as_deref() {
        entry.push(XmlElement::with_text("dcterms:language", language));
    }
    if let Some(publisher) = edition.publisher.as_deref() {
        entry.push(XmlElement::with_text("dcterms:publisher", publisher));
    }
    if let Some(imprint) = edition.imprint.as_deref() {
        entry.push(XmlElement::with_text("app:imprint", imprint));
    }

    // Atom `published` is the date the work became available through this
    // application, at day granularity: announcing future availability is
    // confusing, so not-yet-arrived dates are withheld.
    if let Some(pool) = pool {
        if let Some(available_since) = pool.availability_time {
            if available_since.date_naive() <= now.date_naive() {
                entry.push(XmlElement::with_text(
                    "published",
                    rfc3339(available_since),
                ));
            }
        }
    }

    // dcterms:created is when this edition came out. Prefer the explicit
    // issued date over the original publication date, and withhold dates
    // that haven't arrived yet.
    if let Some(issued) = edition.issued.or(edition.published) {
        if issued.has_arrived(now) {
            entry.push(XmlElement::with_text(
                "dcterms:created",
                issued.isoformat_date(),
            ));
        }
    }

    entry
}

/// `schema:Series`, with its position when known.
pub(crate) fn series_tag(name: &str, position: Option<u32>) -> XmlElement {
    let mut tag = XmlElement::new("schema:Series").attr("name", name);
    if let Some(position) = position {
        tag.set_attr("schema:position", position.to_string());
    }
    tag
}

fn image_media_type(url: &str) -> &'static str {
    if url.ends_with(".jpeg") || url.ends_with(".jpg") {
        "image/jpeg"
    } else if url.ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}

/// Licensing state tags, destined for the inside of an acquisition link.
///
/// The patron's own loan or hold, when supplied, determines the
/// availability status; pool aggregates are the fallback. The holds total
/// always comes from the pool aggregate, while the position comes from the
/// individual hold. Open-access pools report availability only: holds and
/// copies are meaningless for unlimited sources.
pub fn license_tags(
    pool: Option<&LicensePool>,
    loan: Option<&Loan>,
    hold: Option<&Hold>,
) -> Vec<XmlElement> {
    let Some(pool) = pool else {
        return Vec::new();
    };

    let mut status = "unavailable";
    let mut since = None;
    let mut until = None;
    if let Some(loan) = loan {
        status = "available";
        since = loan.start;
        until = loan.end;
    } else if let Some(hold) = hold {
        until = hold.end;
        if hold.position == Some(0) {
            status = "ready";
        } else {
            status = "reserved";
            since = hold.start;
        }
    } else if pool.open_access || (pool.licenses_available > 0 && pool.licenses_owned > 0) {
        status = "available";
    }

    let mut availability = XmlElement::new("opds:availability").attr("status", status);
    if let Some(since) = since {
        availability.set_attr("since", rfc3339(since));
    }
    if let Some(until) = until {
        availability.set_attr("until", rfc3339(until));
    }
    let mut tags = vec![availability];

    if pool.open_access {
        return tags;
    }

    let mut holds = XmlElement::new("opds:holds")
        .attr("total", pool.patrons_in_hold_queue.to_string());
    if let Some(position) = hold.and_then(|h| h.position) {
        if position > 0 {
            holds.set_attr("position", position.to_string());
        }
    }
    tags.push(holds);

    tags.push(
        XmlElement::new("opds:copies")
            .attr("total", pool.licenses_owned.to_string())
            .attr("available", pool.licenses_available.to_string()),
    );

    tags
}

/// Media types a client passes through to get the actual content: the
/// streaming entry document first if any, then the DRM wrapper, then the
/// content itself.
pub fn format_types(mechanism: &DeliveryMechanism) -> Vec<String> {
    let mut types = Vec::new();
    if mechanism.streaming {
        types.push(ENTRY_TYPE.to_string());
    }
    if let Some(drm) = &mechanism.drm_scheme {
        types.push(drm.clone());
    }
    if let Some(content_type) = &mechanism.content_type {
        types.push(content_type.clone());
    }
    types
}

/// An acquisition `<link>`: the first type is the link's own, the rest
/// become a nested indirect-acquisition chain.
pub fn acquisition_link(rel: &str, href: &str, types: &[String]) -> XmlElement {
    let mut link = atom_link(rel, href);
    if let Some(first) = types.first() {
        link.set_attr("type", first.as_str());
    }
    if let Some(indirect) = indirect_acquisition(types.get(1..).unwrap_or_default()) {
        link.push(indirect);
    }
    link
}

/// Nest `opds:indirectAcquisition` elements, outermost first.
pub fn indirect_acquisition(types: &[String]) -> Option<XmlElement> {
    let mut chain: Option<XmlElement> = None;
    for media_type in types.iter().rev() {
        let mut el =
            XmlElement::new("opds:indirectAcquisition").attr("type", media_type.as_str());
        if let Some(inner) = chain {
            el.push(inner);
        }
        chain = Some(el);
    }
    chain
}

/// A reduced entry built from loose resources instead of a full work:
/// identifier, cover, description, and quality, as far as they exist.
pub fn minimal_entry(
    identifier: &Identifier,
    cover_url: Option<&str>,
    thumbnail_url: Option<&str>,
    description: Option<&str>,
    quality: Option<f64>,
    updated: Option<chrono::DateTime<Utc>>,
) -> XmlElement {
    let mut entry = XmlElement::new("entry")
        .child(XmlElement::with_text("id", identifier.urn.as_str()))
        .child(XmlElement::with_text("title", NO_TITLE));
    if let Some(url) = cover_url {
        entry.push(atom_link(IMAGE_REL, url).attr("type", image_media_type(url)));
    }
    if let Some(url) = thumbnail_url {
        entry.push(atom_link(THUMBNAIL_REL, url).attr("type", image_media_type(url)));
    }
    if let Some(description) = description {
        entry.push(XmlElement::with_text("summary", description).attr("type", "html"));
    }
    if let Some(quality) = quality {
        entry.push(crate::annotator::rating_tag(
            Some(crate::annotator::QUALITY_URI),
            quality,
        ));
    }
    if let Some(updated) = updated {
        entry.push(XmlElement::with_text("updated", rfc3339(updated)));
    }
    entry
}
