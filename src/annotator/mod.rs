//! The Annotator: everything about a feed that depends on the application
//! rather than the catalog.
//!
//! URLs, cover links, category vocabularies, author detail, and per-entry
//! post-processing all route through this trait so the same assembly code
//! can serve a patron-facing catalog, a machine-to-machine sync endpoint,
//! or a test fixture. Implementations are plain structs passed by
//! reference; they hold no per-request mutable state.

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::facets::Facets;
use crate::feed::{
    acquisition_link, format_types, license_tags, OpdsFeed, BORROW_REL, OPEN_ACCESS_REL,
};
use crate::model::{
    Contributor, Edition, EntryVariant, Identifier, LicensePool, Work,
};
use crate::pagination::Pagination;
use crate::scope::{GroupedWork, WorkList};
use crate::xml::{XmlElement, APP_NS, SCHEMA_NS};

/// Measurement type URI for curated quality scores.
pub const QUALITY_URI: &str = "http://lectern.dev/terms/rel/quality";
/// Measurement type URI for popularity scores.
pub const POPULARITY_URI: &str = "http://lectern.dev/terms/rel/popularity";

/// A failure inside an annotator hook.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// The work cannot currently be fulfilled through any means; sufficient
    /// reason to refuse the whole entry.
    #[error("work cannot currently be fulfilled through any means")]
    Unfulfillable,

    #[error("annotation failed: {0}")]
    Other(String),
}

/// Everything an annotator may consult while post-processing one entry.
pub struct EntryContext<'a> {
    pub work: Option<&'a Work>,
    pub pool: Option<&'a LicensePool>,
    pub edition: Option<&'a Edition>,
    pub identifier: &'a Identifier,
}

/// One classification of a work, destined for an Atom `<category>` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// Scheme URI the term belongs to.
    pub scheme: String,
    pub term: String,
    pub label: String,
    /// Classification weight, rendered as `schema:ratingValue`.
    pub weight: Option<f32>,
}

/// Application-specific rendering decisions for feeds and entries.
pub trait Annotator: Send + Sync {
    /// Which per-work cached fragment this annotator reads and writes.
    fn variant(&self) -> EntryVariant {
        EntryVariant::Simple
    }

    /// Post-process one entry. Runs fresh on every render, including cached
    /// ones, because it depends on the active pool chosen for this request.
    fn annotate_work_entry(
        &self,
        ctx: &EntryContext<'_>,
        entry: &mut XmlElement,
    ) -> Result<(), AnnotationError>;

    /// Post-process a whole feed before serialization.
    fn annotate_feed(&self, _feed: &mut OpdsFeed, _scope: &dyn WorkList) {}

    /// Which license pool would be used to issue a license right now.
    fn active_pool_for<'a>(&self, work: &'a Work) -> Option<&'a LicensePool> {
        active_license_pool(work)
    }

    /// `(thumbnail_urls, full_urls)` for a work's cover.
    fn cover_links(&self, work: Option<&Work>) -> (Vec<String>, Vec<String>) {
        let Some(edition) = work.and_then(|w| w.presentation_edition.as_ref()) else {
            return (Vec::new(), Vec::new());
        };
        let thumbnails = edition.thumbnail_url.iter().cloned().collect();
        let full = edition.cover_url.iter().cloned().collect();
        (thumbnails, full)
    }

    /// All classifications worth rendering for this work.
    fn categories(&self, work: &Work) -> Vec<Category> {
        standard_categories(work)
    }

    /// `<author>` tags for an edition.
    fn authors(&self, edition: &Edition) -> Vec<XmlElement> {
        simple_authors(edition)
    }

    /// HTML summary of the work, or empty.
    fn content(&self, work: Option<&Work>) -> String {
        work.and_then(|w| w.summary.clone()).unwrap_or_default()
    }

    /// Permanent link for an entry. A URN is the floor.
    fn permalink_for(&self, identifier: &Identifier) -> String {
        identifier.urn.clone()
    }

    /// Reorder grouped works before assembly. Identity by default.
    fn sort_grouped_works(&self, grouped: Vec<GroupedWork>) -> Vec<GroupedWork> {
        grouped
    }

    /// Title of the catalog root, shown on start links and breadcrumbs.
    fn top_level_title(&self) -> Option<String> {
        None
    }

    /// URL of the catalog root feed.
    fn default_lane_url(&self) -> String;

    /// Canonical URL of a scope (its groups feed when it has children, its
    /// flat feed otherwise).
    fn lane_url(&self, scope: &dyn WorkList) -> String;

    /// URL of one page of a scope's flat feed.
    fn feed_url(&self, scope: &dyn WorkList, facets: &Facets, pagination: &Pagination) -> String;

    /// URL of a scope's grouped feed.
    fn groups_url(&self, scope: &dyn WorkList, facets: Option<&Facets>) -> String;

    /// URL of one page of search results within a scope. The free-text
    /// query rides in [`Facets::query`].
    fn search_url(&self, scope: &dyn WorkList, facets: &Facets, pagination: &Pagination) -> String;

    /// URL of the current feed under different facets, or `None` to omit
    /// facet links entirely.
    fn facet_url(&self, _scope: &dyn WorkList, _facets: &Facets) -> Option<String> {
        None
    }
}

/// The license pool that would be associated with a loan, were one issued
/// right now.
///
/// Superseded pools never qualify. An open-access pool with a usable
/// download wins immediately: it is an unlimited source, so there is no
/// need to keep looking. Otherwise the best non-open-access pool with a
/// titled presentation edition and at least one owned license is chosen,
/// ranked by owned count, then available count, then identifier, so the
/// result does not depend on input order.
pub fn active_license_pool(work: &Work) -> Option<&LicensePool> {
    let mut best: Option<&LicensePool> = None;
    for pool in &work.license_pools {
        if pool.superseded {
            continue;
        }
        if pool.open_access {
            if pool.open_access_url.is_some() {
                return Some(pool);
            }
            continue;
        }
        let titled = pool
            .presentation_edition
            .as_ref()
            .and_then(|e| e.title.as_deref())
            .is_some_and(|t| !t.is_empty());
        if !titled || pool.licenses_owned == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => {
                let candidate = (
                    pool.licenses_owned,
                    pool.licenses_available,
                    std::cmp::Reverse(pool.identifier.urn.as_str()),
                );
                let incumbent = (
                    current.licenses_owned,
                    current.licenses_available,
                    std::cmp::Reverse(current.identifier.urn.as_str()),
                );
                candidate > incumbent
            }
        };
        if better {
            best = Some(pool);
        }
    }
    best
}

/// `<author><name>…</name></author>`.
pub fn author_element(name: &str) -> XmlElement {
    XmlElement::new("author").child(XmlElement::with_text("name", name))
}

/// One `<author>` per distinctly named contributor; an anonymous author
/// when there are none, since Atom requires one.
pub fn simple_authors(edition: &Edition) -> Vec<XmlElement> {
    let mut authors = Vec::new();
    let mut listed = HashSet::new();
    for contributor in &edition.contributors {
        let Some(name) = contributor.name() else {
            continue;
        };
        if !listed.insert(name.to_lowercase()) {
            continue;
        }
        authors.push(author_element(name));
    }
    if authors.is_empty() {
        authors.push(author_element(""));
    }
    authors
}

/// A fully detailed `<author>`: sort/family/wikipedia names and authority
/// record links.
pub fn detailed_author(contributor: &Contributor) -> XmlElement {
    let mut author = XmlElement::new("author").child(XmlElement::with_text(
        "name",
        contributor.display_name.as_deref().unwrap_or(""),
    ));
    author.push(XmlElement::with_text(
        "app:sort_name",
        contributor.sort_name.as_deref().unwrap_or(""),
    ));
    if let Some(family_name) = contributor.family_name.as_deref() {
        author.push(XmlElement::with_text("schema:family_name", family_name));
    }
    if let Some(wikipedia_name) = contributor.wikipedia_name.as_deref() {
        author.push(XmlElement::with_text(
            "app:wikipedia_name",
            wikipedia_name,
        ));
    }
    if let Some(viaf) = &contributor.viaf {
        author.push(XmlElement::with_text(
            "schema:sameas",
            format!("http://viaf.org/viaf/{viaf}"),
        ));
    }
    if let Some(lc) = &contributor.lc {
        author.push(XmlElement::with_text(
            "schema:sameas",
            format!("http://id.loc.gov/authorities/names/{lc}"),
        ));
    }
    author
}

/// `schema:Rating` for a measurement.
pub fn rating_tag(type_uri: Option<&str>, value: f64) -> XmlElement {
    let mut tag = XmlElement::new("schema:Rating").attr(
        "schema:ratingValue",
        format!("{value:.4}"),
    );
    if let Some(uri) = type_uri {
        tag.set_attr("schema:additionalType", uri);
    }
    tag
}

fn term_for(scheme: &str, value: &str) -> String {
    // The term is a URI under the scheme; Url::join percent-encodes the
    // value for us.
    match Url::parse(scheme).and_then(|base| base.join(value)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{scheme}{value}"),
    }
}

/// The curated classification set: fiction status, genres, appeals,
/// audience, and target age range.
pub fn standard_categories(work: &Work) -> Vec<Category> {
    let mut categories = Vec::new();

    if let Some(fiction) = work.fiction {
        let label = if fiction { "Fiction" } else { "Nonfiction" };
        let scheme = format!("{APP_NS}fiction/");
        categories.push(Category {
            term: format!("{scheme}{label}"),
            scheme,
            label: label.to_string(),
            weight: None,
        });
    }

    let genre_scheme = format!("{APP_NS}genres/");
    for genre in &work.genres {
        categories.push(Category {
            scheme: genre_scheme.clone(),
            term: term_for(&genre_scheme, genre),
            label: genre.clone(),
            weight: None,
        });
    }

    let appeal_scheme = format!("{APP_NS}appeals/");
    for (name, value) in work.appeals.iter() {
        categories.push(Category {
            scheme: appeal_scheme.clone(),
            term: format!("{appeal_scheme}{name}"),
            label: name.to_string(),
            weight: Some(value),
        });
    }

    if let Some(audience) = work.audience {
        categories.push(Category {
            scheme: format!("{SCHEMA_NS}audience"),
            term: audience.as_str().to_string(),
            label: audience.as_str().to_string(),
            weight: None,
        });
        if audience.uses_target_age() {
            if let Some(range) = work.target_age_string() {
                categories.push(Category {
                    scheme: format!("{SCHEMA_NS}typicalAgeRange"),
                    term: range.clone(),
                    label: range,
                    weight: None,
                });
            }
        }
    }

    categories
}

/// The standard application annotator: URL space rooted at one base URL,
/// simple author/category detail, distribution and license information on
/// every entry.
pub struct DefaultAnnotator {
    base: Url,
    title: Option<String>,
}

impl DefaultAnnotator {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base_url)?,
            title: None,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn join(&self, path: &str) -> String {
        self.base
            .join(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{path}", self.base))
    }

    fn borrow_url(&self, identifier: &Identifier) -> String {
        self.join(&format!("works/{}/borrow", identifier.urn))
    }
}

impl Annotator for DefaultAnnotator {
    fn annotate_work_entry(
        &self,
        ctx: &EntryContext<'_>,
        entry: &mut XmlElement,
    ) -> Result<(), AnnotationError> {
        let Some(pool) = ctx.pool else {
            return Ok(());
        };

        if !pool.data_source.is_empty() {
            entry.push(
                XmlElement::new("bibframe:distribution")
                    .attr("bibframe:ProviderName", pool.data_source.as_str()),
            );
        }

        let types = pool
            .delivery_mechanisms
            .first()
            .map(format_types)
            .unwrap_or_default();
        let mut link = if pool.open_access {
            let Some(href) = pool.open_access_url.as_deref() else {
                // Open access with no mirrored copy: nothing to offer.
                return Err(AnnotationError::Unfulfillable);
            };
            acquisition_link(OPEN_ACCESS_REL, href, &types)
        } else {
            acquisition_link(BORROW_REL, &self.borrow_url(ctx.identifier), &types)
        };
        for tag in license_tags(Some(pool), None, None) {
            link.push(tag);
        }
        entry.push(link);
        Ok(())
    }

    fn top_level_title(&self) -> Option<String> {
        self.title.clone()
    }

    fn default_lane_url(&self) -> String {
        self.join("groups")
    }

    fn lane_url(&self, scope: &dyn WorkList) -> String {
        if scope.children().is_empty() {
            self.feed_url(scope, &Facets::default(), &Pagination::default())
        } else {
            self.groups_url(scope, None)
        }
    }

    fn feed_url(&self, scope: &dyn WorkList, facets: &Facets, pagination: &Pagination) -> String {
        format!(
            "{}?{}&{}",
            self.join(&format!("feed/{}", scope.id())),
            facets.query_string(),
            pagination.query_string(),
        )
    }

    fn groups_url(&self, scope: &dyn WorkList, facets: Option<&Facets>) -> String {
        let base = self.join(&format!("groups/{}", scope.id()));
        match facets {
            Some(facets) => format!("{base}?{}", facets.query_string()),
            None => base,
        }
    }

    fn search_url(&self, scope: &dyn WorkList, facets: &Facets, pagination: &Pagination) -> String {
        format!(
            "{}?{}&{}",
            self.join(&format!("search/{}", scope.id())),
            facets.query_string(),
            pagination.query_string(),
        )
    }

    fn facet_url(&self, scope: &dyn WorkList, facets: &Facets) -> Option<String> {
        Some(format!(
            "{}?{}",
            self.join(&format!("feed/{}", scope.id())),
            facets.query_string(),
        ))
    }
}

/// Machine-to-machine annotator: every classification and full author
/// detail, plus quality/rating/popularity measurements on each entry.
pub struct VerboseAnnotator {
    inner: DefaultAnnotator,
}

impl VerboseAnnotator {
    pub fn new(inner: DefaultAnnotator) -> Self {
        Self { inner }
    }
}

impl Annotator for VerboseAnnotator {
    fn variant(&self) -> EntryVariant {
        EntryVariant::Verbose
    }

    fn annotate_work_entry(
        &self,
        ctx: &EntryContext<'_>,
        entry: &mut XmlElement,
    ) -> Result<(), AnnotationError> {
        let Some(work) = ctx.work else {
            return Ok(());
        };
        for (type_uri, value) in [
            (Some(QUALITY_URI), work.quality),
            (None, work.rating),
            (Some(POPULARITY_URI), work.popularity),
        ] {
            if let Some(value) = value {
                entry.push(rating_tag(type_uri, value));
            }
        }
        Ok(())
    }

    fn categories(&self, work: &Work) -> Vec<Category> {
        // Collapse raw classifications by (scheme, term), summing weights,
        // then append the curated set.
        let mut merged: Vec<Category> = Vec::new();
        for classification in &work.classifications {
            if let Some(existing) = merged.iter_mut().find(|c| {
                c.scheme == classification.scheme && c.term == classification.term
            }) {
                existing.weight =
                    Some(existing.weight.unwrap_or(0.0) + classification.weight);
                continue;
            }
            merged.push(Category {
                scheme: classification.scheme.clone(),
                term: classification.term.clone(),
                label: classification
                    .label
                    .clone()
                    .unwrap_or_else(|| classification.term.clone()),
                weight: Some(classification.weight),
            });
        }
        merged.extend(standard_categories(work));
        merged
    }

    fn authors(&self, edition: &Edition) -> Vec<XmlElement> {
        edition.contributors.iter().map(detailed_author).collect()
    }

    fn top_level_title(&self) -> Option<String> {
        self.inner.top_level_title()
    }

    fn default_lane_url(&self) -> String {
        self.inner.default_lane_url()
    }

    fn lane_url(&self, scope: &dyn WorkList) -> String {
        self.inner.lane_url(scope)
    }

    fn feed_url(&self, scope: &dyn WorkList, facets: &Facets, pagination: &Pagination) -> String {
        self.inner.feed_url(scope, facets, pagination)
    }

    fn groups_url(&self, scope: &dyn WorkList, facets: Option<&Facets>) -> String {
        self.inner.groups_url(scope, facets)
    }

    fn search_url(&self, scope: &dyn WorkList, facets: &Facets, pagination: &Pagination) -> String {
        self.inner.search_url(scope, facets, pagination)
    }

    fn facet_url(&self, scope: &dyn WorkList, facets: &Facets) -> Option<String> {
        self.inner.facet_url(scope, facets)
    }
}
