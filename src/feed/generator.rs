//! The feed-shape strategies: page, groups, search, lookup, and standalone
//! entries, plus their interplay with the feed cache.
//!
//! A generator is constructed once per annotator/cache/policy combination
//! and shared across requests. Cache failures are never fatal: a failed
//! read regenerates, a failed write returns the generated text anyway.

use thiserror::Error;

use crate::annotator::{AnnotationError, Annotator};
use crate::cache::{CacheKey, CachePolicy, CachedFeedRecord, FeedCache, FeedShape};
use crate::facets::Facets;
use crate::feed::entry::{
    build_entry_element, create_entry, EntryOptions, EntryOutcome, EntrySubject,
};
use crate::feed::{atom_link, AcquisitionFeed, OpdsMessage};
use crate::model::{Identifier, Work};
use crate::pagination::Pagination;
use crate::scope::WorkList;
use crate::xml::XmlError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Xml(#[from] XmlError),
}

/// What a feed request produced: a live cache record, or text generated
/// outside the cache (caching disabled, write failed, or a search feed).
#[derive(Debug, Clone)]
pub enum FeedOutput {
    Cached(CachedFeedRecord),
    Generated(String),
}

impl FeedOutput {
    pub fn as_str(&self) -> &str {
        match self {
            FeedOutput::Cached(record) => &record.content,
            FeedOutput::Generated(content) => content,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            FeedOutput::Cached(record) => record.content,
            FeedOutput::Generated(content) => content,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, FeedOutput::Cached(_))
    }
}

/// Generates acquisition feeds for scopes.
pub struct FeedGenerator<'a> {
    annotator: &'a dyn Annotator,
    cache: Option<&'a dyn FeedCache>,
    policy: CachePolicy,
    default_page_size: usize,
}

impl<'a> FeedGenerator<'a> {
    pub fn new(annotator: &'a dyn Annotator) -> Self {
        Self {
            annotator,
            cache: None,
            policy: CachePolicy::default(),
            default_page_size: crate::pagination::DEFAULT_PAGE_SIZE,
        }
    }

    /// Attach a cache store. Without one, every request generates fresh and
    /// nothing is written back.
    pub fn with_cache(mut self, cache: &'a dyn FeedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// One page of a scope's flat feed.
    pub fn page(
        &self,
        scope: &dyn WorkList,
        title: &str,
        url: &str,
        facets: Option<Facets>,
        pagination: Option<Pagination>,
        force_refresh: bool,
    ) -> Result<FeedOutput, FeedError> {
        self.page_as(FeedShape::Page, scope, title, url, facets, pagination, force_refresh)
    }

    /// The grouped feed of a scope: featured works clustered per sub-scope.
    ///
    /// A scope that yields no grouped works (no children, or matching too
    /// sparse) falls back to the flat page, and that page is stored under
    /// the groups cache key so clients asking for groups keep being served.
    /// A groups-keyed record may therefore hold ungrouped content.
    pub fn groups(
        &self,
        scope: &dyn WorkList,
        title: &str,
        url: &str,
        facets: Option<Facets>,
        force_refresh: bool,
    ) -> Result<FeedOutput, FeedError> {
        let facets = facets.unwrap_or_default();
        let key = CacheKey::new(scope.id(), FeedShape::Groups, Some(&facets), None);
        if let Some(record) = self.fetch_cached(&key, force_refresh) {
            return Ok(FeedOutput::Cached(record));
        }

        let grouped = scope.grouped_works();
        if grouped.is_empty() {
            tracing::info!(
                scope = %scope.id(),
                "not enough works for a grouped feed; serving a flat page under the groups key",
            );
            return self.page_as(
                FeedShape::Groups,
                scope,
                title,
                url,
                Some(facets),
                None,
                force_refresh,
            );
        }

        let grouped = self.annotator.sort_grouped_works(grouped);
        let mut feed = AcquisitionFeed::new(title, url, &[], self.annotator, []);
        for item in &grouped {
            let (href, group_title) = match &item.subscope {
                // Featured within a genuine child: group by that child.
                Some(subscope) => (
                    self.annotator.lane_url(subscope.as_ref()),
                    subscope.display_name().to_string(),
                ),
                // Featured within the scope itself: an "All …" group
                // pointing at the scope's flat feed.
                None => (
                    self.annotator.feed_url(
                        scope,
                        &facets,
                        &Pagination::new(0, self.default_page_size),
                    ),
                    scope.display_name_for_all(),
                ),
            };
            feed.add_entry_in_group(&item.work, &href, &group_title);
        }

        feed.add_breadcrumb_links(scope);
        feed.add_entry_point_links(scope, &facets, |pivoted| {
            self.annotator.groups_url(scope, Some(pivoted))
        });
        self.annotator.annotate_feed(feed.feed_mut(), scope);

        let content = feed.serialize()?;
        Ok(self.store(&key, content))
    }

    /// Search results within a scope. Never cached: queries are unbounded,
    /// so a cache would be all misses and evictions.
    pub fn search(
        &self,
        scope: &dyn WorkList,
        title: &str,
        url: &str,
        query: &str,
        facets: Option<Facets>,
        pagination: Option<Pagination>,
    ) -> Result<FeedOutput, FeedError> {
        let facets = facets.unwrap_or_default().with_query(query);
        let mut pagination =
            pagination.unwrap_or_else(|| Pagination::new(0, self.default_page_size));

        let results = scope.search(query, &pagination);
        pagination.page_loaded(results.len());

        let mut feed = AcquisitionFeed::new(title, url, &results, self.annotator, []);

        if !results.is_empty() && pagination.has_next_page() {
            feed.feed_mut().add_link(atom_link(
                "next",
                &self
                    .annotator
                    .search_url(scope, &facets, &pagination.next_page()),
            ));
        }
        if pagination.offset > 0 {
            feed.feed_mut().add_link(atom_link(
                "first",
                &self
                    .annotator
                    .search_url(scope, &facets, &pagination.first_page()),
            ));
        }
        if let Some(previous) = pagination.previous_page() {
            feed.feed_mut().add_link(atom_link(
                "previous",
                &self.annotator.search_url(scope, &facets, &previous),
            ));
        }

        // Point back up at the scope that was searched; the breadcrumbs
        // include the scope itself as the final crumb.
        feed.feed_mut().add_link(
            atom_link("up", &self.annotator.lane_url(scope))
                .attr("title", scope.display_name()),
        );
        feed.add_breadcrumbs(scope, true);
        feed.feed_mut().add_link(
            atom_link("start", &self.annotator.default_lane_url()).attr(
                "title",
                self.annotator
                    .top_level_title()
                    .unwrap_or_else(|| "Collection Home".to_string()),
            ),
        );
        feed.add_entry_point_links(scope, &facets, |pivoted| {
            self.annotator
                .search_url(scope, pivoted, &pagination.first_page())
        });
        self.annotator.annotate_feed(feed.feed_mut(), scope);

        Ok(FeedOutput::Generated(feed.serialize()?))
    }

    /// A feed answering a lookup of specific identifiers.
    ///
    /// Each item pairs the identifier the caller asked about with the work
    /// the catalog resolved it to. The identifier may name a different
    /// license pool than the work's default, in which case the per-work
    /// fragment cache is bypassed, since the cached fragment is built
    /// around the default pool.
    pub fn lookup(
        &self,
        title: &str,
        url: &str,
        items: &[(Identifier, std::sync::Arc<Work>)],
    ) -> Result<FeedOutput, FeedError> {
        let mut feed = AcquisitionFeed::new(title, url, &[], self.annotator, []);
        for (identifier, work) in items {
            let outcome = self.lookup_entry(identifier, work);
            match outcome {
                EntryOutcome::Entry(el) => feed.feed_mut().append(el),
                EntryOutcome::Message(message) => feed.feed_mut().append(message.to_element()),
                EntryOutcome::Omitted => {}
            }
        }
        Ok(FeedOutput::Generated(feed.serialize()?))
    }

    fn lookup_entry(&self, identifier: &Identifier, work: &Work) -> EntryOutcome {
        let default_pool = self.annotator.active_pool_for(work);
        let identified_pool = work
            .license_pools
            .iter()
            .find(|pool| pool.identifier == *identifier);
        let Some(active) = identified_pool.or(default_pool) else {
            return EntryOutcome::Message(OpdsMessage::new(
                identifier.urn.as_str(),
                404,
                "Identifier not found in collection",
            ));
        };

        let known = identified_pool.is_some()
            || work
                .presentation_edition
                .as_ref()
                .and_then(|e| e.primary_identifier.as_ref())
                == Some(identifier);
        if !known {
            return EntryOutcome::Message(OpdsMessage::new(
                identifier.urn.as_str(),
                500,
                format!(
                    "I tried to generate an OPDS entry for the identifier \"{}\" \
                     using a work not associated with that identifier.",
                    identifier.urn
                ),
            ));
        }

        // The cached fragment is built around the default pool; only reuse
        // it when that is the pool being asked about.
        let use_cache = match (identified_pool, default_pool) {
            (Some(chosen), Some(default)) => chosen.identifier == default.identifier,
            (None, _) => true,
            (Some(_), None) => false,
        };

        let edition = active
            .presentation_edition
            .as_ref()
            .or(work.presentation_edition.as_ref());
        match build_entry_element(
            self.annotator,
            Some(work),
            Some(active),
            edition,
            identifier,
            false,
            use_cache,
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
                tracing::error!(urn = %identifier.urn, %error, "failed to build lookup entry");
                EntryOutcome::Omitted
            }
        }
    }

    /// A standalone single-entry document for one work or bare edition, or
    /// `None` when nothing renderable exists.
    pub fn single_entry(
        &self,
        subject: EntrySubject<'_>,
        force_refresh: bool,
    ) -> Result<Option<String>, FeedError> {
        match subject {
            EntrySubject::Work(work) => {
                if work.presentation_edition.is_none() {
                    return Ok(None);
                }
                let options = EntryOptions {
                    even_if_no_pool: true,
                    force_refresh,
                    use_cache: true,
                };
                match create_entry(self.annotator, work, &options) {
                    EntryOutcome::Entry(el) => Ok(Some(el.to_document()?)),
                    EntryOutcome::Message(message) => {
                        Ok(Some(message.to_element().to_document()?))
                    }
                    EntryOutcome::Omitted => Ok(None),
                }
            }
            EntrySubject::Edition(edition) => {
                let Some(identifier) = edition.primary_identifier.clone() else {
                    return Ok(None);
                };
                match build_entry_element(
                    self.annotator,
                    None,
                    None,
                    Some(edition),
                    &identifier,
                    force_refresh,
                    false,
                ) {
                    Ok(el) => Ok(Some(el.to_document()?)),
                    Err(error) => {
                        tracing::error!(urn = %identifier.urn, %error, "failed to build edition entry");
                        Ok(None)
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn page_as(
        &self,
        shape: FeedShape,
        scope: &dyn WorkList,
        title: &str,
        url: &str,
        facets: Option<Facets>,
        pagination: Option<Pagination>,
        force_refresh: bool,
    ) -> Result<FeedOutput, FeedError> {
        let facets = facets.unwrap_or_default();
        let mut pagination =
            pagination.unwrap_or_else(|| Pagination::new(0, self.default_page_size));

        // A fallback page filed as a groups feed is cached under the groups
        // key, pagination and all ignored, so future groups requests hit it.
        let key = match shape {
            FeedShape::Page => {
                CacheKey::new(scope.id(), shape, Some(&facets), Some(&pagination))
            }
            FeedShape::Groups => CacheKey::new(scope.id(), shape, Some(&facets), None),
        };
        if let Some(record) = self.fetch_cached(&key, force_refresh) {
            return Ok(FeedOutput::Cached(record));
        }

        if let Some(total) = scope.matching_count(&facets) {
            pagination = pagination.with_total(total);
        }
        let works = scope.works(&facets, &pagination);
        pagination.page_loaded(works.len());

        let mut feed = AcquisitionFeed::new(title, url, &works, self.annotator, []);
        feed.add_facet_links(scope, &facets);

        if !works.is_empty() && pagination.has_next_page() {
            feed.feed_mut().add_link(atom_link(
                "next",
                &self
                    .annotator
                    .feed_url(scope, &facets, &pagination.next_page()),
            ));
        }
        if pagination.offset > 0 {
            feed.feed_mut().add_link(atom_link(
                "first",
                &self
                    .annotator
                    .feed_url(scope, &facets, &pagination.first_page()),
            ));
        }
        if let Some(previous) = pagination.previous_page() {
            feed.feed_mut().add_link(atom_link(
                "previous",
                &self.annotator.feed_url(scope, &facets, &previous),
            ));
        }

        feed.add_breadcrumb_links(scope);
        feed.add_entry_point_links(scope, &facets, |pivoted| {
            self.annotator
                .feed_url(scope, pivoted, &pagination.first_page())
        });
        self.annotator.annotate_feed(feed.feed_mut(), scope);

        let content = feed.serialize()?;
        Ok(self.store(&key, content))
    }

    fn fetch_cached(&self, key: &CacheKey, force_refresh: bool) -> Option<CachedFeedRecord> {
        let cache = self.cache?;
        let max_age = self.policy.max_age_for(key.shape);
        match cache.fetch(key, max_age, force_refresh) {
            Ok(lookup) if lookup.usable => lookup.record,
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, "feed cache fetch failed; regenerating");
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, content: String) -> FeedOutput {
        let Some(cache) = self.cache else {
            return FeedOutput::Generated(content);
        };
        match cache.write(key, &content) {
            Ok(record) => FeedOutput::Cached(record),
            Err(error) => {
                tracing::warn!(%error, "feed cache write failed; serving uncached");
                FeedOutput::Generated(content)
            }
        }
    }
}
