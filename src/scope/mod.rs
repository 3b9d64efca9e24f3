//! Scopes: named, possibly hierarchical views over the catalog.
//!
//! A [`WorkList`] is what a feed is generated *from*. Real deployments back
//! it with database queries and a search index; [`StaticLane`] serves fixed
//! in-memory lists, which is what operator tooling and tests use.

use std::sync::{Arc, RwLock, Weak};

use crate::facets::{Availability, Collection, EntryPoint, Facets, Order};
use crate::model::{Medium, Work};
use crate::pagination::Pagination;

/// One work selected for a grouped feed, together with the sub-scope whose
/// group it belongs to. `subscope: None` means the work belongs to the
/// queried scope itself (the "All …" group) rather than to any child.
pub struct GroupedWork {
    pub work: Arc<Work>,
    pub subscope: Option<Arc<dyn WorkList>>,
}

/// A named, possibly hierarchical, filtering view over the catalog.
pub trait WorkList: Send + Sync {
    /// Stable identity, used in cache keys and URLs.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Group label for works belonging to this scope itself in a grouped
    /// feed, e.g. "All Science Fiction".
    fn display_name_for_all(&self) -> String {
        format!("All {}", self.display_name())
    }

    fn parent(&self) -> Option<Arc<dyn WorkList>>;

    fn children(&self) -> Vec<Arc<dyn WorkList>>;

    /// Ancestors from the immediate parent upward.
    fn parentage(&self) -> Vec<Arc<dyn WorkList>> {
        let mut ancestors = Vec::new();
        let mut cursor = self.parent();
        while let Some(scope) = cursor {
            cursor = scope.parent();
            ancestors.push(scope);
        }
        ancestors
    }

    /// One page of works under the given facets.
    fn works(&self, facets: &Facets, pagination: &Pagination) -> Vec<Arc<Work>>;

    /// Total number of works matching the facets, when cheaply known.
    /// Backends that would need an extra query may return `None`; pagination
    /// then falls back to inferring a next page from page fullness.
    fn matching_count(&self, _facets: &Facets) -> Option<usize> {
        None
    }

    /// Featured works clustered by sub-scope, for a grouped feed. An empty
    /// result tells the caller to fall back to a flat page.
    fn grouped_works(&self) -> Vec<GroupedWork>;

    /// Ranked full-text search within this scope.
    fn search(&self, query: &str, pagination: &Pagination) -> Vec<Arc<Work>>;

    /// Entry points enabled on this scope. Entry-point links are only
    /// rendered when more than one is enabled.
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::Everything]
    }
}

/// A scope over fixed lists of works.
///
/// Children and parent links are wired up after construction via
/// [`add_child`](Self::add_child), since lanes form a tree of shared
/// references.
pub struct StaticLane {
    id: String,
    display_name: String,
    works: Vec<Arc<Work>>,
    featured: Vec<Arc<Work>>,
    entry_points: Vec<EntryPoint>,
    parent: RwLock<Weak<StaticLane>>,
    children: RwLock<Vec<Arc<StaticLane>>>,
}

impl StaticLane {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            works: Vec::new(),
            featured: Vec::new(),
            entry_points: vec![EntryPoint::Everything],
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn with_works(mut self, works: impl IntoIterator<Item = Work>) -> Self {
        self.works = works.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_shared_works(mut self, works: Vec<Arc<Work>>) -> Self {
        self.works = works;
        self
    }

    /// Works good enough to surface in a parent's grouped feed.
    pub fn with_featured(mut self, featured: Vec<Arc<Work>>) -> Self {
        self.featured = featured;
        self
    }

    pub fn with_entry_points(mut self, entry_points: Vec<EntryPoint>) -> Self {
        self.entry_points = entry_points;
        self
    }

    /// Attach `child` under this lane, wiring its parent pointer.
    pub fn add_child(self: &Arc<Self>, child: Arc<StaticLane>) {
        *child.parent.write().unwrap_or_else(|p| p.into_inner()) = Arc::downgrade(self);
        self.children
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(child);
    }

    pub fn all_works(&self) -> &[Arc<Work>] {
        &self.works
    }

    fn matches_facets(work: &Work, facets: &Facets) -> bool {
        let medium = work
            .presentation_edition
            .as_ref()
            .and_then(|e| e.medium);
        let entry_point_ok = match facets.entry_point {
            EntryPoint::Everything => true,
            EntryPoint::Ebooks => medium == Some(Medium::Book),
            EntryPoint::Audiobooks => medium == Some(Medium::Audiobook),
        };
        if !entry_point_ok {
            return false;
        }
        match facets.availability {
            Availability::All => true,
            Availability::Available => work
                .license_pools
                .iter()
                .any(|p| p.open_access || p.licenses_available > 0),
            Availability::OpenAccess => work.license_pools.iter().any(|p| p.open_access),
        }
    }

    fn sort_key(work: &Work, order: Order) -> String {
        let edition = work.presentation_edition.as_ref();
        match order {
            Order::Title => edition
                .and_then(|e| e.title.clone())
                .unwrap_or_default()
                .to_lowercase(),
            Order::Author => edition
                .and_then(|e| e.contributors.first())
                .and_then(|c| c.sort_name.clone().or_else(|| c.display_name.clone()))
                .unwrap_or_default()
                .to_lowercase(),
            // Newest first: invert the timestamp so an ascending sort works.
            Order::Added => {
                let newest = work
                    .license_pools
                    .iter()
                    .filter_map(|p| p.availability_time)
                    .max()
                    .map(|t| t.timestamp())
                    .unwrap_or(0);
                format!("{:020}", i64::MAX - newest)
            }
        }
    }
}

impl WorkList for StaticLane {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn parent(&self) -> Option<Arc<dyn WorkList>> {
        let parent = self
            .parent
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .upgrade()?;
        Some(parent as Arc<dyn WorkList>)
    }

    fn children(&self) -> Vec<Arc<dyn WorkList>> {
        self.children
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|c| c.clone() as Arc<dyn WorkList>)
            .collect()
    }

    fn works(&self, facets: &Facets, pagination: &Pagination) -> Vec<Arc<Work>> {
        let source = match facets.collection {
            Collection::Full => &self.works,
            Collection::Featured => &self.featured,
        };
        let mut matching: Vec<&Arc<Work>> = source
            .iter()
            .filter(|w| Self::matches_facets(w, facets))
            .collect();
        matching.sort_by_key(|w| Self::sort_key(w, facets.order));
        matching
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.size)
            .cloned()
            .collect()
    }

    fn matching_count(&self, facets: &Facets) -> Option<usize> {
        let source = match facets.collection {
            Collection::Full => &self.works,
            Collection::Featured => &self.featured,
        };
        Some(
            source
                .iter()
                .filter(|w| Self::matches_facets(w, facets))
                .count(),
        )
    }

    fn grouped_works(&self) -> Vec<GroupedWork> {
        let mut grouped = Vec::new();
        for child in self
            .children
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            for work in &child.featured {
                grouped.push(GroupedWork {
                    work: work.clone(),
                    subscope: Some(child.clone() as Arc<dyn WorkList>),
                });
            }
        }
        for work in &self.featured {
            grouped.push(GroupedWork {
                work: work.clone(),
                subscope: None,
            });
        }
        grouped
    }

    fn search(&self, query: &str, pagination: &Pagination) -> Vec<Arc<Work>> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<(usize, &Arc<Work>)> = self
            .works
            .iter()
            .filter_map(|work| {
                let edition = work.presentation_edition.as_ref()?;
                let title = edition.title.as_deref()?.to_lowercase();
                title.find(&needle).map(|pos| (pos, work))
            })
            .collect();
        // Earlier match in the title ranks higher; break ties by title.
        hits.sort_by_key(|(pos, work)| {
            (
                *pos,
                Self::sort_key(work, Order::Title),
            )
        });
        hits.into_iter()
            .skip(pagination.offset)
            .take(pagination.size)
            .map(|(_, w)| w.clone())
            .collect()
    }

    fn entry_points(&self) -> Vec<EntryPoint> {
        self.entry_points.clone()
    }
}
