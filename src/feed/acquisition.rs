//! Assembling entries, links, and breadcrumbs into one acquisition feed.

use std::sync::Arc;

use crate::annotator::Annotator;
use crate::facets::Facets;
use crate::feed::entry::{self, EntryOptions, EntryOutcome};
use crate::feed::{atom_link, OpdsFeed, OpdsMessage, FACET_REL, GROUP_REL};
use crate::model::Work;
use crate::scope::WorkList;
use crate::xml::{XmlElement, XmlError};

/// An entry or message composed outside the assembler, appended verbatim.
pub enum Precomposed {
    Entry(XmlElement),
    Message(OpdsMessage),
}

/// One acquisition feed under construction: a document plus the annotator
/// that decorates it.
pub struct AcquisitionFeed<'a> {
    feed: OpdsFeed,
    annotator: &'a dyn Annotator,
}

impl<'a> AcquisitionFeed<'a> {
    /// Build a feed over `works`, rendering each per the fail-soft rules,
    /// then appending any precomposed material as-is.
    pub fn new(
        title: &str,
        url: &str,
        works: &[Arc<Work>],
        annotator: &'a dyn Annotator,
        precomposed: impl IntoIterator<Item = Precomposed>,
    ) -> Self {
        let mut this = Self {
            feed: OpdsFeed::new(title, url),
            annotator,
        };
        for work in works {
            this.add_entry(work);
        }
        for item in precomposed {
            match item {
                Precomposed::Entry(el) => this.feed.append(el),
                Precomposed::Message(message) => this.feed.append(message.to_element()),
            }
        }
        this
    }

    /// Render one work and append whatever comes out. Exactly one of
    /// {entry appended, message appended, nothing appended} happens.
    pub fn add_entry(&mut self, work: &Work) -> EntryOutcome {
        let outcome = entry::create_entry(self.annotator, work, &EntryOptions::default());
        self.append_outcome(&outcome);
        outcome
    }

    /// Render one work for a grouped feed, tagging its entry with the
    /// collection link of the group it belongs to.
    pub(crate) fn add_entry_in_group(
        &mut self,
        work: &Work,
        group_href: &str,
        group_title: &str,
    ) -> EntryOutcome {
        let mut outcome = entry::create_entry(self.annotator, work, &EntryOptions::default());
        if let EntryOutcome::Entry(el) = &mut outcome {
            el.push(atom_link(GROUP_REL, group_href).attr("title", group_title));
        }
        self.append_outcome(&outcome);
        outcome
    }

    fn append_outcome(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Entry(el) => self.feed.append(el.clone()),
            EntryOutcome::Message(message) => self.feed.append(message.to_element()),
            EntryOutcome::Omitted => {}
        }
    }

    /// One facet link per (group, value) pair the annotator has a URL for,
    /// labeled with the group title and flagged when currently selected.
    pub(crate) fn add_facet_links(&mut self, scope: &dyn WorkList, facets: &Facets) {
        for choice in facets.facet_choices() {
            let Some(url) = self.annotator.facet_url(scope, &choice.facets) else {
                continue;
            };
            let mut link = atom_link(FACET_REL, &url)
                .attr("title", choice.value_title)
                .attr("opds:facetGroup", choice.group.display_title());
            if choice.selected {
                link.set_attr("opds:activeFacet", "true");
            }
            self.feed.add_link(link);
        }
    }

    /// Entry-point pivot links, one per enabled entry point, omitted
    /// entirely when only one is enabled. `make_url` builds the link target
    /// for the pivoted facets; pagination is deliberately reset by the
    /// caller so switching entry points starts at the first page.
    pub(crate) fn add_entry_point_links(
        &mut self,
        scope: &dyn WorkList,
        facets: &Facets,
        make_url: impl Fn(&Facets) -> String,
    ) {
        let entry_points = scope.entry_points();
        if entry_points.len() < 2 {
            return;
        }
        for entry_point in entry_points {
            let pivoted = facets.clone().with_entry_point(entry_point);
            let mut link = atom_link(FACET_REL, &make_url(&pivoted))
                .attr("title", entry_point.display_title())
                .attr("opds:facetGroup", "Formats");
            if entry_point == facets.entry_point {
                link.set_attr("opds:activeFacet", "true");
            }
            self.feed.add_link(link);
        }
    }

    /// Up/start links plus the breadcrumb block for a scope's place in the
    /// hierarchy.
    pub(crate) fn add_breadcrumb_links(&mut self, scope: &dyn WorkList) {
        let top_level_title = self.top_level_title();
        if let Some(parent) = scope.parent() {
            let parent_title = if parent.display_name().is_empty() {
                top_level_title.clone()
            } else {
                parent.display_name().to_string()
            };
            self.feed.add_link(
                atom_link("up", &self.annotator.lane_url(parent.as_ref()))
                    .attr("title", parent_title),
            );
            self.add_breadcrumbs(scope, false);
        }
        self.feed.add_link(
            atom_link("start", &self.annotator.default_lane_url())
                .attr("title", top_level_title),
        );
    }

    /// Ordered chain of ancestor links from the catalog root down to the
    /// immediate parent; omitted when the scope is the root itself. Search
    /// feeds include the searched scope as the final crumb.
    pub(crate) fn add_breadcrumbs(&mut self, scope: &dyn WorkList, include_scope: bool) {
        let root_url = self.annotator.default_lane_url();
        if self.annotator.lane_url(scope) == root_url {
            return;
        }

        let mut breadcrumbs = XmlElement::new("app:breadcrumbs");
        breadcrumbs.push(
            XmlElement::new("link")
                .attr("title", self.top_level_title())
                .attr("href", root_url.as_str()),
        );
        for ancestor in scope.parentage().iter().rev() {
            let url = self.annotator.lane_url(ancestor.as_ref());
            if url == root_url {
                continue;
            }
            breadcrumbs.push(
                XmlElement::new("link")
                    .attr("title", ancestor.display_name())
                    .attr("href", url),
            );
        }
        if include_scope {
            breadcrumbs.push(
                XmlElement::new("link")
                    .attr("title", scope.display_name())
                    .attr("href", self.annotator.lane_url(scope)),
            );
        }
        self.feed.append(breadcrumbs);
    }

    fn top_level_title(&self) -> String {
        self.annotator
            .top_level_title()
            .unwrap_or_else(|| "Collection Home".to_string())
    }

    pub(crate) fn feed_mut(&mut self) -> &mut OpdsFeed {
        &mut self.feed
    }

    pub fn feed(&self) -> &OpdsFeed {
        &self.feed
    }

    pub fn serialize(&self) -> Result<String, XmlError> {
        self.feed.serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotator::DefaultAnnotator;
    use crate::model::{Edition, Identifier, LicensePool};
    use crate::scope::StaticLane;
    use pretty_assertions::assert_eq;

    fn annotator() -> DefaultAnnotator {
        DefaultAnnotator::new("http://catalog.example.com/")
            .unwrap()
            .with_title("Example Library")
    }

    fn lendable(urn: &str, title: &str) -> Work {
        let edition = Edition {
            primary_identifier: Some(Identifier::new(urn)),
            title: Some(title.to_string()),
            ..Edition::default()
        };
        Work {
            presentation_edition: Some(edition.clone()),
            license_pools: vec![LicensePool {
                licenses_owned: 1,
                licenses_available: 1,
                presentation_edition: Some(edition),
                ..LicensePool::new(Identifier::new(urn))
            }],
            ..Work::default()
        }
    }

    fn unlicensed(urn: &str, title: &str) -> Work {
        Work {
            presentation_edition: Some(Edition {
                primary_identifier: Some(Identifier::new(urn)),
                title: Some(title.to_string()),
                ..Edition::default()
            }),
            ..Work::default()
        }
    }

    #[test]
    fn test_entry_message_exclusivity() {
        let annotator = annotator();
        let works = vec![
            Arc::new(lendable("urn:good", "Good")),
            Arc::new(unlicensed("urn:bad", "Bad")),
            Arc::new(Work::default()), // no identifier at all
        ];
        let feed = AcquisitionFeed::new("t", "http://x/", &works, &annotator, []);
        let root = feed.feed().root();
        assert_eq!(root.children_named("entry").count(), 1);
        assert_eq!(root.children_named("app:message").count(), 1);
        // Work with no identifier contributed nothing.
        assert_eq!(feed.feed().entry_count(), 2);
    }

    #[test]
    fn test_precomposed_appended_verbatim() {
        let annotator = annotator();
        let precomposed = [
            Precomposed::Entry(XmlElement::with_text("entry", "already built")),
            Precomposed::Message(OpdsMessage::new("urn:gone", 404, "not here")),
        ];
        let feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, precomposed);
        let root = feed.feed().root();
        assert_eq!(root.children_named("entry").count(), 1);
        assert_eq!(
            root.first_child_named("app:message")
                .unwrap()
                .first_child_named("app:status_code")
                .unwrap()
                .text(),
            "404"
        );
    }

    #[test]
    fn test_group_link_attached_to_entry_only() {
        let annotator = annotator();
        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        let work = lendable("urn:g", "Grouped");
        feed.add_entry_in_group(&work, "http://x/feed/child", "Space Opera");
        let entry = feed.feed().root().first_child_named("entry").unwrap();
        let group_link = entry
            .children_named("link")
            .find(|l| l.get_attr("rel") == Some(GROUP_REL))
            .unwrap();
        assert_eq!(group_link.get_attr("href"), Some("http://x/feed/child"));
        assert_eq!(group_link.get_attr("title"), Some("Space Opera"));

        // A message outcome gets no group link.
        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        let outcome = feed.add_entry_in_group(&unlicensed("urn:u", "U"), "http://x/c", "C");
        assert!(outcome.is_message());
    }

    #[test]
    fn test_facet_links() {
        let annotator = annotator();
        let lane = StaticLane::new("lane-1", "Lane");
        let facets = Facets::default();
        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        feed.add_facet_links(&lane, &facets);

        let links: Vec<&XmlElement> = feed
            .feed()
            .root()
            .children_named("link")
            .filter(|l| l.get_attr("rel") == Some(FACET_REL))
            .collect();
        // 3 orders + 3 availabilities + 2 collections
        assert_eq!(links.len(), 8);
        let active: Vec<_> = links
            .iter()
            .filter(|l| l.get_attr("opds:activeFacet") == Some("true"))
            .collect();
        assert_eq!(active.len(), 3);
        assert!(links
            .iter()
            .all(|l| l.get_attr("opds:facetGroup").is_some()));
    }

    #[test]
    fn test_entry_point_links_omitted_for_single_entry_point() {
        use crate::facets::EntryPoint;
        let annotator = annotator();
        let lane = StaticLane::new("lane-1", "Lane");
        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        feed.add_entry_point_links(&lane, &Facets::default(), |_| "http://x/".to_string());
        assert!(feed
            .feed()
            .root()
            .children_named("link")
            .all(|l| l.get_attr("opds:facetGroup") != Some("Formats")));

        let lane = StaticLane::new("lane-2", "Lane").with_entry_points(vec![
            EntryPoint::Ebooks,
            EntryPoint::Audiobooks,
        ]);
        let facets = Facets::default().with_entry_point(EntryPoint::Ebooks);
        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        feed.add_entry_point_links(&lane, &facets, |f| {
            format!("http://x/?{}", f.query_string())
        });
        let format_links: Vec<&XmlElement> = feed
            .feed()
            .root()
            .children_named("link")
            .filter(|l| l.get_attr("opds:facetGroup") == Some("Formats"))
            .collect();
        assert_eq!(format_links.len(), 2);
        let active = format_links
            .iter()
            .find(|l| l.get_attr("opds:activeFacet") == Some("true"))
            .unwrap();
        assert_eq!(active.get_attr("title"), Some("eBooks"));
    }

    #[test]
    fn test_breadcrumbs_for_nested_scope() {
        let annotator = annotator();
        let root = Arc::new(StaticLane::new("root", "Everything"));
        let fiction = Arc::new(StaticLane::new("fiction", "Fiction"));
        let scifi = Arc::new(StaticLane::new("scifi", "Science Fiction"));
        root.add_child(fiction.clone());
        fiction.add_child(scifi.clone());

        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        feed.add_breadcrumb_links(scifi.as_ref());
        let doc = feed.feed().root();

        let up = doc
            .children_named("link")
            .find(|l| l.get_attr("rel") == Some("up"))
            .unwrap();
        assert_eq!(up.get_attr("title"), Some("Fiction"));
        let start = doc
            .children_named("link")
            .find(|l| l.get_attr("rel") == Some("start"))
            .unwrap();
        assert_eq!(start.get_attr("title"), Some("Example Library"));

        let breadcrumbs = doc.first_child_named("app:breadcrumbs").unwrap();
        let titles: Vec<_> = breadcrumbs
            .children_named("link")
            .filter_map(|l| l.get_attr("title"))
            .collect();
        assert_eq!(titles, vec!["Example Library", "Everything", "Fiction"]);
    }

    #[test]
    fn test_no_breadcrumbs_for_root_scope() {
        let annotator = annotator();
        let lane = StaticLane::new("root", "Everything");
        let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
        feed.add_breadcrumb_links(&lane);
        let doc = feed.feed().root();
        assert!(doc.first_child_named("app:breadcrumbs").is_none());
        assert!(doc
            .children_named("link")
            .all(|l| l.get_attr("rel") != Some("up")));
        // The start link is always present.
        assert!(doc
            .children_named("link")
            .any(|l| l.get_attr("rel") == Some("start")));
    }
}
