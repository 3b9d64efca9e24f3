//! Integration tests for entry construction: license presentation, the
//! per-work fragment cache, verbosity variants, standalone entry documents,
//! and the lookup-by-identifier feed.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use lectern::annotator::{DefaultAnnotator, VerboseAnnotator};
use lectern::feed::{AcquisitionFeed, EntrySubject, FeedGenerator, BORROW_REL};
use lectern::model::{Edition, EntryVariant, Identifier, LicensePool, Work};
use lectern::xml::XmlElement;
use pretty_assertions::assert_eq;

fn annotator() -> DefaultAnnotator {
    DefaultAnnotator::new("http://catalog.example.com/")
        .unwrap()
        .with_title("Example Library")
}

fn edition(urn: &str, title: &str) -> Edition {
    Edition {
        primary_identifier: Some(Identifier::new(urn)),
        title: Some(title.to_string()),
        ..Edition::default()
    }
}

// ============================================================================
// License Presentation
// ============================================================================

#[test]
fn test_superseded_open_access_loses_to_commercial_pool() {
    // P1 is open access with a usable download but superseded; P2 is a
    // plain commercial pool. Supersession wins over the open-access
    // preference, so the entry is built around P2 and carries its
    // holds/copies state.
    let work = Work {
        presentation_edition: Some(edition("urn:w", "The Work")),
        license_pools: vec![
            LicensePool {
                open_access: true,
                superseded: true,
                open_access_url: Some("http://mirror/w.epub".into()),
                ..LicensePool::new(Identifier::new("urn:p1"))
            },
            LicensePool {
                licenses_owned: 1,
                licenses_available: 1,
                presentation_edition: Some(edition("urn:p2", "The Work")),
                ..LicensePool::new(Identifier::new("urn:p2"))
            },
        ],
        last_update_time: Some(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap()),
        ..Work::default()
    };

    let annotator = annotator();
    let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &annotator, []);
    let outcome = feed.add_entry(&work);
    assert!(outcome.is_entry());

    let entry = feed.feed().root().first_child_named("entry").unwrap();
    assert_eq!(entry.first_child_named("id").unwrap().text(), "urn:p2");

    let borrow = entry
        .children_named("link")
        .find(|l| l.get_attr("rel") == Some(BORROW_REL))
        .expect("commercial pool gets a borrow link");
    let copies = borrow.first_child_named("opds:copies").unwrap();
    assert_eq!(copies.get_attr("total"), Some("1"));
    assert_eq!(copies.get_attr("available"), Some("1"));
    let holds = borrow.first_child_named("opds:holds").unwrap();
    assert_eq!(holds.get_attr("total"), Some("0"));
}

#[test]
fn test_feed_mixes_entries_and_messages() {
    let good = Work {
        presentation_edition: Some(edition("urn:good", "Good")),
        license_pools: vec![LicensePool {
            licenses_owned: 1,
            licenses_available: 1,
            presentation_edition: Some(edition("urn:good", "Good")),
            ..LicensePool::new(Identifier::new("urn:good"))
        }],
        ..Work::default()
    };
    let unlicensed = Work {
        presentation_edition: Some(edition("urn:bad", "Bad")),
        ..Work::default()
    };
    let anonymous = Work::default();

    let annotator = annotator();
    let works = vec![Arc::new(good), Arc::new(unlicensed), Arc::new(anonymous)];
    let feed = AcquisitionFeed::new("t", "http://x/", &works, &annotator, []);
    let root = feed.feed().root();

    assert_eq!(root.children_named("entry").count(), 1);
    let message = root.first_child_named("app:message").unwrap();
    assert_eq!(message.first_child_named("id").unwrap().text(), "urn:bad");
    assert_eq!(
        message.first_child_named("app:status_code").unwrap().text(),
        "403"
    );
}

// ============================================================================
// Verbosity Variants
// ============================================================================

#[test]
fn test_variants_use_separate_fragment_slots() {
    let shared = edition("urn:w", "The Work");
    let work = Work {
        presentation_edition: Some(shared.clone()),
        license_pools: vec![LicensePool {
            licenses_owned: 1,
            licenses_available: 1,
            presentation_edition: Some(Edition {
                contributors: vec![lectern::model::Contributor {
                    display_name: Some("Herman Melville".into()),
                    sort_name: Some("Melville, Herman".into()),
                    ..Default::default()
                }],
                ..shared
            }),
            ..LicensePool::new(Identifier::new("urn:w"))
        }],
        quality: Some(0.9),
        ..Work::default()
    };

    let simple = annotator();
    let verbose = VerboseAnnotator::new(annotator());

    let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &simple, []);
    assert!(feed.add_entry(&work).is_entry());
    let mut feed = AcquisitionFeed::new("t", "http://x/", &[], &verbose, []);
    assert!(feed.add_entry(&work).is_entry());

    let simple_fragment = work.entry_cache.get(EntryVariant::Simple).unwrap();
    let verbose_fragment = work.entry_cache.get(EntryVariant::Verbose).unwrap();
    assert_ne!(simple_fragment, verbose_fragment);
    assert!(
        verbose_fragment.contains("app:sort_name"),
        "verbose authors carry sort names"
    );
    assert!(!simple_fragment.contains("app:sort_name"));
}

// ============================================================================
// Standalone Entry Documents
// ============================================================================

#[test]
fn test_single_entry_document_for_work() {
    let work = Work {
        presentation_edition: Some(edition("urn:w", "The Work")),
        license_pools: vec![LicensePool {
            licenses_owned: 1,
            licenses_available: 1,
            presentation_edition: Some(edition("urn:w", "The Work")),
            ..LicensePool::new(Identifier::new("urn:w"))
        }],
        ..Work::default()
    };

    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    let document = generator
        .single_entry(EntrySubject::Work(&work), false)
        .unwrap()
        .expect("renderable work yields a document");

    assert!(document.starts_with("<?xml"));
    // Standalone entries carry the full namespace map even when rebuilt
    // from a cached fragment.
    assert!(document.contains("xmlns=\"http://www.w3.org/2005/Atom\""));
    assert!(document.contains("xmlns:opds="));

    let again = generator
        .single_entry(EntrySubject::Work(&work), false)
        .unwrap()
        .unwrap();
    assert!(again.contains("xmlns:opds="), "cached rebuild keeps the namespace map");
}

#[test]
fn test_single_entry_for_work_without_edition_is_none() {
    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    assert!(generator
        .single_entry(EntrySubject::Work(&Work::default()), false)
        .unwrap()
        .is_none());
}

#[test]
fn test_single_entry_for_bare_edition() {
    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    let edition = edition("urn:e", "Loose Edition");
    let document = generator
        .single_entry(EntrySubject::Edition(&edition), false)
        .unwrap()
        .unwrap();
    assert!(document.contains("Loose Edition"));
    assert!(document.contains("urn:e"));
}

// ============================================================================
// Lookup Feeds
// ============================================================================

fn two_pool_work() -> Work {
    Work {
        presentation_edition: Some(edition("urn:default", "The Work")),
        license_pools: vec![
            LicensePool {
                licenses_owned: 5,
                licenses_available: 2,
                presentation_edition: Some(edition("urn:default", "The Work")),
                ..LicensePool::new(Identifier::new("urn:default"))
            },
            LicensePool {
                licenses_owned: 1,
                licenses_available: 0,
                presentation_edition: Some(edition("urn:other", "The Work (reissue)")),
                ..LicensePool::new(Identifier::new("urn:other"))
            },
        ],
        ..Work::default()
    }
}

#[test]
fn test_lookup_unknown_identifier_is_404() {
    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    let work = Arc::new(Work {
        presentation_edition: Some(edition("urn:w", "The Work")),
        ..Work::default()
    });

    let output = generator
        .lookup("Lookup", "http://x/lookup", &[(Identifier::new("urn:w"), work)])
        .unwrap();
    let feed = XmlElement::parse(output.as_str()).unwrap();
    let message = feed.first_child_named("app:message").unwrap();
    assert_eq!(
        message.first_child_named("app:status_code").unwrap().text(),
        "404"
    );
    assert!(message
        .first_child_named("message")
        .unwrap()
        .text()
        .contains("not found"));
}

#[test]
fn test_lookup_mismatched_work_is_500() {
    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    // The work is renderable, but the identifier asked about belongs to
    // some other work entirely: a structural inconsistency, not user error.
    let work = Arc::new(two_pool_work());

    let output = generator
        .lookup(
            "Lookup",
            "http://x/lookup",
            &[(Identifier::new("urn:unrelated"), work)],
        )
        .unwrap();
    let feed = XmlElement::parse(output.as_str()).unwrap();
    let message = feed.first_child_named("app:message").unwrap();
    assert_eq!(
        message.first_child_named("app:status_code").unwrap().text(),
        "500"
    );
    assert_eq!(
        message.first_child_named("id").unwrap().text(),
        "urn:unrelated"
    );
}

#[test]
fn test_lookup_default_pool_uses_fragment_cache() {
    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    let work = Arc::new(two_pool_work());
    work.entry_cache.set(
        EntryVariant::Simple,
        "<entry><id>urn:default</id><title>SEEDED</title></entry>".into(),
    );

    let output = generator
        .lookup(
            "Lookup",
            "http://x/lookup",
            &[(Identifier::new("urn:default"), work.clone())],
        )
        .unwrap();
    let feed = XmlElement::parse(output.as_str()).unwrap();
    let entry = feed.first_child_named("entry").unwrap();
    assert_eq!(
        entry.first_child_named("title").unwrap().text(),
        "SEEDED",
        "the identifier names the default pool, so the cached fragment is reused"
    );
}

#[test]
fn test_lookup_other_pool_bypasses_fragment_cache() {
    let annotator = annotator();
    let generator = FeedGenerator::new(&annotator);
    let work = Arc::new(two_pool_work());
    work.entry_cache.set(
        EntryVariant::Simple,
        "<entry><id>urn:default</id><title>SEEDED</title></entry>".into(),
    );

    let output = generator
        .lookup(
            "Lookup",
            "http://x/lookup",
            &[(Identifier::new("urn:other"), work.clone())],
        )
        .unwrap();
    let feed = XmlElement::parse(output.as_str()).unwrap();
    let entry = feed.first_child_named("entry").unwrap();
    assert_eq!(
        entry.first_child_named("title").unwrap().text(),
        "The Work (reissue)",
        "a non-default pool renders fresh"
    );

    // The bypass doesn't clobber the cached fragment either.
    assert!(work
        .entry_cache
        .get(EntryVariant::Simple)
        .unwrap()
        .contains("SEEDED"));
}
