//! lectern — OPDS acquisition feed generation and caching for library
//! catalogs.
//!
//! The engine turns already-materialized catalog state (works, editions,
//! license pools) into Atom+OPDS acquisition feeds, in three shapes:
//!
//! - **page**: one flat, faceted, paginated window over a scope
//! - **groups**: featured works clustered per sub-scope, falling back to a
//!   flat page when the scope can't produce groups
//! - **search**: ranked results from the scope's search entry point
//!
//! Serialized feeds are cached under (scope, shape, facets, pagination)
//! through the pluggable [`cache::FeedCache`] store, and each work keeps a
//! per-variant cache of its rendered `<entry>` fragment. Everything
//! application-specific — URLs, cover links, vocabulary detail, license
//! presentation — routes through the [`annotator::Annotator`] strategy
//! trait.
//!
//! Feed generation is synchronous and reads no network: it consumes catalog
//! rows the caller already loaded, plus the cache store. Many requests may
//! run concurrently; cache races are benign because regeneration is
//! idempotent and writes replace in place.
//!
//! ```no_run
//! use lectern::annotator::DefaultAnnotator;
//! use lectern::cache::MemoryCache;
//! use lectern::feed::FeedGenerator;
//! use lectern::scope::StaticLane;
//!
//! let annotator = DefaultAnnotator::new("http://catalog.example.com/")?
//!     .with_title("Example Library");
//! let cache = MemoryCache::default();
//! let generator = FeedGenerator::new(&annotator).with_cache(&cache);
//!
//! let lane = StaticLane::new("all", "Everything");
//! let output = generator.page(
//!     &lane,
//!     "Everything",
//!     "http://catalog.example.com/feed/all",
//!     None,
//!     None,
//!     false,
//! )?;
//! println!("{}", output.as_str());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod annotator;
pub mod cache;
pub mod config;
pub mod facets;
pub mod feed;
pub mod model;
pub mod pagination;
pub mod scope;
pub mod util;
pub mod xml;

pub use crate::annotator::{Annotator, DefaultAnnotator, VerboseAnnotator};
pub use crate::cache::{CachePolicy, FeedCache, FeedShape, MaxAge, MemoryCache};
pub use crate::config::FeedConfig;
pub use crate::facets::{EntryPoint, Facets};
pub use crate::feed::{
    AcquisitionFeed, EntryOutcome, FeedGenerator, FeedOutput, OpdsFeed, OpdsMessage,
};
pub use crate::model::{Edition, EntryVariant, Identifier, LicensePool, Work};
pub use crate::pagination::Pagination;
pub use crate::scope::{StaticLane, WorkList};
