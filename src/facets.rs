//! Faceted views over a scope: sort order, availability, collection, and
//! entry point, plus the free-text query for search feeds.
//!
//! A [`Facets`] value serializes to a canonical query string that is used
//! both in URLs and as a cache-key component, so parse → serialize must be
//! idempotent.

use thiserror::Error;

use crate::util::{parse_query, serialize_query};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FacetParseError {
    #[error("unknown value for facet key {key:?}: {value:?}")]
    UnknownValue { key: String, value: String },
}

/// Sort order for a paginated feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Order {
    Title,
    #[default]
    Author,
    Added,
}

impl Order {
    pub const ALL: [Order; 3] = [Order::Title, Order::Author, Order::Added];

    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Title => "title",
            Order::Author => "author",
            Order::Added => "added",
        }
    }

    pub fn display_title(&self) -> &'static str {
        match self {
            Order::Title => "Title",
            Order::Author => "Author",
            Order::Added => "Recently Added",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.as_str() == value)
    }
}

/// Availability filter for a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Availability {
    #[default]
    All,
    /// At least one copy can be borrowed right now.
    Available,
    /// Open-access only.
    OpenAccess,
}

impl Availability {
    pub const ALL_VALUES: [Availability; 3] = [
        Availability::All,
        Availability::Available,
        Availability::OpenAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::All => "all",
            Availability::Available => "now",
            Availability::OpenAccess => "always",
        }
    }

    pub fn display_title(&self) -> &'static str {
        match self {
            Availability::All => "All",
            Availability::Available => "Available now",
            Availability::OpenAccess => "Yours to keep",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL_VALUES.into_iter().find(|a| a.as_str() == value)
    }
}

/// Collection filter: the whole scope or only its featured works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Collection {
    #[default]
    Full,
    Featured,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Full, Collection::Featured];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Full => "full",
            Collection::Featured => "featured",
        }
    }

    pub fn display_title(&self) -> &'static str {
        match self {
            Collection::Full => "Everything",
            Collection::Featured => "Popular Books",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

/// A top-level content-type pivot, orthogonal to the other facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntryPoint {
    #[default]
    Everything,
    Ebooks,
    Audiobooks,
}

impl EntryPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Everything => "everything",
            EntryPoint::Ebooks => "ebooks",
            EntryPoint::Audiobooks => "audiobooks",
        }
    }

    pub fn display_title(&self) -> &'static str {
        match self {
            EntryPoint::Everything => "All",
            EntryPoint::Ebooks => "eBooks",
            EntryPoint::Audiobooks => "Audiobooks",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        [
            EntryPoint::Everything,
            EntryPoint::Ebooks,
            EntryPoint::Audiobooks,
        ]
        .into_iter()
        .find(|e| e.as_str() == value)
    }
}

/// The facet group a facet link belongs to, used to label links in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetGroup {
    Order,
    Availability,
    Collection,
}

impl FacetGroup {
    pub fn display_title(&self) -> &'static str {
        match self {
            FacetGroup::Order => "Sort by",
            FacetGroup::Availability => "Availability",
            FacetGroup::Collection => "Collection",
        }
    }
}

/// One alternate faceted view of the current feed.
#[derive(Debug, Clone)]
pub struct FacetChoice {
    pub group: FacetGroup,
    pub value_title: &'static str,
    pub facets: Facets,
    pub selected: bool,
}

/// The complete facet state of one feed request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Facets {
    pub order: Order,
    pub availability: Availability,
    pub collection: Collection,
    pub entry_point: EntryPoint,
    /// Free-text query; only meaningful for search feeds.
    pub query: Option<String>,
}

impl Facets {
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collection = collection;
        self
    }

    pub fn with_entry_point(mut self, entry_point: EntryPoint) -> Self {
        self.entry_point = entry_point;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Canonical query-string form, used in URLs and cache keys.
    pub fn query_string(&self) -> String {
        let mut pairs = vec![
            ("available", self.availability.as_str()),
            ("collection", self.collection.as_str()),
            ("entrypoint", self.entry_point.as_str()),
            ("order", self.order.as_str()),
        ];
        if let Some(query) = &self.query {
            pairs.push(("q", query.as_str()));
        }
        serialize_query(pairs)
    }

    /// Parse the output of [`query_string`](Self::query_string).
    ///
    /// Unknown keys are ignored (callers may share a query string with
    /// pagination); an unknown value for a known key is an error.
    pub fn parse(input: &str) -> Result<Facets, FacetParseError> {
        let mut facets = Facets::default();
        for (key, value) in parse_query(input) {
            match key.as_str() {
                "order" => {
                    facets.order = Order::parse(&value)
                        .ok_or(FacetParseError::UnknownValue { key, value })?;
                }
                "available" => {
                    facets.availability = Availability::parse(&value)
                        .ok_or(FacetParseError::UnknownValue { key, value })?;
                }
                "collection" => {
                    facets.collection = Collection::parse(&value)
                        .ok_or(FacetParseError::UnknownValue { key, value })?;
                }
                "entrypoint" => {
                    facets.entry_point = EntryPoint::parse(&value)
                        .ok_or(FacetParseError::UnknownValue { key, value })?;
                }
                "q" => facets.query = Some(value),
                _ => {}
            }
        }
        Ok(facets)
    }

    /// Every alternate view reachable by changing exactly one facet group
    /// value, with the currently selected value flagged in each group.
    ///
    /// Entry points are not included here; they are a separate link family
    /// attached per feed shape.
    pub fn facet_choices(&self) -> Vec<FacetChoice> {
        let mut choices = Vec::new();
        for order in Order::ALL {
            choices.push(FacetChoice {
                group: FacetGroup::Order,
                value_title: order.display_title(),
                facets: self.clone().with_order(order),
                selected: order == self.order,
            });
        }
        for availability in Availability::ALL_VALUES {
            choices.push(FacetChoice {
                group: FacetGroup::Availability,
                value_title: availability.display_title(),
                facets: self.clone().with_availability(availability),
                selected: availability == self.availability,
            });
        }
        for collection in Collection::ALL {
            choices.push(FacetChoice {
                group: FacetGroup::Collection,
                value_title: collection.display_title(),
                facets: self.clone().with_collection(collection),
                selected: collection == self.collection,
            });
        }
        choices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_default_query_string() {
        assert_eq!(
            Facets::default().query_string(),
            "available=all&collection=full&entrypoint=everything&order=author"
        );
    }

    #[test]
    fn test_query_string_includes_search_query() {
        let facets = Facets::default().with_query("moby dick");
        assert!(facets.query_string().ends_with("&q=moby+dick"));
    }

    #[test]
    fn test_parse_round_trip() {
        let facets = Facets::default()
            .with_order(Order::Title)
            .with_availability(Availability::OpenAccess)
            .with_collection(Collection::Featured)
            .with_entry_point(EntryPoint::Audiobooks)
            .with_query("whales & ships");
        let parsed = Facets::parse(&facets.query_string()).unwrap();
        assert_eq!(parsed, facets);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let facets = Facets::parse("order=title&after=50&size=25").unwrap();
        assert_eq!(facets.order, Order::Title);
    }

    #[test]
    fn test_parse_rejects_unknown_values() {
        let err = Facets::parse("order=velocity").unwrap_err();
        assert_eq!(
            err,
            FacetParseError::UnknownValue {
                key: "order".into(),
                value: "velocity".into()
            }
        );
    }

    #[test]
    fn test_facet_choices_flag_selection() {
        let facets = Facets::default().with_order(Order::Title);
        let choices = facets.facet_choices();
        // 3 orders + 3 availabilities + 2 collections
        assert_eq!(choices.len(), 8);
        let selected: Vec<_> = choices.iter().filter(|c| c.selected).collect();
        assert_eq!(selected.len(), 3, "one selected value per group");
        let order_choice = choices
            .iter()
            .find(|c| c.group == FacetGroup::Order && c.selected)
            .unwrap();
        assert_eq!(order_choice.value_title, "Title");
    }

    #[test]
    fn test_facet_choices_preserve_other_groups() {
        let facets = Facets::default().with_availability(Availability::Available);
        for choice in facets.facet_choices() {
            if choice.group != FacetGroup::Availability {
                assert_eq!(choice.facets.availability, Availability::Available);
            }
        }
    }

    fn arb_facets() -> impl Strategy<Value = Facets> {
        (
            prop::sample::select(Order::ALL.to_vec()),
            prop::sample::select(Availability::ALL_VALUES.to_vec()),
            prop::sample::select(Collection::ALL.to_vec()),
            prop::sample::select(vec![
                EntryPoint::Everything,
                EntryPoint::Ebooks,
                EntryPoint::Audiobooks,
            ]),
            prop::option::of("[a-z &]{0,20}"),
        )
            .prop_map(|(order, availability, collection, entry_point, query)| Facets {
                order,
                availability,
                collection,
                entry_point,
                query,
            })
    }

    proptest! {
        #[test]
        fn prop_query_string_round_trips(facets in arb_facets()) {
            let qs = facets.query_string();
            let parsed = Facets::parse(&qs).unwrap();
            prop_assert_eq!(parsed.query_string(), qs);
            prop_assert_eq!(parsed, facets);
        }
    }
}
