//! Canonical query-string handling.
//!
//! Facets and pagination serialize to query strings that double as cache-key
//! components, so the representation must be order-stable: the same logical
//! value always produces byte-identical output. Keys are emitted in sorted
//! order and values are form-urlencoded.

use url::form_urlencoded;

/// Serialize key/value pairs as a canonical query string.
///
/// Pairs are sorted by key (then value) before encoding, so callers can
/// supply them in any order and still get a stable result.
pub fn serialize_query<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    pairs.sort_unstable();
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Decode a query string into key/value pairs, preserving input order.
pub fn parse_query(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serialize_sorts_keys() {
        let qs = serialize_query([("order", "title"), ("available", "now")]);
        assert_eq!(qs, "available=now&order=title");
    }

    #[test]
    fn test_serialize_is_stable_across_input_order() {
        let a = serialize_query([("b", "2"), ("a", "1"), ("c", "3")]);
        let b = serialize_query([("c", "3"), ("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_values_are_encoded() {
        let qs = serialize_query([("q", "moby dick & co")]);
        assert_eq!(qs, "q=moby+dick+%26+co");
    }

    #[test]
    fn test_parse_round_trip() {
        let qs = serialize_query([("q", "a b&c"), ("size", "50")]);
        let pairs = parse_query(&qs);
        assert_eq!(
            pairs,
            vec![("q".to_string(), "a b&c".to_string()), ("size".to_string(), "50".to_string())]
        );
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_query("").is_empty());
    }
}
