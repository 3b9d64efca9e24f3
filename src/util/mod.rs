mod query;

pub use query::{parse_query, serialize_query};
