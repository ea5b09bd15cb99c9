//! Query and attribute-value representations.
//!
//! Everything in the resolution pipeline speaks the multi-valued form: an
//! insertion-ordered map from attribute name to an optional ordered list of
//! values. `None` is a null list and is distinct from an absent key.
//!
//! Simpler call sites may use the single-valued form
//! ([`SingleValuedQuery`]); [`to_multi_valued`] and [`flatten`] convert
//! between the two.

use indexmap::IndexMap;
use serde_json::Value;

/// An opaque attribute value (string, number, boolean, ...).
pub type AttributeValue = Value;

/// Ordered list of values for one attribute.
pub type AttributeValues = Vec<AttributeValue>;

/// Attribute name -> optional list of values, in insertion order.
pub type AttributeMap = IndexMap<String, Option<AttributeValues>>;

/// A multi-valued query. Structurally identical to a person's attributes so
/// that results can be fed back in as queries.
pub type Query = AttributeMap;

/// Flattened query form: one value per attribute.
pub type SingleValuedQuery = IndexMap<String, AttributeValue>;

/// Marker that turns a username into a multi-result search.
pub const WILDCARD: &str = "*";

/// Build the seed query `{attribute: [uid]}` used for username lookups.
pub fn seed_query(attribute: &str, uid: &str) -> Query {
    let mut query = Query::new();
    query.insert(attribute.to_string(), Some(vec![Value::String(uid.to_string())]));
    query
}

/// Promote a single-valued query to the multi-valued form.
///
/// Scalars become one-element lists, arrays are taken as already
/// multi-valued, and JSON `null` becomes a null list.
pub fn to_multi_valued(single: &SingleValuedQuery) -> Query {
    single
        .iter()
        .map(|(name, value)| {
            let values = match value {
                Value::Null => None,
                Value::Array(items) => Some(items.clone()),
                other => Some(vec![other.clone()]),
            };
            (name.clone(), values)
        })
        .collect()
}

/// Flatten a multi-valued query, keeping the first value of each list.
/// Null and empty lists flatten to JSON `null`.
pub fn flatten(query: &Query) -> SingleValuedQuery {
    query
        .iter()
        .map(|(name, values)| {
            let first = values
                .as_ref()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or(Value::Null);
            (name.clone(), first)
        })
        .collect()
}

/// First non-null value of an attribute, if any.
pub fn first_value(values: Option<&AttributeValues>) -> Option<&AttributeValue> {
    values?.iter().find(|v| !v.is_null())
}

/// Render a value as a plain string for comparisons and display.
/// Strings are returned bare (without JSON quoting); `null` renders as `None`.
pub fn render_value(value: &AttributeValue) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
