//! The immutable [`Person`] value returned by every resolver.

use std::hash::{Hash, Hasher};

use indexmap::IndexSet;
use serde::Serialize;

use crate::query::{first_value, render_value, AttributeMap, AttributeValue, AttributeValues};

/// A resolved identity: an optional name plus its attributes.
///
/// Equality and hashing consider only `name`. Two persons with the same name
/// but different attributes are equal, so a [`PersonSet`] holds at most one
/// entry per identity and mergers can look counterparts up by name.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    name: Option<String>,
    attributes: AttributeMap,
}

/// Identity de-duplicated, insertion-ordered set of persons.
pub type PersonSet = IndexSet<Person>;

impl Person {
    pub fn new(name: Option<String>, attributes: AttributeMap) -> Self {
        Self { name, attributes }
    }

    /// A person with a known name.
    pub fn named(name: impl Into<String>, attributes: AttributeMap) -> Self {
        Self::new(Some(name.into()), attributes)
    }

    /// A person whose name is the first non-null value of
    /// `username_attribute`, or unnamed when that attribute has none.
    pub fn from_attribute(username_attribute: &str, attributes: AttributeMap) -> Self {
        let name = first_value(attributes.get(username_attribute).and_then(Option::as_ref))
            .and_then(render_value);
        Self::new(name, attributes)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Read-only view of all attributes.
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Values of one attribute. `None` both when the key is absent and when
    /// it maps to a null list; use [`attributes`](Self::attributes) to tell
    /// them apart.
    pub fn attribute_values(&self, name: &str) -> Option<&AttributeValues> {
        self.attributes.get(name).and_then(Option::as_ref)
    }

    /// First non-null value of one attribute.
    pub fn attribute_value(&self, name: &str) -> Option<&AttributeValue> {
        first_value(self.attribute_values(name))
    }

    pub fn into_parts(self) -> (Option<String>, AttributeMap) {
        (self.name, self.attributes)
    }
}

impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Person {}

impl Hash for Person {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
