//! In-memory people directory.
//!
//! Entries are keyed by username. Lookups either match the username
//! (the default) or a configured key attribute, and a `*` in the lookup
//! value turns it into a glob search that may return many people.

use std::sync::Arc;

use glob_match::glob_match;
use indexmap::IndexMap;
use tracing::debug;

use crate::errors::ResolveError;
use crate::merger::{AttributeMerger, MultivaluedMerger};
use crate::person::{Person, PersonSet};
use crate::query::{render_value, AttributeMap, Query, WILDCARD};
use crate::source::{AttributeNames, AttributeSource, SourceFilter};
use crate::username::{SimpleUsernameResolver, UsernameResolver, DEFAULT_USERNAME_ATTRIBUTE};

pub struct InMemoryDirectory {
    id: String,
    tags: Vec<String>,
    entries: IndexMap<String, AttributeMap>,
    key_attribute: Option<String>,
    username_resolver: Arc<dyn UsernameResolver>,
}

impl InMemoryDirectory {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: Vec::new(),
            entries: IndexMap::new(),
            key_attribute: None,
            username_resolver: Arc::new(SimpleUsernameResolver::default()),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Match entries on this attribute instead of their username.
    ///
    /// When the query carries a username, all matching entries are folded
    /// into one person of that name, with distinct values appended.
    /// Otherwise each match is named after its entry key.
    pub fn with_key_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.key_attribute = Some(attribute.into());
        self
    }

    pub fn with_username_resolver(mut self, resolver: Arc<dyn UsernameResolver>) -> Self {
        self.username_resolver = resolver;
        self
    }

    pub fn with_entry(mut self, uid: impl Into<String>, attributes: AttributeMap) -> Self {
        self.insert(uid, attributes);
        self
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, uid: impl Into<String>, attributes: AttributeMap) {
        self.entries.insert(uid.into(), attributes);
    }

    pub fn remove(&mut self, uid: &str) -> Option<AttributeMap> {
        self.entries.shift_remove(uid)
    }

    pub fn entries(&self) -> &IndexMap<String, AttributeMap> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw lookup value for the username, wildcards included.
    fn username_pattern(&self, query: &Query) -> Option<String> {
        let values = query
            .get(self.username_resolver.username_attribute_name())
            .or_else(|| query.get(DEFAULT_USERNAME_ATTRIBUTE))?
            .as_ref()?;
        let raw = values.iter().find_map(render_value)?;
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn by_username(&self, pattern: &str) -> PersonSet {
        if pattern.contains(WILDCARD) {
            return self
                .entries
                .iter()
                .filter(|(uid, _)| glob_match(pattern, uid))
                .map(|(uid, attributes)| Person::named(uid.clone(), attributes.clone()))
                .collect();
        }
        self.entries
            .get_key_value(pattern)
            .map(|(uid, attributes)| Person::named(uid.clone(), attributes.clone()))
            .into_iter()
            .collect()
    }

    fn by_attribute(&self, attribute: &str, wanted: &[String], name: Option<&str>) -> PersonSet {
        let matches = |candidate: &str| {
            wanted.iter().any(|w| {
                if w.contains(WILDCARD) {
                    glob_match(w, candidate)
                } else {
                    w == candidate
                }
            })
        };

        let rows = self.entries.iter().filter(|(_, attributes)| {
            attributes
                .get(attribute)
                .and_then(Option::as_ref)
                .map_or(false, |values| {
                    values.iter().filter_map(render_value).any(|v| matches(v.as_str()))
                })
        });

        let Some(name) = name else {
            return rows
                .map(|(uid, attributes)| Person::named(uid.clone(), attributes.clone()))
                .collect();
        };

        // Every row belongs to the named person: fold them into one.
        let merger = MultivaluedMerger::with_distinct_values(true);
        let mut combined: Option<AttributeMap> = None;
        for (_, attributes) in rows {
            combined = Some(match combined {
                None => attributes.clone(),
                Some(base) => merger.merge_attributes(base, attributes),
            });
        }
        combined
            .map(|attributes| Person::named(name, attributes))
            .into_iter()
            .collect()
    }
}

impl AttributeSource for InMemoryDirectory {
    fn id(&self) -> &str {
        &self.id
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn resolve_many(
        &self,
        query: &Query,
        _filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError> {
        let people = match &self.key_attribute {
            None => {
                let Some(pattern) = self.username_pattern(query) else {
                    debug!(source = %self.id, "query carries no username");
                    return Ok(None);
                };
                self.by_username(&pattern)
            }
            Some(attribute) => {
                let wanted: Vec<String> = query
                    .get(attribute)
                    .and_then(Option::as_ref)
                    .map(|values| values.iter().filter_map(render_value).collect())
                    .unwrap_or_default();
                if wanted.is_empty() {
                    debug!(source = %self.id, attribute = %attribute, "query lacks key attribute");
                    return Ok(None);
                }
                let name = self.username_resolver.username_from_query(query);
                self.by_attribute(attribute, &wanted, name.as_deref())
            }
        };

        debug!(source = %self.id, count = people.len(), "directory lookup");
        Ok(Some(people))
    }

    fn possible_result_attribute_names(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        Some(
            self.entries
                .values()
                .flat_map(|attributes| attributes.keys().cloned())
                .collect(),
        )
    }

    fn available_query_attributes(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        let attribute = match &self.key_attribute {
            Some(attribute) => attribute.clone(),
            None => self.username_resolver.username_attribute_name().to_string(),
        };
        Some([attribute].into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::seed_query;
    use crate::source::ALWAYS;
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(vec![json!(v)])))
            .collect()
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new("people")
            .with_entry("edalquist", attrs(&[("mail", "ed@example.edu"), ("studentId", "123")]))
            .with_entry("eve", attrs(&[("mail", "eve@example.edu")]))
            .with_entry("bob", attrs(&[("mail", "bob@example.edu")]))
    }

    fn names(people: &PersonSet) -> Vec<&str> {
        people.iter().filter_map(Person::name).collect()
    }

    #[test]
    fn test_exact_username() {
        let people = directory()
            .resolve_many(&seed_query("username", "eve"), &ALWAYS)
            .unwrap()
            .unwrap();
        assert_eq!(names(&people), vec!["eve"]);
    }

    #[test]
    fn test_unknown_username_is_empty_not_null() {
        let people = directory()
            .resolve_many(&seed_query("username", "nobody"), &ALWAYS)
            .unwrap();
        assert_eq!(people, Some(PersonSet::new()));
        assert_eq!(directory().resolve_many(&Query::new(), &ALWAYS), Ok(None));
    }

    #[test]
    fn test_wildcard_search() {
        let people = directory()
            .resolve_many(&seed_query("username", "e*"), &ALWAYS)
            .unwrap()
            .unwrap();
        assert_eq!(names(&people), vec!["edalquist", "eve"]);
    }

    #[test]
    fn test_key_attribute_names_matches_after_query_user() {
        let dir = InMemoryDirectory::new("registrar")
            .with_key_attribute("studentId")
            .with_entry("row-1", attrs(&[("studentId", "123"), ("major", "CS")]));

        let mut query = seed_query("username", "edalquist");
        query.insert("studentId".into(), Some(vec![json!("123")]));
        let people = dir.resolve_many(&query, &ALWAYS).unwrap().unwrap();
        assert_eq!(names(&people), vec!["edalquist"]);

        let by_id_only = seed_query("studentId", "123");
        let people = dir.resolve_many(&by_id_only, &ALWAYS).unwrap().unwrap();
        assert_eq!(names(&people), vec!["row-1"]);

        assert_eq!(dir.resolve_many(&seed_query("username", "edalquist"), &ALWAYS), Ok(None));
    }

    #[test]
    fn test_key_attribute_rows_fold_into_query_user() {
        let dir = InMemoryDirectory::new("enrollment")
            .with_key_attribute("studentId")
            .with_entry("row-1", attrs(&[("studentId", "123"), ("course", "CS101")]))
            .with_entry("row-2", attrs(&[("studentId", "123"), ("course", "MATH200")]))
            .with_entry("row-3", attrs(&[("studentId", "456"), ("course", "ART100")]));

        let mut query = seed_query("username", "edalquist");
        query.insert("studentId".into(), Some(vec![json!("123")]));
        let people = dir.resolve_many(&query, &ALWAYS).unwrap().unwrap();
        assert_eq!(names(&people), vec!["edalquist"]);
        let ed = people.get_index(0).unwrap();
        assert_eq!(
            ed.attribute_values("course"),
            Some(&vec![json!("CS101"), json!("MATH200")])
        );
        assert_eq!(ed.attribute_values("studentId"), Some(&vec![json!("123")]));

        let people = dir
            .resolve_many(&seed_query("studentId", "123"), &ALWAYS)
            .unwrap()
            .unwrap();
        assert_eq!(names(&people), vec!["row-1", "row-2"]);

        let mut nobody = seed_query("username", "edalquist");
        nobody.insert("studentId".into(), Some(vec![json!("999")]));
        assert_eq!(dir.resolve_many(&nobody, &ALWAYS), Ok(Some(PersonSet::new())));
    }

    #[test]
    fn test_attribute_names() {
        let names = directory().possible_result_attribute_names(&ALWAYS).unwrap();
        assert_eq!(names.iter().collect::<Vec<_>>(), vec!["mail", "studentId"]);
    }

    #[test]
    fn test_insert_and_remove() {
        let mut dir = directory();
        assert_eq!(dir.len(), 3);
        assert!(dir.remove("bob").is_some());
        dir.insert("carol", AttributeMap::new());
        assert_eq!(dir.entries().keys().collect::<Vec<_>>(), vec!["edalquist", "eve", "carol"]);
    }
}
