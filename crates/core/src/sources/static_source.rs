//! Fixed-attribute stub source.

use std::sync::Arc;

use crate::errors::ResolveError;
use crate::person::{Person, PersonSet};
use crate::query::{AttributeMap, Query};
use crate::source::{AttributeNames, AttributeSource, SourceFilter};
use crate::username::{SimpleUsernameResolver, UsernameResolver};

/// Answers every query that names a user with the same attributes.
///
/// Useful as a stand-in for a real backend and for defaults every person
/// should carry.
pub struct StaticSource {
    id: String,
    tags: Vec<String>,
    attributes: AttributeMap,
    username_resolver: Arc<dyn UsernameResolver>,
}

impl StaticSource {
    pub fn new(id: impl Into<String>, attributes: AttributeMap) -> Self {
        Self {
            id: id.into(),
            tags: Vec::new(),
            attributes,
            username_resolver: Arc::new(SimpleUsernameResolver::default()),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_username_resolver(mut self, resolver: Arc<dyn UsernameResolver>) -> Self {
        self.username_resolver = resolver;
        self
    }
}

impl AttributeSource for StaticSource {
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
        let Some(username) = self.username_resolver.username_from_query(query) else {
            return Ok(None);
        };
        let person = Person::named(username, self.attributes.clone());
        Ok(Some([person].into_iter().collect()))
    }

    fn possible_result_attribute_names(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        Some(self.attributes.keys().cloned().collect())
    }

    fn available_query_attributes(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        let attribute = self.username_resolver.username_attribute_name().to_string();
        Some([attribute].into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::seed_query;
    use crate::source::ALWAYS;
    use serde_json::json;

    fn source() -> StaticSource {
        let mut attributes = AttributeMap::new();
        attributes.insert("affiliation".into(), Some(vec![json!("member")]));
        StaticSource::new("defaults", attributes)
    }

    #[test]
    fn test_answers_for_any_named_user() {
        let people = source()
            .resolve_many(&seed_query("username", "alice"), &ALWAYS)
            .unwrap()
            .unwrap();
        let alice = people.get_index(0).unwrap();
        assert_eq!(alice.name(), Some("alice"));
        assert_eq!(alice.attribute_value("affiliation"), Some(&json!("member")));
    }

    #[test]
    fn test_cannot_answer_without_username() {
        assert_eq!(source().resolve_many(&Query::new(), &ALWAYS), Ok(None));
        assert_eq!(
            source().resolve_many(&seed_query("username", "a*"), &ALWAYS),
            Ok(None)
        );
    }

    #[test]
    fn test_attribute_names() {
        let names = source().possible_result_attribute_names(&ALWAYS).unwrap();
        assert!(names.contains("affiliation"));
        let query = source().available_query_attributes(&ALWAYS).unwrap();
        assert!(query.contains("username"));
    }
}
