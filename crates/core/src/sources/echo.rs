//! Source that returns the query as a person.

use std::sync::Arc;

use crate::errors::ResolveError;
use crate::person::{Person, PersonSet};
use crate::query::Query;
use crate::source::{AttributeSource, SourceFilter};
use crate::username::{SimpleUsernameResolver, UsernameResolver};

/// Echoes every query back as a single person, named after its username
/// attribute. Handy for feeding caller-supplied attributes into a merge.
pub struct EchoSource {
    id: String,
    tags: Vec<String>,
    username_resolver: Arc<dyn UsernameResolver>,
}

impl EchoSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: Vec::new(),
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

impl AttributeSource for EchoSource {
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
        let name = self.username_resolver.username_from_query(query);
        Ok(Some([Person::new(name, query.clone())].into_iter().collect()))
    }
}
