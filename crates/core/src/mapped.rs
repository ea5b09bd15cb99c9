//! Name mapping around an arbitrary source.

use std::sync::Arc;

use tracing::debug;

use crate::errors::ResolveError;
use crate::mapping::AttributeMapper;
use crate::person::{Person, PersonSet};
use crate::query::Query;
use crate::source::{AttributeNames, AttributeSource, SourceFilter};
use crate::username::{SimpleUsernameResolver, UsernameResolver};

/// Wraps a source with query-side and result-side attribute mapping.
///
/// When the mapper cannot build a query for the source (a required
/// attribute is missing, or nothing maps) the lookup answers `Ok(None)`
/// without consulting the inner source. Results that come back unnamed are
/// named after the username carried by the caller's query.
pub struct MappedSource<M: AttributeMapper> {
    inner: Arc<dyn AttributeSource>,
    mapper: M,
    username_resolver: Arc<dyn UsernameResolver>,
}

impl<M: AttributeMapper> MappedSource<M> {
    pub fn new(inner: Arc<dyn AttributeSource>, mapper: M) -> Self {
        Self {
            inner,
            mapper,
            username_resolver: Arc::new(SimpleUsernameResolver::default()),
        }
    }

    /// Resolver used to find the caller's username in incoming queries.
    pub fn with_username_resolver(mut self, resolver: Arc<dyn UsernameResolver>) -> Self {
        self.username_resolver = resolver;
        self
    }

    pub fn inner(&self) -> &Arc<dyn AttributeSource> {
        &self.inner
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }
}

impl<M: AttributeMapper> AttributeSource for MappedSource<M> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn tags(&self) -> &[String] {
        self.inner.tags()
    }

    fn resolve_many(
        &self,
        query: &Query,
        filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError> {
        let Some(mapped_query) = self.mapper.map_query(query) else {
            debug!(source = %self.inner.id(), "query cannot be mapped for source");
            return Ok(None);
        };

        let Some(people) = self.inner.resolve_many(&mapped_query, filter)? else {
            return Ok(None);
        };

        let caller_username = self.username_resolver.username_from_query(query);
        let mapped = people
            .iter()
            .map(|person| {
                let mapped = self.mapper.map_result(person);
                match (mapped.name(), &caller_username) {
                    (None, Some(username)) => {
                        let (_, attributes) = mapped.into_parts();
                        Person::named(username.clone(), attributes)
                    }
                    _ => mapped,
                }
            })
            .collect();
        Ok(Some(mapped))
    }

    fn possible_result_attribute_names(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.mapper
            .mapped_result_attribute_names()
            .or_else(|| self.inner.possible_result_attribute_names(filter))
    }

    fn available_query_attributes(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.mapper
            .mapped_query_attribute_names()
            .or_else(|| self.inner.available_query_attributes(filter))
    }
}
