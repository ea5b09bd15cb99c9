//! The single-source lookup contract and per-call source filters.
//!
//! Every backing store (directory, database, web service, static map) and
//! every composite (aggregating, cascading, caching, mapping) implements
//! [`AttributeSource`], so composites nest freely.

use indexmap::IndexSet;

use crate::errors::ResolveError;
use crate::person::{Person, PersonSet};
use crate::query::Query;

/// Set of attribute names, in discovery order.
pub type AttributeNames = IndexSet<String>;

/// A unit that can look people up from a multi-valued query.
///
/// The `Option` in every return type is load-bearing:
///
/// - `Ok(None)` from [`resolve_many`](Self::resolve_many) means the source
///   could not evaluate the query at all (e.g. a required attribute is
///   missing). Aggregators leave their accumulated result untouched.
/// - `Ok(Some(empty))` means the query ran and matched nobody.
/// - `None` from the attribute-name methods means "unknown".
pub trait AttributeSource: Send + Sync {
    /// Identifier used by filters and log output.
    fn id(&self) -> &str {
        "unnamed"
    }

    /// Free-form labels filters may select on.
    fn tags(&self) -> &[String] {
        &[]
    }

    /// Return every person matching `query`.
    fn resolve_many(
        &self,
        query: &Query,
        filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError>;

    /// Return the single person matching `query`.
    ///
    /// Fails with [`ResolveError::AmbiguousResult`] when the underlying
    /// lookup yields more than one identity.
    fn resolve_one(
        &self,
        query: &Query,
        filter: &dyn SourceFilter,
    ) -> Result<Option<Person>, ResolveError> {
        single_result(self.resolve_many(query, filter)?)
    }

    /// Attribute names this source may return.
    fn possible_result_attribute_names(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        None
    }

    /// Query attribute names this source understands.
    fn available_query_attributes(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
        None
    }
}

/// Reduce a multi-result answer to at most one person.
pub fn single_result(people: Option<PersonSet>) -> Result<Option<Person>, ResolveError> {
    let Some(people) = people else {
        return Ok(None);
    };
    match people.len() {
        0 => Ok(None),
        1 => Ok(people.into_iter().next()),
        count => Err(ResolveError::AmbiguousResult { count }),
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Per-call predicate deciding whether a source takes part in a lookup.
pub trait SourceFilter: Send + Sync {
    fn choose(&self, source: &dyn AttributeSource) -> bool;
}

/// Accepts every source. The default filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysChoose;

/// Shared instance of [`AlwaysChoose`].
pub const ALWAYS: AlwaysChoose = AlwaysChoose;

impl SourceFilter for AlwaysChoose {
    fn choose(&self, _source: &dyn AttributeSource) -> bool {
        true
    }
}

/// Accepts sources whose id is in the set.
#[derive(Debug, Clone, Default)]
pub struct ChooseById {
    ids: IndexSet<String>,
}

impl ChooseById {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl SourceFilter for ChooseById {
    fn choose(&self, source: &dyn AttributeSource) -> bool {
        self.ids.contains(source.id())
    }
}

/// Accepts sources carrying the given tag.
#[derive(Debug, Clone)]
pub struct ChooseByTag {
    tag: String,
}

impl ChooseByTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl SourceFilter for ChooseByTag {
    fn choose(&self, source: &dyn AttributeSource) -> bool {
        source.tags().iter().any(|t| *t == self.tag)
    }
}

impl<F> SourceFilter for F
where
    F: Fn(&dyn AttributeSource) -> bool + Send + Sync,
{
    fn choose(&self, source: &dyn AttributeSource) -> bool {
        self(source)
    }
}
