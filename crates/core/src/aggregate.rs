//! Aggregating resolvers: ordered fan-out over child sources.
//!
//! [`AggregatingResolver`] walks its children strictly in configured order,
//! asks each one for results and folds them together with an
//! [`AttributeMerger`]. What each child is asked is decided by a
//! [`ChildQueryBuilder`]:
//!
//! - [`MergingStrategy`] sends every child the caller's seed query;
//! - [`CascadingStrategy`] feeds the people found so far into the next
//!   child, so attributes discovered early (a foreign key from one store)
//!   can drive later lookups (a table keyed by that foreign key).
//!
//! Per call the resolver moves through NOT_STARTED -> ITERATING(i) -> DONE,
//! or FAILED when a child error is not recovered.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::ResolveError;
use crate::merger::{AttributeMerger, MultivaluedMerger, ReplacingMerger};
use crate::person::{Person, PersonSet};
use crate::query::{seed_query, Query};
use crate::source::{AttributeNames, AttributeSource, SourceFilter};
use crate::username::{SimpleUsernameResolver, UsernameResolver};

// ---------------------------------------------------------------------------
// Child query hook
// ---------------------------------------------------------------------------

/// Everything a [`ChildQueryBuilder`] may look at for one child.
pub struct ChildContext<'a> {
    /// The caller's original query.
    pub seed: &'a Query,
    /// Whether no child has been consulted yet.
    pub first_query: bool,
    /// The child about to be consulted.
    pub child: &'a dyn AttributeSource,
    /// Results accumulated from earlier children (`None` = nothing yet).
    pub accumulated: Option<&'a PersonSet>,
    pub filter: &'a dyn SourceFilter,
    pub username_resolver: &'a dyn UsernameResolver,
}

/// What to ask the next child.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildQuery {
    /// Send the seed query unchanged.
    Seed,
    /// Send each query once and merge the answers.
    PerPerson(Vec<Query>),
    /// Skip this child and every child after it.
    Halt,
}

/// Hook deciding the query each child receives.
pub trait ChildQueryBuilder: Send + Sync {
    fn build_child_query(&self, ctx: &ChildContext<'_>) -> ChildQuery;
}

/// Every child gets the seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergingStrategy;

impl ChildQueryBuilder for MergingStrategy {
    fn build_child_query(&self, _ctx: &ChildContext<'_>) -> ChildQuery {
        ChildQuery::Seed
    }
}

/// Each child is queried with the people accumulated so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadingStrategy {
    stop_if_first_source_returns_null: bool,
}

impl CascadingStrategy {
    pub fn new(stop_if_first_source_returns_null: bool) -> Self {
        Self {
            stop_if_first_source_returns_null,
        }
    }
}

/// Query for one accumulated person: the username attribute set to the
/// person's name, then every current attribute of the person.
pub fn person_query(username_attribute: &str, person: &Person) -> Query {
    let mut query = match person.name() {
        Some(name) => seed_query(username_attribute, name),
        None => Query::new(),
    };
    for (name, values) in person.attributes() {
        query.insert(name.clone(), values.clone());
    }
    query
}

impl ChildQueryBuilder for CascadingStrategy {
    fn build_child_query(&self, ctx: &ChildContext<'_>) -> ChildQuery {
        let nothing_yet = ctx.accumulated.map_or(true, PersonSet::is_empty);

        if ctx.first_query || (nothing_yet && !self.stop_if_first_source_returns_null) {
            return ChildQuery::Seed;
        }
        if nothing_yet {
            debug!(
                source = %ctx.child.id(),
                "no results from earlier sources, halting cascade"
            );
            return ChildQuery::Halt;
        }

        let attribute = ctx.username_resolver.username_attribute_name();
        let queries = ctx
            .accumulated
            .into_iter()
            .flatten()
            .map(|person| person_query(attribute, person))
            .collect();
        ChildQuery::PerPerson(queries)
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Ordered aggregation over child sources.
///
/// Child failures that are [recoverable](ResolveError::is_recoverable) are
/// logged and skipped when `recover_exceptions` is on (the default) and
/// abort the whole call otherwise. With `stop_on_success`, the first child
/// that does not fail ends the iteration, whether or not it found anything.
pub struct AggregatingResolver<Q: ChildQueryBuilder = MergingStrategy> {
    id: String,
    tags: Vec<String>,
    sources: Vec<Arc<dyn AttributeSource>>,
    merger: Arc<dyn AttributeMerger>,
    query_builder: Q,
    recover_exceptions: bool,
    stop_on_success: bool,
    username_resolver: Arc<dyn UsernameResolver>,
}

/// Every child sees the seed; results are merged.
pub type MergingResolver = AggregatingResolver<MergingStrategy>;

/// Each child sees what earlier children found.
pub type CascadingResolver = AggregatingResolver<CascadingStrategy>;

impl MergingResolver {
    /// Merging resolver with a [`MultivaluedMerger`].
    pub fn new(sources: Vec<Arc<dyn AttributeSource>>) -> Self {
        Self::with_strategy(
            sources,
            MergingStrategy,
            Arc::new(MultivaluedMerger::new()),
        )
    }
}

impl CascadingResolver {
    /// Cascading resolver with a [`ReplacingMerger`], so later sources
    /// refine what earlier ones found.
    pub fn new(sources: Vec<Arc<dyn AttributeSource>>) -> Self {
        Self::with_strategy(sources, CascadingStrategy::default(), Arc::new(ReplacingMerger))
    }

    /// Halt the cascade when nothing has been found after the first source.
    pub fn with_stop_if_first_source_returns_null(mut self, stop: bool) -> Self {
        self.query_builder = CascadingStrategy::new(stop);
        self
    }
}

impl<Q: ChildQueryBuilder> AggregatingResolver<Q> {
    pub fn with_strategy(
        sources: Vec<Arc<dyn AttributeSource>>,
        query_builder: Q,
        merger: Arc<dyn AttributeMerger>,
    ) -> Self {
        Self {
            id: "aggregate".to_string(),
            tags: Vec::new(),
            sources,
            merger,
            query_builder,
            recover_exceptions: true,
            stop_on_success: false,
            username_resolver: Arc::new(SimpleUsernameResolver::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_merger(mut self, merger: Arc<dyn AttributeMerger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_recover_exceptions(mut self, recover: bool) -> Self {
        self.recover_exceptions = recover;
        self
    }

    pub fn with_stop_on_success(mut self, stop: bool) -> Self {
        self.stop_on_success = stop;
        self
    }

    pub fn with_username_resolver(mut self, resolver: Arc<dyn UsernameResolver>) -> Self {
        self.username_resolver = resolver;
        self
    }

    pub fn sources(&self) -> &[Arc<dyn AttributeSource>] {
        &self.sources
    }

    /// Look up one person by username.
    pub fn resolve_username(
        &self,
        uid: &str,
        filter: &dyn SourceFilter,
    ) -> Result<Option<Person>, ResolveError> {
        if uid.trim().is_empty() {
            return Err(ResolveError::invalid_argument("uid", "must not be empty"));
        }
        let seed = seed_query(self.username_resolver.username_attribute_name(), uid);
        self.resolve_one(&seed, filter)
    }

    fn merge_into(&self, accumulated: Option<PersonSet>, people: PersonSet) -> PersonSet {
        match accumulated {
            None => people,
            Some(base) => self.merger.merge_results(base, people),
        }
    }

    fn resolve_per_person(
        &self,
        child: &dyn AttributeSource,
        queries: &[Query],
        filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError> {
        let mut combined = None;
        for query in queries {
            if let Some(people) = child.resolve_many(query, filter)? {
                combined = Some(self.merge_into(combined, people));
            }
        }
        Ok(combined)
    }

    fn fold_names<F, M>(&self, filter: &dyn SourceFilter, ask: F, merge: M) -> Option<AttributeNames>
    where
        F: Fn(&dyn AttributeSource) -> Option<AttributeNames>,
        M: Fn(&dyn AttributeMerger, AttributeNames, &AttributeNames) -> AttributeNames,
    {
        let mut names: Option<AttributeNames> = None;
        for child in &self.sources {
            if !filter.choose(child.as_ref()) {
                continue;
            }
            if let Some(found) = ask(child.as_ref()) {
                names = Some(match names {
                    None => found,
                    Some(base) => merge(self.merger.as_ref(), base, &found),
                });
            }
            // Mirrors resolve_many: only the first consulted child counts.
            if self.stop_on_success {
                break;
            }
        }
        names
    }
}

impl<Q: ChildQueryBuilder> AttributeSource for AggregatingResolver<Q> {
    fn id(&self) -> &str {
        &self.id
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn resolve_many(
        &self,
        query: &Query,
        filter: &dyn SourceFilter,
    ) -> Result<Option<PersonSet>, ResolveError> {
        if self.sources.is_empty() {
            return Err(ResolveError::NotConfigured(format!(
                "resolver '{}' has no child sources",
                self.id
            )));
        }

        let mut result: Option<PersonSet> = None;
        let mut first_query = true;

        for child in &self.sources {
            let child = child.as_ref();
            if !filter.choose(child) {
                debug!(resolver = %self.id, source = %child.id(), "source rejected by filter");
                continue;
            }

            let plan = self.query_builder.build_child_query(&ChildContext {
                seed: query,
                first_query,
                child,
                accumulated: result.as_ref(),
                filter,
                username_resolver: self.username_resolver.as_ref(),
            });

            let outcome = match plan {
                ChildQuery::Halt => break,
                ChildQuery::Seed => child.resolve_many(query, filter),
                ChildQuery::PerPerson(queries) => self.resolve_per_person(child, &queries, filter),
            };

            let handled = match outcome {
                Ok(Some(people)) => {
                    debug!(
                        resolver = %self.id,
                        source = %child.id(),
                        count = people.len(),
                        "merging source results"
                    );
                    result = Some(self.merge_into(result.take(), people));
                    false
                }
                Ok(None) => {
                    debug!(resolver = %self.id, source = %child.id(), "source could not evaluate query");
                    false
                }
                Err(e) if self.recover_exceptions && e.is_recoverable() => {
                    warn!(
                        resolver = %self.id,
                        source = %child.id(),
                        error = %e,
                        "recovered from source failure, continuing with remaining sources"
                    );
                    true
                }
                Err(e) => return Err(e),
            };

            if self.stop_on_success && !handled {
                debug!(resolver = %self.id, source = %child.id(), "stop on success");
                break;
            }
            first_query = false;
        }

        Ok(result)
    }

    fn possible_result_attribute_names(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.fold_names(
            filter,
            |child| child.possible_result_attribute_names(filter),
            |merger, base, found| merger.merge_possible_user_attribute_names(base, found),
        )
    }

    fn available_query_attributes(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.fold_names(
            filter,
            |child| child.available_query_attributes(filter),
            |merger, base, found| merger.merge_available_query_attributes(base, found),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::AttributeMap;
    use crate::source::{ChooseById, ALWAYS};
    use serde_json::json;
    use std::sync::Mutex;

    enum Outcome {
        Null,
        People(Vec<Person>),
        Fail,
    }

    struct ScriptedSource {
        id: String,
        outcome: Outcome,
        names: Option<AttributeNames>,
        seen: Mutex<Vec<Query>>,
    }

    impl ScriptedSource {
        fn new(id: &str, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                outcome,
                names: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn with_names(id: &str, names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                outcome: Outcome::Null,
                names: Some(names.iter().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl AttributeSource for ScriptedSource {
        fn id(&self) -> &str {
            &self.id
        }

        fn resolve_many(
            &self,
            query: &Query,
            _filter: &dyn SourceFilter,
        ) -> Result<Option<PersonSet>, ResolveError> {
            self.seen.lock().unwrap().push(query.clone());
            match &self.outcome {
                Outcome::Null => Ok(None),
                Outcome::People(people) => Ok(Some(people.iter().cloned().collect())),
                Outcome::Fail => Err(ResolveError::source_failure(&self.id, "backend down")),
            }
        }

        fn possible_result_attribute_names(&self, _filter: &dyn SourceFilter) -> Option<AttributeNames> {
            self.names.clone()
        }
    }

    fn person(name: &str, entries: &[(&str, &str)]) -> Person {
        let attrs: AttributeMap = entries
            .iter()
            .map(|(k, v)| (k.to_string(), Some(vec![json!(v)])))
            .collect();
        Person::named(name, attrs)
    }

    fn sources(list: &[&Arc<ScriptedSource>]) -> Vec<Arc<dyn AttributeSource>> {
        list.iter()
            .map(|s| Arc::clone(*s) as Arc<dyn AttributeSource>)
            .collect()
    }

    fn cascade_values<'a>(query: &'a Query, attribute: &str) -> Option<&'a [serde_json::Value]> {
        query.get(attribute)?.as_deref()
    }

    fn seed() -> Query {
        seed_query("username", "edalquist")
    }

    #[test]
    fn test_no_sources_is_not_configured() {
        let resolver = MergingResolver::new(Vec::new());
        assert!(matches!(
            resolver.resolve_many(&seed(), &ALWAYS),
            Err(ResolveError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_null_and_empty_results_differ() {
        let null = ScriptedSource::new("null", Outcome::Null);
        let empty = ScriptedSource::new("empty", Outcome::People(Vec::new()));

        let only_null = MergingResolver::new(sources(&[&null]));
        assert_eq!(only_null.resolve_many(&seed(), &ALWAYS).unwrap(), None);

        let only_empty = MergingResolver::new(sources(&[&empty]));
        let result = only_empty.resolve_many(&seed(), &ALWAYS).unwrap();
        assert_eq!(result, Some(PersonSet::new()));
    }

    #[test]
    fn test_merges_all_children_in_order() {
        let a = ScriptedSource::new("a", Outcome::People(vec![person("p1", &[("mail", "1@x")])]));
        let b = ScriptedSource::new("b", Outcome::People(vec![person("p1", &[("mail", "2@x")])]));
        let c = ScriptedSource::new("c", Outcome::People(vec![person("p2", &[])]));

        let resolver = MergingResolver::new(sources(&[&a, &b, &c]));
        let result = resolver.resolve_many(&seed(), &ALWAYS).unwrap().unwrap();
        assert_eq!(result.len(), 2);
        let p1 = result.get_index(0).unwrap();
        assert_eq!(p1.attribute_values("mail").unwrap(), &vec![json!("1@x"), json!("2@x")]);
    }

    #[test]
    fn test_stop_on_success_fail_over() {
        let a = ScriptedSource::new("a", Outcome::Fail);
        let b = ScriptedSource::new("b", Outcome::People(vec![person("p1", &[])]));
        let c = ScriptedSource::new("c", Outcome::People(vec![person("p2", &[])]));

        let failover = MergingResolver::new(sources(&[&a, &b, &c])).with_stop_on_success(true);
        let result = failover.resolve_many(&seed(), &ALWAYS).unwrap().unwrap();
        assert_eq!(result.iter().map(|p| p.name().unwrap()).collect::<Vec<_>>(), vec!["p1"]);
        assert_eq!(c.calls(), 0);

        let merged = MergingResolver::new(sources(&[&a, &b, &c]));
        let result = merged.resolve_many(&seed(), &ALWAYS).unwrap().unwrap();
        assert_eq!(
            result.iter().map(|p| p.name().unwrap()).collect::<Vec<_>>(),
            vec!["p1", "p2"]
        );
    }

    #[test]
    fn test_stop_on_success_counts_null_as_success() {
        let a = ScriptedSource::new("a", Outcome::Null);
        let b = ScriptedSource::new("b", Outcome::People(vec![person("p1", &[])]));
        let resolver = MergingResolver::new(sources(&[&a, &b])).with_stop_on_success(true);
        assert_eq!(resolver.resolve_many(&seed(), &ALWAYS).unwrap(), None);
        assert_eq!(b.calls(), 0);
    }

    #[test]
    fn test_failure_propagates_without_recovery() {
        let a = ScriptedSource::new("a", Outcome::People(vec![person("p1", &[])]));
        let b = ScriptedSource::new("b", Outcome::Fail);
        let c = ScriptedSource::new("c", Outcome::People(vec![person("p2", &[])]));

        let resolver = MergingResolver::new(sources(&[&a, &b, &c])).with_recover_exceptions(false);
        let result = resolver.resolve_many(&seed(), &ALWAYS);
        assert!(matches!(result, Err(ResolveError::Source { ref source_id, .. }) if source_id == "b"));
        assert_eq!(c.calls(), 0);
    }

    #[test]
    fn test_filter_skips_children() {
        let a = ScriptedSource::new("a", Outcome::People(vec![person("p1", &[])]));
        let b = ScriptedSource::new("b", Outcome::People(vec![person("p2", &[])]));
        let resolver = MergingResolver::new(sources(&[&a, &b]));
        let result = resolver
            .resolve_many(&seed(), &ChooseById::new(["b"]))
            .unwrap()
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(a.calls(), 0);
    }

    #[test]
    fn test_resolve_one_is_ambiguous_for_many_people() {
        let a = ScriptedSource::new("a", Outcome::People(vec![person("p1", &[]), person("p2", &[])]));
        let resolver = MergingResolver::new(sources(&[&a]));
        assert_eq!(
            resolver.resolve_one(&seed(), &ALWAYS),
            Err(ResolveError::AmbiguousResult { count: 2 })
        );
    }

    #[test]
    fn test_resolve_username_rejects_blank() {
        let a = ScriptedSource::new("a", Outcome::Null);
        let resolver = MergingResolver::new(sources(&[&a]));
        assert!(matches!(
            resolver.resolve_username("  ", &ALWAYS),
            Err(ResolveError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_cascade_feeds_results_forward() {
        let a = ScriptedSource::new(
            "a",
            Outcome::People(vec![person("edalquist", &[("studentId", "123")])]),
        );
        let b = ScriptedSource::new(
            "b",
            Outcome::People(vec![person("edalquist", &[("major", "CS")])]),
        );

        let resolver = CascadingResolver::new(sources(&[&a, &b]));
        let result = resolver.resolve_many(&seed(), &ALWAYS).unwrap().unwrap();
        let ed = result.get_index(0).unwrap();
        assert_eq!(ed.attribute_value("studentId"), Some(&json!("123")));
        assert_eq!(ed.attribute_value("major"), Some(&json!("CS")));

        let sent = b.seen.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(cascade_values(&sent[0], "studentId"), Some(&[json!("123")][..]));
        assert_eq!(cascade_values(&sent[0], "username"), Some(&[json!("edalquist")][..]));
    }

    #[test]
    fn test_cascade_queries_each_accumulated_person() {
        let a = ScriptedSource::new("a", Outcome::People(vec![person("p1", &[]), person("p2", &[])]));
        let b = ScriptedSource::new("b", Outcome::Null);
        let resolver = CascadingResolver::new(sources(&[&a, &b]));
        resolver.resolve_many(&seed(), &ALWAYS).unwrap();
        assert_eq!(b.calls(), 2);
    }

    #[test]
    fn test_cascade_halts_when_first_source_finds_nothing() {
        let a = ScriptedSource::new("a", Outcome::Null);
        let b = ScriptedSource::new("b", Outcome::People(vec![person("p1", &[])]));

        let halting = CascadingResolver::new(sources(&[&a, &b])).with_stop_if_first_source_returns_null(true);
        assert_eq!(halting.resolve_many(&seed(), &ALWAYS).unwrap(), None);
        assert_eq!(b.calls(), 0);

        let continuing = CascadingResolver::new(sources(&[&a, &b]));
        let result = continuing.resolve_many(&seed(), &ALWAYS).unwrap().unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(b.seen.lock().unwrap()[0], seed());
    }

    #[test]
    fn test_attribute_names_are_unioned() {
        let a = ScriptedSource::with_names("a", &["mail", "cn"]);
        let b = ScriptedSource::new("b", Outcome::Null);
        let c = ScriptedSource::with_names("c", &["cn", "phone"]);
        let resolver = MergingResolver::new(sources(&[&a, &b, &c]));
        let names = resolver.possible_result_attribute_names(&ALWAYS).unwrap();
        assert_eq!(names.iter().collect::<Vec<_>>(), vec!["mail", "cn", "phone"]);
        assert_eq!(resolver.available_query_attributes(&ALWAYS), None);
    }

    #[test]
    fn test_attribute_names_follow_stop_on_success() {
        let a = ScriptedSource::with_names("a", &["mail"]);
        let b = ScriptedSource::with_names("b", &["phone"]);
        let resolver = MergingResolver::new(sources(&[&a, &b])).with_stop_on_success(true);

        assert_eq!(resolver.resolve_many(&seed(), &ALWAYS).unwrap(), None);
        assert_eq!(b.calls(), 0);

        let names = resolver.possible_result_attribute_names(&ALWAYS).unwrap();
        assert_eq!(names.iter().collect::<Vec<_>>(), vec!["mail"]);

        let only_b = resolver
            .possible_result_attribute_names(&ChooseById::new(["b"]))
            .unwrap();
        assert_eq!(only_b.iter().collect::<Vec<_>>(), vec!["phone"]);
    }
}
