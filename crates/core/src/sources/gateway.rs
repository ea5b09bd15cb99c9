//! Pattern-gated delegation.

use std::sync::Arc;

use indexmap::IndexMap;
use regex_lite::Regex;
use tracing::debug;

use crate::errors::ResolveError;
use crate::person::PersonSet;
use crate::query::{render_value, Query};
use crate::source::{AttributeNames, AttributeSource, SourceFilter};

/// Forwards a query to its delegate only when query attributes match
/// configured patterns; otherwise answers "could not evaluate".
///
/// With `match_all` (the default) every pattern must match; without it one
/// is enough. A pattern matches when any value of its attribute matches.
pub struct RegexGatewaySource {
    inner: Arc<dyn AttributeSource>,
    patterns: IndexMap<String, Regex>,
    match_all: bool,
}

impl RegexGatewaySource {
    pub fn new(inner: Arc<dyn AttributeSource>) -> Self {
        Self {
            inner,
            patterns: IndexMap::new(),
            match_all: true,
        }
    }

    /// Require `attribute` to match `pattern`. Rejects invalid patterns.
    pub fn with_pattern(
        mut self,
        attribute: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, ResolveError> {
        let attribute = attribute.into();
        let regex = Regex::new(pattern).map_err(|e| {
            ResolveError::invalid_argument(attribute.clone(), format!("bad pattern: {e}"))
        })?;
        self.patterns.insert(attribute, regex);
        Ok(self)
    }

    pub fn with_match_all(mut self, match_all: bool) -> Self {
        self.match_all = match_all;
        self
    }

    fn attribute_matches(query: &Query, attribute: &str, regex: &Regex) -> bool {
        query
            .get(attribute)
            .and_then(Option::as_ref)
            .map_or(false, |values| {
                values
                    .iter()
                    .filter_map(render_value)
                    .any(|value| regex.is_match(&value))
            })
    }

    fn admits(&self, query: &Query) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let mut results = self
            .patterns
            .iter()
            .map(|(attribute, regex)| Self::attribute_matches(query, attribute, regex));
        if self.match_all {
            results.all(|matched| matched)
        } else {
            results.any(|matched| matched)
        }
    }
}

impl AttributeSource for RegexGatewaySource {
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
        if !self.admits(query) {
            debug!(source = %self.inner.id(), "query rejected by gateway patterns");
            return Ok(None);
        }
        self.inner.resolve_many(query, filter)
    }

    fn possible_result_attribute_names(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.inner.possible_result_attribute_names(filter)
    }

    fn available_query_attributes(&self, filter: &dyn SourceFilter) -> Option<AttributeNames> {
        self.inner.available_query_attributes(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::seed_query;
    use crate::source::ALWAYS;
    use crate::sources::EchoSource;

    fn gateway() -> RegexGatewaySource {
        RegexGatewaySource::new(Arc::new(EchoSource::new("echo")))
            .with_pattern("username", "^[a-z]+$")
            .unwrap()
    }

    #[test]
    fn test_matching_query_is_forwarded() {
        let result = gateway()
            .resolve_many(&seed_query("username", "jdoe"), &ALWAYS)
            .unwrap();
        assert_eq!(result.map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_non_matching_query_cannot_run() {
        assert_eq!(
            gateway().resolve_many(&seed_query("username", "J.Doe"), &ALWAYS),
            Ok(None)
        );
        assert_eq!(gateway().resolve_many(&Query::new(), &ALWAYS), Ok(None));
    }

    #[test]
    fn test_match_any() {
        let gateway = gateway()
            .with_pattern("mail", "@example\\.edu$")
            .unwrap()
            .with_match_all(false);
        let mut query = seed_query("username", "J.Doe");
        query.insert("mail".into(), Some(vec!["jd@example.edu".into()]));
        assert!(gateway.resolve_many(&query, &ALWAYS).unwrap().is_some());
    }

    #[test]
    fn test_invalid_pattern() {
        let result = RegexGatewaySource::new(Arc::new(EchoSource::new("echo"))).with_pattern("uid", "(");
        assert!(matches!(result, Err(ResolveError::InvalidArgument { .. })));
    }
}
