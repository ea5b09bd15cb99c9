//! Attribute merge strategies.
//!
//! When several sources contribute attributes for the same identity, an
//! [`AttributeMerger`] decides what happens on key collisions. Persons are
//! matched by identity (name) when whole result sets are merged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::person::{Person, PersonSet};
use crate::query::AttributeMap;
use crate::source::AttributeNames;

/// Strategy for combining attributes from several sources.
///
/// Mergers are stateless and may be shared between resolvers.
pub trait AttributeMerger: Send + Sync {
    /// Combine two attribute maps of the same person.
    fn merge_attributes(&self, base: AttributeMap, incoming: &AttributeMap) -> AttributeMap;

    /// Merge two result sets by identity.
    ///
    /// Persons without a counterpart pass through unchanged; persons present
    /// on both sides get [`merge_attributes`](Self::merge_attributes) applied.
    fn merge_results(&self, base: PersonSet, incoming: PersonSet) -> PersonSet {
        let mut merged = base;
        for person in incoming {
            match merged.get_index_of(&person) {
                Some(index) => {
                    let (name, attributes) = merged[index].clone().into_parts();
                    let combined = self.merge_attributes(attributes, person.attributes());
                    // Same identity, so the replacement keeps its position.
                    merged.replace(Person::new(name, combined));
                }
                None => {
                    merged.insert(person);
                }
            }
        }
        merged
    }

    /// Union of possible result attribute names.
    fn merge_possible_user_attribute_names(
        &self,
        base: AttributeNames,
        incoming: &AttributeNames,
    ) -> AttributeNames {
        let mut merged = base;
        merged.extend(incoming.iter().cloned());
        merged
    }

    /// Union of available query attribute names.
    fn merge_available_query_attributes(
        &self,
        base: AttributeNames,
        incoming: &AttributeNames,
    ) -> AttributeNames {
        let mut merged = base;
        merged.extend(incoming.iter().cloned());
        merged
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Concatenates value lists of colliding keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultivaluedMerger {
    distinct_values: bool,
}

impl MultivaluedMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop values already present when concatenating.
    pub fn with_distinct_values(distinct_values: bool) -> Self {
        Self { distinct_values }
    }
}

impl AttributeMerger for MultivaluedMerger {
    fn merge_attributes(&self, base: AttributeMap, incoming: &AttributeMap) -> AttributeMap {
        let mut merged = base;
        for (name, values) in incoming {
            let Some(values) = values else {
                merged.entry(name.clone()).or_insert(None);
                continue;
            };
            match merged.get_mut(name) {
                Some(Some(existing)) => {
                    for value in values {
                        if !self.distinct_values || !existing.contains(value) {
                            existing.push(value.clone());
                        }
                    }
                }
                Some(slot) => *slot = Some(values.clone()),
                None => {
                    merged.insert(name.clone(), Some(values.clone()));
                }
            }
        }
        merged
    }
}

/// Incoming values replace base values for colliding keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplacingMerger;

impl AttributeMerger for ReplacingMerger {
    fn merge_attributes(&self, base: AttributeMap, incoming: &AttributeMap) -> AttributeMap {
        let mut merged = base;
        for (name, values) in incoming {
            merged.insert(name.clone(), values.clone());
        }
        merged
    }
}

/// Incoming keys are added only when absent; collisions keep the base.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoncollidingMerger;

impl AttributeMerger for NoncollidingMerger {
    fn merge_attributes(&self, base: AttributeMap, incoming: &AttributeMap) -> AttributeMap {
        let mut merged = base;
        for (name, values) in incoming {
            if merged.contains_key(name) {
                debug!(attribute = %name, "dropping colliding attribute");
                continue;
            }
            merged.insert(name.clone(), values.clone());
        }
        merged
    }
}

/// Merger selection as written in configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergerKind {
    #[default]
    Multivalued,
    MultivaluedDistinct,
    Replacing,
    Noncolliding,
}

impl MergerKind {
    pub fn build(self) -> Arc<dyn AttributeMerger> {
        match self {
            Self::Multivalued => Arc::new(MultivaluedMerger::new()),
            Self::MultivaluedDistinct => Arc::new(MultivaluedMerger::with_distinct_values(true)),
            Self::Replacing => Arc::new(ReplacingMerger),
            Self::Noncolliding => Arc::new(NoncollidingMerger),
        }
    }
}

impl std::fmt::Display for MergerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Multivalued => write!(f, "multivalued"),
            Self::MultivaluedDistinct => write!(f, "multivalued_distinct"),
            Self::Replacing => write!(f, "replacing"),
            Self::Noncolliding => write!(f, "noncolliding"),
        }
    }
}
