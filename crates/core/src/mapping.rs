//! Attribute-name translation between callers and backing stores.
//!
//! Two independent many-to-many mappings are supported:
//!
//! - **query mapping**: caller attribute name -> store attribute name(s),
//!   applied before a query reaches a store;
//! - **result mapping**: store attribute name -> caller attribute name(s),
//!   applied to every person the store returns.
//!
//! In both, a `None` target set passes the attribute through under its
//! original name and an attribute missing from the mapping is dropped.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::case::{canonicalize_str, CaseCanonicalizationMode, CaseCanonicalizer, CaseLocale};
use crate::errors::ResolveError;
use crate::person::Person;
use crate::query::{first_value, render_value, AttributeMap, AttributeValues, Query};
use crate::source::AttributeNames;
use crate::username::{SimpleUsernameResolver, UsernameResolver};

/// Normalized mapping: source name -> target names (`None` = same name).
pub type AttributeMapping = IndexMap<String, Option<IndexSet<String>>>;

/// Suffix of a result target that requests key-family passthrough.
pub const FAMILY_MARKER: char = ';';

/// A mapping target as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MappingTarget {
    /// `mail = "email"`
    Name(String),
    /// `mail = ["email", "mail"]`
    Names(Vec<String>),
    /// `mail = true` passes `mail` through unchanged.
    Passthrough(bool),
}

/// Mapping as written in configuration, before normalization.
pub type RawAttributeMapping = IndexMap<String, Option<MappingTarget>>;

/// Normalize a configured mapping into name -> set-of-names form.
///
/// Fails with [`ResolveError::InvalidMapping`] on an empty key, an empty
/// target name, or `false` as a target.
pub fn normalize_mapping(raw: &RawAttributeMapping) -> Result<AttributeMapping, ResolveError> {
    let mut mapping = AttributeMapping::with_capacity(raw.len());
    for (key, target) in raw {
        if key.is_empty() {
            return Err(ResolveError::InvalidMapping(
                "attribute mapping keys must not be empty".into(),
            ));
        }
        let targets = match target {
            None | Some(MappingTarget::Passthrough(true)) => None,
            Some(MappingTarget::Passthrough(false)) => {
                return Err(ResolveError::InvalidMapping(format!(
                    "'{key}' maps to false; use a name, a list of names or true"
                )))
            }
            Some(MappingTarget::Name(name)) => Some(target_set(key, [name.as_str()])?),
            Some(MappingTarget::Names(names)) => {
                Some(target_set(key, names.iter().map(String::as_str))?)
            }
        };
        mapping.insert(key.clone(), targets);
    }
    Ok(mapping)
}

fn target_set<'a, I>(key: &str, names: I) -> Result<IndexSet<String>, ResolveError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut set = IndexSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ResolveError::InvalidMapping(format!(
                "'{key}' maps to an empty attribute name"
            )));
        }
        set.insert(name.to_string());
    }
    Ok(set)
}

fn validate_mapping(mapping: &AttributeMapping) -> Result<(), ResolveError> {
    for (key, targets) in mapping {
        if key.is_empty() {
            return Err(ResolveError::InvalidMapping(
                "attribute mapping keys must not be empty".into(),
            ));
        }
        if let Some(targets) = targets {
            if targets.iter().any(String::is_empty) {
                return Err(ResolveError::InvalidMapping(format!(
                    "'{key}' maps to an empty attribute name"
                )));
            }
        }
    }
    Ok(())
}

/// Appends `values` under `name`, extending any values already there.
fn append_values(target: &mut AttributeMap, name: &str, values: Option<AttributeValues>) {
    let Some(existing) = target.get_mut(name) else {
        target.insert(name.to_string(), values);
        return;
    };
    if let Some(list) = existing.as_mut() {
        if let Some(values) = values {
            list.extend(values);
        }
    } else {
        *existing = values;
    }
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Translates queries on the way in and persons on the way out.
pub trait AttributeMapper: Send + Sync {
    /// Build the store-side query. `None` means the store cannot be asked.
    fn map_query(&self, query: &Query) -> Option<Query>;

    /// Rename and canonicalize a store-side person for callers.
    fn map_result(&self, person: &Person) -> Person;

    /// Caller-facing result names, or `None` when unknown.
    fn mapped_result_attribute_names(&self) -> Option<AttributeNames> {
        None
    }

    /// Caller-facing query names, or `None` when unknown.
    fn mapped_query_attribute_names(&self) -> Option<AttributeNames> {
        None
    }
}

/// Configurable [`AttributeMapper`].
///
/// Query values are canonicalized under their caller-side name; result values
/// under their caller-side (target) name. The username has its own,
/// independent canonicalization setting.
#[derive(Clone)]
pub struct AttributeNameMapper {
    query_mapping: Option<AttributeMapping>,
    result_mapping: Option<AttributeMapping>,
    require_all_query_attributes: bool,
    use_all_query_attributes: bool,
    query_case: CaseCanonicalizer,
    result_case: CaseCanonicalizer,
    username_case: Option<CaseCanonicalizationMode>,
    username_locale: CaseLocale,
    unmapped_username_attribute: Option<String>,
    username_resolver: Arc<dyn UsernameResolver>,
    family_passthrough: bool,
}

impl Default for AttributeNameMapper {
    fn default() -> Self {
        Self {
            query_mapping: None,
            result_mapping: None,
            require_all_query_attributes: false,
            use_all_query_attributes: true,
            query_case: CaseCanonicalizer::disabled(),
            result_case: CaseCanonicalizer::disabled(),
            username_case: None,
            username_locale: CaseLocale::Root,
            unmapped_username_attribute: None,
            username_resolver: Arc::new(SimpleUsernameResolver::default()),
            family_passthrough: false,
        }
    }
}

impl std::fmt::Debug for AttributeNameMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeNameMapper")
            .field("query_mapping", &self.query_mapping)
            .field("result_mapping", &self.result_mapping)
            .field("require_all_query_attributes", &self.require_all_query_attributes)
            .field("use_all_query_attributes", &self.use_all_query_attributes)
            .field("username_case", &self.username_case)
            .field(
                "username_attribute",
                &self.username_resolver.username_attribute_name(),
            )
            .field("family_passthrough", &self.family_passthrough)
            .finish_non_exhaustive()
    }
}

impl AttributeNameMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query mapping. Rejects empty names.
    pub fn with_query_mapping(mut self, mapping: AttributeMapping) -> Result<Self, ResolveError> {
        validate_mapping(&mapping)?;
        self.query_mapping = Some(mapping);
        Ok(self)
    }

    /// Set the result mapping. Rejects empty names.
    pub fn with_result_mapping(mut self, mapping: AttributeMapping) -> Result<Self, ResolveError> {
        validate_mapping(&mapping)?;
        self.result_mapping = Some(mapping);
        Ok(self)
    }

    /// Refuse to build a query unless every mapped attribute is present.
    pub fn require_all_query_attributes(mut self, require: bool) -> Self {
        self.require_all_query_attributes = require;
        self
    }

    /// Without a query mapping, pass every query attribute through (`true`,
    /// the default) or none at all (`false`).
    pub fn use_all_query_attributes(mut self, use_all: bool) -> Self {
        self.use_all_query_attributes = use_all;
        self
    }

    pub fn with_query_case(mut self, canonicalizer: CaseCanonicalizer) -> Self {
        self.query_case = canonicalizer;
        self
    }

    pub fn with_result_case(mut self, canonicalizer: CaseCanonicalizer) -> Self {
        self.result_case = canonicalizer;
        self
    }

    /// Canonicalize the person name. `None` leaves it untouched.
    pub fn with_username_case(
        mut self,
        mode: Option<CaseCanonicalizationMode>,
        locale: CaseLocale,
    ) -> Self {
        self.username_case = mode;
        self.username_locale = locale;
        self
    }

    /// Raw attribute naming unnamed persons, overriding the username
    /// resolver's attribute.
    pub fn with_unmapped_username_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.unmapped_username_attribute = Some(attribute.into());
        self
    }

    pub fn with_username_resolver(mut self, resolver: Arc<dyn UsernameResolver>) -> Self {
        self.username_resolver = resolver;
        self
    }

    /// Enable the legacy key-family passthrough: a result mapping whose only
    /// target ends in [`FAMILY_MARKER`] copies every raw attribute named
    /// `<source>;...`, unchanged. The bare `<source>` key is not copied.
    pub fn with_family_passthrough(mut self, enabled: bool) -> Self {
        self.family_passthrough = enabled;
        self
    }

    pub fn username_resolver(&self) -> &Arc<dyn UsernameResolver> {
        &self.username_resolver
    }

    fn canonicalize_username(&self, name: &str) -> String {
        match self.username_case {
            Some(mode) => canonicalize_str(name, mode, self.username_locale),
            None => name.to_string(),
        }
    }

    fn is_family_target(&self, targets: &Option<IndexSet<String>>) -> bool {
        self.family_passthrough
            && matches!(targets, Some(t) if t.len() == 1
                && t.iter().all(|name| name.ends_with(FAMILY_MARKER)))
    }

    fn map_result_attributes(&self, raw: &AttributeMap) -> AttributeMap {
        let Some(mapping) = &self.result_mapping else {
            if !self.result_case.is_enabled() {
                return raw.clone();
            }
            return raw
                .iter()
                .map(|(name, values)| {
                    (name.clone(), self.result_case.canonicalize(name, values.as_ref()))
                })
                .collect();
        };

        let mut mapped = AttributeMap::new();
        for (source, targets) in mapping {
            if self.is_family_target(targets) {
                let prefix = format!("{source}{FAMILY_MARKER}");
                for (name, values) in raw {
                    if name.starts_with(&prefix) {
                        mapped.insert(name.clone(), values.clone());
                    }
                }
                continue;
            }

            let Some(values) = raw.get(source) else {
                continue;
            };
            match targets {
                None => {
                    let values = self.result_case.canonicalize(source, values.as_ref());
                    append_values(&mut mapped, source, values);
                }
                Some(targets) => {
                    for target in targets {
                        let values = self.result_case.canonicalize(target, values.as_ref());
                        append_values(&mut mapped, target, values);
                    }
                }
            }
        }
        mapped
    }
}

impl AttributeMapper for AttributeNameMapper {
    fn map_query(&self, query: &Query) -> Option<Query> {
        let Some(mapping) = &self.query_mapping else {
            if !self.use_all_query_attributes {
                return Some(Query::new());
            }
            if query.is_empty() {
                debug!("empty query with no query mapping, nothing to ask");
                return None;
            }
            return Some(
                query
                    .iter()
                    .map(|(name, values)| {
                        (name.clone(), self.query_case.canonicalize(name, values.as_ref()))
                    })
                    .collect(),
            );
        };

        let mut mapped = Query::new();
        for (attribute, targets) in mapping {
            let Some(values) = query.get(attribute) else {
                if self.require_all_query_attributes {
                    debug!(attribute, "required query attribute missing, cannot build query");
                    return None;
                }
                continue;
            };
            let values = self.query_case.canonicalize(attribute, values.as_ref());
            match targets {
                None => append_values(&mut mapped, attribute, values),
                Some(targets) => {
                    for target in targets {
                        append_values(&mut mapped, target, values.clone());
                    }
                }
            }
        }

        if mapped.is_empty() {
            debug!("no mapped query attributes present, cannot build query");
            return None;
        }
        Some(mapped)
    }

    fn map_result(&self, person: &Person) -> Person {
        let raw = person.attributes();
        let attributes = self.map_result_attributes(raw);

        let name = match person.name() {
            Some(name) => Some(self.canonicalize_username(name)),
            None => {
                let derived = match &self.unmapped_username_attribute {
                    Some(attribute) => first_value(raw.get(attribute).and_then(Option::as_ref)),
                    None => {
                        let attribute = self.username_resolver.username_attribute_name();
                        first_value(attributes.get(attribute).and_then(Option::as_ref))
                            .or_else(|| first_value(raw.get(attribute).and_then(Option::as_ref)))
                    }
                };
                derived
                    .and_then(render_value)
                    .map(|name| self.canonicalize_username(&name))
            }
        };

        Person::new(name, attributes)
    }

    fn mapped_result_attribute_names(&self) -> Option<AttributeNames> {
        let mapping = self.result_mapping.as_ref()?;
        let mut names = AttributeNames::new();
        for (source, targets) in mapping {
            match targets {
                Some(names_for) => names.extend(names_for.iter().cloned()),
                None => {
                    names.insert(source.clone());
                }
            }
        }
        Some(names)
    }

    fn mapped_query_attribute_names(&self) -> Option<AttributeNames> {
        self.query_mapping
            .as_ref()
            .map(|mapping| mapping.keys().cloned().collect())
    }
}
